//! Poll results in canonical form, ready for
//! [`ReconciliationEngine::apply_snapshot`](crate::ReconciliationEngine::apply_snapshot).

use crate::types::{Notification, Order};

#[derive(Debug, Clone, PartialEq)]
pub struct OrdersSnapshot {
    pub orders: Vec<Order>,
    /// Every page was fetched. Only a complete listing may evict orders.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationsSnapshot {
    /// Newest first, as served.
    pub items: Vec<Notification>,
    pub unread_count: Option<u64>,
}

/// One poll tick. Either half may be missing when only one endpoint was
/// fetched (e.g. a notifications-only resync).
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Client clock when the fetch was issued. `0` means unknown and is
    /// rejected by the watermark.
    pub fetched_at_ms: i64,
    pub orders: Option<OrdersSnapshot>,
    pub notifications: Option<NotificationsSnapshot>,
}

impl Snapshot {
    pub fn orders(fetched_at_ms: i64, orders: Vec<Order>, complete: bool) -> Self {
        Self {
            fetched_at_ms,
            orders: Some(OrdersSnapshot { orders, complete }),
            notifications: None,
        }
    }

    pub fn notifications(
        fetched_at_ms: i64,
        items: Vec<Notification>,
        unread_count: Option<u64>,
    ) -> Self {
        Self {
            fetched_at_ms,
            orders: None,
            notifications: Some(NotificationsSnapshot {
                items,
                unread_count,
            }),
        }
    }
}

/// Result of re-fetching a single order (`GET /orders/{id}`).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResync {
    pub order_id: String,
    pub fetched_at_ms: i64,
    /// `None` when the server no longer knows the order.
    pub order: Option<Order>,
}
