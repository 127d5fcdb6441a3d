//! Canonical change event.
//!
//! Every input to the engine, whether it came off the push socket, out of a
//! poll, or from a user action, is one of these. Events are consumed once and
//! dropped; the engine keeps entity state, not event history.

use serde::{Deserialize, Serialize};

use crate::status::OrderStatus;
use crate::types::{Notification, Order, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    OrderStatus,
    OrderCreated,
    NotificationCreated,
    NotificationRead,
    UnreadCount,
    NotificationRemoved,
    NotificationsCleared,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangePayload {
    /// Full order record. New orders are inserted; known orders are merged
    /// under the same status rules as [`ChangePayload::OrderStatus`].
    Order(Order),
    OrderStatus(OrderStatus),
    Notification(Notification),
    NotificationRead,
    /// Server-computed unread total.
    UnreadCount(u64),
    NotificationRemoved,
    NotificationsCleared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity_id: String,
    pub payload: ChangePayload,
    /// Per-source sequence number; `(origin, entity_id, source_seq)` is applied
    /// at most once. `None` opts out of dedupe.
    pub source_seq: Option<u64>,
    pub source_timestamp_ms: i64,
    pub origin: Origin,
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self.payload {
            ChangePayload::Order(_) => ChangeKind::OrderCreated,
            ChangePayload::OrderStatus(_) => ChangeKind::OrderStatus,
            ChangePayload::Notification(_) => ChangeKind::NotificationCreated,
            ChangePayload::NotificationRead => ChangeKind::NotificationRead,
            ChangePayload::UnreadCount(_) => ChangeKind::UnreadCount,
            ChangePayload::NotificationRemoved => ChangeKind::NotificationRemoved,
            ChangePayload::NotificationsCleared => ChangeKind::NotificationsCleared,
        }
    }

    pub fn order(order: Order, seq: Option<u64>, origin: Origin) -> Self {
        Self {
            entity_id: order.id.clone(),
            source_timestamp_ms: order.updated_at_ms,
            payload: ChangePayload::Order(order),
            source_seq: seq,
            origin,
        }
    }

    pub fn order_status(
        order_id: impl Into<String>,
        status: OrderStatus,
        seq: Option<u64>,
        ts_ms: i64,
        origin: Origin,
    ) -> Self {
        Self {
            entity_id: order_id.into(),
            payload: ChangePayload::OrderStatus(status),
            source_seq: seq,
            source_timestamp_ms: ts_ms,
            origin,
        }
    }

    pub fn notification(n: Notification, seq: Option<u64>, origin: Origin) -> Self {
        Self {
            entity_id: n.id.clone(),
            source_timestamp_ms: n.timestamp_ms,
            payload: ChangePayload::Notification(n),
            source_seq: seq,
            origin,
        }
    }

    pub fn notification_read(
        id: impl Into<String>,
        seq: Option<u64>,
        ts_ms: i64,
        origin: Origin,
    ) -> Self {
        Self {
            entity_id: id.into(),
            payload: ChangePayload::NotificationRead,
            source_seq: seq,
            source_timestamp_ms: ts_ms,
            origin,
        }
    }

    /// Unread totals are not about one notification; they share a fixed
    /// entity id so their sequence numbers dedupe against each other.
    pub fn unread_count(count: u64, seq: Option<u64>, ts_ms: i64, origin: Origin) -> Self {
        Self {
            entity_id: UNREAD_COUNT_ENTITY.to_string(),
            payload: ChangePayload::UnreadCount(count),
            source_seq: seq,
            source_timestamp_ms: ts_ms,
            origin,
        }
    }
}

pub const UNREAD_COUNT_ENTITY: &str = "notifications:unread_count";
