use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mutation::PendingMutation;
use crate::status::OrderStatus;

/// Cents per major currency unit. Amounts are integer minor units end to end.
pub const CENTS_SCALE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Server-assigned, immutable.
    pub id: String,
    /// Display id shown to staff (falls back to `id`).
    pub external_id: String,
    pub status: OrderStatus,
    pub total_amount_cents: i64,
    pub items: Vec<OrderItem>,
    pub customer_name: String,
    pub channel: String,
    pub created_at_ms: i64,
    /// Never decreases under reconciliation.
    pub updated_at_ms: i64,
    /// Bumped by the engine on every accepted change; not a server value.
    pub version: u64,
}

impl Order {
    /// Field-level equality ignoring the engine-assigned `version`.
    pub fn same_content(&self, other: &Order) -> bool {
        self.id == other.id
            && self.external_id == other.external_id
            && self.status == other.status
            && self.total_amount_cents == other.total_amount_cents
            && self.items == other.items
            && self.customer_name == other.customer_name
            && self.channel == other.channel
            && self.created_at_ms == other.created_at_ms
            && self.updated_at_ms == other.updated_at_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Unknown or missing priorities read as `Normal`.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("low") => Self::Low,
            Some("high") => Self::High,
            Some("urgent") | Some("critical") => Self::Urgent,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Globally unique.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub timestamp_ms: i64,
    pub read: bool,
    /// Opaque payload, passed through untouched.
    pub data: Value,
}

/// Where a change came from. Drives precedence in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Push,
    Poll,
    Optimistic,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Push => "push",
            Origin::Poll => "poll",
            Origin::Optimistic => "optimistic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Order,
    Notification,
}

/// Immutable view published after every applied change.
///
/// Observers compare `epoch` against the last one they rendered and skip the
/// work when it has not moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledState {
    /// Keyed by order id; optimistic statuses already substituted.
    pub orders: BTreeMap<String, Order>,
    /// Display order, newest first.
    pub notifications: Vec<Notification>,
    /// Always equals the number of `notifications` with `read == false`.
    pub unread_count: u64,
    pub epoch: u64,
    /// Polling has been failing past the configured threshold.
    pub stale: bool,
    pub pending_mutations: Vec<PendingMutation>,
}

impl ReconciledState {
    pub fn empty() -> Self {
        Self {
            orders: BTreeMap::new(),
            notifications: Vec::new(),
            unread_count: 0,
            epoch: 0,
            stale: false,
            pending_mutations: Vec::new(),
        }
    }

    pub fn order(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn notification(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }
}
