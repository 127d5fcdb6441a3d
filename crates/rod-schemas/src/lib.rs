//! rod-schemas
//!
//! Wire-level shapes for the dashboard backend: REST bodies and push-channel
//! payloads, exactly as the server sends them. Fields the backend has renamed
//! over time are accepted through serde aliases; every optional field is
//! `Option` so a partial payload still deserializes and the normalizer in
//! `rod-reconcile` decides what is fatal.
//!
//! No business logic lives here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderItem {
    #[serde(default, alias = "title", alias = "itemName")]
    pub name: Option<String>,
    #[serde(default, alias = "qty", alias = "count")]
    pub quantity: Option<i64>,
    /// Decimal string (`"12.50"`) or JSON number.
    #[serde(default, alias = "price", alias = "unit_price")]
    pub unit_price: Option<Value>,
}

/// Order record from `GET /orders`, `GET /orders/{id}`, the
/// `POST /orders/{id}/status` response, and `order:new` pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    #[serde(default, alias = "_id", alias = "orderId", alias = "order_id")]
    pub id: Option<String>,
    #[serde(
        default,
        alias = "orderNumber",
        alias = "displayId",
        alias = "external_id"
    )]
    pub external_id: Option<String>,
    #[serde(default, alias = "orderStatus", alias = "state")]
    pub status: Option<String>,
    /// Decimal string or JSON number, major currency units.
    #[serde(default, alias = "total", alias = "total_amount")]
    pub total_amount: Option<Value>,
    #[serde(default)]
    pub items: Vec<RawOrderItem>,
    #[serde(default, alias = "customer", alias = "customer_name")]
    pub customer_name: Option<String>,
    #[serde(default, alias = "source", alias = "orderType")]
    pub channel: Option<String>,
    /// RFC 3339 string or epoch milliseconds.
    #[serde(default, alias = "created_at")]
    pub created_at: Option<Value>,
    /// RFC 3339 string or epoch milliseconds.
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<Value>,
    #[serde(default, alias = "sequence")]
    pub seq: Option<u64>,
}

/// One page of `GET /orders?page=N`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersPage {
    #[serde(default, alias = "orders", alias = "data")]
    pub items: Vec<Value>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page", alias = "pages", alias = "total_pages")]
    pub total_pages: u32,
}

fn first_page() -> u32 {
    1
}

/// Push payload for an order status change (`order:status`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderStatusChange {
    #[serde(default, alias = "id", alias = "order_id", alias = "_id")]
    pub order_id: Option<String>,
    #[serde(default, alias = "newStatus")]
    pub status: Option<String>,
    #[serde(default, alias = "updated_at", alias = "timestamp")]
    pub updated_at: Option<Value>,
    #[serde(default, alias = "sequence")]
    pub seq: Option<u64>,
}

/// Body of `POST /orders/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    #[serde(default, alias = "_id", alias = "notificationId")]
    pub id: Option<String>,
    #[serde(default, rename = "type", alias = "kind", alias = "category")]
    pub kind: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "body")]
    pub message: Option<String>,
    /// RFC 3339 string or epoch milliseconds.
    #[serde(default, alias = "createdAt", alias = "created_at")]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "isRead", alias = "is_read")]
    pub read: Option<bool>,
    #[serde(default, alias = "payload")]
    pub data: Option<Value>,
    #[serde(default, alias = "sequence")]
    pub seq: Option<u64>,
}

/// Response of `GET /notifications?limit=N`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsPage {
    #[serde(default, alias = "notifications", alias = "data")]
    pub items: Vec<Value>,
    #[serde(default, alias = "unread_count", alias = "unread")]
    pub unread_count: Option<i64>,
}

/// Push payload for `notifications.unread_count.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUnreadCount {
    #[serde(default, alias = "count", alias = "unread_count", alias = "unread")]
    pub unread_count: Option<i64>,
    #[serde(default, alias = "updatedAt", alias = "updated_at")]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "sequence")]
    pub seq: Option<u64>,
}

/// Push payload for `notifications.read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotificationRead {
    #[serde(default, alias = "notificationId", alias = "notification_id")]
    pub id: Option<String>,
    #[serde(default, alias = "readAt", alias = "read_at")]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "sequence")]
    pub seq: Option<u64>,
}

// ---------------------------------------------------------------------------
// Push envelope
// ---------------------------------------------------------------------------

/// One text frame on the push socket: `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(alias = "type", alias = "name")]
    pub event: String,
    #[serde(default, alias = "payload")]
    pub data: Value,
}
