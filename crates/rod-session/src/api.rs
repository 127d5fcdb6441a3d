//! REST boundary consumed by the session.
//!
//! Bodies come back as `rod-schemas` wire types or raw JSON; normalisation
//! to canonical records happens in `rod_reconcile::normalizer`.

use std::fmt;

use rod_schemas::{NotificationsPage, OrdersPage};
use serde_json::Value;

/// Failure of one REST call or of the push handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401. Polling and push stop until a new session is started.
    Unauthorized,
    /// Connect, timeout or transport failure. Retried with backoff.
    Transient(String),
    /// Non-success status other than 401.
    Http { status: u16, message: String },
    /// Body did not match the expected shape.
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "authentication rejected (401)"),
            ApiError::Transient(msg) => write!(f, "transient transport failure: {msg}"),
            ApiError::Http { status, message } => write!(f, "http {status}: {message}"),
            ApiError::Decode(msg) => write!(f, "response decode failed: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Dashboard backend endpoints the session depends on.
#[async_trait::async_trait]
pub trait DashboardApi: Send + Sync {
    /// `GET /orders?page=N&limit=L`, pages start at 1.
    async fn fetch_orders_page(&self, page: u32, limit: u32) -> Result<OrdersPage, ApiError>;

    /// `GET /orders/{id}`. `Ok(None)` on 404.
    async fn fetch_order(&self, order_id: &str) -> Result<Option<Value>, ApiError>;

    /// `GET /notifications?limit=N`.
    async fn fetch_notifications(&self, limit: u32) -> Result<NotificationsPage, ApiError>;

    /// `POST /orders/{id}/status`. Returns the updated order body.
    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<Value, ApiError>;

    /// `POST /notifications/{id}/read`.
    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError>;

    /// `POST /notifications/read-all`.
    async fn mark_all_notifications_read(&self) -> Result<(), ApiError>;

    /// `DELETE /notifications/{id}`.
    async fn delete_notification(&self, id: &str) -> Result<(), ApiError>;

    /// `DELETE /notifications/clear-all`.
    async fn clear_notifications(&self) -> Result<(), ApiError>;
}
