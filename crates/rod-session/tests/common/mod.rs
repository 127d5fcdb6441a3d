//! In-memory dashboard backend shared by the session scenarios.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rod_reconcile::ReconciledState;
use rod_schemas::{NotificationsPage, OrdersPage};
use rod_session::{ApiError, DashboardApi, PollerSettings, SessionSettings};
use serde_json::{json, Value};
use tokio::sync::watch;

pub const T0: i64 = 1_700_000_000_000;

pub fn order_json(id: &str, status: &str, updated_at_ms: i64) -> Value {
    json!({
        "id": id,
        "externalId": format!("#{id}"),
        "status": status,
        "totalAmount": "18.50",
        "items": [{"name": "Margherita", "quantity": 1, "unitPrice": "18.50"}],
        "customerName": "Rosa",
        "channel": "web",
        "createdAt": T0 - 60_000,
        "updatedAt": updated_at_ms,
    })
}

pub fn notification_json(id: &str, read: bool, ts_ms: i64) -> Value {
    json!({
        "id": id,
        "type": "order",
        "priority": "normal",
        "title": "New order",
        "message": format!("Order for {id}"),
        "timestamp": ts_ms,
        "read": read,
    })
}

#[derive(Debug, Default)]
pub struct Backend {
    pub orders: BTreeMap<String, Value>,
    pub notifications: Vec<Value>,
    /// Next N order listings fail with a transport error.
    pub fail_polls: u32,
    pub unauthorized: bool,
    /// `POST /orders/{id}/status` waits this long before answering.
    pub status_delay: Option<Duration>,
    pub status_error: Option<ApiError>,
    pub read_error: Option<ApiError>,
    pub delete_error: Option<ApiError>,
    /// Server clock stamped on every write.
    pub server_now_ms: i64,
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeApi {
    pub backend: Arc<Mutex<Backend>>,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.with(|b| b.server_now_ms = T0);
        api
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Backend) -> R) -> R {
        let mut guard = self.backend.lock().unwrap();
        f(&mut guard)
    }

    pub fn add_order(&self, id: &str, status: &str) {
        self.with(|b| {
            let body = order_json(id, status, b.server_now_ms);
            b.orders.insert(id.to_string(), body);
        });
    }

    pub fn add_notification(&self, id: &str, read: bool, ts_ms: i64) {
        self.with(|b| b.notifications.insert(0, notification_json(id, read, ts_ms)));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|b| b.calls.clone())
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.with(|b| b.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        self.with(|b| {
            b.calls.push(call);
            if b.unauthorized {
                Err(ApiError::Unauthorized)
            } else {
                Ok(())
            }
        })
    }
}

#[async_trait::async_trait]
impl DashboardApi for FakeApi {
    async fn fetch_orders_page(&self, page: u32, _limit: u32) -> Result<OrdersPage, ApiError> {
        self.record(format!("GET /orders?page={page}"))?;
        self.with(|b| {
            if b.fail_polls > 0 {
                b.fail_polls -= 1;
                return Err(ApiError::Transient("connection refused".to_string()));
            }
            Ok(OrdersPage {
                items: b.orders.values().cloned().collect(),
                page,
                total_pages: 1,
            })
        })
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Option<Value>, ApiError> {
        self.record(format!("GET /orders/{order_id}"))?;
        Ok(self.with(|b| b.orders.get(order_id).cloned()))
    }

    async fn fetch_notifications(&self, _limit: u32) -> Result<NotificationsPage, ApiError> {
        self.record("GET /notifications".to_string())?;
        Ok(self.with(|b| {
            let unread = b
                .notifications
                .iter()
                .filter(|n| n["read"] == json!(false))
                .count();
            NotificationsPage {
                items: b.notifications.clone(),
                unread_count: Some(unread as i64),
            }
        }))
    }

    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<Value, ApiError> {
        self.record(format!("POST /orders/{order_id}/status {status}"))?;
        let delay = self.with(|b| b.status_delay);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.with(|b| {
            if let Some(e) = b.status_error.clone() {
                return Err(e);
            }
            b.server_now_ms += 1_000;
            let now = b.server_now_ms;
            let body = b
                .orders
                .get_mut(order_id)
                .ok_or(ApiError::Http {
                    status: 404,
                    message: "no such order".to_string(),
                })?;
            body["status"] = json!(status);
            body["updatedAt"] = json!(now);
            Ok(body.clone())
        })
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        self.record(format!("POST /notifications/{id}/read"))?;
        self.with(|b| {
            if let Some(e) = b.read_error.clone() {
                return Err(e);
            }
            for n in b.notifications.iter_mut().filter(|n| n["id"] == json!(id)) {
                n["read"] = json!(true);
            }
            Ok(())
        })
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.record("POST /notifications/read-all".to_string())?;
        self.with(|b| {
            if let Some(e) = b.read_error.clone() {
                return Err(e);
            }
            for n in b.notifications.iter_mut() {
                n["read"] = json!(true);
            }
            Ok(())
        })
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        self.record(format!("DELETE /notifications/{id}"))?;
        self.with(|b| {
            if let Some(e) = b.delete_error.clone() {
                return Err(e);
            }
            b.notifications.retain(|n| n["id"] != json!(id));
            Ok(())
        })
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        self.record("DELETE /notifications/clear-all".to_string())?;
        self.with(|b| {
            if let Some(e) = b.delete_error.clone() {
                return Err(e);
            }
            b.notifications.clear();
            Ok(())
        })
    }
}

/// One poll at startup, then effectively never again.
pub fn single_poll_settings() -> SessionSettings {
    SessionSettings {
        engine: rod_reconcile::EngineConfig::default(),
        notifications_limit: 50,
        poll: Some(PollerSettings {
            interval: Duration::from_secs(3_600),
            max_backoff: Duration::from_secs(3_600),
            stale_after_failures: 3,
            orders_page_limit: 20,
            notifications_limit: 50,
        }),
        push: None,
    }
}

/// Wait until the published state satisfies `pred`. Panics after a minute of
/// (possibly virtual) time.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<Arc<ReconciledState>>,
    pred: impl Fn(&ReconciledState) -> bool,
) -> Arc<ReconciledState> {
    let fut = async {
        loop {
            {
                let current = rx.borrow_and_update().clone();
                if pred(&current) {
                    return current;
                }
            }
            rx.changed().await.expect("session closed");
        }
    };
    tokio::time::timeout(Duration::from_secs(60), fut)
        .await
        .expect("state condition not reached")
}
