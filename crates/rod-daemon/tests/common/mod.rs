//! Minimal in-memory backend for the route scenarios.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use http_body_util::BodyExt;
use rod_daemon::{routes, state::AppState};
use rod_reconcile::{EngineConfig, ReconciledState};
use rod_schemas::{NotificationsPage, OrdersPage};
use rod_session::{ApiError, DashboardApi, PollerSettings, Session, SessionHandle, SessionSettings};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const T0: i64 = 1_700_000_000_000;

#[derive(Debug, Default)]
pub struct Backend {
    pub orders: Vec<Value>,
    pub notifications: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeApi {
    pub backend: Arc<Mutex<Backend>>,
}

impl FakeApi {
    pub fn seeded() -> Self {
        let api = Self::default();
        {
            let mut b = api.backend.lock().unwrap();
            b.orders.push(order_json("o1", "received"));
            b.orders.push(order_json("o2", "ready"));
            b.notifications.push(notification_json("n1", false));
            b.notifications.push(notification_json("n2", false));
        }
        api
    }
}

pub fn order_json(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "totalAmount": "12.00",
        "items": [{"name": "Soup", "quantity": 1, "unitPrice": "12.00"}],
        "createdAt": T0 - 60_000,
        "updatedAt": T0,
    })
}

pub fn notification_json(id: &str, read: bool) -> Value {
    json!({
        "id": id,
        "type": "order",
        "title": "New order",
        "message": format!("notification {id}"),
        "timestamp": T0,
        "read": read,
    })
}

#[async_trait::async_trait]
impl DashboardApi for FakeApi {
    async fn fetch_orders_page(&self, page: u32, _limit: u32) -> Result<OrdersPage, ApiError> {
        let b = self.backend.lock().unwrap();
        Ok(OrdersPage {
            items: b.orders.clone(),
            page,
            total_pages: 1,
        })
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Option<Value>, ApiError> {
        let b = self.backend.lock().unwrap();
        Ok(b.orders.iter().find(|o| o["id"] == json!(order_id)).cloned())
    }

    async fn fetch_notifications(&self, _limit: u32) -> Result<NotificationsPage, ApiError> {
        let b = self.backend.lock().unwrap();
        let unread = b.notifications.iter().filter(|n| n["read"] == json!(false)).count();
        Ok(NotificationsPage {
            items: b.notifications.clone(),
            unread_count: Some(unread as i64),
        })
    }

    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<Value, ApiError> {
        let mut b = self.backend.lock().unwrap();
        let order = b
            .orders
            .iter_mut()
            .find(|o| o["id"] == json!(order_id))
            .ok_or(ApiError::Http {
                status: 404,
                message: "no such order".to_string(),
            })?;
        order["status"] = json!(status);
        order["updatedAt"] = json!(T0 + 1_000);
        Ok(order.clone())
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        let mut b = self.backend.lock().unwrap();
        for n in b.notifications.iter_mut().filter(|n| n["id"] == json!(id)) {
            n["read"] = json!(true);
        }
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        let mut b = self.backend.lock().unwrap();
        for n in b.notifications.iter_mut() {
            n["read"] = json!(true);
        }
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        let mut b = self.backend.lock().unwrap();
        b.notifications.retain(|n| n["id"] != json!(id));
        Ok(())
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        self.backend.lock().unwrap().notifications.clear();
        Ok(())
    }
}

/// Session with one startup poll and no push socket.
pub fn start_session(api: FakeApi) -> SessionHandle {
    let settings = SessionSettings {
        engine: EngineConfig::default(),
        notifications_limit: 50,
        poll: Some(PollerSettings {
            interval: Duration::from_secs(3_600),
            max_backoff: Duration::from_secs(3_600),
            stale_after_failures: 3,
            orders_page_limit: 20,
            notifications_limit: 50,
        }),
        push: None,
    };
    Session::start(Arc::new(api), settings)
}

/// Router over a seeded session, returned once the first poll has landed.
pub async fn seeded_router() -> (Router, SessionHandle) {
    let session = start_session(FakeApi::seeded());
    wait_until(&session, |s| s.orders.len() == 2 && s.notifications.len() == 2).await;
    let st = Arc::new(AppState::new(session.clone(), "test-hash".to_string()));
    (routes::build_router(st), session)
}

pub async fn wait_until(
    session: &SessionHandle,
    pred: impl Fn(&ReconciledState) -> bool,
) -> Arc<ReconciledState> {
    let mut rx = session.subscribe();
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
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("state condition not reached")
}

/// Send a request through the router and collect the full body.
pub async fn call(router: Router, req: Request<Body>) -> (axum::http::StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, bytes)
}

pub fn parse_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("response is not valid JSON")
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
