//! reqwest-backed [`DashboardApi`].
//!
//! The bearer token is passed in by the caller (resolved once at startup by
//! `rod_config::secrets`); it is never logged and `Debug` redacts it.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use rod_schemas::{NotificationsPage, OrdersPage, StatusUpdateRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::api::{ApiError, DashboardApi};

#[derive(Clone)]
pub struct HttpDashboardApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpDashboardApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDashboardApi")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl HttpDashboardApi {
    pub fn new(base_url: &str, token: Option<String>, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;
        check_status(resp).await
    }
}

async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ApiError::Http {
        status: status.as_u16(),
        message: truncate(&message, 200),
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ApiError::Transient(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[async_trait::async_trait]
impl DashboardApi for HttpDashboardApi {
    async fn fetch_orders_page(&self, page: u32, limit: u32) -> Result<OrdersPage, ApiError> {
        let page_s = page.to_string();
        let limit_s = limit.to_string();
        let req = self
            .http
            .get(self.url("/orders"))
            .query(&[("page", page_s.as_str()), ("limit", limit_s.as_str())]);
        let out: OrdersPage = decode(self.send(req).await?).await?;
        debug!(page, total_pages = out.total_pages, items = out.items.len(), "orders page");
        Ok(out)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Option<Value>, ApiError> {
        let req = self.http.get(self.url(&format!("/orders/{order_id}")));
        match self.send(req).await {
            Ok(resp) => decode(resp).await.map(Some),
            Err(ApiError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_notifications(&self, limit: u32) -> Result<NotificationsPage, ApiError> {
        let limit_s = limit.to_string();
        let req = self
            .http
            .get(self.url("/notifications"))
            .query(&[("limit", limit_s.as_str())]);
        decode(self.send(req).await?).await
    }

    async fn update_order_status(&self, order_id: &str, status: &str) -> Result<Value, ApiError> {
        let req = self
            .http
            .post(self.url(&format!("/orders/{order_id}/status")))
            .json(&StatusUpdateRequest {
                status: status.to_string(),
            });
        decode(self.send(req).await?).await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<(), ApiError> {
        let req = self.http.post(self.url(&format!("/notifications/{id}/read")));
        self.send(req).await.map(|_| ())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        let req = self.http.post(self.url("/notifications/read-all"));
        self.send(req).await.map(|_| ())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        let req = self.http.delete(self.url(&format!("/notifications/{id}")));
        self.send(req).await.map(|_| ())
    }

    async fn clear_notifications(&self) -> Result<(), ApiError> {
        let req = self.http.delete(self.url("/notifications/clear-all"));
        self.send(req).await.map(|_| ())
    }
}
