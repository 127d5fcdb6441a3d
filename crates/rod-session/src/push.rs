//! Push channel: websocket reader with capped exponential reconnect.
//!
//! Frames are decoded to [`PushEnvelope`] and forwarded untouched;
//! normalisation happens on the session task. A 401 at the handshake stops
//! the reader for good.

use std::time::Duration;

use futures_util::StreamExt;
use rod_config::DashboardConfig;
use rod_schemas::PushEnvelope;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::poller::STOP_GRACE;

#[derive(Clone)]
pub struct PushSettings {
    pub url: String,
    pub token: Option<String>,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl std::fmt::Debug for PushSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSettings")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("reconnect_base", &self.reconnect_base)
            .field("reconnect_max", &self.reconnect_max)
            .finish()
    }
}

impl PushSettings {
    pub fn from_config(cfg: &DashboardConfig, token: Option<String>) -> Self {
        Self {
            url: cfg.push.url.clone(),
            token,
            reconnect_base: Duration::from_millis(cfg.push.reconnect_base_ms),
            reconnect_max: Duration::from_millis(cfg.push.reconnect_max_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Frame(PushEnvelope),
    Disconnected { reason: String },
    /// Handshake answered 401. No reconnect follows.
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushExit {
    Stopped,
    Unauthorized,
    SessionClosed,
}

pub struct PushClient;

impl PushClient {
    pub fn start<T>(settings: PushSettings, tx: mpsc::Sender<T>) -> PushHandle
    where
        T: From<PushEvent> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(settings, tx, stop_rx));
        PushHandle { stop_tx, task }
    }
}

pub struct PushHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<PushExit>,
}

impl PushHandle {
    /// Close the socket (if open) and wait for the reader to exit.
    pub async fn stop(mut self) -> PushExit {
        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(STOP_GRACE, &mut self.task).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(_)) => PushExit::Stopped,
            Err(_) => {
                self.task.abort();
                PushExit::Stopped
            }
        }
    }
}

enum ConnectError {
    Unauthorized,
    Other(String),
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(settings: &PushSettings) -> Result<Socket, ConnectError> {
    let mut req = settings
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectError::Other(e.to_string()))?;
    if let Some(token) = &settings.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ConnectError::Other("token is not a valid header value".to_string()))?;
        req.headers_mut().insert(AUTHORIZATION, value);
    }
    match connect_async(req).await {
        Ok((ws, _resp)) => Ok(ws),
        Err(WsError::Http(resp)) if resp.status() == StatusCode::UNAUTHORIZED => {
            Err(ConnectError::Unauthorized)
        }
        Err(e) => Err(ConnectError::Other(e.to_string())),
    }
}

async fn run<T>(settings: PushSettings, tx: mpsc::Sender<T>, mut stop: watch::Receiver<bool>) -> PushExit
where
    T: From<PushEvent> + Send + 'static,
{
    let mut backoff = Backoff::new(settings.reconnect_base, settings.reconnect_max);

    loop {
        let conn = tokio::select! {
            c = connect(&settings) => c,
            _ = stop.changed() => return PushExit::Stopped,
        };

        match conn {
            Ok(mut ws) => {
                backoff.reset();
                info!(url = %settings.url, "push connected");
                if tx.send(PushEvent::Connected.into()).await.is_err() {
                    return PushExit::SessionClosed;
                }

                let reason = loop {
                    let msg = tokio::select! {
                        m = ws.next() => m,
                        _ = stop.changed() => {
                            let _ = ws.close(None).await;
                            return PushExit::Stopped;
                        }
                    };
                    match msg {
                        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<PushEnvelope>(&txt) {
                            Ok(env) => {
                                debug!(event = %env.event, "push frame");
                                if tx.send(PushEvent::Frame(env).into()).await.is_err() {
                                    return PushExit::SessionClosed;
                                }
                            }
                            Err(e) => warn!(error = %e, "undecodable push frame dropped"),
                        },
                        Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break e.to_string(),
                    }
                };

                warn!(%reason, "push disconnected");
                if tx.send(PushEvent::Disconnected { reason }.into()).await.is_err() {
                    return PushExit::SessionClosed;
                }
            }
            Err(ConnectError::Unauthorized) => {
                warn!("push handshake rejected with 401; push suspended");
                let _ = tx.send(PushEvent::Unauthorized.into()).await;
                return PushExit::Unauthorized;
            }
            Err(ConnectError::Other(e)) => {
                debug!(error = %e, attempt = backoff.failures() + 1, "push connect failed");
            }
        }

        let delay = backoff.current();
        backoff.record_failure();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => return PushExit::Stopped,
        }
    }
}
