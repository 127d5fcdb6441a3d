//! Typed view over the effective config JSON.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token_env: String,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            token_env: "ROD_API_TOKEN".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub url: String,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/socket".to_string(),
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed ticks before the stale-data indicator is raised.
    pub stale_after_failures: u32,
    pub orders_page_limit: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            max_backoff_ms: 120_000,
            stale_after_failures: 3,
            orders_page_limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationsConfig {
    pub timeout_ms: u64,
}

impl Default for MutationsConfig {
    fn default() -> Self {
        Self { timeout_ms: 8_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub fetch_limit: u32,
    pub retained_cap: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 50,
            retained_cap: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind_addr: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("invalid daemon.bind_addr '{}'", self.bind_addr))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub api: ApiConfig,
    pub push: PushConfig,
    pub poll: PollConfig,
    pub mutations: MutationsConfig,
    pub notifications: NotificationsConfig,
    pub daemon: DaemonConfig,
}

impl DashboardConfig {
    /// Missing sections and keys take their defaults; out-of-range values are
    /// rejected.
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let cfg: DashboardConfig =
            serde_json::from_value(config_json.clone()).context("config does not match schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            bail!("CONFIG_INVALID api.base_url must be http(s), got '{}'", self.api.base_url);
        }
        if !(self.push.url.starts_with("ws://") || self.push.url.starts_with("wss://")) {
            bail!("CONFIG_INVALID push.url must be ws(s), got '{}'", self.push.url);
        }
        if self.poll.interval_ms == 0 {
            bail!("CONFIG_INVALID poll.interval_ms must be > 0");
        }
        if self.poll.max_backoff_ms < self.poll.interval_ms {
            bail!(
                "CONFIG_INVALID poll.max_backoff_ms ({}) must be >= poll.interval_ms ({})",
                self.poll.max_backoff_ms,
                self.poll.interval_ms
            );
        }
        if self.push.reconnect_max_ms < self.push.reconnect_base_ms {
            bail!("CONFIG_INVALID push.reconnect_max_ms must be >= push.reconnect_base_ms");
        }
        if self.mutations.timeout_ms == 0 {
            bail!("CONFIG_INVALID mutations.timeout_ms must be > 0");
        }
        if self.notifications.retained_cap == 0 {
            bail!("CONFIG_INVALID notifications.retained_cap must be > 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    pub fn max_poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutations.timeout_ms)
    }
}
