//! Consumed-pointer registry per config consumer, and the unused-key report.
//!
//! A consumed pointer is a JSON Pointer prefix: `/poll` consumes
//! `/poll/interval_ms` and everything else under it. Any leaf not under a
//! consumed prefix is reported as unused.
//!
//! Keep this list in step with what [`crate::DashboardConfig`] actually
//! reads; do not consume whole sections speculatively.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigConsumer {
    /// Headless session runtime (REST, push, poller, mutations).
    Session,
    /// Session runtime plus the local HTTP bridge.
    Daemon,
}

impl ConfigConsumer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigConsumer::Session => "SESSION",
            ConfigConsumer::Daemon => "DAEMON",
        }
    }
}

pub fn consumed_pointers(consumer: ConfigConsumer) -> &'static [&'static str] {
    match consumer {
        ConfigConsumer::Session => SESSION,
        ConfigConsumer::Daemon => DAEMON,
    }
}

static SESSION: &[&str] = &[
    "/api/base_url",
    "/api/token_env",
    "/api/request_timeout_ms",
    "/push/url",
    "/push/reconnect_base_ms",
    "/push/reconnect_max_ms",
    "/poll/interval_ms",
    "/poll/max_backoff_ms",
    "/poll/stale_after_failures",
    "/poll/orders_page_limit",
    "/mutations/timeout_ms",
    "/notifications/fetch_limit",
    "/notifications/retained_cap",
];

static DAEMON: &[&str] = &[
    "/api/base_url",
    "/api/token_env",
    "/api/request_timeout_ms",
    "/push/url",
    "/push/reconnect_base_ms",
    "/push/reconnect_max_ms",
    "/poll/interval_ms",
    "/poll/max_backoff_ms",
    "/poll/stale_after_failures",
    "/poll/orders_page_limit",
    "/mutations/timeout_ms",
    "/notifications/fetch_limit",
    "/notifications/retained_cap",
    "/daemon/bind_addr",
];

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub consumer: String,
    /// Sorted, unique.
    pub consumed_prefixes: Vec<String>,
    /// Sorted, unique.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// How many pointers a `Fail` error lists.
const FAIL_PREVIEW: usize = 12;

/// Unused-key report for `consumer`. `Fail` turns a dirty report into an
/// error; `Warn` always returns the report.
pub fn report_unused_keys(
    consumer: ConfigConsumer,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let mut consumed_prefixes: Vec<String> = consumed_pointers(consumer)
        .iter()
        .map(|p| canonical_pointer(p))
        .collect();
    consumed_prefixes.sort();
    consumed_prefixes.dedup();

    let mut unused: Vec<String> = crate::leaves(config_json)
        .into_iter()
        .map(|(pointer, _)| pointer)
        .filter(|leaf| !consumed_prefixes.iter().any(|prefix| covers(prefix, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    if policy == UnusedKeyPolicy::Fail && !unused.is_empty() {
        let preview: Vec<&str> = unused.iter().take(FAIL_PREVIEW).map(String::as_str).collect();
        bail!(
            "CONFIG_UNUSED_KEYS (consumer={}): {} key(s) not read by this consumer: {}",
            consumer.as_str(),
            unused.len(),
            preview.join(", ")
        );
    }

    Ok(UnusedKeyReport {
        consumer: consumer.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    })
}

/// Leading "/" required; no trailing "/" unless it is just "/".
fn canonical_pointer(p: &str) -> String {
    let trimmed = p.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn covers(prefix: &str, leaf: &str) -> bool {
    prefix == "/"
        || leaf
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
