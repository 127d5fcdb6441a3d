//! rod-config
//!
//! Layered YAML configuration for the dashboard session runtime.
//!
//! - Docs merge in order: earlier docs are base, later docs override.
//! - Literal secrets are refused; YAML stores env var NAMES (see [`secrets`]).
//! - The effective config is canonicalised to JSON and hashed with SHA-256 so
//!   a running session can log exactly which config it started with.
//! - Leaves nobody reads are reported (see [`consumption`]).

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub mod consumption;
mod dashboard;
pub mod secrets;

pub use consumption::{
    consumed_pointers, report_unused_keys, ConfigConsumer, UnusedKeyPolicy, UnusedKeyReport,
};
pub use dashboard::{
    ApiConfig, DaemonConfig, DashboardConfig, MutationsConfig, NotificationsConfig, PollConfig,
    PushConfig,
};

/// Built-in defaults, always the first layer.
pub const DEFAULT_YAML: &str = include_str!("../defaults.yaml");

/// Leaf strings starting with one of these abort the load with
/// CONFIG_SECRET_DETECTED.
const TOKEN_SHAPES: &[&str] = &[
    "Bearer ",    // pasted Authorization header
    "Basic ",     // pasted basic-auth header
    "eyJ",        // JWT
    "sk_live",    // payment provider keys
    "sk_test",
    "-----BEGIN", // PEM
];

/// Shortest string the token check looks at.
const MIN_TOKEN_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    pub fn dashboard(&self) -> Result<DashboardConfig> {
        DashboardConfig::from_config_json(&self.config_json)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Defaults first, then each file in order.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let overlays = paths
        .iter()
        .map(|p| std::fs::read_to_string(p).with_context(|| format!("cannot read config {p}")))
        .collect::<Result<Vec<String>>>()?;

    let mut docs = Vec::with_capacity(overlays.len() + 1);
    docs.push(DEFAULT_YAML);
    docs.extend(overlays.iter().map(String::as_str));
    load_layered_yaml_from_strings(&docs)
}

/// Merge raw YAML docs without the built-in defaults.
pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut effective = Value::Object(Map::new());
    for (layer, raw) in yaml_docs.iter().enumerate() {
        let doc: serde_yaml::Value = serde_yaml::from_str(raw)
            .with_context(|| format!("invalid yaml in config layer {layer}"))?;
        // An empty file parses as null and overrides nothing.
        if doc.is_null() {
            continue;
        }
        let doc = serde_json::to_value(doc)
            .with_context(|| format!("config layer {layer} is not json-compatible"))?;
        overlay(&mut effective, doc);
    }

    if let Some(pointer) = first_token_like_leaf(&effective) {
        bail!("CONFIG_SECRET_DETECTED leaf={pointer} value=REDACTED");
    }

    // serde_json's default Map is key-ordered, so YAML key order never
    // reaches the hash.
    let canonical_json =
        serde_json::to_string(&effective).context("config does not serialize to json")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));

    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: effective,
    })
}

/// Objects merge key by key; anything else in `top` replaces `base`.
fn overlay(base: &mut Value, top: Value) {
    match (base, top) {
        (Value::Object(base_map), Value::Object(top_map)) => {
            for (key, top_val) in top_map {
                match base_map.get_mut(&key) {
                    Some(slot) => overlay(slot, top_val),
                    None => {
                        base_map.insert(key, top_val);
                    }
                }
            }
        }
        (slot, top) => *slot = top,
    }
}

fn first_token_like_leaf(config: &Value) -> Option<String> {
    leaves(config)
        .into_iter()
        .find(|(_, v)| v.as_str().is_some_and(is_token_like))
        .map(|(pointer, _)| pointer)
}

fn is_token_like(s: &str) -> bool {
    let s = s.trim_start();
    s.len() >= MIN_TOKEN_LEN && TOKEN_SHAPES.iter().any(|shape| s.starts_with(shape))
}

// ---------------------------------------------------------------------------
// JSON pointers
// ---------------------------------------------------------------------------

/// Every scalar leaf with its JSON Pointer, in document order. A scalar root
/// is reported as "/".
pub(crate) fn leaves(root: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    let mut stack: Vec<(String, &Value)> = vec![(String::new(), root)];
    while let Some((path, v)) = stack.pop() {
        match v {
            Value::Object(map) => {
                for (k, child) in map.iter().rev() {
                    stack.push((format!("{path}/{}", escape_token(k)), child));
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate().rev() {
                    stack.push((format!("{path}/{i}"), child));
                }
            }
            scalar => {
                let pointer = if path.is_empty() { "/".to_string() } else { path };
                out.push((pointer, scalar));
            }
        }
    }
    out
}

/// RFC 6901 escaping.
fn escape_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
