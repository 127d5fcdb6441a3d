//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (`api.token_env`).
//! - Callers invoke [`resolve_secrets`] once at startup and pass the result
//!   into constructors; `std::env::var` is not read anywhere else.
//! - `Debug` on secret-carrying structs **redacts** values.
//! - Error messages name the env var, never its value.

use anyhow::{bail, Result};
use serde_json::Value;

pub const DEFAULT_TOKEN_ENV: &str = "ROD_API_TOKEN";

/// Values are redacted in `Debug` output.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Bearer token for REST and the push socket. `None` when the named env
    /// var is absent or blank.
    pub api_token: Option<String>,
    /// The env var the token was read from.
    pub api_token_env: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("api_token", &self.api_token.as_ref().map(|_| "<REDACTED>"))
            .field("api_token_env", &self.api_token_env)
            .finish()
    }
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve the API token named by `/api/token_env`.
///
/// With `require_token`, a missing token is an error naming the variable.
/// Without it, the session starts unauthenticated and the server's 401 is
/// handled as an authentication loss.
pub fn resolve_secrets(config_json: &Value, require_token: bool) -> Result<ResolvedSecrets> {
    let var = read_str_at(config_json, "/api/token_env")
        .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());
    let api_token = resolve_env(&var);

    if require_token && api_token.is_none() {
        bail!(
            "SECRETS_MISSING: required env var '{}' (api token) is not set or empty",
            var
        );
    }

    Ok(ResolvedSecrets {
        api_token,
        api_token_env: var,
    })
}
