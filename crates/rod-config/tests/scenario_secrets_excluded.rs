//! Scenario: Secrets Excluded From Config
//!
//! # Invariants under test
//!
//! 1. A literal token-like value anywhere in the config aborts the load
//!    with CONFIG_SECRET_DETECTED, and the message does not echo the value.
//! 2. Env var names are accepted.
//! 3. A required but missing token fails with the variable NAME.
//! 4. An optional missing token resolves to `None`.
//! 5. `Debug` of resolved secrets never prints the token.
//!
//! Failure tests use sentinel env var names that are never set, so no test
//! mutates the process environment.

use rod_config::load_layered_yaml_from_strings;
use rod_config::secrets::{resolve_secrets, ResolvedSecrets};

#[test]
fn literal_bearer_token_is_refused() {
    let yaml = "api:\n  token_env: \"Bearer abcdef0123456789\"\n";
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err().to_string();
    assert!(err.contains("CONFIG_SECRET_DETECTED"), "{err}");
    assert!(err.contains("/api/token_env"), "{err}");
    assert!(!err.contains("abcdef0123456789"), "{err}");
}

#[test]
fn literal_jwt_in_nested_leaf_is_refused() {
    let yaml = "push:\n  headers:\n    - \"eyJhbGciOiJIUzI1NiJ9.payload.sig\"\n";
    let err = load_layered_yaml_from_strings(&[yaml]).unwrap_err().to_string();
    assert!(err.contains("/push/headers/0"), "{err}");
}

#[test]
fn env_var_names_are_accepted() {
    let yaml = "api:\n  token_env: \"ROD_SENTINEL_TOKEN_NAME\"\n";
    assert!(load_layered_yaml_from_strings(&[yaml]).is_ok());
}

#[test]
fn required_missing_token_names_the_variable() {
    let cfg = load_layered_yaml_from_strings(&[
        "api:\n  token_env: \"ROD_SENTINEL_MISSING_TOKEN_7F3A\"\n",
    ])
    .unwrap()
    .config_json;
    let err = resolve_secrets(&cfg, true).unwrap_err().to_string();
    assert!(err.contains("SECRETS_MISSING"), "{err}");
    assert!(err.contains("ROD_SENTINEL_MISSING_TOKEN_7F3A"), "{err}");
}

#[test]
fn optional_missing_token_is_none() {
    let cfg = load_layered_yaml_from_strings(&[
        "api:\n  token_env: \"ROD_SENTINEL_MISSING_TOKEN_9C1B\"\n",
    ])
    .unwrap()
    .config_json;
    let secrets = resolve_secrets(&cfg, false).unwrap();
    assert!(secrets.api_token.is_none());
    assert_eq!(secrets.api_token_env, "ROD_SENTINEL_MISSING_TOKEN_9C1B");
}

#[test]
fn debug_redacts_token() {
    let s = ResolvedSecrets {
        api_token: Some("super-secret-value".to_string()),
        api_token_env: "ROD_API_TOKEN".to_string(),
    };
    let dbg = format!("{s:?}");
    assert!(dbg.contains("<REDACTED>"));
    assert!(!dbg.contains("super-secret-value"));
}
