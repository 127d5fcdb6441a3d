//! Scenario: Unused Keys Warn Or Fail
//!
//! # Invariants under test
//!
//! 1. The built-in defaults are clean for the daemon consumer.
//! 2. `/daemon` is unused for the headless session consumer.
//! 3. Unknown keys are reported under `Warn` and fail under `Fail`.
//! 4. Reported pointers are sorted.

use rod_config::{
    load_layered_yaml_from_strings, report_unused_keys, ConfigConsumer, UnusedKeyPolicy,
    DEFAULT_YAML,
};

#[test]
fn defaults_are_clean_for_daemon() {
    let loaded = load_layered_yaml_from_strings(&[DEFAULT_YAML]).unwrap();
    let report =
        report_unused_keys(ConfigConsumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Fail)
            .unwrap();
    assert!(report.is_clean(), "{:?}", report.unused_leaf_pointers);
}

#[test]
fn daemon_section_is_unused_for_session() {
    let loaded = load_layered_yaml_from_strings(&[DEFAULT_YAML]).unwrap();
    let report =
        report_unused_keys(ConfigConsumer::Session, &loaded.config_json, UnusedKeyPolicy::Warn)
            .unwrap();
    assert_eq!(report.unused_leaf_pointers, ["/daemon/bind_addr"]);
}

#[test]
fn unknown_keys_warn_or_fail() {
    let loaded = load_layered_yaml_from_strings(&[
        DEFAULT_YAML,
        "poll:\n  jitter_ms: 5\nmenu:\n  refresh: true\n",
    ])
    .unwrap();

    let report =
        report_unused_keys(ConfigConsumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)
            .unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        ["/menu/refresh", "/poll/jitter_ms"]
    );

    let err =
        report_unused_keys(ConfigConsumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Fail)
            .unwrap_err()
            .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"), "{err}");
    assert!(err.contains("consumer=DAEMON"), "{err}");
}
