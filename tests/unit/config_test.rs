//! Tests for configuration validation

use std::path::PathBuf;

use apply_governor::config::{
    CooldownPolicyConfig, DispatcherConfig, GovernorConfig, StoreBackendConfig, SupervisorConfig,
};

#[test]
fn test_defaults_are_valid() {
    let cfg = GovernorConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.policy.rate_limited_secs, 3_600);
    assert_eq!(cfg.supervisor.max_applies_per_run, 5);
    assert_eq!(cfg.dispatcher.max_concurrent_runs, 3);
    assert_eq!(cfg.store, StoreBackendConfig::InMemory);
}

#[test]
fn test_policy_zero_base_is_rejected() {
    let invalid = CooldownPolicyConfig {
        rate_limited_secs: 0,
        ..CooldownPolicyConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_policy_zero_lookback_is_rejected() {
    let invalid = CooldownPolicyConfig {
        lookback_secs: 0,
        ..CooldownPolicyConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_supervisor_zero_budget_is_rejected() {
    let invalid = SupervisorConfig {
        max_run_secs: 0,
        ..SupervisorConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_dispatcher_zero_concurrency_is_rejected() {
    let invalid = DispatcherConfig {
        max_concurrent_runs: 0,
        ..DispatcherConfig::default()
    };
    let err = GovernorConfig {
        dispatcher: invalid,
        ..GovernorConfig::default()
    }
    .validate()
    .unwrap_err();
    assert!(err.starts_with("dispatcher invalid"));
}

#[test]
fn test_dispatcher_zero_busy_retry_is_rejected() {
    let invalid = DispatcherConfig {
        busy_retry_ms: 0,
        ..DispatcherConfig::default()
    };
    assert_eq!(invalid.validate().unwrap_err(), "busy_retry_ms must be greater than 0");
}

#[test]
fn test_empty_sqlite_path_is_rejected() {
    let cfg = GovernorConfig {
        store: StoreBackendConfig::Sqlite { path: PathBuf::new() },
        ..GovernorConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_governor_config_from_json() {
    let json = r#"{
        "policy": { "rate_limited_secs": 1800, "backoff_multiplier": 3.0 },
        "supervisor": { "max_run_secs": 600 },
        "store": { "sqlite": { "path": "/var/lib/governor/state.db" } }
    }"#;

    let cfg = GovernorConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.policy.rate_limited_secs, 1_800);
    assert!((cfg.policy.backoff_multiplier - 3.0).abs() < f64::EPSILON);
    assert_eq!(cfg.policy.soft_failure_secs, 600, "unspecified fields keep defaults");
    assert_eq!(cfg.supervisor.max_run_secs, 600);
    assert_eq!(
        cfg.store,
        StoreBackendConfig::Sqlite {
            path: PathBuf::from("/var/lib/governor/state.db")
        }
    );
}

#[test]
fn test_governor_config_from_json_rejects_invalid() {
    let json = r#"{ "policy": { "max_cooldown_secs": 10 } }"#;
    assert!(GovernorConfig::from_json_str(json).is_err());
    assert!(GovernorConfig::from_json_str("not json").is_err());
}
