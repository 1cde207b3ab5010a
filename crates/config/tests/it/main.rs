//! Selection config loading tests.

#![allow(unused_crate_dependencies)]

use fab_config::{
    BalancerType, InitMode, RetryConfig, SelectionConfig, SelectionPolicy, SortingStrategy,
    BLOCK_HEIGHT_LAG_DISABLED,
};
use std::{io::Write as _, time::Duration};
use tempfile::NamedTempFile;

#[test]
fn test_load_full_config_from_path() {
    let yaml = r#"
refresh_interval: 1m
response_timeout: 5s
init_mode: immediately
discovery:
  max_targets: 3
  retry:
    max_attempts: 6
    initial_retry_interval: 250ms
    max_retry_interval: 10s
    retry_delay_multiplier: 1.5
selection:
  sorting_strategy: balanced
  balancer: random
  block_height_lag_threshold: -1
"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = SelectionConfig::load_from_path(file.path()).unwrap();
    assert_eq!(config.refresh_interval, Duration::from_secs(60));
    assert_eq!(config.response_timeout, Duration::from_secs(5));
    assert_eq!(config.init_mode, InitMode::Immediately);
    assert_eq!(config.discovery.max_targets, 3);
    assert_eq!(config.discovery.retry.max_attempts, 6);
    assert_eq!(config.discovery.retry.initial_retry_interval, Duration::from_millis(250));
    assert_eq!(config.discovery.retry.max_retry_interval, Duration::from_secs(10));
    // unspecified fields keep their defaults
    assert_eq!(
        config.discovery.retry.retry_delay_rand_factor,
        RetryConfig::default().retry_delay_rand_factor
    );

    let policy = config.selection.expect("selection policy");
    assert_eq!(policy.sorting_strategy, SortingStrategy::Balanced);
    assert_eq!(policy.balancer, BalancerType::Random);
    assert_eq!(policy.block_height_lag_threshold, BLOCK_HEIGHT_LAG_DISABLED);
    assert_eq!(policy.lag_threshold(), None);
}

#[test]
fn test_empty_yaml_uses_defaults() {
    let config = SelectionConfig::from_yaml("{}").unwrap();
    assert_eq!(config, SelectionConfig::default());
    assert!(config.selection.is_none());
    assert_eq!(SelectionPolicy::default().lag_threshold(), Some(5));
}

#[test]
fn test_invalid_config_rejected() {
    assert!(SelectionConfig::from_yaml("refresh_interval: 0s").is_err());
    assert!(SelectionConfig::from_yaml("discovery:\n  max_targets: 0").is_err());
    assert!(SelectionConfig::from_yaml("selection:\n  block_height_lag_threshold: -7").is_err());
    assert!(SelectionConfig::load_from_path("/path/that/does/not/exist.yaml").is_err());
}
