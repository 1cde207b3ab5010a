// SPDX-License-Identifier: Apache-2.0
//! Configuration for the endorser selection service.

use crate::RetryConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tracing::debug;

/// Sentinel for [SelectionPolicy::block_height_lag_threshold] that disables freshness sorting.
pub const BLOCK_HEIGHT_LAG_DISABLED: i64 = -1;

/// When a cache entry computes its first value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// The first caller computes the value and waits for it.
    #[default]
    OnFirstAccess,
    /// A background computation starts as soon as the entry is created.
    Immediately,
}

/// Strategy used to order peers that are equally preferable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerType {
    /// Rotate the starting peer on every call.
    #[default]
    RoundRobin,
    /// Shuffle the peers on every call.
    Random,
}

/// How peers are ordered before they are returned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingStrategy {
    /// Prefer peers close to the highest known block height, balance among them.
    #[default]
    BlockHeightPriority,
    /// Balance across all peers regardless of block height.
    Balanced,
}

/// Service-wide peer ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    pub sorting_strategy: SortingStrategy,
    pub balancer: BalancerType,
    /// Peers lagging the highest block height by more than this many blocks are demoted.
    ///
    /// [BLOCK_HEIGHT_LAG_DISABLED] treats every peer as fresh.
    pub block_height_lag_threshold: i64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            sorting_strategy: SortingStrategy::BlockHeightPriority,
            balancer: BalancerType::RoundRobin,
            block_height_lag_threshold: 5,
        }
    }
}

impl SelectionPolicy {
    /// The lag threshold, or `None` when freshness sorting is disabled.
    pub fn lag_threshold(&self) -> Option<u64> {
        u64::try_from(self.block_height_lag_threshold).ok()
    }
}

/// Parameters for querying the discovery service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryPolicy {
    /// Maximum number of discovery targets queried per round-trip.
    pub max_targets: usize,
    /// Retry policy applied to each round-trip.
    pub retry: RetryConfig,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self { max_targets: 2, retry: RetryConfig::default() }
    }
}

/// Configuration for one selection service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// How often cached discovery results are refreshed in the background.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Deadline for a single discovery round-trip.
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,
    /// When a new cache entry computes its first value.
    pub init_mode: InitMode,
    pub discovery: DiscoveryPolicy,
    /// Default peer ordering. Discovery order is kept when absent.
    pub selection: Option<SelectionPolicy>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            response_timeout: Duration::from_secs(15),
            init_mode: InitMode::OnFirstAccess,
            discovery: DiscoveryPolicy::default(),
            selection: None,
        }
    }
}

impl SelectionConfig {
    /// Load the configuration from a yaml file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path = path.as_ref();
        debug!(target: "config", ?path, "loading selection config");
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate the configuration from yaml.
    pub fn from_yaml(contents: &str) -> eyre::Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check for values the service can't run with.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.refresh_interval.is_zero() {
            eyre::bail!("refresh_interval must be greater than zero");
        }
        if self.response_timeout.is_zero() {
            eyre::bail!("response_timeout must be greater than zero");
        }
        if self.discovery.max_targets == 0 {
            eyre::bail!("discovery max_targets must be at least 1");
        }
        self.discovery.retry.validate()?;
        if let Some(policy) = self.selection {
            if policy.block_height_lag_threshold < BLOCK_HEIGHT_LAG_DISABLED {
                eyre::bail!(
                    "block_height_lag_threshold must be >= {BLOCK_HEIGHT_LAG_DISABLED}, got {}",
                    policy.block_height_lag_threshold
                );
            }
        }
        Ok(())
    }
}
