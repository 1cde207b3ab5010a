// SPDX-License-Identifier: Apache-2.0
//! Metrics for endorser selection.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};

/// Metrics recorded by one selection service.
#[derive(Debug, Clone)]
pub struct SelectionMetrics {
    /// Discovery round-trips by outcome (`success` or `failure`), after retries.
    pub discovery_round_trips: IntCounterVec,
    /// Background refreshes that failed and kept the previous value.
    pub cache_refresh_failures: IntCounter,
    /// Discovered endorsers dropped because they have no local endpoint configuration.
    pub unresolved_peers: IntCounter,
    /// Number of invocation chains with a cache entry.
    pub cache_entries: IntGauge,
}

impl SelectionMetrics {
    /// Register the metrics with `registry`.
    ///
    /// Fails if the registry already holds metrics with these names.
    pub fn try_new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            discovery_round_trips: register_int_counter_vec_with_registry!(
                "selection_discovery_round_trips",
                "Number of discovery round-trips by outcome",
                &["outcome"],
                registry
            )?,
            cache_refresh_failures: register_int_counter_with_registry!(
                "selection_cache_refresh_failures",
                "Number of failed background refreshes of cached discovery results",
                registry
            )?,
            unresolved_peers: register_int_counter_with_registry!(
                "selection_unresolved_peers",
                "Number of discovered endorsers dropped for missing local configuration",
                registry
            )?,
            cache_entries: register_int_gauge_with_registry!(
                "selection_cache_entries",
                "Number of invocation chains with cached discovery results",
                registry
            )?,
        })
    }

    pub(crate) fn record_round_trip(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.discovery_round_trips.with_label_values(&[outcome]).inc();
    }
}

impl Default for SelectionMetrics {
    fn default() -> Self {
        // a fresh registry can't hold conflicting names
        Self::try_new(&Registry::new()).expect("selection metrics register on empty registry")
    }
}
