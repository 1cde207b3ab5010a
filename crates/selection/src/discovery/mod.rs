// SPDX-License-Identifier: Apache-2.0
//! Discovery round-trips for one channel.

use crate::{BlockHeightPriority, SelectionMetrics};
use fab_config::DiscoveryPolicy;
use fab_types::{
    ChannelResponse, DiscoveryClient, DiscoveryError, DiscoveryRequest, DiscoveryResponse,
    DiscoveryResult, DiscoveryStatus, EndpointResolver, InvocationChain, NoFilter, PeerConfig,
};
use rand::seq::SliceRandom;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

mod fanout;
pub use fanout::FanOutClient;

/// Extra time given to the client beyond the response timeout before the round-trip is
/// abandoned. Clients enforce the response timeout themselves and return what arrived.
const SEND_GRACE: Duration = Duration::from_secs(1);

/// Called with the channel id and the error whenever a round-trip fails for good.
pub type ErrorHandler = Arc<dyn Fn(&str, &DiscoveryError) + Send + Sync>;

/// Queries discovery targets for the endorsers of an invocation chain.
pub(crate) struct DiscoveryRoundTrip {
    channel_id: String,
    client: Arc<dyn DiscoveryClient>,
    resolver: Arc<dyn EndpointResolver>,
    response_timeout: Duration,
    policy: DiscoveryPolicy,
    error_handler: Option<ErrorHandler>,
    metrics: Arc<SelectionMetrics>,
}

impl DiscoveryRoundTrip {
    pub(crate) fn new(
        channel_id: String,
        client: Arc<dyn DiscoveryClient>,
        resolver: Arc<dyn EndpointResolver>,
        response_timeout: Duration,
        policy: DiscoveryPolicy,
        error_handler: Option<ErrorHandler>,
        metrics: Arc<SelectionMetrics>,
    ) -> Self {
        Self { channel_id, client, resolver, response_timeout, policy, error_handler, metrics }
    }

    /// Obtain a channel response that can produce endorsers for `chain`.
    ///
    /// Transient failures are retried according to the retry policy. The error handler
    /// sees the final error.
    pub(crate) async fn query_endorsers(
        &self,
        chain: InvocationChain,
    ) -> DiscoveryResult<Arc<dyn ChannelResponse>> {
        let chain = &chain;
        let result = self
            .policy
            .retry
            .retry(move || async move {
                self.round_trip(chain).await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            })
            .await;

        self.metrics.record_round_trip(result.is_ok());
        if let Err(e) = &result {
            warn!(
                target: "discovery",
                channel = %self.channel_id,
                %chain,
                ?e,
                "discovery round-trip failed"
            );
            if let Some(handler) = &self.error_handler {
                handler(&self.channel_id, e);
            }
        }

        result
    }

    /// A single attempt against a fresh random set of targets.
    async fn round_trip(
        &self,
        chain: &InvocationChain,
    ) -> DiscoveryResult<Arc<dyn ChannelResponse>> {
        let targets = self.select_targets()?;
        let request = DiscoveryRequest::new(&self.channel_id, chain.clone(), self.response_timeout);

        debug!(
            target: "discovery",
            channel = %self.channel_id,
            %chain,
            targets = ?targets.iter().map(|t| t.url.as_str()).collect::<Vec<_>>(),
            "sending discovery request"
        );

        let responses = tokio::time::timeout(
            self.response_timeout + SEND_GRACE,
            self.client.send(&request, &targets),
        )
        .await
        .map_err(|_| DiscoveryError::Timeout(self.response_timeout))??;

        self.evaluate(chain, responses)
    }

    /// Discovery-enabled channel peers, shuffled and capped at `max_targets`.
    fn select_targets(&self) -> DiscoveryResult<Vec<PeerConfig>> {
        let mut targets: Vec<PeerConfig> = self
            .resolver
            .channel_peers(&self.channel_id)
            .into_iter()
            .filter(|peer| peer.discovery_enabled)
            .map(|peer| peer.config)
            .collect();

        if targets.is_empty() {
            return Err(DiscoveryError::NoTargets(self.channel_id.clone()));
        }

        targets.shuffle(&mut rand::rng());
        targets.truncate(self.policy.max_targets);
        Ok(targets)
    }

    /// Adopt the first response that answers for the channel and can produce endorsers
    /// for `chain`.
    ///
    /// Otherwise return the last transient error seen, or the last error if every target
    /// failed terminally. The outcome doesn't depend on the order responses arrived in.
    fn evaluate(
        &self,
        chain: &InvocationChain,
        responses: Vec<DiscoveryResponse>,
    ) -> DiscoveryResult<Arc<dyn ChannelResponse>> {
        let mut last_error = None;

        for response in responses {
            if let Some(e) = response.error() {
                debug!(
                    target: "discovery",
                    peer = response.target(),
                    ?e,
                    "discovery target failed"
                );
                last_error = Some(prefer_transient(last_error, e.clone()));
                continue;
            }

            let Some(channel_response) = response.for_channel(&self.channel_id) else {
                let e = DiscoveryError::from_server(
                    Some(response.target()),
                    format!("channel not found in response: {}", self.channel_id),
                );
                last_error = Some(prefer_transient(last_error, e));
                continue;
            };

            // probe without caller preferences
            match channel_response.endorsers(chain, &BlockHeightPriority, &NoFilter) {
                Ok(_) => {
                    debug!(
                        target: "discovery",
                        peer = response.target(),
                        %chain,
                        "adopted discovery response"
                    );
                    return Ok(channel_response);
                }
                Err(e) => {
                    debug!(
                        target: "discovery",
                        peer = response.target(),
                        ?e,
                        "response can't satisfy invocation chain"
                    );
                    let e = with_target(e, response.target());
                    last_error = Some(prefer_transient(last_error, e));
                }
            }
        }

        Err(last_error.unwrap_or(DiscoveryError::NoResponses))
    }
}

/// Keep an earlier transient error over a later terminal one.
fn prefer_transient(current: Option<DiscoveryError>, next: DiscoveryError) -> DiscoveryError {
    match current {
        Some(current) if current.is_transient() && !next.is_transient() => current,
        _ => next,
    }
}

/// Attribute a server status to `target` if it isn't attributed yet.
fn with_target(error: DiscoveryError, target: &str) -> DiscoveryError {
    match error {
        DiscoveryError::Status(DiscoveryStatus { code, target: None, message }) => {
            let target = Some(target.to_string());
            DiscoveryError::Status(DiscoveryStatus { code, target, message })
        }
        other => other,
    }
}

#[cfg(test)]
#[path = "../tests/discovery_tests.rs"]
mod discovery_tests;
