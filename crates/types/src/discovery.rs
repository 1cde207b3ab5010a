// SPDX-License-Identifier: Apache-2.0
//! Collaborators of the selection subsystem.
//!
//! The wire protocol, the transport and the local endpoint configuration live outside of
//! this workspace. These traits are the seams they plug into.

use crate::{
    ChannelPeer, DiscoveredPeer, DiscoveryError, DiscoveryResult, InvocationChain, PeerConfig,
    PeerEndpoint,
};
use async_trait::async_trait;
use std::{cmp::Ordering, collections::HashMap, fmt, sync::Arc, time::Duration};

/// An endorsers query for one invocation chain on one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub channel_id: String,
    /// The invocation chain endorsers are requested for.
    pub interest: InvocationChain,
    /// How long the caller waits for responses.
    pub timeout: Duration,
}

impl DiscoveryRequest {
    pub fn new(
        channel_id: impl Into<String>,
        interest: InvocationChain,
        timeout: Duration,
    ) -> Self {
        Self { channel_id: channel_id.into(), interest, timeout }
    }
}

/// Decides which discovered peers are eligible as endorsers.
pub trait AdmissionFilter: Send + Sync {
    /// Returns true if the peer must not be returned.
    fn exclude(&self, peer: &DiscoveredPeer) -> bool;
}

/// Orders discovered peers by preference. `Less` sorts first.
pub trait PriorityComparator: Send + Sync {
    fn compare(&self, a: &DiscoveredPeer, b: &DiscoveredPeer) -> Ordering;
}

/// Admission filter that accepts every peer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFilter;

impl AdmissionFilter for NoFilter {
    fn exclude(&self, _peer: &DiscoveredPeer) -> bool {
        false
    }
}

/// The per-channel result of a discovery query.
///
/// Obtained once per cache refresh and reused for every selection until the next refresh.
pub trait ChannelResponse: Send + Sync + fmt::Debug {
    /// Endorsers for the invocation chain that pass `filter`, ordered by `comparator`.
    fn endorsers(
        &self,
        chain: &InvocationChain,
        comparator: &dyn PriorityComparator,
        filter: &dyn AdmissionFilter,
    ) -> DiscoveryResult<Vec<DiscoveredPeer>>;
}

/// The response from a single discovery target.
#[derive(Clone, Debug)]
pub struct DiscoveryResponse {
    target: String,
    outcome: Result<HashMap<String, Arc<dyn ChannelResponse>>, DiscoveryError>,
}

impl DiscoveryResponse {
    /// A response carrying per-channel results.
    pub fn success<I>(target: impl Into<String>, channels: I) -> Self
    where
        I: IntoIterator<Item = (String, Arc<dyn ChannelResponse>)>,
    {
        Self { target: target.into(), outcome: Ok(channels.into_iter().collect()) }
    }

    /// A response for a target that failed.
    pub fn failure(target: impl Into<String>, error: DiscoveryError) -> Self {
        Self { target: target.into(), outcome: Err(error) }
    }

    /// The target that produced this response.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn error(&self) -> Option<&DiscoveryError> {
        self.outcome.as_ref().err()
    }

    /// The result for `channel_id`, if the target answered for that channel.
    pub fn for_channel(&self, channel_id: &str) -> Option<Arc<dyn ChannelResponse>> {
        self.outcome.as_ref().ok().and_then(|channels| channels.get(channel_id).cloned())
    }
}

/// Client for the discovery service.
#[async_trait]
pub trait DiscoveryClient: Send + Sync + 'static {
    /// Send the request to every target and return their responses.
    ///
    /// Per-target failures are reported as failed responses. An error is only returned
    /// when nothing could be sent.
    async fn send(
        &self,
        request: &DiscoveryRequest,
        targets: &[PeerConfig],
    ) -> DiscoveryResult<Vec<DiscoveryResponse>>;
}

/// Sends a discovery request to one target.
///
/// The returned response is attributed to the target's url.
#[async_trait]
pub trait DiscoveryTransport: Send + Sync + 'static {
    async fn query(&self, request: &DiscoveryRequest, target: &PeerConfig) -> DiscoveryResponse;
}

/// The locally known set of channel members.
pub trait MembershipView: Send + Sync + 'static {
    /// Peers currently known to be members of the channel.
    fn get_peers(&self) -> eyre::Result<Vec<PeerEndpoint>>;
}

/// Local endpoint configuration.
pub trait EndpointResolver: Send + Sync + 'static {
    /// Map a discovered address to local peer configuration.
    fn peer_config(&self, endpoint: &str) -> Option<PeerConfig>;

    /// Peers configured for the channel.
    fn channel_peers(&self, channel_id: &str) -> Vec<ChannelPeer>;
}
