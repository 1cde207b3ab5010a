// SPDX-License-Identifier: Apache-2.0
//! Endorser selection for one channel.

use crate::{
    cache::{Factory, KeyedCache},
    discovery::{DiscoveryRoundTrip, ErrorHandler},
    filter::{CustomPriority, KnownPeersFilter},
    BlockHeightPriority, PeerComparator, PeerFilter, PeerSorter, SelectionMetrics,
};
use fab_config::SelectionConfig;
use fab_types::{
    ensure, ChaincodeCall, ChannelResponse, DiscoveredPeer, DiscoveryClient, DiscoveryError,
    EndpointResolver, InvocationChain, MembershipView, Peer as _, PeerEndpoint, ResolvedPeer,
    SelectionError, SelectionResult,
};
use futures::FutureExt as _;
use std::{cmp::Ordering, fmt, sync::Arc};
use tracing::{debug, warn};

/// Per-call selection preferences.
#[derive(Clone, Default)]
pub struct SelectionOptions {
    peer_filter: Option<PeerFilter>,
    priority_comparator: Option<PeerComparator>,
    peer_sorter: Option<PeerSorter>,
}

impl SelectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude peers for which `filter` returns false.
    pub fn with_peer_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&PeerEndpoint) -> bool + Send + Sync + 'static,
    {
        self.peer_filter = Some(Arc::new(filter));
        self
    }

    /// Order discovered peers with `comparator` instead of by block height.
    pub fn with_priority_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&DiscoveredPeer, &DiscoveredPeer) -> Ordering + Send + Sync + 'static,
    {
        self.priority_comparator = Some(Arc::new(comparator));
        self
    }

    /// Sort the resolved endorsers with `sorter`, overriding the service default.
    pub fn with_peer_sorter(mut self, sorter: impl Into<PeerSorter>) -> Self {
        self.peer_sorter = Some(sorter.into());
        self
    }
}

impl fmt::Debug for SelectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionOptions")
            .field("peer_filter", &self.peer_filter.is_some())
            .field("priority_comparator", &self.priority_comparator.is_some())
            .field("peer_sorter", &self.peer_sorter)
            .finish()
    }
}

/// Selects endorsing peers for invocation chains on one channel.
///
/// Discovery results are cached per invocation chain and refreshed in the background.
/// Dropping the service stops the refresh tasks.
pub struct SelectionService {
    channel_id: String,
    membership: Arc<dyn MembershipView>,
    resolver: Arc<dyn EndpointResolver>,
    cache: KeyedCache<InvocationChain, dyn ChannelResponse>,
    peer_sorter: Option<PeerSorter>,
    metrics: Arc<SelectionMetrics>,
}

impl SelectionService {
    /// Start building a service for `channel_id`.
    pub fn builder(
        channel_id: impl Into<String>,
        membership: Arc<dyn MembershipView>,
        resolver: Arc<dyn EndpointResolver>,
        client: Arc<dyn DiscoveryClient>,
    ) -> SelectionServiceBuilder {
        SelectionServiceBuilder {
            channel_id: channel_id.into(),
            membership,
            resolver,
            client,
            config: SelectionConfig::default(),
            error_handler: None,
            peer_sorter: None,
            metrics: None,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Endorsers able to satisfy the endorsement policy of the invocation chain.
    ///
    /// The first chaincode is the one being invoked, the rest are chaincodes it calls.
    /// Only peers that are locally known members of the channel and that map to local
    /// endpoint configuration are returned.
    pub async fn get_endorsers_for_chaincode(
        &self,
        chaincodes: &[ChaincodeCall],
        options: SelectionOptions,
    ) -> SelectionResult<Vec<ResolvedPeer>> {
        ensure!(!chaincodes.is_empty(), SelectionError::NoChaincodes);
        ensure!(!self.is_closed(), SelectionError::Closed(self.channel_id.clone()));

        let chain = InvocationChain::from(chaincodes);
        debug!(target: "selection", channel = %self.channel_id, %chain, "selecting endorsers");

        let response = self.cache.get(chain.clone()).await.map_err(|source| match source {
            DiscoveryError::Closed => SelectionError::Closed(self.channel_id.clone()),
            source => {
                SelectionError::ChannelResponse { channel_id: self.channel_id.clone(), source }
            }
        })?;

        let known_peers = self.membership.get_peers()?;
        let filter = KnownPeersFilter::new(&self.channel_id, &known_peers, options.peer_filter);
        let endorsers = match options.priority_comparator {
            Some(comparator) => response.endorsers(&chain, &CustomPriority(comparator), &filter),
            None => response.endorsers(&chain, &BlockHeightPriority, &filter),
        }
        .map_err(SelectionError::Endorsers)?;

        let peers = self.resolve(endorsers);
        let sorted = match options.peer_sorter.as_ref().or(self.peer_sorter.as_ref()) {
            Some(sorter) => sorter.sort(peers),
            None => peers,
        };

        debug!(
            target: "selection",
            channel = %self.channel_id,
            %chain,
            endorsers = ?sorted.iter().map(|peer| peer.url()).collect::<Vec<_>>(),
            "selected endorsers"
        );
        Ok(sorted)
    }

    /// Map discovered peers to local configuration, dropping the ones without any.
    fn resolve(&self, endorsers: Vec<DiscoveredPeer>) -> Vec<ResolvedPeer> {
        endorsers
            .into_iter()
            .filter_map(|peer| match self.resolver.peer_config(&peer.endpoint) {
                Some(config) => Some(ResolvedPeer::new(&peer, config)),
                None => {
                    warn!(
                        target: "selection",
                        channel = %self.channel_id,
                        peer = %peer.endpoint,
                        "no local configuration for discovered endorser, skipping"
                    );
                    self.metrics.unresolved_peers.inc();
                    None
                }
            })
            .collect()
    }

    /// Number of invocation chains with cached discovery results.
    pub fn cached_chains(&self) -> usize {
        self.cache.len()
    }

    pub fn metrics(&self) -> &SelectionMetrics {
        &self.metrics
    }

    /// Stop background refreshes and release cached results. Further selections fail with
    /// [SelectionError::Closed].
    pub fn close(&self) {
        debug!(target: "selection", channel = %self.channel_id, "closing selection service");
        self.cache.close();
    }

    pub fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }
}

impl fmt::Debug for SelectionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionService")
            .field("channel_id", &self.channel_id)
            .field("cached_chains", &self.cache.len())
            .field("peer_sorter", &self.peer_sorter)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for [SelectionService].
pub struct SelectionServiceBuilder {
    channel_id: String,
    membership: Arc<dyn MembershipView>,
    resolver: Arc<dyn EndpointResolver>,
    client: Arc<dyn DiscoveryClient>,
    config: SelectionConfig,
    error_handler: Option<ErrorHandler>,
    peer_sorter: Option<PeerSorter>,
    metrics: Option<Arc<SelectionMetrics>>,
}

impl SelectionServiceBuilder {
    pub fn with_config(mut self, config: SelectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Invoke `handler` with the channel id and the error when discovery fails for good.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &DiscoveryError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Default sorter for every selection. Takes precedence over the configured policy.
    pub fn with_peer_sorter(mut self, sorter: impl Into<PeerSorter>) -> Self {
        self.peer_sorter = Some(sorter.into());
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SelectionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and build the service.
    pub fn build(self) -> eyre::Result<SelectionService> {
        let Self {
            channel_id,
            membership,
            resolver,
            client,
            config,
            error_handler,
            peer_sorter,
            metrics,
        } = self;
        eyre::ensure!(!channel_id.is_empty(), "channel id must not be empty");
        config.validate()?;

        let metrics = metrics.unwrap_or_default();
        let peer_sorter = peer_sorter.or_else(|| config.selection.map(PeerSorter::from));

        let round_trip = Arc::new(DiscoveryRoundTrip::new(
            channel_id.clone(),
            client,
            resolver.clone(),
            config.response_timeout,
            config.discovery,
            error_handler,
            metrics.clone(),
        ));
        let factory: Factory<InvocationChain, dyn ChannelResponse> =
            Arc::new(move |chain: InvocationChain| {
                let round_trip = round_trip.clone();
                async move { round_trip.query_endorsers(chain).await }.boxed()
            });
        let cache =
            KeyedCache::new(factory, config.refresh_interval, config.init_mode, metrics.clone());

        debug!(
            target: "selection",
            channel = %channel_id,
            refresh_interval = ?config.refresh_interval,
            response_timeout = ?config.response_timeout,
            "selection service created"
        );

        Ok(SelectionService { channel_id, membership, resolver, cache, peer_sorter, metrics })
    }
}
