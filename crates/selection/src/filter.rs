// SPDX-License-Identifier: Apache-2.0
//! Admission filter and priority comparators for discovered peers.

use fab_types::{
    normalize_url, AdmissionFilter, DiscoveredPeer, Peer as _, PeerEndpoint, PriorityComparator,
};
use std::{cmp::Ordering, collections::HashSet, sync::Arc};
use tracing::debug;

/// Caller predicate over candidate endorsers. Returning false excludes the peer.
pub type PeerFilter = Arc<dyn Fn(&PeerEndpoint) -> bool + Send + Sync>;

/// Caller ordering over candidate endorsers.
pub type PeerComparator = Arc<dyn Fn(&DiscoveredPeer, &DiscoveredPeer) -> Ordering + Send + Sync>;

/// Excludes peers that aren't locally known members of the channel or that the caller's
/// filter rejects.
pub(crate) struct KnownPeersFilter {
    channel_id: String,
    /// Normalized urls of the locally known peers.
    known: HashSet<String>,
    peer_filter: Option<PeerFilter>,
}

impl KnownPeersFilter {
    pub(crate) fn new(
        channel_id: &str,
        known_peers: &[PeerEndpoint],
        peer_filter: Option<PeerFilter>,
    ) -> Self {
        let known = known_peers.iter().map(|p| normalize_url(p.url()).to_string()).collect();
        Self { channel_id: channel_id.to_string(), known, peer_filter }
    }
}

impl AdmissionFilter for KnownPeersFilter {
    fn exclude(&self, peer: &DiscoveredPeer) -> bool {
        let endpoint = peer.projection();
        if !self.known.contains(normalize_url(&endpoint.url)) {
            debug!(
                target: "selection",
                channel = %self.channel_id,
                peer = %endpoint.url,
                "excluding peer that isn't in the local list of channel peers"
            );
            return true;
        }

        if let Some(filter) = &self.peer_filter {
            if !filter(&endpoint) {
                debug!(
                    target: "selection",
                    channel = %self.channel_id,
                    peer = %endpoint.url,
                    "excluding peer rejected by peer filter"
                );
                return true;
            }
        }

        false
    }
}

/// Default priority: highest block height first.
///
/// Peers without state sort after peers with state.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockHeightPriority;

impl PriorityComparator for BlockHeightPriority {
    fn compare(&self, a: &DiscoveredPeer, b: &DiscoveredPeer) -> Ordering {
        b.block_height().cmp(&a.block_height())
    }
}

/// Adapts a caller comparator. It replaces the default entirely.
pub(crate) struct CustomPriority(pub(crate) PeerComparator);

impl PriorityComparator for CustomPriority {
    fn compare(&self, a: &DiscoveredPeer, b: &DiscoveredPeer) -> Ordering {
        (self.0)(a, b)
    }
}
