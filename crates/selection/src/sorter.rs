// SPDX-License-Identifier: Apache-2.0
//! Peer ordering strategies applied to resolved endorsers.

use crate::Balancer;
use fab_config::{SelectionPolicy, SortingStrategy};
use fab_types::{PeerState, ResolvedPeer};
use std::{cmp::Reverse, fmt, sync::Arc};
use tracing::trace;

/// Orders peers by ledger freshness.
///
/// Peers within `lag_threshold` blocks of the highest known height are preferred and
/// balanced. Peers further behind follow, highest first.
#[derive(Debug, Clone)]
pub struct BlockHeightSorter {
    /// `None` disables freshness sorting.
    lag_threshold: Option<u64>,
    balancer: Balancer,
}

impl BlockHeightSorter {
    pub fn new(lag_threshold: u64, balancer: Balancer) -> Self {
        Self { lag_threshold: Some(lag_threshold), balancer }
    }

    /// A sorter that only balances.
    pub fn disabled(balancer: Balancer) -> Self {
        Self { lag_threshold: None, balancer }
    }

    pub fn lag_threshold(&self) -> Option<u64> {
        self.lag_threshold
    }

    pub fn sort<P: PeerState>(&self, peers: Vec<P>) -> Vec<P> {
        if peers.len() <= 1 {
            return peers;
        }

        let Some(lag_threshold) = self.lag_threshold else {
            return self.balancer.balance(peers);
        };

        let max_height = peers.iter().filter_map(PeerState::block_height).max().unwrap_or(0);
        if max_height <= lag_threshold {
            trace!(target: "selection", max_height, lag_threshold, "no peer is lagging");
            return self.balancer.balance(peers);
        }

        let cutoff = max_height - lag_threshold;
        let (preferred, mut lagging): (Vec<P>, Vec<P>) = peers
            .into_iter()
            .partition(|peer| peer.block_height().is_none_or(|height| height >= cutoff));

        trace!(
            target: "selection",
            max_height,
            cutoff,
            preferred = preferred.len(),
            lagging = lagging.len(),
            "partitioned peers by block height"
        );

        // only peers reporting a height can lag
        lagging.sort_by_key(|peer| Reverse(peer.block_height()));

        let mut sorted = self.balancer.balance(preferred);
        sorted.append(&mut lagging);
        sorted
    }
}

impl From<SelectionPolicy> for BlockHeightSorter {
    fn from(policy: SelectionPolicy) -> Self {
        let balancer = Balancer::from(policy.balancer);
        match policy.lag_threshold() {
            Some(threshold) => Self::new(threshold, balancer),
            None => Self::disabled(balancer),
        }
    }
}

/// Caller-supplied ordering function.
pub type SortFn = Arc<dyn Fn(Vec<ResolvedPeer>) -> Vec<ResolvedPeer> + Send + Sync>;

/// Final ordering applied to the endorsers returned to a caller.
#[derive(Clone)]
pub enum PeerSorter {
    Balancer(Balancer),
    BlockHeight(BlockHeightSorter),
    Custom(SortFn),
}

impl PeerSorter {
    /// Wrap an ordering function.
    pub fn custom<F>(sort: F) -> Self
    where
        F: Fn(Vec<ResolvedPeer>) -> Vec<ResolvedPeer> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(sort))
    }

    pub fn sort(&self, peers: Vec<ResolvedPeer>) -> Vec<ResolvedPeer> {
        match self {
            Self::Balancer(balancer) => balancer.balance(peers),
            Self::BlockHeight(sorter) => sorter.sort(peers),
            Self::Custom(sort) => sort(peers),
        }
    }
}

impl fmt::Debug for PeerSorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Balancer(balancer) => f.debug_tuple("Balancer").field(balancer).finish(),
            Self::BlockHeight(sorter) => f.debug_tuple("BlockHeight").field(sorter).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl From<SelectionPolicy> for PeerSorter {
    fn from(policy: SelectionPolicy) -> Self {
        match policy.sorting_strategy {
            SortingStrategy::BlockHeightPriority => Self::BlockHeight(policy.into()),
            SortingStrategy::Balanced => Self::Balancer(policy.balancer.into()),
        }
    }
}

impl From<Balancer> for PeerSorter {
    fn from(balancer: Balancer) -> Self {
        Self::Balancer(balancer)
    }
}

impl From<BlockHeightSorter> for PeerSorter {
    fn from(sorter: BlockHeightSorter) -> Self {
        Self::BlockHeight(sorter)
    }
}
