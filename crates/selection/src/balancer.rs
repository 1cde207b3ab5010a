// SPDX-License-Identifier: Apache-2.0
//! Load balancing strategies for equally preferable peers.

use fab_config::BalancerType;
use rand::seq::SliceRandom;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Shared rotation counter for [Balancer::RoundRobin].
///
/// Clones share the same counter. Balancers that must not interfere with each other
/// should each own a separate counter.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinCounter(Arc<AtomicUsize>);

impl RoundRobinCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter and return the previous value.
    fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// The number of rotations handed out so far.
    pub fn current(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Reorders a peer list without dropping or duplicating peers.
#[derive(Debug, Clone)]
pub enum Balancer {
    /// Uniform random permutation on every call.
    Random,
    /// Rotate the list so each call starts at the next peer.
    RoundRobin(RoundRobinCounter),
}

impl Balancer {
    pub fn random() -> Self {
        Self::Random
    }

    /// Round robin with a fresh counter.
    pub fn round_robin() -> Self {
        Self::RoundRobin(RoundRobinCounter::new())
    }

    /// Round robin driven by an existing counter.
    pub fn round_robin_with(counter: RoundRobinCounter) -> Self {
        Self::RoundRobin(counter)
    }

    /// Reorder the peers.
    pub fn balance<P>(&self, mut peers: Vec<P>) -> Vec<P> {
        if peers.len() <= 1 {
            return peers;
        }

        match self {
            Self::Random => {
                peers.shuffle(&mut rand::rng());
            }
            Self::RoundRobin(counter) => {
                let offset = counter.next() % peers.len();
                peers.rotate_left(offset);
            }
        }

        peers
    }
}

impl From<BalancerType> for Balancer {
    fn from(balancer: BalancerType) -> Self {
        match balancer {
            BalancerType::RoundRobin => Self::round_robin(),
            BalancerType::Random => Self::random(),
        }
    }
}
