// SPDX-License-Identifier: Apache-2.0
//! Local membership and endpoint configuration doubles.

use fab_types::{
    normalize_url, ChannelPeer, EndpointResolver, MembershipView, PeerConfig, PeerEndpoint,
};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Membership view over a mutable peer list.
#[derive(Debug, Default)]
pub struct MockMembership {
    peers: Mutex<Vec<PeerEndpoint>>,
    fail: Mutex<Option<String>>,
}

impl MockMembership {
    pub fn new(peers: Vec<PeerEndpoint>) -> Self {
        Self { peers: Mutex::new(peers), fail: Mutex::new(None) }
    }

    pub fn set_peers(&self, peers: Vec<PeerEndpoint>) {
        *self.peers.lock() = peers;
    }

    /// Make every lookup fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.fail.lock() = Some(message.to_string());
    }
}

impl MembershipView for MockMembership {
    fn get_peers(&self) -> eyre::Result<Vec<PeerEndpoint>> {
        if let Some(message) = self.fail.lock().as_ref() {
            eyre::bail!("{message}");
        }
        Ok(self.peers.lock().clone())
    }
}

/// Endpoint resolver over a fixed list of channel peers.
///
/// Discovered addresses resolve by their normalized url.
#[derive(Debug, Default)]
pub struct MockEndpointResolver {
    channel_peers: HashMap<String, Vec<ChannelPeer>>,
    configs: HashMap<String, PeerConfig>,
}

impl MockEndpointResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure `peers` for `channel_id`. Each peer also becomes resolvable.
    pub fn with_channel_peers(mut self, channel_id: &str, peers: Vec<ChannelPeer>) -> Self {
        for peer in &peers {
            self.configs.insert(normalize_url(&peer.config.url).to_string(), peer.config.clone());
        }
        self.channel_peers.entry(channel_id.to_string()).or_default().extend(peers);
        self
    }
}

impl EndpointResolver for MockEndpointResolver {
    fn peer_config(&self, endpoint: &str) -> Option<PeerConfig> {
        self.configs.get(normalize_url(endpoint)).cloned()
    }

    fn channel_peers(&self, channel_id: &str) -> Vec<ChannelPeer> {
        self.channel_peers.get(channel_id).cloned().unwrap_or_default()
    }
}
