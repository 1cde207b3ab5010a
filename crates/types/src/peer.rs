// SPDX-License-Identifier: Apache-2.0
//! Peer records produced by discovery and the peers handed back to callers.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

/// Strip the transport scheme from a peer url.
///
/// Discovery reports bare `host:port` endpoints while local configuration usually carries
/// `grpc://` or `grpcs://` urls. Both sides are normalized before comparison.
pub fn normalize_url(url: &str) -> &str {
    url.strip_prefix("grpcs://").or_else(|| url.strip_prefix("grpc://")).unwrap_or(url)
}

/// State reported by a peer through gossip and relayed by the discovery service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStateInfo {
    /// The height of the peer's committed ledger.
    pub ledger_height: u64,
    /// Chaincodes installed on the peer.
    #[serde(default)]
    pub chaincodes: Vec<String>,
    /// Indicates the peer has left the channel.
    #[serde(default)]
    pub left_channel: bool,
}

/// Raw peer record returned by the discovery service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    /// The network endpoint advertised by the peer.
    pub endpoint: String,
    /// The organization (MSP) that owns the peer.
    pub msp_id: String,
    /// Ledger state, if the peer published any.
    pub state: Option<PeerStateInfo>,
}

impl DiscoveredPeer {
    pub fn new(endpoint: impl Into<String>, msp_id: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), msp_id: msp_id.into(), state: None }
    }

    pub fn with_state(mut self, state: PeerStateInfo) -> Self {
        self.state = Some(state);
        self
    }

    pub fn block_height(&self) -> Option<u64> {
        self.state.as_ref().map(|state| state.ledger_height)
    }

    /// The lightweight projection used for admission decisions.
    pub fn projection(&self) -> PeerEndpoint {
        PeerEndpoint {
            url: self.endpoint.clone(),
            msp_id: self.msp_id.clone(),
            block_height: self.block_height(),
        }
    }

    /// Properties attached to the resolved peer.
    pub fn properties(&self) -> Properties {
        match &self.state {
            Some(state) => Properties::from_state(state),
            None => Properties::default(),
        }
    }
}

/// Keys for [Properties].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    BlockHeight,
    Chaincodes,
    LeftChannel,
}

/// Values for [Properties].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    BlockHeight(u64),
    Chaincodes(Vec<String>),
    LeftChannel(bool),
}

/// Discovered state attached to a [ResolvedPeer].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<PropertyKey, PropertyValue>);

impl Properties {
    pub fn from_state(state: &PeerStateInfo) -> Self {
        let mut properties = BTreeMap::new();
        properties
            .insert(PropertyKey::BlockHeight, PropertyValue::BlockHeight(state.ledger_height));
        properties
            .insert(PropertyKey::Chaincodes, PropertyValue::Chaincodes(state.chaincodes.clone()));
        properties
            .insert(PropertyKey::LeftChannel, PropertyValue::LeftChannel(state.left_channel));
        Self(properties)
    }

    pub fn get(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.0.get(&key)
    }

    pub fn block_height(&self) -> Option<u64> {
        match self.0.get(&PropertyKey::BlockHeight) {
            Some(PropertyValue::BlockHeight(height)) => Some(*height),
            _ => None,
        }
    }

    pub fn chaincodes(&self) -> Option<&[String]> {
        match self.0.get(&PropertyKey::Chaincodes) {
            Some(PropertyValue::Chaincodes(chaincodes)) => Some(chaincodes),
            _ => None,
        }
    }

    pub fn left_channel(&self) -> Option<bool> {
        match self.0.get(&PropertyKey::LeftChannel) {
            Some(PropertyValue::LeftChannel(left)) => Some(*left),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Local endpoint configuration for a peer.
///
/// This is what makes a discovered address usable: the url to dial plus the TLS and
/// connection settings bound to it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// The url used to connect to the peer.
    pub url: String,
    /// CA certificate used to verify the peer's TLS certificate.
    #[serde(default)]
    pub tls_ca_cert: Option<PathBuf>,
    /// Transport options such as the TLS server name override.
    #[serde(default)]
    pub grpc_options: BTreeMap<String, String>,
}

impl PeerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Default::default() }
    }
}

/// A peer configured locally for a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPeer {
    pub config: PeerConfig,
    pub msp_id: String,
    /// Whether the peer may be queried as a discovery target.
    #[serde(default = "enabled")]
    pub discovery_enabled: bool,
}

fn enabled() -> bool {
    true
}

/// Common accessors for peers.
pub trait Peer {
    fn url(&self) -> &str;
    fn msp_id(&self) -> &str;
}

/// Optional freshness information used to order peers.
pub trait PeerState {
    /// The ledger height, if known.
    fn block_height(&self) -> Option<u64>;
}

/// Projection of a discovered peer without any connection.
///
/// Admission filters receive this type so evaluating them never dials anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub url: String,
    pub msp_id: String,
    pub block_height: Option<u64>,
}

impl PeerEndpoint {
    pub fn new(url: impl Into<String>, msp_id: impl Into<String>) -> Self {
        Self { url: url.into(), msp_id: msp_id.into(), block_height: None }
    }
}

impl Peer for PeerEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    fn msp_id(&self) -> &str {
        &self.msp_id
    }
}

impl PeerState for PeerEndpoint {
    fn block_height(&self) -> Option<u64> {
        self.block_height
    }
}

/// Caller-facing endorsing peer.
///
/// Only produced for discovered peers that map to local endpoint configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPeer {
    url: String,
    msp_id: String,
    properties: Properties,
    config: PeerConfig,
}

impl ResolvedPeer {
    pub fn new(discovered: &DiscoveredPeer, config: PeerConfig) -> Self {
        Self {
            url: config.url.clone(),
            msp_id: discovered.msp_id.clone(),
            properties: discovered.properties(),
            config,
        }
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The local configuration used to connect to this peer.
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }
}

impl Peer for ResolvedPeer {
    fn url(&self) -> &str {
        &self.url
    }

    fn msp_id(&self) -> &str {
        &self.msp_id
    }
}

impl PeerState for ResolvedPeer {
    fn block_height(&self) -> Option<u64> {
        self.properties.block_height()
    }
}
