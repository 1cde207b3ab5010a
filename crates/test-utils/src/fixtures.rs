// SPDX-License-Identifier: Apache-2.0
//! Peer fixtures.

use fab_types::{
    ChaincodeCall, ChannelPeer, DiscoveredPeer, InvocationChain, PeerConfig, PeerStateInfo,
};

/// Channel used by fixtures.
pub const TEST_CHANNEL: &str = "mychannel";

/// Host and port of peer `index` of organization `org`, e.g. `peer0.org1.example.com:7051`.
pub fn peer_address(org: u8, index: u8) -> String {
    format!("peer{index}.org{org}.example.com:{}", 7051 + 1000 * index as u16)
}

/// The membership service provider id of organization `org`.
pub fn msp_id(org: u8) -> String {
    format!("Org{org}MSP")
}

/// A discovered peer reporting `height` with `chaincodes` installed.
pub fn discovered_peer(org: u8, index: u8, height: u64, chaincodes: &[&str]) -> DiscoveredPeer {
    DiscoveredPeer::new(peer_address(org, index), msp_id(org)).with_state(PeerStateInfo {
        ledger_height: height,
        chaincodes: chaincodes.iter().map(|cc| cc.to_string()).collect(),
        left_channel: false,
    })
}

/// Local configuration for a peer, using the tls url scheme.
pub fn peer_config(org: u8, index: u8) -> PeerConfig {
    PeerConfig::new(format!("grpcs://{}", peer_address(org, index)))
}

/// A discovery-enabled channel peer.
pub fn channel_peer(org: u8, index: u8) -> ChannelPeer {
    ChannelPeer { config: peer_config(org, index), msp_id: msp_id(org), discovery_enabled: true }
}

/// Invocation chain over the chaincode ids, without collections.
pub fn invocation_chain(ids: &[&str]) -> InvocationChain {
    calls(ids).into()
}

pub fn calls(ids: &[&str]) -> Vec<ChaincodeCall> {
    ids.iter().map(|id| ChaincodeCall::new(*id)).collect()
}
