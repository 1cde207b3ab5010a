//! End-to-end endorser selection tests.

#![allow(unused_crate_dependencies)]

use assert_matches::assert_matches;
use fab_config::{
    BalancerType, DiscoveryPolicy, RetryConfig, SelectionConfig, SelectionPolicy, SortingStrategy,
};
use fab_selection::{Balancer, PeerSorter, SelectionOptions, SelectionService};
use fab_test_utils::{
    calls, channel_peer, channel_success, discovered_peer, init_test_tracing, invocation_chain,
    msp_id, peer_address, peer_config, server_failure, MockChannelResponse, MockDiscoveryClient,
    MockEndpointResolver, MockMembership, TEST_CHANNEL,
};
use fab_types::{
    ChaincodeCall, DiscoveredPeer, DiscoveryError, DiscoveryResponse, Peer as _, PeerEndpoint,
    PeerState as _, ResolvedPeer, SelectionError,
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

const REFRESH: Duration = Duration::from_secs(10);

/// Org1 peers 0..3 at heights 100, 103 and 90.
fn org1_endorsers() -> Vec<DiscoveredPeer> {
    vec![
        discovered_peer(1, 0, 100, &["cc1"]),
        discovered_peer(1, 1, 103, &["cc1"]),
        discovered_peer(1, 2, 90, &["cc1"]),
    ]
}

fn response_for(ids: &[&str], peers: Vec<DiscoveredPeer>) -> DiscoveryResponse {
    let channel_response =
        MockChannelResponse::new().with_endorsers(&invocation_chain(ids), peers).into_arc();
    channel_success("peer0", TEST_CHANNEL, channel_response)
}

fn member(org: u8, index: u8) -> PeerEndpoint {
    PeerEndpoint::new(peer_address(org, index), msp_id(org))
}

fn urls(peers: &[ResolvedPeer]) -> Vec<String> {
    peers.iter().map(|peer| peer.url().to_string()).collect()
}

fn url(org: u8, index: u8) -> String {
    peer_config(org, index).url
}

fn test_config() -> SelectionConfig {
    SelectionConfig {
        refresh_interval: REFRESH,
        discovery: DiscoveryPolicy { max_targets: 2, retry: RetryConfig::no_retry() },
        ..Default::default()
    }
}

/// Service over three org1 peers that are members, configured and discovery targets.
struct Harness {
    client: Arc<MockDiscoveryClient>,
    membership: Arc<MockMembership>,
    service: SelectionService,
}

impl Harness {
    fn new(client: MockDiscoveryClient) -> Self {
        Self::with(client, test_config(), None)
    }

    fn with(
        client: MockDiscoveryClient,
        config: SelectionConfig,
        sorter: Option<PeerSorter>,
    ) -> Self {
        init_test_tracing();
        let client = Arc::new(client);
        let membership = Arc::new(MockMembership::new((0..3).map(|i| member(1, i)).collect()));
        let resolver = Arc::new(
            MockEndpointResolver::new()
                .with_channel_peers(TEST_CHANNEL, (0..3).map(|i| channel_peer(1, i)).collect()),
        );

        let mut builder =
            SelectionService::builder(TEST_CHANNEL, membership.clone(), resolver, client.clone())
                .with_config(config);
        if let Some(sorter) = sorter {
            builder = builder.with_peer_sorter(sorter);
        }
        let service = builder.build().expect("valid service");
        Self { client, membership, service }
    }

    async fn select(&self, ids: &[&str]) -> Result<Vec<ResolvedPeer>, SelectionError> {
        self.service.get_endorsers_for_chaincode(&calls(ids), SelectionOptions::new()).await
    }
}

#[tokio::test]
async fn test_partial_failures_still_select() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![
        DiscoveryResponse::failure("peer0", DiscoveryError::Transport("connection reset".into())),
        server_failure("peer1", "failed constructing descriptor"),
        response_for(&["cc1"], vec![discovered_peer(1, 2, 90, &["cc1"])]),
    ]));

    let endorsers = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 2)]);
    assert_eq!(endorsers[0].msp_id(), "Org1MSP");
    assert_eq!(endorsers[0].block_height(), Some(90));
    assert_eq!(endorsers[0].properties().chaincodes(), Some(&["cc1".to_string()][..]));
}

#[tokio::test]
async fn test_empty_request_rejected_without_network() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![]));

    let err = harness.service.get_endorsers_for_chaincode(&[], SelectionOptions::new()).await;
    assert_matches!(err, Err(SelectionError::NoChaincodes));
    assert_eq!(harness.client.calls(), 0);
    assert_eq!(harness.service.cached_chains(), 0);
}

#[tokio::test]
async fn test_default_order_is_by_block_height() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));

    let endorsers = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 1), url(1, 0), url(1, 2)]);
}

#[tokio::test]
async fn test_unknown_peers_are_never_returned() {
    let mut discovered = org1_endorsers();
    // a peer of another org that the local membership doesn't know
    discovered.push(discovered_peer(3, 0, 500, &["cc1"]));
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(&["cc1"], discovered)]));

    let endorsers = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(endorsers.len(), 3);
    assert!(!urls(&endorsers).iter().any(|u| u.contains("org3")));

    // membership changes apply to cached results
    harness.membership.set_peers(vec![member(1, 0)]);
    let endorsers = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 0)]);
    assert_eq!(harness.client.calls(), 1);
}

#[tokio::test]
async fn test_unresolvable_peer_is_dropped() {
    let mut discovered = org1_endorsers();
    discovered.push(discovered_peer(2, 0, 200, &["cc1"]));
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(&["cc1"], discovered)]));
    // known member without local endpoint configuration
    harness.membership.set_peers((0..3).map(|i| member(1, i)).chain([member(2, 0)]).collect());

    let endorsers = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 1), url(1, 0), url(1, 2)]);
    assert_eq!(harness.service.metrics().unresolved_peers.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_selections_share_one_round_trip() {
    let client = MockDiscoveryClient::new(vec![response_for(&["cc1"], org1_endorsers())])
        .with_delay(Duration::from_millis(200));
    let harness = Harness::new(client);

    let results = join_all((0..25).map(|_| harness.select(&["cc1"]))).await;
    for result in results {
        assert_eq!(result.unwrap().len(), 3);
    }
    assert_eq!(harness.client.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_selections_from_many_tasks() {
    let client = MockDiscoveryClient::new(vec![response_for(&["cc1"], org1_endorsers())])
        .with_delay(Duration::from_millis(50));
    let harness = Arc::new(Harness::new(client));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let harness = harness.clone();
            tokio::spawn(async move { harness.select(&["cc1"]).await.map(|peers| peers.len()) })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 3);
    }
    assert_eq!(harness.client.calls(), 1);
}

#[tokio::test]
async fn test_equal_chains_share_cache_entry() {
    let chain = ["cc1", "cc2"];
    let client = MockDiscoveryClient::new(vec![response_for(&chain, org1_endorsers())]);
    let harness = Harness::new(client);

    let first: Vec<ChaincodeCall> = calls(&chain);
    let second: Vec<ChaincodeCall> = calls(&chain);
    harness.service.get_endorsers_for_chaincode(&first, SelectionOptions::new()).await.unwrap();
    harness.service.get_endorsers_for_chaincode(&second, SelectionOptions::new()).await.unwrap();

    assert_eq!(harness.service.cached_chains(), 1);
    assert_eq!(harness.client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_serves_last_good_result() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));
    let before = harness.select(&["cc1"]).await.unwrap();

    harness.client.set_fallback(Err(DiscoveryError::Transport("connection refused".into())));
    tokio::time::sleep(REFRESH * 2 + Duration::from_millis(1)).await;
    assert_eq!(harness.client.calls(), 3);

    let after = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(urls(&after), urls(&before));

    let metrics = harness.service.metrics();
    assert_eq!(metrics.cache_refresh_failures.get(), 2);
    assert_eq!(metrics.discovery_round_trips.with_label_values(&["failure"]).get(), 2);
    assert_eq!(metrics.discovery_round_trips.with_label_values(&["success"]).get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_replaces_cached_result() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));
    assert_eq!(harness.select(&["cc1"]).await.unwrap().len(), 3);

    harness
        .client
        .set_fallback(Ok(vec![response_for(&["cc1"], vec![discovered_peer(1, 0, 120, &["cc1"])])]));
    tokio::time::sleep(REFRESH + Duration::from_millis(1)).await;

    let endorsers = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 0)]);
    assert_eq!(endorsers[0].block_height(), Some(120));
}

#[tokio::test(start_paused = true)]
async fn test_transient_status_retried_then_succeeds() {
    let client = MockDiscoveryClient::new(vec![response_for(&["cc1"], org1_endorsers())]);
    client.push(Ok(vec![server_failure("peer0", "no endorsement combination can be satisfied")]));
    let config = SelectionConfig {
        discovery: DiscoveryPolicy { max_targets: 2, retry: RetryConfig::default() },
        ..test_config()
    };
    let harness = Harness::with(client, config, None);

    assert_eq!(harness.select(&["cc1"]).await.unwrap().len(), 3);
    assert_eq!(harness.client.calls(), 2);
}

#[tokio::test]
async fn test_access_denied_escalates_to_error_handler() {
    let client = Arc::new(MockDiscoveryClient::new(vec![server_failure("peer0", "access denied")]));
    let membership = Arc::new(MockMembership::new(vec![member(1, 0)]));
    let resolver = Arc::new(
        MockEndpointResolver::new().with_channel_peers(TEST_CHANNEL, vec![channel_peer(1, 0)]),
    );
    let escalated = Arc::new(Mutex::new(Vec::new()));
    let service = {
        let escalated = escalated.clone();
        SelectionService::builder(TEST_CHANNEL, membership, resolver, client.clone())
            .with_config(SelectionConfig::default())
            .with_error_handler(move |channel_id, e| {
                escalated.lock().push((channel_id.to_string(), e.is_access_denied()))
            })
            .build()
            .unwrap()
    };

    let err = service
        .get_endorsers_for_chaincode(&calls(&["cc1"]), SelectionOptions::new())
        .await
        .unwrap_err();
    assert_matches!(
        &err,
        SelectionError::ChannelResponse { channel_id, source }
            if channel_id == TEST_CHANNEL && source.is_access_denied()
    );
    assert_eq!(client.calls(), 1, "access denied must not be retried");
    assert_eq!(*escalated.lock(), vec![(TEST_CHANNEL.to_string(), true)]);
}

#[tokio::test]
async fn test_unsatisfiable_chain_reported() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));

    let err = harness.select(&["cc2"]).await.unwrap_err();
    let source = err.discovery_error().expect("discovery error");
    assert_eq!(source.status_code(), Some(fab_types::StatusCode::QueryEndorsers));
}

#[tokio::test]
async fn test_membership_failure_surfaces() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));
    harness.membership.fail_with("membership unavailable");

    assert_matches!(harness.select(&["cc1"]).await, Err(SelectionError::Membership(_)));
}

#[tokio::test]
async fn test_caller_filter_and_comparator() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));

    let options = SelectionOptions::new()
        .with_peer_filter(|peer: &PeerEndpoint| peer.block_height.unwrap_or(0) >= 100)
        .with_priority_comparator(|a: &DiscoveredPeer, b: &DiscoveredPeer| {
            a.block_height().cmp(&b.block_height())
        });
    let endorsers =
        harness.service.get_endorsers_for_chaincode(&calls(&["cc1"]), options).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 0), url(1, 1)]);
}

#[tokio::test]
async fn test_per_call_sorter_overrides_service_default() {
    let reverse = PeerSorter::custom(|mut peers: Vec<ResolvedPeer>| {
        peers.reverse();
        peers
    });
    let harness = Harness::with(
        MockDiscoveryClient::new(vec![response_for(&["cc1"], org1_endorsers())]),
        test_config(),
        Some(reverse),
    );

    // service default
    let endorsers = harness.select(&["cc1"]).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 2), url(1, 0), url(1, 1)]);

    // per call
    let by_url = PeerSorter::custom(|mut peers: Vec<ResolvedPeer>| {
        peers.sort_by(|a, b| a.url().cmp(b.url()));
        peers
    });
    let options = SelectionOptions::new().with_peer_sorter(by_url);
    let endorsers =
        harness.service.get_endorsers_for_chaincode(&calls(&["cc1"]), options).await.unwrap();
    assert_eq!(urls(&endorsers), vec![url(1, 0), url(1, 1), url(1, 2)]);
}

#[tokio::test]
async fn test_configured_policy_sorts_lagging_peers_last() {
    let config = SelectionConfig {
        selection: Some(SelectionPolicy {
            sorting_strategy: SortingStrategy::BlockHeightPriority,
            balancer: BalancerType::RoundRobin,
            block_height_lag_threshold: 5,
        }),
        ..test_config()
    };
    let harness = Harness::with(
        MockDiscoveryClient::new(vec![response_for(&["cc1"], org1_endorsers())]),
        config,
        None,
    );

    // heights 100 and 103 are within 5 of the max, 90 lags
    for _ in 0..4 {
        let endorsers = harness.select(&["cc1"]).await.unwrap();
        assert_eq!(endorsers.len(), 3);
        assert_eq!(endorsers[2].url(), url(1, 2));
    }

    // round robin alternates the fresh peers
    let first = harness.select(&["cc1"]).await.unwrap()[0].url().to_string();
    let second = harness.select(&["cc1"]).await.unwrap()[0].url().to_string();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_balancer_as_per_call_sorter() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));
    let options = SelectionOptions::new().with_peer_sorter(Balancer::round_robin());

    let mut firsts = Vec::new();
    for _ in 0..3 {
        // clones share the rotation counter
        let endorsers = harness
            .service
            .get_endorsers_for_chaincode(&calls(&["cc1"]), options.clone())
            .await
            .unwrap();
        firsts.push(endorsers[0].url().to_string());
    }
    assert_eq!(firsts, vec![url(1, 1), url(1, 0), url(1, 2)]);
}

#[tokio::test]
async fn test_no_discovery_targets() {
    let client = Arc::new(MockDiscoveryClient::new(vec![]));
    let service = SelectionService::builder(
        TEST_CHANNEL,
        Arc::new(MockMembership::new(vec![member(1, 0)])),
        Arc::new(MockEndpointResolver::new()),
        client.clone(),
    )
    .build()
    .unwrap();

    let err = service
        .get_endorsers_for_chaincode(&calls(&["cc1"]), SelectionOptions::new())
        .await
        .unwrap_err();
    assert_matches!(err.discovery_error(), Some(DiscoveryError::NoTargets(_)));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_close_rejects_further_selections() {
    let harness = Harness::new(MockDiscoveryClient::new(vec![response_for(
        &["cc1"],
        org1_endorsers(),
    )]));
    harness.select(&["cc1"]).await.unwrap();

    harness.service.close();
    assert!(harness.service.is_closed());
    assert_eq!(harness.service.cached_chains(), 0);
    assert_matches!(
        harness.select(&["cc1"]).await,
        Err(SelectionError::Closed(channel)) if channel == TEST_CHANNEL
    );
    assert_eq!(harness.service.channel_id(), TEST_CHANNEL);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let build = |config: SelectionConfig| {
        SelectionService::builder(
            TEST_CHANNEL,
            Arc::new(MockMembership::default()),
            Arc::new(MockEndpointResolver::new()),
            Arc::new(MockDiscoveryClient::new(vec![])),
        )
        .with_config(config)
        .build()
    };

    assert!(build(SelectionConfig { refresh_interval: Duration::ZERO, ..Default::default() })
        .is_err());
    assert!(build(SelectionConfig {
        discovery: DiscoveryPolicy { max_targets: 0, ..Default::default() },
        ..Default::default()
    })
    .is_err());
    assert!(build(SelectionConfig::default()).is_ok());
}
