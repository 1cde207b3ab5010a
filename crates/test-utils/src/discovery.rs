// SPDX-License-Identifier: Apache-2.0
//! Scripted discovery collaborators.

use async_trait::async_trait;
use fab_types::{
    AdmissionFilter, CacheKey, ChannelResponse, DiscoveredPeer, DiscoveryClient, DiscoveryError,
    DiscoveryRequest, DiscoveryResponse, DiscoveryResult, DiscoveryTransport, InvocationChain,
    PeerConfig, PriorityComparator,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// Channel response backed by a fixed table of endorsers per invocation chain.
#[derive(Debug, Default)]
pub struct MockChannelResponse {
    endorsers: HashMap<CacheKey, Vec<DiscoveredPeer>>,
}

impl MockChannelResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `chain` with `peers`.
    pub fn with_endorsers(mut self, chain: &InvocationChain, peers: Vec<DiscoveredPeer>) -> Self {
        self.endorsers.insert(chain.cache_key(), peers);
        self
    }

    pub fn into_arc(self) -> Arc<dyn ChannelResponse> {
        Arc::new(self)
    }
}

impl ChannelResponse for MockChannelResponse {
    fn endorsers(
        &self,
        chain: &InvocationChain,
        comparator: &dyn PriorityComparator,
        filter: &dyn AdmissionFilter,
    ) -> DiscoveryResult<Vec<DiscoveredPeer>> {
        let Some(peers) = self.endorsers.get(&chain.cache_key()) else {
            return Err(DiscoveryError::from_server(
                None,
                format!("failed constructing descriptor for chaincodes {chain}"),
            ));
        };

        let mut peers: Vec<DiscoveredPeer> =
            peers.iter().filter(|peer| !filter.exclude(peer)).cloned().collect();
        peers.sort_by(|a, b| comparator.compare(a, b));
        Ok(peers)
    }
}

/// A successful response from `target` answering for `channel_id`.
pub fn channel_success(
    target: &str,
    channel_id: &str,
    response: Arc<dyn ChannelResponse>,
) -> DiscoveryResponse {
    DiscoveryResponse::success(target, [(channel_id.to_string(), response)])
}

/// A failed response from `target` carrying a server message.
pub fn server_failure(target: &str, message: &str) -> DiscoveryResponse {
    DiscoveryResponse::failure(target, DiscoveryError::from_server(Some(target), message))
}

/// The outcome of one [DiscoveryClient::send] call.
pub type SendOutcome = DiscoveryResult<Vec<DiscoveryResponse>>;

/// Discovery client replaying scripted outcomes.
///
/// Each send consumes the next queued outcome. Once the queue is empty the fallback
/// outcome is returned on every call.
#[derive(Debug)]
pub struct MockDiscoveryClient {
    queue: Mutex<VecDeque<SendOutcome>>,
    fallback: Mutex<SendOutcome>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(DiscoveryRequest, Vec<PeerConfig>)>>,
}

impl MockDiscoveryClient {
    /// A client answering every send with `responses`.
    pub fn new(responses: Vec<DiscoveryResponse>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(responses)),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Delay every send by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue an outcome for the next unanswered send.
    pub fn push(&self, outcome: SendOutcome) {
        self.queue.lock().push_back(outcome);
    }

    /// Replace the outcome returned once the queue is empty.
    pub fn set_fallback(&self, outcome: SendOutcome) {
        *self.fallback.lock() = outcome;
    }

    /// Number of sends so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, with their targets.
    pub fn requests(&self) -> Vec<(DiscoveryRequest, Vec<PeerConfig>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DiscoveryClient for MockDiscoveryClient {
    async fn send(
        &self,
        request: &DiscoveryRequest,
        targets: &[PeerConfig],
    ) -> DiscoveryResult<Vec<DiscoveryResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push((request.clone(), targets.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queue.lock().pop_front();
        queued.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// Transport answering each target after a per-target delay.
#[derive(Debug, Default)]
pub struct MockTransport {
    answers: HashMap<String, (Duration, DiscoveryResponse)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `target` with `response` after `delay`.
    pub fn with_answer(
        mut self,
        target: &PeerConfig,
        delay: Duration,
        response: DiscoveryResponse,
    ) -> Self {
        self.answers.insert(target.url.clone(), (delay, response));
        self
    }
}

#[async_trait]
impl DiscoveryTransport for MockTransport {
    async fn query(&self, _request: &DiscoveryRequest, target: &PeerConfig) -> DiscoveryResponse {
        match self.answers.get(&target.url) {
            Some((delay, response)) => {
                tokio::time::sleep(*delay).await;
                response.clone()
            }
            None => DiscoveryResponse::failure(
                target.url.clone(),
                DiscoveryError::Transport(format!("connection refused: {}", target.url)),
            ),
        }
    }
}
