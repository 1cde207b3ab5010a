// SPDX-License-Identifier: Apache-2.0
//! Concurrent fan-out of a discovery request to several targets.

use async_trait::async_trait;
use fab_types::{
    DiscoveryClient, DiscoveryError, DiscoveryRequest, DiscoveryResponse, DiscoveryResult,
    DiscoveryTransport, PeerConfig,
};
use std::{collections::HashSet, sync::Arc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// [DiscoveryClient] that queries every target concurrently over a [DiscoveryTransport].
///
/// Responses are returned in arrival order. Targets that haven't answered when the
/// request timeout expires are aborted and reported as timed out.
#[derive(Debug)]
pub struct FanOutClient<T> {
    transport: Arc<T>,
    /// Return as soon as this many targets answered without error.
    min_responses: Option<usize>,
}

impl<T: DiscoveryTransport> FanOutClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport, min_responses: None }
    }

    /// Stop waiting once `min_responses` targets answered successfully.
    pub fn with_min_responses(mut self, min_responses: usize) -> Self {
        self.min_responses = Some(min_responses.max(1));
        self
    }
}

impl<T> Clone for FanOutClient<T> {
    fn clone(&self) -> Self {
        Self { transport: self.transport.clone(), min_responses: self.min_responses }
    }
}

#[async_trait]
impl<T: DiscoveryTransport> DiscoveryClient for FanOutClient<T> {
    async fn send(
        &self,
        request: &DiscoveryRequest,
        targets: &[PeerConfig],
    ) -> DiscoveryResult<Vec<DiscoveryResponse>> {
        if targets.is_empty() {
            return Err(DiscoveryError::NoTargets(request.channel_id.clone()));
        }

        let mut tasks = JoinSet::new();
        for target in targets.iter().cloned() {
            let transport = self.transport.clone();
            let request = request.clone();
            tasks.spawn(async move { transport.query(&request, &target).await });
        }

        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);

        let mut responses = Vec::with_capacity(targets.len());
        let mut answered = HashSet::new();
        let mut succeeded = 0;

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(response)) => {
                        answered.insert(response.target().to_string());
                        if response.error().is_none() {
                            succeeded += 1;
                        }
                        responses.push(response);
                        if self.min_responses.is_some_and(|min| succeeded >= min) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(target: "discovery", ?e, "discovery target task failed");
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    debug!(
                        target: "discovery",
                        pending = tasks.len(),
                        timeout = ?request.timeout,
                        "deadline reached, abandoning outstanding targets"
                    );
                    for target in targets.iter().filter(|t| !answered.contains(&t.url)) {
                        responses.push(DiscoveryResponse::failure(
                            target.url.clone(),
                            DiscoveryError::Timeout(request.timeout),
                        ));
                    }
                    break;
                }
            }
        }

        tasks.abort_all();
        Ok(responses)
    }
}
