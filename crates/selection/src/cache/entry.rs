// SPDX-License-Identifier: Apache-2.0
//! A single lazily computed, periodically refreshed value.

use fab_types::{CacheKey, DiscoveryError, DiscoveryResult};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::Mutex,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

/// Computes the value for a key.
pub type Factory<K, V> =
    Arc<dyn Fn(K) -> BoxFuture<'static, DiscoveryResult<Arc<V>>> + Send + Sync>;

/// A cached value with single-flight population and refresh.
///
/// At most one computation runs at a time. Readers never observe a partially updated
/// value and keep reading the previous value while a refresh is in progress or after it
/// failed.
pub struct RefreshableEntry<K, V: ?Sized> {
    inner: Arc<EntryInner<K, V>>,
}

struct EntryInner<K, V: ?Sized> {
    key: K,
    cache_key: CacheKey,
    value: RwLock<Option<Arc<V>>>,
    /// Held for the duration of a computation.
    in_flight: Mutex<()>,
    /// Number of finished computations, bumped under `in_flight`.
    attempts: AtomicU64,
    /// Error of the last computation, if it failed.
    last_error: RwLock<Option<DiscoveryError>>,
    factory: Factory<K, V>,
    closed: AtomicBool,
}

impl<K, V: ?Sized> Clone for RefreshableEntry<K, V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<K, V> RefreshableEntry<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    pub fn new(key: K, cache_key: CacheKey, factory: Factory<K, V>) -> Self {
        Self {
            inner: Arc::new(EntryInner {
                key,
                cache_key,
                value: RwLock::new(None),
                in_flight: Mutex::new(()),
                attempts: AtomicU64::new(0),
                last_error: RwLock::new(None),
                factory,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.inner.cache_key
    }

    /// The current value without triggering a computation.
    pub fn value(&self) -> Option<Arc<V>> {
        self.inner.value.read().clone()
    }

    /// Return the value, computing it if the entry is empty.
    ///
    /// Concurrent callers on an empty entry share a single computation and its outcome.
    /// Callers that arrive after a failed computation finished start a new one.
    pub async fn get(&self) -> DiscoveryResult<Arc<V>> {
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }
        let seen = self.inner.attempts.load(Ordering::Acquire);
        if let Some(value) = self.value() {
            return Ok(value);
        }

        let _guard = self.inner.in_flight.lock().await;
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }
        // populated while waiting for the lock
        if let Some(value) = self.value() {
            return Ok(value);
        }
        // a computation finished while waiting and left the entry empty
        if self.inner.attempts.load(Ordering::Acquire) != seen {
            let last_error = self.inner.last_error.read().clone();
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        debug!(target: "selection-cache", key = %self.inner.cache_key, "populating cache entry");
        self.compute().await
    }

    /// Recompute the value.
    ///
    /// On failure the previous value is kept and the error is returned.
    pub async fn refresh(&self) -> DiscoveryResult<()> {
        let _guard = self.inner.in_flight.lock().await;
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }

        debug!(target: "selection-cache", key = %self.inner.cache_key, "refreshing cache entry");
        self.compute().await.map(|_| ())
    }

    /// Run the factory and record the outcome. Caller holds `in_flight`.
    async fn compute(&self) -> DiscoveryResult<Arc<V>> {
        let result = (self.inner.factory)(self.inner.key.clone()).await;
        match &result {
            Ok(value) => {
                *self.inner.value.write() = Some(value.clone());
                self.inner.last_error.write().take();
            }
            Err(e) => {
                *self.inner.last_error.write() = Some(e.clone());
            }
        }
        self.inner.attempts.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Refresh every `interval` until the entry is closed.
    ///
    /// When `populate` is set the entry is computed right away if nobody else did.
    pub async fn refresh_periodically(
        self,
        interval: Duration,
        populate: bool,
        on_failure: impl Fn(&DiscoveryError),
    ) {
        if populate {
            match self.get().await {
                Ok(_) => {}
                Err(DiscoveryError::Closed) => return,
                Err(e) => {
                    warn!(
                        target: "selection-cache",
                        key = %self.inner.cache_key,
                        ?e,
                        "initial population of cache entry failed"
                    );
                    on_failure(&e);
                }
            }
        }

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.refresh().await {
                Ok(()) => {}
                Err(DiscoveryError::Closed) => break,
                Err(e) => {
                    warn!(
                        target: "selection-cache",
                        key = %self.inner.cache_key,
                        ?e,
                        "refresh failed, keeping previous value"
                    );
                    on_failure(&e);
                }
            }
        }

        debug!(target: "selection-cache", key = %self.inner.cache_key, "refresh task stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Drop the value and reject further reads.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.value.write().take();
    }
}
