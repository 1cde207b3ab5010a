// SPDX-License-Identifier: Apache-2.0
//! Refreshable entries keyed by invocation chain.

use super::{Factory, RefreshableEntry};
use crate::SelectionMetrics;
use dashmap::{mapref::entry::Entry, DashMap};
use fab_config::InitMode;
use fab_types::{CacheKey, DiscoveryError, DiscoveryResult, InvocationChain};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinSet;
use tracing::debug;

/// Keys that map onto a stable [CacheKey].
pub trait Keyed {
    fn cache_key(&self) -> CacheKey;
}

impl Keyed for InvocationChain {
    fn cache_key(&self) -> CacheKey {
        InvocationChain::cache_key(self)
    }
}

/// One [RefreshableEntry] per key, each with a background refresh task.
///
/// Dropping the cache aborts every refresh task.
pub struct KeyedCache<K, V: ?Sized> {
    entries: DashMap<CacheKey, RefreshableEntry<K, V>>,
    factory: Factory<K, V>,
    refresh_interval: Duration,
    init_mode: InitMode,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    metrics: Arc<SelectionMetrics>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Keyed + Clone + Send + Sync + 'static,
    V: ?Sized + Send + Sync + 'static,
{
    pub fn new(
        factory: Factory<K, V>,
        refresh_interval: Duration,
        init_mode: InitMode,
        metrics: Arc<SelectionMetrics>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            factory,
            refresh_interval,
            init_mode,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// The value for `key`, computing it on first access.
    pub async fn get(&self, key: K) -> DiscoveryResult<Arc<V>> {
        let entry = self.get_or_create(key)?;
        entry.get().await
    }

    /// The entry for `key`. A new entry starts its refresh task.
    ///
    /// Must be called within a tokio runtime.
    pub fn get_or_create(&self, key: K) -> DiscoveryResult<RefreshableEntry<K, V>> {
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }

        let cache_key = key.cache_key();
        match self.entries.entry(cache_key.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let entry = RefreshableEntry::new(key, cache_key, self.factory.clone());
                self.spawn_refresh(entry.clone())?;
                vacant.insert(entry.clone());
                self.metrics.cache_entries.inc();
                debug!(target: "selection-cache", key = %entry.cache_key(), "created cache entry");
                Ok(entry)
            }
        }
    }

    fn spawn_refresh(&self, entry: RefreshableEntry<K, V>) -> DiscoveryResult<()> {
        let mut tasks = self.tasks.lock();
        // close() aborts under this lock
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }

        let populate = self.init_mode == InitMode::Immediately;
        let interval = self.refresh_interval;
        let metrics = self.metrics.clone();
        tasks.spawn(async move {
            entry
                .refresh_periodically(interval, populate, |_| metrics.cache_refresh_failures.inc())
                .await
        });

        // reap tasks that already stopped
        while tasks.try_join_next().is_some() {}
        Ok(())
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop every refresh task and drop all entries. Further reads fail with
    /// [DiscoveryError::Closed].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.tasks.lock().abort_all();
        for entry in self.entries.iter() {
            entry.value().close();
        }
        self.entries.clear();
        self.metrics.cache_entries.set(0);
        debug!(target: "selection-cache", "cache closed");
    }
}
