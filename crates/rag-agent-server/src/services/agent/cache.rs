//! Keyed store of reasoning sessions.
//!
//! - Single build per key: the map only ever holds one `OnceCell` per key and
//!   construction runs on that cell outside the map lock, so concurrent first
//!   lookups share one build.
//! - Lazy TTL expiry on lookup plus a periodic sweep.
//! - LRU eviction by last access when full, applied once a build succeeds so
//!   a failed build never displaces a live session.
//! - Entries with an outstanding `SessionLease` are never evicted; eviction
//!   waits until their active call count drops back to zero.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::AgentResult;
use super::session::{ReasoningSession, SessionFactory};
use super::types::{CacheStatistics, SessionKey};

#[derive(Debug, Clone)]
pub struct SessionCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 100,
        }
    }
}

struct CacheEntry {
    cell: Arc<OnceCell<Arc<ReasoningSession>>>,
    created_at: Instant,
    last_accessed_at: Instant,
    hit_count: u64,
    active_calls: Arc<AtomicUsize>,
}

impl CacheEntry {
    fn new(now: Instant) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            created_at: now,
            last_accessed_at: now,
            hit_count: 0,
            active_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn in_use(&self) -> bool {
        self.active_calls.load(Ordering::Acquire) > 0
    }

    /// In-use entries never count as expired
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        !self.in_use() && now.saturating_duration_since(self.last_accessed_at) > ttl
    }

    fn session(&self) -> Option<&Arc<ReasoningSession>> {
        self.cell.get()
    }
}

/// Decrements the entry's active call count when dropped
struct ActiveCall(Arc<AtomicUsize>);

impl ActiveCall {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A session checked out of the cache. The entry cannot be evicted while
/// any lease on it is alive.
pub struct SessionLease {
    session: Arc<ReasoningSession>,
    _active: ActiveCall,
}

impl SessionLease {
    pub fn session(&self) -> &Arc<ReasoningSession> {
        &self.session
    }
}

impl Deref for SessionLease {
    type Target = ReasoningSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

/// Read-only view of a cached entry
#[derive(Clone)]
pub struct EntrySnapshot {
    pub session: Arc<ReasoningSession>,
    pub hit_count: u64,
    pub age: Duration,
}

pub struct SessionCache {
    entries: Mutex<HashMap<SessionKey, CacheEntry>>,
    factory: Arc<dyn SessionFactory>,
    config: SessionCacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCache {
    pub fn new(factory: Arc<dyn SessionFactory>, config: SessionCacheConfig) -> Self {
        info!(
            "Initializing session cache: ttl={:?}, max_entries={}",
            config.ttl, config.max_entries
        );
        Self {
            entries: Mutex::new(HashMap::new()),
            factory,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Returns the live session for `key`, building it at most once.
    pub async fn get_or_create(&self, key: &SessionKey) -> AgentResult<SessionLease> {
        let (cell, active) = {
            let now = Instant::now();
            let mut entries = self.entries.lock();

            if entries
                .get(key)
                .is_some_and(|e| e.is_expired(now, self.config.ttl))
            {
                entries.remove(key);
                debug!("Session {} expired, evicted on lookup", key);
            }

            let ready = match entries.get_mut(key) {
                Some(entry) => {
                    entry.last_accessed_at = now;
                    entry.hit_count += 1;
                    entry.session().is_some()
                }
                None => {
                    entries.insert(key.clone(), CacheEntry::new(now));
                    false
                }
            };

            if ready {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }

            // Entry was inserted or found just above
            let entry = &entries[key];
            // Counted under the lock so a concurrent sweep sees the entry as busy
            (entry.cell.clone(), ActiveCall::enter(&entry.active_calls))
        };

        let built = cell
            .get_or_try_init(|| async {
                debug!("Building session {}", key);
                self.factory.build(key).await.map(Arc::new)
            })
            .await
            .map(Arc::clone);

        match built {
            Ok(session) => {
                self.evict_over_capacity(&mut self.entries.lock());
                Ok(SessionLease {
                    session,
                    _active: active,
                })
            }
            Err(e) => {
                drop(active);
                self.discard_failed_build(key, &cell);
                Err(e)
            }
        }
    }

    /// Removes an entry whose build failed once no other caller is waiting on it
    fn discard_failed_build(&self, key: &SessionKey, cell: &Arc<OnceCell<Arc<ReasoningSession>>>) {
        let mut entries = self.entries.lock();
        let abandoned = entries.get(key).is_some_and(|e| {
            Arc::ptr_eq(&e.cell, cell) && e.session().is_none() && !e.in_use()
        });
        if abandoned {
            entries.remove(key);
            debug!("Dropped session slot {} after failed build", key);
        }
    }

    /// Evicts idle least-recently-accessed entries while over capacity.
    fn evict_over_capacity(&self, entries: &mut HashMap<SessionKey, CacheEntry>) {
        while entries.len() > self.config.max_entries.max(1) {
            let victim = entries
                .iter()
                .filter(|(_, e)| !e.in_use())
                .min_by_key(|(_, e)| e.last_accessed_at)
                .map(|(k, _)| k.clone());

            match victim {
                Some(k) => {
                    entries.remove(&k);
                    debug!("Evicted least recently used session {}", k);
                }
                None => {
                    warn!(
                        "All {} cached sessions are busy, exceeding capacity until one is released",
                        entries.len()
                    );
                    break;
                }
            }
        }
    }

    /// Looks up a live entry without touching statistics or access time
    pub fn peek(&self, key: &SessionKey) -> Option<EntrySnapshot> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.is_expired(now, self.config.ttl) {
            return None;
        }
        entry.session().map(|session| EntrySnapshot {
            session: session.clone(),
            hit_count: entry.hit_count,
            age: now.saturating_duration_since(entry.created_at),
        })
    }

    /// Removes one entry and clears its conversation memory
    pub fn clear(&self, key: &SessionKey) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(entry) => {
                if let Some(session) = entry.session() {
                    session.clear_memory();
                }
                info!("Removed session {}", key);
                true
            }
            None => false,
        }
    }

    /// Removes every entry and resets statistics. Returns the number removed.
    pub fn clear_all(&self) -> usize {
        let drained: Vec<CacheEntry> = {
            let mut entries = self.entries.lock();
            self.hits.store(0, Ordering::Relaxed);
            self.misses.store(0, Ordering::Relaxed);
            entries.drain().map(|(_, e)| e).collect()
        };

        for entry in &drained {
            if let Some(session) = entry.session() {
                session.clear_memory();
            }
        }

        info!("Cleared {} cached sessions", drained.len());
        drained.len()
    }

    /// Drops expired idle entries. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now, self.config.ttl));
        let removed = before - entries.len();

        if removed > 0 {
            info!("Swept {} expired sessions", removed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStatistics {
        let entries = self.entries.lock();
        CacheStatistics {
            total_entries: entries.len(),
            total_hits: self.hits.load(Ordering::Relaxed),
            total_misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn active_calls(&self) -> usize {
        self.entries
            .lock()
            .values()
            .map(|e| e.active_calls.load(Ordering::Acquire))
            .sum()
    }

    /// Starts the periodic expiry sweep. The task stops on `shutdown` or
    /// once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
            debug!("Session sweeper stopped");
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
        info!("Session sweeper started (every {:?})", interval);
    }

    /// Stops the sweeper, waits up to `drain_timeout` for in-flight calls,
    /// then clears everything. Returns the number of sessions removed.
    pub async fn shutdown(&self, drain_timeout: Duration) -> usize {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }

        let deadline = Instant::now() + drain_timeout;
        loop {
            let active = self.active_calls();
            if active == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Shutting down with {} session calls still in flight", active);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.clear_all()
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::agent::session::SessionConfig;
    use crate::services::agent::testing::{hits, CountingFactory, FakeLlm, FakeStore, Harness};
    use futures::future::join_all;

    fn cache_with(ttl: Duration, max_entries: usize) -> (Arc<SessionCache>, Arc<CountingFactory>) {
        let harness = Harness::new(FakeStore::with_hits(hits(3)), FakeLlm::answering("ok"));
        let factory = Arc::new(
            CountingFactory::new(harness.factory(SessionConfig::default()))
                .with_build_delay(Duration::from_millis(20)),
        );
        let cache = Arc::new(SessionCache::new(
            factory.clone(),
            SessionCacheConfig { ttl, max_entries },
        ));
        (cache, factory)
    }

    #[tokio::test]
    async fn test_concurrent_first_lookups_build_once() {
        let (cache, factory) = cache_with(Duration::from_secs(3600), 100);
        let key = SessionKey::new("kb1", "m1");

        let leases = join_all((0..32).map(|_| {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.get_or_create(&key).await })
        }))
        .await;

        let sessions: Vec<Arc<ReasoningSession>> = leases
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().session().clone())
            .collect();

        assert_eq!(factory.builds(), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));

        let stats = cache.stats();
        assert_eq!(stats.total_hits + stats.total_misses, 32);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_rebuilds_and_counts_miss() {
        let (cache, factory) = cache_with(Duration::from_secs(1), 100);
        let key = SessionKey::new("kb1", "m1");

        drop(cache.get_or_create(&key).await.unwrap());
        drop(cache.get_or_create(&key).await.unwrap());
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(cache.get_or_create(&key).await.unwrap());

        let stats = cache.stats();
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.total_misses, 2);
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_by_last_access() {
        let (cache, factory) = cache_with(Duration::from_secs(3600), 2);
        let a = SessionKey::new("a", "m");
        let b = SessionKey::new("b", "m");
        let c = SessionKey::new("c", "m");

        drop(cache.get_or_create(&a).await.unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(cache.get_or_create(&b).await.unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
        // Touch `a` so `b` becomes least recently used
        drop(cache.get_or_create(&a).await.unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(cache.get_or_create(&c).await.unwrap());

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&a).is_some());
        assert!(cache.peek(&b).is_none());
        assert!(cache.peek(&c).is_some());
        assert_eq!(factory.builds(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_use_entry_is_not_evicted() {
        let (cache, _factory) = cache_with(Duration::from_secs(1), 1);
        let a = SessionKey::new("a", "m");
        let b = SessionKey::new("b", "m");

        let lease = cache.get_or_create(&a).await.unwrap();
        drop(cache.get_or_create(&b).await.unwrap());
        assert_eq!(cache.len(), 2, "busy entry survives capacity pressure");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.sweep_expired(), 1, "only the idle entry expires");
        assert!(cache.peek(&a).is_some());

        drop(lease);
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_clear_all() {
        let (cache, _factory) = cache_with(Duration::from_secs(3600), 100);
        let keys: Vec<SessionKey> = ["kb1", "kb2", "kb3"]
            .iter()
            .map(|kb| SessionKey::new(*kb, "m1"))
            .collect();

        for key in &keys {
            let lease = cache.get_or_create(key).await.unwrap();
            lease.ask("What is the refund window?", None).await.unwrap();
            assert_eq!(lease.memory_size(), 2);
        }

        let held = cache.get_or_create(&keys[0]).await.unwrap();
        assert!(cache.clear(&keys[0]));
        assert!(!cache.clear(&keys[0]));
        // The lease keeps its session alive, with memory wiped
        assert_eq!(held.memory_size(), 0);

        assert_eq!(cache.clear_all(), 2);
        assert_eq!(cache.stats(), CacheStatistics::default());
        for key in &keys {
            assert!(cache.peek(key).is_none());
        }
    }

    #[tokio::test]
    async fn test_failed_build_is_retried() {
        let harness = Harness::new(FakeStore::with_hits(hits(1)), FakeLlm::answering("ok"));
        let factory = Arc::new(
            CountingFactory::new(harness.factory(SessionConfig::default())).failing_first(1),
        );
        let cache = SessionCache::new(factory.clone(), SessionCacheConfig::default());
        let key = SessionKey::new("kb1", "m1");

        assert!(cache.get_or_create(&key).await.is_err());
        assert!(cache.peek(&key).is_none());
        assert!(cache.is_empty());
        assert!(cache.get_or_create(&key).await.is_ok());
        assert_eq!(factory.builds(), 2);

        let stats = cache.stats();
        assert_eq!(stats.total_misses, 2);
        assert_eq!(stats.total_hits, 0);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_live_sessions() {
        let harness = Harness::new(FakeStore::with_hits(hits(1)), FakeLlm::answering("ok"));
        let cache = SessionCache::new(
            Arc::new(harness.factory(SessionConfig::default())),
            SessionCacheConfig {
                ttl: Duration::from_secs(3600),
                max_entries: 1,
            },
        );
        let live = SessionKey::new("kb1", "qwen");
        let broken = SessionKey::new("kb1", "missing");

        drop(cache.get_or_create(&live).await.unwrap());
        for _ in 0..3 {
            assert!(cache.get_or_create(&broken).await.is_err());
        }

        assert!(cache.peek(&live).is_some(), "failed builds must not evict");
        assert!(cache.peek(&broken).is_none());
        assert_eq!(cache.stats().total_entries, 1);
        assert_eq!(cache.clear_all(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_clears() {
        let (cache, _factory) = cache_with(Duration::from_secs(3600), 100);
        cache.spawn_sweeper(Duration::from_secs(60));
        let lease = cache.get_or_create(&SessionKey::new("kb1", "m1")).await.unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(lease);
        });

        assert_eq!(cache.shutdown(Duration::from_secs(5)).await, 1);
        releaser.await.unwrap();
        assert!(cache.is_empty());
    }
}
