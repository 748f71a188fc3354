//! A bounded cache whose entries expire after a fixed lease.
//!
//! Every entry lives for exactly one lease measured from the `put` that
//! created it. Reading an entry neither extends its lease nor changes its
//! eviction priority: when the cache grows past its capacity, the entries
//! that were created first are purged first. This is deliberately not an
//! LRU.
//!
//! Expiry is enforced lazily (an elapsed lease is never observable through
//! [LeaseCache::get], [LeaseCache::contains], [LeaseCache::len] or
//! [LeaseCache::keys]) and, optionally, eagerly by a background sweeper
//! started with [LeaseCache::spawn_sweeper].

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Lease<V> {
    value: V,
    expires: Instant,
    sequence: u64,
}

struct Entries<K, V> {
    leases: HashMap<K, Lease<V>>,
    /// Creation order: sequence number of each resident lease to its key.
    creation: BTreeMap<u64, K>,
    next_sequence: u64,
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash + Clone,
{
    fn remove(&mut self, key: &K) -> Option<Lease<V>> {
        let lease = self.leases.remove(key)?;
        self.creation.remove(&lease.sequence);
        Some(lease)
    }

    /// Drop the lease for `key` if it elapsed, reporting whether a live one
    /// remains.
    fn refresh(&mut self, key: &K, now: Instant) -> bool {
        match self.leases.get(key) {
            Some(lease) if lease.expires <= now => {
                self.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn purge(&mut self, capacity: usize) -> usize {
        let mut purged = 0;
        while self.leases.len() > capacity {
            let Some((_, key)) = self.creation.pop_first() else {
                break;
            };
            self.leases.remove(&key);
            purged += 1;
        }
        purged
    }
}

/// A lease-based cache with creation-order capacity eviction.
///
/// All methods take `&self`; the entry map sits behind a mutex so the cache
/// can be shared between tasks (typically inside an [Arc]).
pub struct LeaseCache<K, V> {
    capacity: usize,
    lease: Duration,
    entries: Mutex<Entries<K, V>>,
}

impl<K, V> LeaseCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries, each of which
    /// expires `lease` after it was put.
    pub fn new(capacity: usize, lease: Duration) -> Self {
        Self {
            capacity,
            lease,
            entries: Mutex::new(Entries {
                leases: HashMap::new(),
                creation: BTreeMap::new(),
                next_sequence: 0,
            }),
        }
    }

    /// The maximum number of resident entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The lease every entry is granted on `put`.
    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Insert `value` for `key`, replacing any previous entry (and its lease)
    /// for that key. If the cache is now over capacity, the oldest entries
    /// by creation are purged until it is not.
    pub fn put(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.remove(&key);
        entries.expire(now);

        let sequence = entries.next_sequence;
        entries.next_sequence += 1;
        entries.creation.insert(sequence, key.clone());
        entries.leases.insert(
            key,
            Lease {
                value,
                expires: now + self.lease,
                sequence,
            },
        );

        let purged = entries.purge(self.capacity);
        if purged > 0 {
            tracing::debug!(purged, capacity = self.capacity, "Purged oldest leases");
        }
    }

    /// Look up the value for `key`, if its lease has not elapsed.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut entries = self.entries.lock();
        if !entries.refresh(key, Instant::now()) {
            return None;
        }
        entries.leases.get(key).map(|lease| lease.value.clone())
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().refresh(key, Instant::now())
    }

    /// Remove the entry for `key`, returning its value if it was still live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let lease = self.entries.lock().remove(key)?;
        (lease.expires > now).then_some(lease.value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.leases.clear();
        entries.creation.clear();
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.expire(Instant::now());
        entries.leases.len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The keys of all live entries, oldest first.
    pub fn keys(&self) -> Vec<K> {
        let mut entries = self.entries.lock();
        entries.expire(Instant::now());
        entries.creation.values().cloned().collect()
    }

    /// Eagerly drop every entry whose lease has elapsed, returning how many
    /// were dropped.
    pub fn sweep(&self) -> usize {
        self.entries.lock().expire(Instant::now())
    }
}

impl<K, V> LeaseCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Sweep the cache every `period` on the current tokio runtime.
    ///
    /// The sweeper only holds a weak reference and stops on its own once the
    /// cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let expired = cache.sweep();
                if expired > 0 {
                    tracing::trace!(expired, "Swept elapsed leases");
                }
            }
        })
    }
}

impl<K, V> std::fmt::Debug for LeaseCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseCache")
            .field("capacity", &self.capacity)
            .field("lease", &self.lease)
            .field("resident", &self.entries.lock().leases.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const LEASE: Duration = Duration::from_secs(120);

    #[tokio::test(start_paused = true)]
    async fn it_returns_a_value_right_after_put() -> Result<()> {
        let cache = LeaseCache::new(10, LEASE);
        cache.put("alice".to_string(), 1);

        assert_eq!(cache.get(&"alice".to_string()), Some(1));
        assert!(cache.contains(&"alice".to_string()));
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_misses_once_the_lease_elapses() -> Result<()> {
        let cache = LeaseCache::new(10, LEASE);
        cache.put("alice", 1);

        tokio::time::advance(LEASE - Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"alice"), Some(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"alice"), None);
        assert!(!cache.contains(&"alice"));
        assert!(cache.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_does_not_extend_a_lease_on_read() -> Result<()> {
        let cache = LeaseCache::new(10, LEASE);
        cache.put("alice", 1);

        for _ in 0..3 {
            tokio::time::advance(LEASE / 4).await;
            assert_eq!(cache.get(&"alice"), Some(1));
        }

        tokio::time::advance(LEASE / 4).await;
        assert_eq!(cache.get(&"alice"), None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_restarts_the_lease_on_overwrite() -> Result<()> {
        let cache = LeaseCache::new(10, LEASE);
        cache.put("alice", 1);

        tokio::time::advance(LEASE / 2).await;
        cache.put("alice", 2);

        tokio::time::advance(LEASE / 2 + Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"alice"), Some(2));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(LEASE / 2).await;
        assert_eq!(cache.get(&"alice"), None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_evicts_the_oldest_entry_over_capacity() -> Result<()> {
        let cache = LeaseCache::new(3, LEASE);
        cache.put("a", 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.put("b", 2);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.put("c", 3);

        // Reading "a" must not protect it from eviction.
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        cache.put("d", 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.keys(), vec!["b", "c", "d"]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_orders_eviction_by_creation_within_the_same_instant() -> Result<()> {
        let cache = LeaseCache::new(2, LEASE);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 3);
        cache.put("c", 4);

        // "a" was re-created after "b", so "b" is now the oldest.
        assert_eq!(cache.keys(), vec!["a", "c"]);
        assert_eq!(cache.get(&"a"), Some(3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_prefers_dropping_elapsed_entries_over_live_ones() -> Result<()> {
        let cache = LeaseCache::new(2, LEASE);
        cache.put("a", 1);
        tokio::time::advance(LEASE / 2).await;
        cache.put("b", 2);
        tokio::time::advance(LEASE / 2).await;

        cache.put("c", 3);

        assert_eq!(cache.keys(), vec!["b", "c"]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_removes_and_clears_entries() -> Result<()> {
        let cache = LeaseCache::new(10, LEASE);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);

        assert_eq!(cache.remove(&"b"), Some(2));
        assert_eq!(cache.remove(&"b"), None);
        assert_eq!(cache.keys(), vec!["a", "c"]);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_holds_nothing_with_zero_capacity() -> Result<()> {
        let cache = LeaseCache::new(0, LEASE);
        cache.put("a", 1);

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_sweeps_elapsed_entries_in_the_background() -> Result<()> {
        let cache = Arc::new(LeaseCache::new(10, LEASE));
        cache.put("a", 1);
        tokio::time::advance(LEASE / 2).await;
        cache.put("b", 2);

        let sweeper = cache.spawn_sweeper(Duration::from_secs(1));
        tokio::time::sleep(LEASE / 2 + Duration::from_secs(2)).await;

        assert_eq!(cache.entries.lock().leases.len(), 1);
        assert_eq!(cache.keys(), vec!["b"]);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sweeper.is_finished());
        Ok(())
    }
}
