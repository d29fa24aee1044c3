//! Shared cache primitives for the Shoal storage engine.
//!
//! [`ShardedLruCache`] is a weight-budgeted LRU with single-flight loading:
//! concurrent misses for the same key are coalesced so the expensive load
//! (a disk read plus decompression, for the block cache) runs at most once,
//! and every waiter receives the one result. The key space is split across
//! independent shards so unrelated keys never contend on the same lock.
//!
//! Values are handed out as `Arc` clones: eviction drops the cache's
//! reference, while readers holding a clone keep the value alive.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex};

use hashlink::LruCache;

/// Capability assigning a weight to cached values.
///
/// The block cache weighs entries by decoded byte length; the unit weigher
/// turns the budget into a plain entry count.
pub trait Weigher<V>: Send + Sync {
    fn weight(&self, value: &V) -> usize;
}

/// Weighs every entry as 1, making `capacity` an entry count.
pub struct UnitWeigher;

impl<V> Weigher<V> for UnitWeigher {
    fn weight(&self, _value: &V) -> usize {
        1
    }
}

const SHARD_COUNT: usize = 16;

struct CacheEntry<V> {
    value: Arc<V>,
    weight: usize,
}

/// A pending load. The leader fills `result` and wakes every waiter; the
/// slot is removed from the in-flight table before publication so a failed
/// load is never observed by later callers (they retry the load instead).
struct InFlight<V, E> {
    result: Mutex<Option<Result<Arc<V>, E>>>,
    ready: Condvar,
}

impl<V, E> InFlight<V, E> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

struct Shard<K, V, E> {
    entries: LruCache<K, CacheEntry<V>>,
    in_flight: HashMap<K, Arc<InFlight<V, E>>>,
    used: usize,
}

impl<K: Hash + Eq, V, E> Shard<K, V, E> {
    fn new() -> Self {
        Self {
            entries: LruCache::new_unbounded(),
            in_flight: HashMap::new(),
            used: 0,
        }
    }
}

/// A sharded, weight-budgeted LRU cache with single-flight loading.
///
/// `E` is the error type produced by loaders; it must be `Clone` so one
/// failure can be propagated to every coalesced waiter without being cached.
pub struct ShardedLruCache<K, V, E> {
    shards: Vec<Mutex<Shard<K, V, E>>>,
    weigher: Box<dyn Weigher<V>>,
    capacity: usize,
    shard_capacity: usize,
}

impl<K, V, E> ShardedLruCache<K, V, E>
where
    K: Hash + Eq + Clone,
    E: Clone,
{
    /// Creates a cache whose total weight is bounded by `capacity`,
    /// measured by `weigher`.
    pub fn new(capacity: usize, weigher: Box<dyn Weigher<V>>) -> Self {
        let shard_capacity = capacity.div_ceil(SHARD_COUNT);
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(Shard::new())).collect();
        Self {
            shards,
            weigher,
            capacity,
            shard_capacity,
        }
    }

    /// The configured weight budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V, E>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Returns the cached value for `key`, promoting it to most recent.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut shard = self.shard(key).lock().unwrap();
        shard.entries.get(key).map(|e| e.value.clone())
    }

    /// Inserts `value`, evicting least-recently-used entries until the
    /// shard's weight budget is respected again.
    pub fn insert(&self, key: K, value: Arc<V>) {
        let mut shard = self.shard(&key).lock().unwrap();
        self.insert_locked(&mut shard, key, value);
    }

    /// Drops the entry for `key`, if any. Readers holding an `Arc` clone
    /// keep the value alive.
    pub fn erase(&self, key: &K) {
        let mut shard = self.shard(key).lock().unwrap();
        if let Some(old) = shard.entries.remove(key) {
            shard.used -= old.weight;
        }
    }

    /// Returns the cached value for `key`, or runs `loader` to produce it.
    ///
    /// Concurrent calls for the same key are coalesced: exactly one caller
    /// runs `loader`, the rest block until the result is published. A load
    /// error is handed to every waiter and is **not** cached -- the next
    /// call for the key runs the loader again.
    pub fn load<F>(&self, key: K, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<Arc<V>, E>,
    {
        enum Role<V, E> {
            Hit(Arc<V>),
            Wait(Arc<InFlight<V, E>>),
            Lead(Arc<InFlight<V, E>>),
        }

        let role = {
            let mut shard = self.shard(&key).lock().unwrap();
            if let Some(entry) = shard.entries.get(&key) {
                Role::Hit(entry.value.clone())
            } else if let Some(slot) = shard.in_flight.get(&key) {
                Role::Wait(slot.clone())
            } else {
                let slot = Arc::new(InFlight::new());
                shard.in_flight.insert(key.clone(), slot.clone());
                Role::Lead(slot)
            }
        };

        match role {
            Role::Hit(value) => Ok(value),
            Role::Wait(slot) => {
                let mut result = slot.result.lock().unwrap();
                while result.is_none() {
                    result = slot.ready.wait(result).unwrap();
                }
                result.as_ref().unwrap().clone()
            }
            Role::Lead(slot) => {
                let outcome = loader();
                {
                    let mut shard = self.shard(&key).lock().unwrap();
                    shard.in_flight.remove(&key);
                    if let Ok(value) = &outcome {
                        self.insert_locked(&mut shard, key, value.clone());
                    }
                }
                let mut result = slot.result.lock().unwrap();
                *result = Some(outcome.clone());
                slot.ready.notify_all();
                outcome
            }
        }
    }

    /// Total weight of all cached entries.
    pub fn total_weight(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().used).sum()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().entries.len()).sum()
    }

    /// Returns `true` if no entry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_locked(&self, shard: &mut Shard<K, V, E>, key: K, value: Arc<V>) {
        let weight = self.weigher.weight(&value);
        if let Some(old) = shard.entries.insert(
            key,
            CacheEntry {
                value,
                weight,
            },
        ) {
            shard.used -= old.weight;
        }
        shard.used += weight;
        while shard.used > self.shard_capacity {
            match shard.entries.remove_lru() {
                Some((_, evicted)) => shard.used -= evicted.weight,
                None => break,
            }
        }
    }
}
