// rust/seqview-core/src/cache.rs

//! Bounded LRU cache over a view with single-flight computation.
//!
//! Concurrent callers asking for the same missing index share one computation
//! of the upstream view: the first caller computes outside the table lock and
//! the others wait on a per-index flight for its result. Failures are handed
//! to every waiter but never cached, so a later request retries.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::trace;

use crate::config::CacheConfig;
use crate::error::{check_index, Result, SeqError};
use crate::view::View;

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from the table.
    pub hits: u64,
    /// Requests that computed the item.
    pub misses: u64,
    /// Requests that waited for another caller's computation.
    pub shared: u64,
    /// Entries dropped to respect the capacity.
    pub evictions: u64,
}

/// A view that memoizes up to `capacity` items of its upstream.
pub struct Cache<V: View> {
    upstream: V,
    capacity: usize,
    table: Mutex<Table<V::Item>>,
    hits: AtomicU64,
    misses: AtomicU64,
    shared: AtomicU64,
    evictions: AtomicU64,
}

struct Table<T> {
    entries: HashMap<usize, Entry<T>>,
    /// Recency tick -> index; the first key is the least recently used.
    recency: BTreeMap<u64, usize>,
    tick: u64,
    in_flight: HashMap<usize, Arc<Flight<T>>>,
}

struct Entry<T> {
    value: T,
    tick: u64,
}

impl<T: Clone> Table<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            in_flight: HashMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Returns a cached value and marks it most recently used.
    fn touch(&mut self, index: usize) -> Option<T> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(&index)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, index);
        Some(entry.value.clone())
    }

    /// Inserts a value and returns how many entries were evicted.
    fn insert(&mut self, index: usize, value: T, capacity: usize) -> u64 {
        let tick = self.next_tick();
        if let Some(old) = self.entries.insert(index, Entry { value, tick }) {
            self.recency.remove(&old.tick);
        }
        self.recency.insert(tick, index);

        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some((_, victim)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&victim);
            trace!(index = victim, "evicted cache entry");
            evicted += 1;
        }
        evicted
    }
}

/// One in-progress computation that other callers can wait on.
struct Flight<T> {
    outcome: Mutex<Option<Result<T>>>,
    done: Condvar,
}

impl<T: Clone> Flight<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<T>) {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<T> {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Publishes the leader's result; on unwind, releases waiters with an error.
struct FlightGuard<'a, V: View>
where
    V::Item: Clone,
{
    cache: &'a Cache<V>,
    index: usize,
    flight: Arc<Flight<V::Item>>,
    finished: bool,
}

impl<V: View> FlightGuard<'_, V>
where
    V::Item: Clone,
{
    fn finish(mut self, outcome: &Result<V::Item>) {
        self.finished = true;
        self.cache.settle(self.index, outcome.as_ref().ok().cloned());
        self.flight.complete(outcome.clone());
    }
}

impl<V: View> Drop for FlightGuard<'_, V>
where
    V::Item: Clone,
{
    fn drop(&mut self) {
        if !self.finished {
            self.cache.settle(self.index, None);
            self.flight.complete(Err(SeqError::worker(
                self.index,
                "cached computation panicked",
            )));
        }
    }
}

impl<V: View> Cache<V>
where
    V::Item: Clone,
{
    /// # Errors
    ///
    /// Returns a configuration error when `capacity` is zero.
    pub fn new(upstream: V, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SeqError::config("cache_size must be greater than 0"));
        }
        Ok(Self {
            upstream,
            capacity,
            table: Mutex::new(Table::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            shared: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn from_config(upstream: V, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Self::new(upstream, config.cache_size)
    }

    pub fn configured_capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently held.
    pub fn resident(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether `index` is cached, without affecting recency.
    pub fn contains(&self, index: usize) -> bool {
        self.lock().entries.contains_key(&index)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            shared: self.shared.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drops every cached entry. In-flight computations are unaffected.
    pub fn clear(&self) {
        let mut table = self.lock();
        table.entries.clear();
        table.recency.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Table<V::Item>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ends the flight for `index`, caching `value` when there is one.
    fn settle(&self, index: usize, value: Option<V::Item>) {
        let mut table = self.lock();
        table.in_flight.remove(&index);
        if let Some(value) = value {
            let evicted = table.insert(index, value, self.capacity);
            if evicted > 0 {
                self.evictions.fetch_add(evicted, Ordering::Relaxed);
            }
        }
    }
}

impl<V: View> View for Cache<V>
where
    V::Item: Clone + Send,
{
    type Item = V::Item;

    fn len(&self) -> usize {
        self.upstream.len()
    }

    fn get(&self, index: usize) -> Result<V::Item> {
        check_index(index, self.upstream.len())?;

        let flight = {
            let mut table = self.lock();
            if let Some(value) = table.touch(index) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            if let Some(flight) = table.in_flight.get(&index).cloned() {
                drop(table);
                self.shared.fetch_add(1, Ordering::Relaxed);
                return flight.wait();
            }
            let flight = Arc::new(Flight::new());
            table.in_flight.insert(index, flight.clone());
            flight
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let guard = FlightGuard {
            cache: self,
            index,
            flight,
            finished: false,
        };
        let outcome = self.upstream.get(index);
        guard.finish(&outcome);
        outcome
    }
}

impl<V: View + fmt::Debug> fmt::Debug for Cache<V>
where
    V::Item: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("upstream", &self.upstream)
            .field("capacity", &self.capacity)
            .field("resident", &self.resident())
            .finish()
    }
}
