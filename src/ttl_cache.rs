//! Generic TTL + LRU cache with a background sweeper task. Backs both the
//! LLM response cache and the key-validation cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry<V> {
	value: V,
	expires_at: Instant,
	last_access: Instant,
}

struct Inner<K, V> {
	entries: HashMap<K, CacheEntry<V>>,
	max_size: usize,
	ttl: Duration,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
	fn evict_lru(&mut self) {
		if let Some(key) = self
			.entries
			.iter()
			.min_by_key(|(_, e)| e.last_access)
			.map(|(k, _)| k.clone())
		{
			self.entries.remove(&key);
		}
	}

	fn sweep_expired(&mut self, now: Instant) -> usize {
		let before = self.entries.len();
		self.entries.retain(|_, e| e.expires_at > now);
		before - self.entries.len()
	}
}

/// Generic TTL + LRU cache. `get`/`set`/`delete`/`clear`/`size` are
/// synchronous and cheap; a background task sweeps expired entries every
/// five minutes until [`TTLCache::stop`] is called (idempotent).
pub struct TTLCache<K, V>
where
	K: Eq + Hash + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	inner: Arc<Mutex<Inner<K, V>>>,
	stopped: Arc<AtomicBool>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> TTLCache<K, V>
where
	K: Eq + Hash + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	pub fn new(max_size: usize, ttl: Duration) -> Arc<Self> {
		let inner = Arc::new(Mutex::new(Inner { entries: HashMap::new(), max_size, ttl }));
		let stopped = Arc::new(AtomicBool::new(false));

		let sweep_inner = Arc::clone(&inner);
		let sweep_stopped = Arc::clone(&stopped);
		let handle = tokio::spawn(async move {
			loop {
				tokio::time::sleep(SWEEP_INTERVAL).await;
				if sweep_stopped.load(Ordering::Relaxed) {
					break;
				}
				let now = Instant::now();
				let removed = sweep_inner.lock().unwrap_or_else(|e| e.into_inner()).sweep_expired(now);
				if removed > 0 {
					debug!(removed, "ttl cache sweep");
				}
			}
		});

		Arc::new(TTLCache { inner, stopped, sweeper: Mutex::new(Some(handle)) })
	}

	/// Expired entries are treated as a miss and removed; a hit bumps
	/// `last_access` to now.
	pub fn get(&self, key: &K) -> Option<V> {
		let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		let now = Instant::now();
		let hit = match guard.entries.get_mut(key) {
			Some(entry) if entry.expires_at > now => {
				entry.last_access = now;
				Some(entry.value.clone())
			}
			Some(_) => None,
			None => None,
		};
		if hit.is_none() {
			guard.entries.remove(key);
		}
		hit
	}

	/// Inserts or updates. When inserting a new key at capacity, evicts
	/// the least-recently-accessed entry first.
	pub fn set(&self, key: K, value: V) {
		let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		let now = Instant::now();
		let ttl = guard.ttl;
		if !guard.entries.contains_key(&key) && guard.entries.len() >= guard.max_size {
			guard.evict_lru();
		}
		guard.entries.insert(key, CacheEntry { value, expires_at: now + ttl, last_access: now });
	}

	pub fn delete(&self, key: &K) {
		self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.remove(key);
	}

	pub fn clear(&self) {
		self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.clear();
	}

	pub fn size(&self) -> usize {
		self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
	}

	/// Idempotent: a second call is a no-op.
	pub fn stop(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(handle) = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
			handle.abort();
		}
		trace!("ttl cache sweeper stopped");
	}
}

impl<K, V> Drop for TTLCache<K, V>
where
	K: Eq + Hash + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	fn drop(&mut self) {
		self.stop();
	}
}


// vim: ts=4
