//! Expiring key/value cache holding serialized rate windows.

// self
use crate::_prelude::*;

/// Boxed future returned by [`WindowCache`] operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Shared cache with per-entry expiry and an optimistic write primitive.
///
/// Implementations must make [`WindowCache::compare_and_swap`] atomic: the write succeeds only
/// when the live value (after expiry) still equals `expected`.
pub trait WindowCache
where
	Self: Send + Sync,
{
	/// Reads the live value for `key`; expired entries read as `None`.
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;

	/// Stores `value` with a fresh `ttl` if the live value still equals `expected`.
	///
	/// Returns `false` when another writer got there first.
	fn compare_and_swap<'a>(
		&'a self,
		key: &'a str,
		expected: Option<&'a str>,
		value: String,
		ttl: Duration,
	) -> CacheFuture<'a, bool>;
}

#[derive(Clone, Debug)]
struct CacheEntry {
	value: String,
	expires_at: OffsetDateTime,
}
impl CacheEntry {
	fn live_value(&self, now: OffsetDateTime) -> Option<&str> {
		(self.expires_at > now).then_some(self.value.as_str())
	}
}

/// Process-local [`WindowCache`] guarded by a single lock.
#[derive(Clone, Debug, Default)]
pub struct MemoryWindowCache(Arc<Mutex<HashMap<String, CacheEntry>>>);
impl MemoryWindowCache {
	/// Drops every expired entry.
	pub fn evict_expired(&self) -> usize {
		let now = OffsetDateTime::now_utc();
		let mut guard = self.0.lock();
		let before = guard.len();

		guard.retain(|_, entry| entry.expires_at > now);

		before - guard.len()
	}
}
impl WindowCache for MemoryWindowCache {
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
		let now = OffsetDateTime::now_utc();
		let value = self.0.lock().get(key).and_then(|entry| entry.live_value(now)).map(str::to_owned);

		Box::pin(async move { Ok(value) })
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a str,
		expected: Option<&'a str>,
		value: String,
		ttl: Duration,
	) -> CacheFuture<'a, bool> {
		let now = OffsetDateTime::now_utc();
		let swapped = {
			let mut guard = self.0.lock();
			let current = guard.get(key).and_then(|entry| entry.live_value(now));

			if current == expected {
				guard.insert(key.to_owned(), CacheEntry { value, expires_at: now + ttl });

				true
			} else {
				false
			}
		};

		Box::pin(async move { Ok(swapped) })
	}
}
