//! Sliding-window admission control keyed by caller credential.
//!
//! Each credential owns a JSON list of call timestamps (float seconds) under
//! `rate_limit:<credential>` in a [`WindowCache`]. An admission check reads the list, drops
//! entries older than the window, and either rejects (without recording the attempt) or appends
//! `now` and writes the list back with a TTL equal to the window. The write is an optimistic
//! compare-and-swap so concurrent checks for one credential cannot over-admit.

pub mod cache;

pub use cache::{CacheFuture, MemoryWindowCache, WindowCache};

// self
use crate::{
	_prelude::*,
	error::TransientError,
	obs::{self, FlowKind, FlowOutcome},
	store::StoreError,
};

const KEY_PREFIX: &str = "rate_limit:";
const DEFAULT_MAX_ATTEMPTS: usize = 8;

/// Admission budget: at most `max_calls` calls in any trailing `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
	/// Calls admitted per window.
	pub max_calls: u32,
	/// Lookback interval.
	pub window: Duration,
}
impl RateLimitPolicy {
	/// Creates a policy.
	pub const fn new(max_calls: u32, window: Duration) -> Self {
		Self { max_calls, window }
	}

	/// Default budget for bearer-token callers.
	pub const fn bearer_default() -> Self {
		Self::new(2, Duration::seconds(60))
	}

	/// Default budget for API-key callers.
	pub const fn api_key_default() -> Self {
		Self::new(5, Duration::seconds(60))
	}
}

/// Result emitted by [`RateLimiter::check_and_record`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The call was admitted and recorded.
	Allow,
	/// The call was rejected and not recorded.
	Reject(RetryDirective),
}

/// Advises callers when to retry after a [`RateLimitDecision::Reject`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when the oldest recorded call leaves the window.
	pub earliest_retry_at: OffsetDateTime,
	/// Whole-second wait, never below one second.
	pub retry_after: Duration,
}

/// Sliding-window limiter over a shared [`WindowCache`].
#[derive(Clone)]
pub struct RateLimiter {
	cache: Arc<dyn WindowCache>,
	policy: RateLimitPolicy,
	max_attempts: usize,
}
impl RateLimiter {
	/// Creates a limiter enforcing `policy`.
	pub fn new(cache: Arc<dyn WindowCache>, policy: RateLimitPolicy) -> Self {
		Self { cache, policy, max_attempts: DEFAULT_MAX_ATTEMPTS }
	}

	/// Overrides how many compare-and-swap rounds run before giving up.
	pub fn with_max_attempts(mut self, attempts: usize) -> Self {
		self.max_attempts = attempts.max(1);

		self
	}

	/// Policy enforced by this limiter.
	pub fn policy(&self) -> RateLimitPolicy {
		self.policy
	}

	/// Checks the window for `credential` and records the call when admitted.
	pub async fn check_and_record(&self, credential: &str) -> Result<RateLimitDecision> {
		self.check_and_record_at(credential, OffsetDateTime::now_utc()).await
	}

	/// Same as [`RateLimiter::check_and_record`] with an explicit clock reading.
	pub async fn check_and_record_at(
		&self,
		credential: &str,
		now: OffsetDateTime,
	) -> Result<RateLimitDecision> {
		let key = window_key(credential);
		let now_secs = unix_seconds(now);
		let window_secs = self.policy.window.as_seconds_f64();

		for _ in 0..self.max_attempts {
			let current = self.cache.get(&key).await?;
			let mut calls = current.as_deref().map(decode_window).unwrap_or_default();

			calls.retain(|&at| now_secs - at < window_secs);

			if calls.len() >= self.policy.max_calls as usize {
				// A zero budget never admits; the whole window is the best hint.
				let wait = calls
					.iter()
					.copied()
					.reduce(f64::min)
					.map_or(window_secs, |oldest| oldest + window_secs - now_secs)
					.ceil()
					.max(1.0);
				let retry_after = Duration::seconds(wait as i64);

				return Ok(RateLimitDecision::Reject(RetryDirective {
					earliest_retry_at: now.saturating_add(retry_after),
					retry_after,
				}));
			}

			calls.push(now_secs);

			let encoded = serde_json::to_string(&calls)
				.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

			if self
				.cache
				.compare_and_swap(&key, current.as_deref(), encoded, self.policy.window)
				.await?
			{
				return Ok(RateLimitDecision::Allow);
			}

			tracing::debug!(
				key = %redacted_key(credential),
				"rate window changed concurrently; retrying"
			);
		}

		Err(TransientError::WindowContention.into())
	}

	/// Admits the call or fails with [`Error::RateLimitExceeded`].
	pub async fn admit(&self, credential: &str) -> Result<()> {
		match self.check_and_record(credential).await? {
			RateLimitDecision::Allow => {
				obs::record_flow_outcome(FlowKind::RateLimit, FlowOutcome::Success);

				Ok(())
			},
			RateLimitDecision::Reject(directive) => {
				obs::record_flow_outcome(FlowKind::RateLimit, FlowOutcome::Failure);
				tracing::info!(
					key = %redacted_key(credential),
					retry_after_secs = directive.retry_after.whole_seconds(),
					"rate limit exceeded"
				);

				Err(Error::RateLimitExceeded { retry_after: directive.retry_after })
			},
		}
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("policy", &self.policy)
			.field("max_attempts", &self.max_attempts)
			.finish()
	}
}

/// Cache key holding the window for `credential`.
pub fn window_key(credential: &str) -> String {
	format!("{KEY_PREFIX}{credential}")
}

fn redacted_key(credential: &str) -> String {
	let prefix: String = credential.chars().take(4).collect();

	format!("{KEY_PREFIX}{prefix}...")
}

fn unix_seconds(instant: OffsetDateTime) -> f64 {
	instant.unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

fn decode_window(raw: &str) -> Vec<f64> {
	serde_json::from_str(raw).unwrap_or_else(|e| {
		tracing::warn!(error = %e, "discarding malformed rate window");

		Vec::new()
	})
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn limiter(max_calls: u32) -> (RateLimiter, Arc<MemoryWindowCache>) {
		let cache = Arc::new(MemoryWindowCache::default());
		let limiter =
			RateLimiter::new(cache.clone(), RateLimitPolicy::new(max_calls, Duration::seconds(60)));

		(limiter, cache)
	}

	#[tokio::test]
	async fn rejection_reports_time_until_oldest_call_leaves() {
		let (limiter, _) = limiter(2);
		let start = macros::datetime!(2025-01-01 00:00 UTC);

		for offset in [0, 10] {
			assert_eq!(
				limiter
					.check_and_record_at("key", start + Duration::seconds(offset))
					.await
					.expect("Admission check should succeed."),
				RateLimitDecision::Allow
			);
		}

		let RateLimitDecision::Reject(directive) = limiter
			.check_and_record_at("key", start + Duration::seconds(15))
			.await
			.expect("Admission check should succeed.")
		else {
			panic!("Third call inside the window must be rejected.");
		};

		assert_eq!(directive.retry_after, Duration::seconds(45));
		assert_eq!(directive.earliest_retry_at, start + Duration::seconds(60));
	}

	#[tokio::test]
	async fn retry_after_is_at_least_one_second() {
		let (limiter, _) = limiter(1);
		let start = macros::datetime!(2025-01-01 00:00 UTC);

		limiter.check_and_record_at("key", start).await.expect("First call should succeed.");

		let decision = limiter
			.check_and_record_at("key", start + Duration::milliseconds(59_900))
			.await
			.expect("Admission check should succeed.");

		assert!(matches!(
			decision,
			RateLimitDecision::Reject(RetryDirective { retry_after, .. })
				if retry_after == Duration::seconds(1)
		));
	}

	#[tokio::test]
	async fn zero_budget_rejects_with_the_full_window() {
		let (limiter, cache) = limiter(0);
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let decision =
			limiter.check_and_record_at("key", now).await.expect("Admission check should succeed.");

		assert_eq!(
			decision,
			RateLimitDecision::Reject(RetryDirective {
				earliest_retry_at: now + Duration::seconds(60),
				retry_after: Duration::seconds(60),
			})
		);
		assert_eq!(cache.get(&window_key("key")).await.expect("Cache read should succeed."), None);
	}

	#[tokio::test]
	async fn malformed_windows_are_reset() {
		let (limiter, cache) = limiter(1);

		cache
			.compare_and_swap(&window_key("key"), None, "not-json".into(), Duration::seconds(60))
			.await
			.expect("Seeding the cache should succeed.");

		assert_eq!(
			limiter.check_and_record("key").await.expect("Admission check should succeed."),
			RateLimitDecision::Allow
		);
	}

	#[tokio::test]
	async fn admit_maps_rejections_to_rate_limit_errors() {
		let (limiter, _) = limiter(1);

		limiter.admit("key").await.expect("First call should be admitted.");

		let err = limiter.admit("key").await.expect_err("Second call should be rejected.");

		assert!(matches!(err, Error::RateLimitExceeded { .. }));
		assert_eq!(err.status_code(), 429);
	}
}
