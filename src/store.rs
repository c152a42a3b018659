//! Storage contracts and built-in store implementations for states, tokens, and API keys.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// self
use crate::{
	_prelude::*,
	auth::{ApiKey, OAuthState, StateValue, TokenRecord},
};

/// Boxed future returned by every [`BrokerStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract implemented by gateway stores.
///
/// Access tokens are the lookup key for token records, so [`BrokerStore::rotate_token`] must
/// replace the old key and insert the new one as a single step.
pub trait BrokerStore
where
	Self: Send + Sync,
{
	/// Persists a freshly issued state; fails with [`StoreError::Conflict`] if it already exists.
	fn save_state(&self, state: OAuthState) -> StoreFuture<'_, ()>;

	/// Removes and returns the state in one step so it can only be consumed once.
	fn take_state<'a>(&'a self, state: &'a StateValue) -> StoreFuture<'a, Option<OAuthState>>;

	/// Deletes states created before `cutoff`, returning how many were removed.
	fn purge_expired_states(&self, cutoff: OffsetDateTime) -> StoreFuture<'_, u64>;

	/// Persists or replaces the record keyed by its access token.
	fn save_token(&self, record: TokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record whose access token equals `access_token`.
	fn fetch_token<'a>(&'a self, access_token: &'a str) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Replaces the record keyed by `expected_access` when its refresh token still equals
	/// `expected_refresh`.
	fn rotate_token<'a>(
		&'a self,
		expected_access: &'a str,
		expected_refresh: &'a str,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Deletes the record keyed by `access_token`, returning it if present.
	fn delete_token<'a>(&'a self, access_token: &'a str)
	-> StoreFuture<'a, Option<TokenRecord>>;

	/// Persists a newly issued API key.
	fn save_api_key(&self, key: ApiKey) -> StoreFuture<'_, ()>;

	/// Fetches the API key record for `api_key`.
	fn fetch_api_key<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, Option<ApiKey>>;

	/// Releases backend resources; later calls may fail.
	fn close(&self) -> StoreFuture<'_, ()> {
		Box::pin(async { Ok(()) })
	}
}

/// Result of a token rotation compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The refresh secret matched the expected value and the record was replaced.
	Updated,
	/// The record exists but its refresh secret no longer matches.
	RefreshMismatch,
	/// No record is keyed by the expected access token.
	Missing,
}

/// Error type produced by [`BrokerStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// A unique key is already taken.
	#[error("Conflict: {message}.")]
	Conflict {
		/// Human-readable error payload.
		message: String,
	},
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::Error;

	#[test]
	fn store_error_converts_into_gateway_error_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let gateway_error: Error = store_error.clone().into();

		assert!(matches!(gateway_error, Error::Storage(_)));
		assert!(gateway_error.to_string().contains("database unreachable"));
		assert_eq!(gateway_error.status_code(), 500);

		let source = StdError::source(&gateway_error)
			.expect("Gateway error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn compare_and_swap_outcome_can_be_serialized() {
		let payload = serde_json::to_string(&CompareAndSwapOutcome::Updated)
			.expect("CompareAndSwapOutcome should serialize to JSON.");

		assert_eq!(payload, "\"Updated\"");
	}
}
