//! Thread-safe in-memory [`BrokerStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{ApiKey, OAuthState, StateValue, TokenRecord},
	store::{BrokerStore, CompareAndSwapOutcome, StoreError, StoreFuture},
};

#[derive(Debug, Default)]
struct Tables {
	states: HashMap<StateValue, OAuthState>,
	tokens: HashMap<String, TokenRecord>,
	api_keys: HashMap<String, ApiKey>,
}

type StoreMap = Arc<RwLock<Tables>>;

/// Thread-safe storage backend that keeps records in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of token records currently held.
	pub fn token_count(&self) -> usize {
		self.0.read().tokens.len()
	}

	/// Number of unconsumed states currently held.
	pub fn state_count(&self) -> usize {
		self.0.read().states.len()
	}

	fn save_state_now(map: StoreMap, state: OAuthState) -> Result<(), StoreError> {
		let mut guard = map.write();

		if guard.states.contains_key(&state.state) {
			return Err(StoreError::Conflict {
				message: format!("state `{}` was already issued", state.state),
			});
		}

		guard.states.insert(state.state.clone(), state);

		Ok(())
	}

	fn purge_now(map: StoreMap, cutoff: OffsetDateTime) -> u64 {
		let mut guard = map.write();
		let before = guard.states.len();

		guard.states.retain(|_, state| state.created_at >= cutoff);

		(before - guard.states.len()) as u64
	}

	fn rotate_now(
		map: StoreMap,
		expected_access: &str,
		expected_refresh: &str,
		replacement: TokenRecord,
	) -> CompareAndSwapOutcome {
		let mut guard = map.write();
		let outcome = match guard.tokens.get(expected_access) {
			Some(existing) if existing.refresh_token.expose() == expected_refresh =>
				CompareAndSwapOutcome::Updated,
			Some(_) => CompareAndSwapOutcome::RefreshMismatch,
			None => CompareAndSwapOutcome::Missing,
		};

		if matches!(outcome, CompareAndSwapOutcome::Updated) {
			guard.tokens.remove(expected_access);
			guard.tokens.insert(replacement.access_token.expose().to_owned(), replacement);
		}

		outcome
	}
}
impl BrokerStore for MemoryStore {
	fn save_state(&self, state: OAuthState) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_state_now(map, state) })
	}

	fn take_state<'a>(&'a self, state: &'a StateValue) -> StoreFuture<'a, Option<OAuthState>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().states.remove(state)) })
	}

	fn purge_expired_states(&self, cutoff: OffsetDateTime) -> StoreFuture<'_, u64> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::purge_now(map, cutoff)) })
	}

	fn save_token(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().tokens.insert(record.access_token.expose().to_owned(), record);

			Ok(())
		})
	}

	fn fetch_token<'a>(&'a self, access_token: &'a str) -> StoreFuture<'a, Option<TokenRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().tokens.get(access_token).cloned()) })
	}

	fn rotate_token<'a>(
		&'a self,
		expected_access: &'a str,
		expected_refresh: &'a str,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let map = self.0.clone();

		Box::pin(
			async move { Ok(Self::rotate_now(map, expected_access, expected_refresh, replacement)) },
		)
	}

	fn delete_token<'a>(
		&'a self,
		access_token: &'a str,
	) -> StoreFuture<'a, Option<TokenRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().tokens.remove(access_token)) })
	}

	fn save_api_key(&self, key: ApiKey) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			let mut guard = map.write();

			if guard.api_keys.contains_key(key.api_key.expose()) {
				return Err(StoreError::Conflict { message: "API key already exists".into() });
			}

			guard.api_keys.insert(key.api_key.expose().to_owned(), key);

			Ok(())
		})
	}

	fn fetch_api_key<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, Option<ApiKey>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().api_keys.get(api_key).cloned()) })
	}
}
