//! SQLite-backed [`BrokerStore`] built on a shared `sqlx` pool.
//!
//! One table per entity; timestamps are stored as unix nanoseconds so ordering and TTL
//! comparisons stay exact. State consumption uses `DELETE ... RETURNING` and token rotation
//! runs inside a transaction.

// std
use std::time::Duration as StdDuration;
// crates.io
use sqlx::{
	Row,
	sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
};
// self
use crate::{
	_prelude::*,
	auth::{ApiKey, Email, OAuthState, RedirectTarget, StateValue, TokenRecord, TokenSecret},
	store::{BrokerStore, CompareAndSwapOutcome, StoreError, StoreFuture},
};

const SCHEMA: [&str; 4] = [
	"CREATE TABLE IF NOT EXISTS oauth_states (
		state TEXT PRIMARY KEY NOT NULL,
		redirect TEXT NOT NULL,
		created_at INTEGER NOT NULL
	)",
	"CREATE TABLE IF NOT EXISTS external_tokens (
		access_token TEXT PRIMARY KEY NOT NULL,
		refresh_token TEXT NOT NULL,
		instance_url TEXT NOT NULL,
		created_at INTEGER NOT NULL
	)",
	"CREATE TABLE IF NOT EXISTS api_keys (
		api_key TEXT PRIMARY KEY NOT NULL,
		email TEXT NOT NULL,
		created_at INTEGER NOT NULL
	)",
	"CREATE INDEX IF NOT EXISTS api_keys_email ON api_keys (email)",
];

/// Durable store persisting states, tokens, and API keys in SQLite.
#[derive(Clone, Debug)]
pub struct SqliteStore {
	pool: SqlitePool,
}
impl SqliteStore {
	/// Connects to `url` (e.g. `sqlite:gateway.db` or `sqlite::memory:`) and creates the schema.
	///
	/// In-memory databases are pinned to a single long-lived connection so every query sees
	/// the same database.
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let in_memory = url.contains(":memory:");
		let options = SqliteConnectOptions::from_str(url)
			.map_err(backend)?
			.create_if_missing(true)
			.busy_timeout(StdDuration::from_secs(5));
		let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });

		if in_memory {
			pool_options = pool_options.idle_timeout(None).max_lifetime(None);
		}

		let pool = pool_options.connect_with(options).await.map_err(backend)?;
		let store = Self { pool };

		store.migrate().await?;

		Ok(store)
	}

	async fn migrate(&self) -> Result<(), StoreError> {
		for statement in SCHEMA {
			sqlx::query(statement).execute(&self.pool).await.map_err(backend)?;
		}

		Ok(())
	}

	fn parse_state(row: &SqliteRow) -> Result<OAuthState, StoreError> {
		let state = StateValue::new(row.try_get::<String, _>("state").map_err(backend)?)
			.map_err(serialization)?;
		let redirect = row
			.try_get::<String, _>("redirect")
			.map_err(backend)?
			.parse::<RedirectTarget>()
			.map_err(serialization)?;
		let created_at = from_nanos(row.try_get("created_at").map_err(backend)?)?;

		Ok(OAuthState { state, redirect, created_at })
	}

	fn parse_token(row: &SqliteRow) -> Result<TokenRecord, StoreError> {
		Ok(TokenRecord {
			access_token: TokenSecret::new(
				row.try_get::<String, _>("access_token").map_err(backend)?,
			),
			refresh_token: TokenSecret::new(
				row.try_get::<String, _>("refresh_token").map_err(backend)?,
			),
			instance_url: row.try_get("instance_url").map_err(backend)?,
			created_at: from_nanos(row.try_get("created_at").map_err(backend)?)?,
		})
	}

	fn parse_api_key(row: &SqliteRow) -> Result<ApiKey, StoreError> {
		Ok(ApiKey {
			api_key: TokenSecret::new(row.try_get::<String, _>("api_key").map_err(backend)?),
			email: Email::parse(row.try_get::<String, _>("email").map_err(backend)?)
				.map_err(serialization)?,
			created_at: from_nanos(row.try_get("created_at").map_err(backend)?)?,
		})
	}
}
impl BrokerStore for SqliteStore {
	fn save_state(&self, state: OAuthState) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			sqlx::query("INSERT INTO oauth_states (state, redirect, created_at) VALUES (?, ?, ?)")
				.bind(state.state.as_ref())
				.bind(state.redirect.as_str())
				.bind(to_nanos(state.created_at)?)
				.execute(&self.pool)
				.await
				.map_err(backend)?;

			Ok(())
		})
	}

	fn take_state<'a>(&'a self, state: &'a StateValue) -> StoreFuture<'a, Option<OAuthState>> {
		Box::pin(async move {
			let row = sqlx::query(
				"DELETE FROM oauth_states WHERE state = ? RETURNING state, redirect, created_at",
			)
			.bind(state.as_ref())
			.fetch_optional(&self.pool)
			.await
			.map_err(backend)?;

			row.as_ref().map(Self::parse_state).transpose()
		})
	}

	fn purge_expired_states(&self, cutoff: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move {
			let result = sqlx::query("DELETE FROM oauth_states WHERE created_at < ?")
				.bind(to_nanos(cutoff)?)
				.execute(&self.pool)
				.await
				.map_err(backend)?;

			Ok(result.rows_affected())
		})
	}

	fn save_token(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			sqlx::query(
				"INSERT INTO external_tokens (access_token, refresh_token, instance_url, created_at)
				 VALUES (?, ?, ?, ?)
				 ON CONFLICT(access_token) DO UPDATE SET
					refresh_token = excluded.refresh_token,
					instance_url = excluded.instance_url,
					created_at = excluded.created_at",
			)
			.bind(record.access_token.expose())
			.bind(record.refresh_token.expose())
			.bind(&record.instance_url)
			.bind(to_nanos(record.created_at)?)
			.execute(&self.pool)
			.await
			.map_err(backend)?;

			Ok(())
		})
	}

	fn fetch_token<'a>(&'a self, access_token: &'a str) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move {
			let row = sqlx::query(
				"SELECT access_token, refresh_token, instance_url, created_at
				 FROM external_tokens WHERE access_token = ?",
			)
			.bind(access_token)
			.fetch_optional(&self.pool)
			.await
			.map_err(backend)?;

			row.as_ref().map(Self::parse_token).transpose()
		})
	}

	fn rotate_token<'a>(
		&'a self,
		expected_access: &'a str,
		expected_refresh: &'a str,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let mut tx = self.pool.begin().await.map_err(backend)?;
			let updated = sqlx::query(
				"UPDATE external_tokens
				 SET access_token = ?, refresh_token = ?, instance_url = ?, created_at = ?
				 WHERE access_token = ? AND refresh_token = ?",
			)
			.bind(replacement.access_token.expose())
			.bind(replacement.refresh_token.expose())
			.bind(&replacement.instance_url)
			.bind(to_nanos(replacement.created_at)?)
			.bind(expected_access)
			.bind(expected_refresh)
			.execute(&mut *tx)
			.await
			.map_err(backend)?
			.rows_affected();
			let outcome = if updated == 1 {
				CompareAndSwapOutcome::Updated
			} else {
				let exists =
					sqlx::query("SELECT 1 FROM external_tokens WHERE access_token = ?")
						.bind(expected_access)
						.fetch_optional(&mut *tx)
						.await
						.map_err(backend)?
						.is_some();

				if exists {
					CompareAndSwapOutcome::RefreshMismatch
				} else {
					CompareAndSwapOutcome::Missing
				}
			};

			tx.commit().await.map_err(backend)?;

			Ok(outcome)
		})
	}

	fn delete_token<'a>(
		&'a self,
		access_token: &'a str,
	) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move {
			let row = sqlx::query(
				"DELETE FROM external_tokens WHERE access_token = ?
				 RETURNING access_token, refresh_token, instance_url, created_at",
			)
			.bind(access_token)
			.fetch_optional(&self.pool)
			.await
			.map_err(backend)?;

			row.as_ref().map(Self::parse_token).transpose()
		})
	}

	fn save_api_key(&self, key: ApiKey) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			sqlx::query("INSERT INTO api_keys (api_key, email, created_at) VALUES (?, ?, ?)")
				.bind(key.api_key.expose())
				.bind(key.email.as_str())
				.bind(to_nanos(key.created_at)?)
				.execute(&self.pool)
				.await
				.map_err(backend)?;

			Ok(())
		})
	}

	fn fetch_api_key<'a>(&'a self, api_key: &'a str) -> StoreFuture<'a, Option<ApiKey>> {
		Box::pin(async move {
			let row =
				sqlx::query("SELECT api_key, email, created_at FROM api_keys WHERE api_key = ?")
					.bind(api_key)
					.fetch_optional(&self.pool)
					.await
					.map_err(backend)?;

			row.as_ref().map(Self::parse_api_key).transpose()
		})
	}

	fn close(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.pool.close().await;

			Ok(())
		})
	}
}

fn backend(err: sqlx::Error) -> StoreError {
	if err.as_database_error().is_some_and(|db| db.is_unique_violation()) {
		return StoreError::Conflict { message: err.to_string() };
	}

	StoreError::Backend { message: err.to_string() }
}

fn serialization(err: impl Display) -> StoreError {
	StoreError::Serialization { message: err.to_string() }
}

fn to_nanos(instant: OffsetDateTime) -> Result<i64, StoreError> {
	i64::try_from(instant.unix_timestamp_nanos())
		.map_err(|_| serialization(format!("timestamp {instant} does not fit in 64 bits")))
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime, StoreError> {
	OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).map_err(serialization)
}
