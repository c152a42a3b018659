//! OAuth 2.0 authorization-code broker for a CRM platform: state-checked logins, token
//! persistence, refresh-on-stale sessions, and a sliding-window rate limiter gating
//! read-only metadata calls.

#![deny(clippy::all)]
#![warn(missing_docs, unused_crate_dependencies)]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod ratelimit;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::TokenRecord,
		flows::{Broker, RedirectUris},
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy},
		ratelimit::{MemoryWindowCache, RateLimitPolicy, RateLimiter, WindowCache},
		store::{BrokerStore, MemoryStore},
	};

	/// Broker type alias used by reqwest-backed integration tests.
	pub type ReqwestTestBroker = Broker<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Client identifier shared by test fixtures.
	pub const TEST_CLIENT_ID: &str = "client-it";
	/// Client secret shared by test fixtures.
	pub const TEST_CLIENT_SECRET: &str = "secret-it";

	/// Builds a reqwest HTTP client with a short timeout for mock-server tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		ReqwestHttpClient::with_timeout(Duration::seconds(5))
			.expect("Failed to build Reqwest client for tests.")
	}

	/// Builds a descriptor pointing at a mock provider rooted at `base`.
	pub fn test_descriptor(base: &str) -> ProviderDescriptor {
		let url = |path: &str| {
			Url::parse(&format!("{base}{path}")).expect("Mock provider URL should parse.")
		};

		ProviderDescriptor::builder()
			.authorization_endpoint(url("/services/oauth2/authorize"))
			.token_endpoint(url("/services/oauth2/token"))
			.build()
			.expect("Mock provider descriptor should build.")
	}

	/// Redirect URIs shared by test fixtures.
	pub fn test_redirect_uris() -> RedirectUris {
		RedirectUris {
			direct: Url::parse("https://gateway.example.com/callback")
				.expect("Direct redirect URI fixture should parse."),
			delegated: Url::parse("https://chat.example.com/aip/oauth/callback")
				.expect("Delegated redirect URI fixture should parse."),
		}
	}

	/// Constructs a [`Broker`] backed by an in-memory store, default provider strategy, and the
	/// reqwest transport used across integration tests.
	pub fn build_reqwest_test_broker(
		descriptor: ProviderDescriptor,
	) -> (ReqwestTestBroker, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn BrokerStore> = store_backend.clone();
		let strategy: Arc<dyn ProviderStrategy> = Arc::new(DefaultProviderStrategy);
		let http_client = test_reqwest_http_client();
		let mapper = Arc::new(ReqwestTransportErrorMapper);
		let broker = Broker::with_http_client(
			store,
			descriptor,
			strategy,
			TEST_CLIENT_ID,
			test_redirect_uris(),
			http_client,
			mapper,
		)
		.with_client_secret(TEST_CLIENT_SECRET);

		(broker, store_backend)
	}

	/// Seeds `store` with a refreshable record created at `created_at`.
	pub async fn seed_token(
		store: &MemoryStore,
		access_token: &str,
		refresh_token: &str,
		instance_url: &str,
		created_at: OffsetDateTime,
	) -> TokenRecord {
		let record = TokenRecord::builder()
			.access_token(access_token)
			.refresh_token(refresh_token)
			.instance_url(instance_url)
			.created_at(created_at)
			.build()
			.expect("Seed token record should build.");

		store.save_token(record.clone()).await.expect("Seed token record should persist.");

		record
	}

	/// Builds a rate limiter over a fresh in-memory window cache.
	pub fn build_test_limiter(max_calls: u32) -> RateLimiter {
		let cache: Arc<dyn WindowCache> = Arc::new(MemoryWindowCache::default());

		RateLimiter::new(cache, RateLimitPolicy::new(max_calls, Duration::seconds(60)))
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
// Binary-only dependencies.
use {color_eyre as _, dotenvy as _, tracing_subscriber as _};
#[cfg(test)] use {httpmock as _, tower as _};
