//! Gateway server binary.

// std
use std::sync::Arc;
// crates.io
use color_eyre::{Result, eyre::WrapErr};
use tracing_subscriber::EnvFilter;
// self
use crm_oauth_gateway::{
	api::{self, AppState},
	config::Config,
	flows::{Broker, ReqwestBroker},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	provider::DefaultProviderStrategy,
	ratelimit::{MemoryWindowCache, RateLimiter, WindowCache},
	store::{BrokerStore, SqliteStore},
};

const DEFAULT_FILTER: &str = "crm_oauth_gateway=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	// A missing `.env` is fine; the process environment still applies.
	let _ = dotenvy::dotenv();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
		)
		.init();

	let config = Config::from_env().wrap_err("failed to load configuration")?;

	tracing::info!(?config, "starting crm-oauth-gateway v{}", env!("CARGO_PKG_VERSION"));

	let store: Arc<dyn BrokerStore> = Arc::new(
		SqliteStore::connect(&config.database_url)
			.await
			.wrap_err("failed to open the token store")?,
	);
	let broker: Arc<ReqwestBroker> = Arc::new(
		Broker::with_http_client(
			store.clone(),
			config.provider_descriptor()?,
			Arc::new(DefaultProviderStrategy),
			config.client_id.clone(),
			config.redirect_uris.clone(),
			ReqwestHttpClient::with_timeout(config.upstream_timeout)?,
			Arc::new(ReqwestTransportErrorMapper),
		)
		.with_client_secret(config.client_secret.clone())
		.with_settings(config.session),
	);
	let windows = Arc::new(MemoryWindowCache::default());
	let cache: Arc<dyn WindowCache> = windows.clone();
	let state = Arc::new(AppState {
		broker: broker.clone(),
		bearer_limiter: RateLimiter::new(cache.clone(), config.bearer_policy),
		api_key_limiter: RateLimiter::new(cache, config.api_key_policy),
	});
	let maintenance = tokio::spawn(maintain(broker, windows, config.session.state_ttl));
	let listener = tokio::net::TcpListener::bind(config.bind_addr)
		.await
		.wrap_err_with(|| format!("failed to bind {}", config.bind_addr))?;

	tracing::info!(addr = %config.bind_addr, "listening");

	api::serve(listener, api::router(state, &config.cors_origins)).await?;

	maintenance.abort();
	store.close().await?;

	tracing::info!("token store closed");

	Ok(())
}

/// Purges expired OAuth states and idle rate windows once per state TTL.
async fn maintain(broker: Arc<ReqwestBroker>, windows: Arc<MemoryWindowCache>, every: time::Duration) {
	let mut interval = tokio::time::interval(every.unsigned_abs());

	loop {
		interval.tick().await;

		if let Err(e) = broker.purge_expired_states().await {
			tracing::warn!(error = %e, "failed to purge expired OAuth states");
		}

		let evicted = windows.evict_expired();

		if evicted > 0 {
			tracing::debug!(evicted, "evicted idle rate windows");
		}
	}
}
