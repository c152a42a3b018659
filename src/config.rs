//! Process configuration loaded from environment variables.
//!
//! Only the binary reads the real environment; [`Config::from_lookup`] takes any lookup
//! function so tests can feed fixed maps.

// std
use std::net::SocketAddr;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	flows::{RedirectUris, SessionSettings},
	provider::{DEFAULT_API_VERSION, ProviderDescriptor},
	ratelimit::RateLimitPolicy,
};

const DEFAULT_AUTH_URL: &str = "https://login.salesforce.com/services/oauth2/authorize";
const DEFAULT_TOKEN_URL: &str = "https://login.salesforce.com/services/oauth2/token";
const DEFAULT_DATABASE_URL: &str = "sqlite:crm-oauth-gateway.db";
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,https://chat.openai.com";

/// Gateway configuration.
#[derive(Clone)]
pub struct Config {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: String,
	/// Redirect URIs registered with the provider.
	pub redirect_uris: RedirectUris,
	/// Provider authorize endpoint.
	pub authorization_endpoint: Url,
	/// Provider token endpoint.
	pub token_endpoint: Url,
	/// Data API version segment (`v59.0`).
	pub api_version: String,
	/// `sqlx` connection string for the token store.
	pub database_url: String,
	/// Listen address.
	pub bind_addr: SocketAddr,
	/// Origins allowed by CORS.
	pub cors_origins: Vec<String>,
	/// Budget for bearer-token callers.
	pub bearer_policy: RateLimitPolicy,
	/// Budget for API-key callers.
	pub api_key_policy: RateLimitPolicy,
	/// Token staleness and state TTL.
	pub session: SessionSettings,
	/// Timeout applied to every provider request.
	pub upstream_timeout: Duration,
}
impl Config {
	/// Reads the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Builds the configuration from an arbitrary variable lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let env = Env(lookup);
		let host = env.or("HOST", "0.0.0.0");
		let port = env.parsed("PORT", 8000_u16)?;
		let bind_addr: SocketAddr = format!("{host}:{port}")
			.parse()
			.or_else(|_| format!("[{host}]:{port}").parse::<SocketAddr>())
			.map_err(|_| ConfigError::InvalidEnv {
				name: "HOST",
				reason: format!("`{host}` is not an IP address"),
			})?;
		let window = Duration::seconds(env.parsed("RATE_LIMIT_WINDOW_SECS", 60_i64)?);

		if !window.is_positive() {
			return Err(ConfigError::InvalidEnv {
				name: "RATE_LIMIT_WINDOW_SECS",
				reason: "must be positive".into(),
			});
		}

		Ok(Self {
			client_id: env.required("SALESFORCE_CLIENT_ID")?,
			client_secret: env.required("SALESFORCE_CLIENT_SECRET")?,
			redirect_uris: RedirectUris {
				direct: env.url("SALESFORCE_REDIRECT_URI", None)?,
				delegated: env.url("CHATGPT_REDIRECT_URI", None)?,
			},
			authorization_endpoint: env.url("SALESFORCE_AUTH_URL", Some(DEFAULT_AUTH_URL))?,
			token_endpoint: env.url("SALESFORCE_TOKEN_URL", Some(DEFAULT_TOKEN_URL))?,
			api_version: env.or("SALESFORCE_API_VERSION", DEFAULT_API_VERSION),
			database_url: env.or("DATABASE_URL", DEFAULT_DATABASE_URL),
			bind_addr,
			cors_origins: env
				.or("CORS_ORIGINS", DEFAULT_CORS_ORIGINS)
				.split(',')
				.map(str::trim)
				.filter(|origin| !origin.is_empty())
				.map(ToOwned::to_owned)
				.collect(),
			bearer_policy: RateLimitPolicy::new(
				env.budget("RATE_LIMIT_BEARER_MAX", RateLimitPolicy::bearer_default().max_calls)?,
				window,
			),
			api_key_policy: RateLimitPolicy::new(
				env.budget("RATE_LIMIT_API_KEY_MAX", RateLimitPolicy::api_key_default().max_calls)?,
				window,
			),
			session: SessionSettings {
				stale_after: env.seconds("TOKEN_STALE_AFTER_SECS", 7_200)?,
				state_ttl: env.seconds("OAUTH_STATE_TTL_SECS", 600)?,
			},
			upstream_timeout: env.seconds("UPSTREAM_TIMEOUT_SECS", 30)?,
		})
	}

	/// Validated provider descriptor for the configured endpoints.
	pub fn provider_descriptor(&self) -> Result<ProviderDescriptor, ConfigError> {
		Ok(ProviderDescriptor::builder()
			.authorization_endpoint(self.authorization_endpoint.clone())
			.token_endpoint(self.token_endpoint.clone())
			.api_version(self.api_version.clone())
			.build()?)
	}
}
impl Debug for Config {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Config")
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.field("redirect_uris", &self.redirect_uris)
			.field("authorization_endpoint", &self.authorization_endpoint.as_str())
			.field("token_endpoint", &self.token_endpoint.as_str())
			.field("api_version", &self.api_version)
			.field("bind_addr", &self.bind_addr)
			.field("cors_origins", &self.cors_origins)
			.field("bearer_policy", &self.bearer_policy)
			.field("api_key_policy", &self.api_key_policy)
			.field("session", &self.session)
			.field("upstream_timeout", &self.upstream_timeout)
			.finish_non_exhaustive()
	}
}

struct Env<F>(F);
impl<F> Env<F>
where
	F: Fn(&str) -> Option<String>,
{
	fn get(&self, name: &str) -> Option<String> {
		(self.0)(name).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
	}

	fn or(&self, name: &str, default: &str) -> String {
		self.get(name).unwrap_or_else(|| default.to_owned())
	}

	fn required(&self, name: &'static str) -> Result<String, ConfigError> {
		self.get(name).ok_or(ConfigError::MissingEnv { name })
	}

	fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
	where
		T: FromStr,
		T::Err: Display,
	{
		match self.get(name) {
			Some(raw) => raw
				.parse()
				.map_err(|e: T::Err| ConfigError::InvalidEnv { name, reason: e.to_string() }),
			None => Ok(default),
		}
	}

	fn budget(&self, name: &'static str, default: u32) -> Result<u32, ConfigError> {
		let max_calls = self.parsed(name, default)?;

		if max_calls == 0 {
			return Err(ConfigError::InvalidEnv { name, reason: "must be at least 1".into() });
		}

		Ok(max_calls)
	}

	fn seconds(&self, name: &'static str, default: i64) -> Result<Duration, ConfigError> {
		let secs = self.parsed(name, default)?;

		if secs <= 0 {
			return Err(ConfigError::InvalidEnv { name, reason: "must be positive".into() });
		}

		Ok(Duration::seconds(secs))
	}

	fn url(&self, name: &'static str, default: Option<&str>) -> Result<Url, ConfigError> {
		let raw = match (self.get(name), default) {
			(Some(raw), _) => raw,
			(None, Some(default)) => default.to_owned(),
			(None, None) => return Err(ConfigError::MissingEnv { name }),
		};

		Url::parse(&raw).map_err(|e| ConfigError::InvalidEnv { name, reason: e.to_string() })
	}
}
