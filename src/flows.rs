//! High-level flow orchestrators powered by the broker facade.
//!
//! [`Broker`] is the single entry point for every provider-facing operation: login redirects,
//! the callback code exchange, refresh rotations, bearer session resolution, data API calls,
//! and API key issuance.

pub mod api_key;
pub mod authorize;
pub mod common;
pub mod exchange;
pub mod refresh;
pub mod resource;
pub mod session;

pub use exchange::*;
pub use refresh::*;
pub use resource::*;
pub use session::*;

// self
use crate::{
	_prelude::*,
	auth::{RedirectTarget, TokenRecord},
	http::{ReqwestHttpClient, TokenHttpClient},
	oauth::{ReqwestTransportErrorMapper, TransportErrorMapper},
	provider::{ProviderDescriptor, ProviderStrategy},
	store::BrokerStore,
};

/// Broker specialized for the crate's default reqwest transport stack.
pub type ReqwestBroker = Broker<ReqwestHttpClient, ReqwestTransportErrorMapper>;

type FlowGuards = Arc<Mutex<HashMap<String, Arc<AsyncMutex<Option<TokenRecord>>>>>>;

/// The two redirect URIs registered with the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectUris {
	/// Callback served by the gateway itself.
	pub direct: Url,
	/// Callback owned by the third-party client that initiated the login.
	pub delegated: Url,
}
impl RedirectUris {
	/// Returns the URI registered for `target`.
	pub fn get(&self, target: RedirectTarget) -> &Url {
		match target {
			RedirectTarget::Direct => &self.direct,
			RedirectTarget::Delegated => &self.delegated,
		}
	}
}

/// Timing knobs for session handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
	/// Access tokens older than this are refreshed before use.
	pub stale_after: Duration,
	/// Issued states older than this are refused by the callback.
	pub state_ttl: Duration,
}
impl Default for SessionSettings {
	fn default() -> Self {
		Self { stale_after: Duration::hours(2), state_ttl: Duration::minutes(10) }
	}
}

/// Coordinates OAuth 2.0 flows against a single provider descriptor.
///
/// The broker owns the HTTP client, token store, provider descriptor, and strategy references
/// so individual flows only carry grant-specific logic. Client credentials and the registered
/// redirect URIs live here so every token request authenticates the same way.
#[derive(Clone)]
pub struct Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every outbound provider request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	/// Store that persists states, tokens, and API keys.
	pub store: Arc<dyn BrokerStore>,
	/// Provider descriptor that defines OAuth endpoints and the data API version.
	pub descriptor: ProviderDescriptor,
	/// Strategy responsible for classifying token endpoint failures.
	pub strategy: Arc<dyn ProviderStrategy>,
	/// OAuth 2.0 client identifier used in every grant.
	pub client_id: String,
	/// Client secret for confidential authentication.
	pub client_secret: Option<String>,
	/// Registered redirect URIs.
	pub redirect_uris: RedirectUris,
	/// Staleness and state TTL settings.
	pub settings: SessionSettings,
	/// Shared metrics recorder for refresh flow outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	flow_guards: FlowGuards,
}
impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a broker that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		store: Arc<dyn BrokerStore>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		client_id: impl Into<String>,
		redirect_uris: RedirectUris,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			store,
			descriptor,
			strategy,
			client_id: client_id.into(),
			client_secret: None,
			redirect_uris,
			settings: SessionSettings::default(),
			refresh_metrics: Default::default(),
			flow_guards: Default::default(),
		}
	}

	/// Sets or replaces the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Overrides the staleness and state TTL settings.
	pub fn with_settings(mut self, settings: SessionSettings) -> Self {
		self.settings = settings;

		self
	}
}
impl Broker<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a broker that provisions its own reqwest transport.
	pub fn new(
		store: Arc<dyn BrokerStore>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		client_id: impl Into<String>,
		redirect_uris: RedirectUris,
	) -> Self {
		Self::with_http_client(
			store,
			descriptor,
			strategy,
			client_id,
			redirect_uris,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Broker")
			.field("descriptor", &self.descriptor)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("redirect_uris", &self.redirect_uris)
			.field("settings", &self.settings)
			.finish()
	}
}
