//! Internal OAuth client facade over the `oauth2` crate.
//!
//! The provider's token responses carry `instance_url` (plus `id`, `issued_at`, `signature`)
//! next to the standard fields, so the facade plugs a custom [`ExtraTokenFields`] type into
//! the generic `oauth2` client instead of using `BasicClient`.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken,
	EndpointNotSet, EndpointSet, ExtraTokenFields, HttpClientError, RedirectUrl, RefreshToken,
	RequestTokenError, StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
		BasicTokenType,
	},
};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{
		ClientAuthMethod, GrantType, ProviderDescriptor, ProviderErrorContext, ProviderStrategy,
	},
};

type GatewayTokenResponse = StandardTokenResponse<InstanceFields, BasicTokenType>;
type UnconfiguredClient = Client<
	BasicErrorResponse,
	GatewayTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
>;
type ConfiguredClient = Client<
	BasicErrorResponse,
	GatewayTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;
type RequestError<E> = RequestTokenError<HttpClientError<E>, BasicErrorResponse>;

/// Provider-specific fields returned next to the standard token response fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFields {
	/// Base URL of the instance that serves the data API for this grant.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub instance_url: Option<String>,
	/// Identity URL of the authorizing user.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	/// Provider issue timestamp (milliseconds since the epoch, as a string).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub issued_at: Option<String>,
	/// Provider signature over `id` and `issued_at`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signature: Option<String>,
}
impl ExtraTokenFields for InstanceFields {}

/// Tokens returned by a successful grant.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
	/// New access token.
	pub access_token: String,
	/// Refresh token, when the provider issued one.
	pub refresh_token: Option<String>,
	/// Instance URL, when the provider reported one.
	pub instance_url: Option<String>,
	/// Token type (normally `bearer`).
	pub token_type: String,
	/// Provider issue timestamp, passed through verbatim.
	pub issued_at: Option<String>,
}
impl TokenGrant {
	fn from_response(response: GatewayTokenResponse) -> Self {
		let extra = response.extra_fields();

		Self {
			access_token: response.access_token().secret().to_owned(),
			refresh_token: response.refresh_token().map(|token| token.secret().to_owned()),
			instance_url: extra.instance_url.clone().filter(|url| !url.is_empty()),
			token_type: response.token_type().as_ref().to_owned(),
			issued_at: extra.issued_at.clone(),
		}
	}
}
impl Debug for TokenGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenGrant")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("instance_url", &self.instance_url)
			.field("token_type", &self.token_type)
			.field("issued_at", &self.issued_at)
			.finish()
	}
}

/// Maps HTTP transport failures into gateway [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a gateway error.
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_generic_transport_error(meta, "unknown transport failure"),
		}
	}
}

pub(crate) trait OAuth2Facade {
	fn authorize_url(&self, redirect_uri: &Url, state: &str) -> Result<Url>;

	fn exchange_authorization_code<'a, 'strategy, 'code, 'redirect>(
		&'a self,
		strategy: &'strategy dyn ProviderStrategy,
		code: &'code str,
		redirect_uri: &'redirect Url,
	) -> FacadeFuture<'a, TokenGrant>
	where
		'strategy: 'a,
		'code: 'a,
		'redirect: 'a;

	fn refresh_token<'a, 'strategy, 'refresh>(
		&'a self,
		strategy: &'strategy dyn ProviderStrategy,
		refresh_token: &'refresh str,
	) -> FacadeFuture<'a, TokenGrant>
	where
		'strategy: 'a,
		'refresh: 'a;
}

pub(crate) struct BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let mut oauth_client = UnconfiguredClient::new(ClientId::new(client_id.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url);

		if let Some(secret) = client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
		}
		if matches!(descriptor.preferred_client_auth_method, ClientAuthMethod::ClientSecretPost) {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Ok(Self { oauth_client, http_client, error_mapper })
	}
}
impl<C, M> OAuth2Facade for BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn authorize_url(&self, redirect_uri: &Url, state: &str) -> Result<Url> {
		let redirect_url = RedirectUrl::new(redirect_uri.to_string())
			.map_err(|source| ConfigError::InvalidRedirect { source })?;
		let state = state.to_owned();
		let (url, _) = self
			.oauth_client
			.authorize_url(move || CsrfToken::new(state))
			.set_redirect_uri(Cow::Owned(redirect_url))
			.url();

		Ok(url)
	}

	fn exchange_authorization_code<'a, 'strategy, 'code, 'redirect>(
		&'a self,
		strategy: &'strategy dyn ProviderStrategy,
		code: &'code str,
		redirect_uri: &'redirect Url,
	) -> FacadeFuture<'a, TokenGrant>
	where
		'strategy: 'a,
		'code: 'a,
		'redirect: 'a,
	{
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let redirect_url = RedirectUrl::new(redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidRedirect { source })?;
			let response = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url))
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					map_request_error(
						strategy,
						GrantType::AuthorizationCode,
						meta.take(),
						err,
						self.error_mapper.as_ref(),
					)
				})?;

			Ok(TokenGrant::from_response(response))
		})
	}

	fn refresh_token<'a, 'strategy, 'refresh>(
		&'a self,
		strategy: &'strategy dyn ProviderStrategy,
		refresh_token: &'refresh str,
	) -> FacadeFuture<'a, TokenGrant>
	where
		'strategy: 'a,
		'refresh: 'a,
	{
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					map_request_error(
						strategy,
						GrantType::RefreshToken,
						meta.take(),
						err,
						self.error_mapper.as_ref(),
					)
				})?;

			Ok(TokenGrant::from_response(response))
		})
	}
}

fn map_request_error<E, M>(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	meta: Option<ResponseMetadata>,
	err: RequestError<E>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();
	let status = meta_status(meta_ref);
	let mut ctx = ProviderErrorContext::new(grant);

	if let Some(status) = status {
		ctx = ctx.with_http_status(status);
	}

	match err {
		RequestTokenError::ServerResponse(response) => {
			ctx = ctx.with_oauth_error(response.error().as_ref().to_owned());

			if let Some(description) = response.error_description() {
				ctx = ctx.with_error_description(description.clone());
			}

			let message = match response.error_description() {
				Some(description) => format!("{}: {description}", response.error().as_ref()),
				None => response.error().as_ref().to_owned(),
			};

			classify(strategy, &ctx, grant, message, meta_ref)
		},
		RequestTokenError::Request(error) => mapper.map_transport_error(meta_ref, error),
		RequestTokenError::Parse(source, _body) if status.is_none_or(|code| code == 200) =>
			TransientError::ResponseParse { source, status }.into(),
		RequestTokenError::Parse(_, _) =>
			classify(strategy, &ctx, grant, status_message(status), meta_ref),
		RequestTokenError::Other(message) => match status {
			Some(code) if code != 200 =>
				classify(strategy, &ctx, grant, status_message(Some(code)), meta_ref),
			_ => TransientError::TokenEndpoint {
				message: format!("token endpoint returned an unexpected response: {message}"),
				status,
				retry_after: meta_retry_after(meta_ref),
			}
			.into(),
		},
	}
}

fn classify(
	strategy: &dyn ProviderStrategy,
	ctx: &ProviderErrorContext,
	grant: GrantType,
	message: String,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let kind = strategy.classify_token_error(ctx);

	if !kind.is_rejection() {
		return TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	tracing::debug!(?kind, %grant, "provider rejected the grant");

	match grant {
		GrantType::AuthorizationCode => Error::TokenExchangeFailed { reason: message },
		GrantType::RefreshToken => Error::RefreshFailed { reason: message },
	}
}

fn status_message(status: Option<u16>) -> String {
	match status {
		Some(code) => format!("token endpoint answered with status {code}"),
		None => "token endpoint answered without a status".into(),
	}
}

fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: "request timed out while calling the provider".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn map_generic_transport_error(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: format!("HTTP client error occurred while calling the provider: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
