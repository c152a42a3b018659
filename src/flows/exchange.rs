//! Callback handling: state consumption and the authorization-code exchange.

// self
use crate::{
	_prelude::*,
	auth::{RedirectTarget, StateValue, TokenRecord},
	flows::{Broker, common},
	http::TokenHttpClient,
	oauth::{OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind},
};

/// Tokens persisted by a successful code exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedTokens {
	/// Stored record.
	pub record: TokenRecord,
	/// Token type reported by the provider.
	pub token_type: String,
	/// Provider issue timestamp, passed through verbatim.
	pub issued_at: Option<String>,
}

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Exchanges `code` for tokens using the redirect URI registered for `redirect` and
	/// persists the resulting record.
	///
	/// Provider rejections fail with [`Error::TokenExchangeFailed`]; nothing is written unless
	/// the provider returned an access token and an instance URL.
	pub async fn exchange_code(&self, code: &str, redirect: RedirectTarget) -> Result<IssuedTokens> {
		obs::observe(FlowKind::AuthorizationCode, "exchange_code", async move {
			let facade = common::facade(self)?;
			let grant = facade
				.exchange_authorization_code(
					self.strategy.as_ref(),
					code,
					self.redirect_uris.get(redirect),
				)
				.await?;
			let instance_url = grant.instance_url.clone().ok_or_else(|| {
				Error::TokenExchangeFailed {
					reason: "provider response did not include instance_url".into(),
				}
			})?;

			if Url::parse(&instance_url).is_err() {
				return Err(Error::TokenExchangeFailed {
					reason: format!("provider returned an unusable instance_url `{instance_url}`"),
				});
			}

			let record = TokenRecord::builder()
				.access_token(grant.access_token.clone())
				.refresh_token(grant.refresh_token.clone().unwrap_or_default())
				.instance_url(instance_url)
				.created_at(OffsetDateTime::now_utc())
				.build()
				.map_err(|e| Error::TokenExchangeFailed { reason: e.to_string() })?;

			self.store.save_token(record.clone()).await?;

			tracing::info!(
				instance_url = %record.instance_url,
				refreshable = record.can_refresh(),
				"stored tokens from code exchange"
			);

			Ok(IssuedTokens { record, token_type: grant.token_type, issued_at: grant.issued_at })
		})
		.await
	}

	/// Validates and consumes the callback `state`, then exchanges `code`.
	///
	/// Missing parameters fail with [`Error::InvalidRequest`]; unknown, reused, or expired
	/// states fail with [`Error::InvalidState`] before the provider is contacted.
	pub async fn complete_callback(
		&self,
		code: Option<&str>,
		state: Option<&str>,
	) -> Result<IssuedTokens> {
		let code = code
			.filter(|value| !value.is_empty())
			.ok_or_else(|| Error::InvalidRequest { reason: "missing `code`".into() })?;
		let state = state
			.filter(|value| !value.is_empty())
			.ok_or_else(|| Error::InvalidRequest { reason: "missing `state`".into() })?;
		let state =
			StateValue::new(state).map_err(|e| Error::InvalidState { reason: e.to_string() })?;
		let issued = self.store.take_state(&state).await?.ok_or_else(|| Error::InvalidState {
			reason: "state was not issued or was already used".into(),
		})?;

		if issued.is_expired_at(OffsetDateTime::now_utc(), self.settings.state_ttl) {
			tracing::info!("rejected expired OAuth state");

			return Err(Error::InvalidState { reason: "state has expired".into() });
		}

		self.exchange_code(code, issued.redirect).await
	}
}
