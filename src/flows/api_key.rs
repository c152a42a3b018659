//! API key issuance and verification.

// self
use crate::{
	_prelude::*,
	auth::{ApiKey, Email},
	flows::Broker,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
};

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Generates and persists a new API key for `email`.
	///
	/// Duplicate keys per email are allowed; every call yields a fresh key.
	pub async fn issue_api_key(&self, email: &str) -> Result<ApiKey> {
		obs::observe(FlowKind::ApiKey, "issue_api_key", async move {
			let email = Email::parse(email)?;
			let key = ApiKey::generate(email, OffsetDateTime::now_utc());

			self.store.save_api_key(key.clone()).await?;

			tracing::info!(domain = key.email.domain(), "issued API key");

			Ok(key)
		})
		.await
	}

	/// Looks up a previously issued API key.
	///
	/// Unknown keys fail with [`Error::InvalidCredential`].
	pub async fn verify_api_key(&self, api_key: &str) -> Result<ApiKey> {
		obs::observe(FlowKind::ApiKey, "verify_api_key", async move {
			if api_key.is_empty() {
				return Err(Error::InvalidCredential);
			}

			self.store.fetch_api_key(api_key).await?.ok_or(Error::InvalidCredential)
		})
		.await
	}
}
