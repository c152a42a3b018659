//! Bearer credential resolution with proactive refresh of stale tokens.

// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
	flows::Broker,
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
};

/// Usable provider session handed to downstream calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
	/// Access token to present to the data API.
	pub access_token: TokenSecret,
	/// Base URL of the instance that serves the data API.
	pub instance_url: String,
	/// `true` once the access token differs from the credential the caller presented.
	pub rotated: bool,
}
impl Session {
	/// Wraps a stored record without marking it rotated.
	pub fn from_record(record: &TokenRecord) -> Self {
		Self {
			access_token: record.access_token.clone(),
			instance_url: record.instance_url.clone(),
			rotated: false,
		}
	}

	/// Switches the session over to a freshly rotated record.
	pub fn adopt(&mut self, record: &TokenRecord) {
		self.rotated |= record.access_token != self.access_token;
		self.access_token = record.access_token.clone();
		self.instance_url = record.instance_url.clone();
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("access_token", &"<redacted>")
			.field("instance_url", &self.instance_url)
			.field("rotated", &self.rotated)
			.finish()
	}
}

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Resolves a bearer `credential` into a session, refreshing the record first when it is
	/// older than [`SessionSettings::stale_after`](crate::flows::SessionSettings::stale_after).
	///
	/// Unknown credentials fail with [`Error::InvalidCredential`]; refresh failures propagate
	/// unchanged.
	pub async fn resolve_session(&self, credential: &str) -> Result<Session> {
		obs::observe(FlowKind::Session, "resolve_session", async move {
			if credential.trim().is_empty() || credential.chars().any(char::is_whitespace) {
				return Err(Error::InvalidCredential);
			}

			let record = self.store.fetch_token(credential).await?.ok_or(Error::InvalidCredential)?;
			let mut session = Session::from_record(&record);

			if record.is_stale_at(OffsetDateTime::now_utc(), self.settings.stale_after) {
				tracing::debug!("stored access token is stale; refreshing before use");

				let refreshed = self.refresh_token(&record).await?;

				session.adopt(&refreshed);
			}

			Ok(session)
		})
		.await
	}
}
