//! Data API calls made on behalf of a resolved session.
//!
//! Every call sends a bearer `GET` through the broker's transport. A `401` triggers exactly one
//! refresh of the stored record followed by exactly one retry with the new access token; any
//! other failure is translated straight into the gateway taxonomy.

// crates.io
use oauth2::{AsyncHttpClient, HttpResponse};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{RecordId, SObjectName},
	error::{ConfigError, TransientError},
	flows::{Broker, Session},
	http::{self, ResponseMetadataSlot, TokenHttpClient},
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
};

/// Field entry of an [`SObjectDescribe`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
	/// API name.
	pub name: String,
	/// Display label.
	pub label: String,
	/// Field data type (`string`, `reference`, `currency`, ...).
	#[serde(rename = "type")]
	pub field_type: String,
}

/// Trimmed-down describe result for one object type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SObjectDescribe {
	/// API name.
	pub name: String,
	/// Display label.
	pub label: String,
	/// Whether the object is a custom object.
	#[serde(default)]
	pub custom: bool,
	/// Field summaries in provider order.
	#[serde(default)]
	pub fields: Vec<FieldSummary>,
}

/// Account record with its remaining fields passed through.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
	/// Record id.
	pub id: String,
	/// Account name, when readable.
	pub name: Option<String>,
	/// Every other field returned by the provider, minus the `attributes` envelope.
	pub fields: Map<String, Value>,
}
impl AccountSummary {
	fn from_fields(requested: &RecordId, mut fields: Map<String, Value>) -> Self {
		fields.remove("attributes");

		let id = match fields.remove("Id") {
			Some(Value::String(id)) => id,
			_ => requested.to_string(),
		};
		let name = match fields.remove("Name") {
			Some(Value::String(name)) => Some(name),
			_ => None,
		};

		Self { id, name, fields }
	}
}

impl<C, M> Broker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Fetches `path` below the session's data API root as raw JSON.
	pub async fn fetch_resource(&self, session: &mut Session, path: &str) -> Result<Value> {
		self.fetch_resource_as(session, path).await
	}

	/// Fetches `path` below the session's data API root and decodes it as `T`.
	///
	/// - `401`: the stored record is refreshed once, `session` adopts it, and the call is
	///   retried once.
	/// - `404`: [`Error::NotFound`].
	/// - Any other non-success status, including on the retry: [`Error::Upstream`].
	pub async fn fetch_resource_as<T>(&self, session: &mut Session, path: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		obs::observe(FlowKind::ResourceCall, "fetch_resource", async move {
			let mut response = self.send_data_request(session, path).await?;

			if response.status().as_u16() == 401 {
				tracing::debug!("data API rejected the access token; refreshing once");

				let record = self
					.store
					.fetch_token(session.access_token.expose())
					.await?
					.ok_or(Error::InvalidCredential)?;
				let refreshed = self.refresh_token(&record).await?;

				session.adopt(&refreshed);

				response = self.send_data_request(session, path).await?;
			}

			decode_response(response, || format!("Resource `{path}`"))
		})
		.await
	}

	/// Describes `sobject` (`sobjects/{name}/describe`).
	pub async fn describe_sobject(
		&self,
		session: &mut Session,
		sobject: &SObjectName,
	) -> Result<SObjectDescribe> {
		self.fetch_resource_as(session, &format!("sobjects/{sobject}/describe")).await.map_err(
			|err| match err {
				Error::NotFound { .. } => Error::NotFound { resource: format!("SObject {sobject}") },
				other => other,
			},
		)
	}

	/// Reads one Account record (`sobjects/Account/{id}`).
	pub async fn fetch_account(
		&self,
		session: &mut Session,
		account_id: &RecordId,
	) -> Result<AccountSummary> {
		let fields = self
			.fetch_resource_as::<Map<String, Value>>(
				session,
				&format!("sobjects/Account/{account_id}"),
			)
			.await
			.map_err(|err| match err {
				Error::NotFound { .. } =>
					Error::NotFound { resource: format!("Account {account_id}") },
				other => other,
			})?;

		Ok(AccountSummary::from_fields(account_id, fields))
	}

	async fn send_data_request(&self, session: &Session, path: &str) -> Result<HttpResponse> {
		let url = self.descriptor.data_api_url(&session.instance_url, path).ok_or_else(|| {
			ConfigError::InvalidInstanceUrl { instance_url: session.instance_url.clone() }
		})?;
		let request = http::bearer_get(&url, session.access_token.expose())?;
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());

		handle
			.call(request)
			.await
			.map_err(|err| self.transport_mapper.map_transport_error(slot.take().as_ref(), err))
	}
}

fn decode_response<T>(response: HttpResponse, resource: impl FnOnce() -> String) -> Result<T>
where
	T: DeserializeOwned,
{
	let status = response.status().as_u16();

	match status {
		200..=299 => {
			let body = response.body();
			let body: &[u8] = if body.is_empty() { b"null" } else { body };
			let mut deserializer = serde_json::Deserializer::from_slice(body);

			serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
				TransientError::ResponseParse { source, status: Some(status) }.into()
			})
		},
		404 => Err(Error::NotFound { resource: resource() }),
		_ => {
			tracing::warn!(status, "data API call failed");

			Err(Error::Upstream { status, reason: upstream_reason(response.body()) })
		},
	}
}

fn upstream_reason(body: &[u8]) -> String {
	#[derive(Deserialize)]
	struct ApiFault {
		message: Option<String>,
		#[serde(rename = "errorCode")]
		error_code: Option<String>,
	}

	// The data API reports failures as a list of `{message, errorCode}` objects.
	let fault = serde_json::from_slice::<Vec<ApiFault>>(body)
		.ok()
		.and_then(|faults| faults.into_iter().next());

	match fault {
		Some(ApiFault { message: Some(message), error_code: Some(code) }) =>
			format!("{code}: {message}"),
		Some(ApiFault { message: Some(message), .. }) => message,
		_ => "data API call failed".into(),
	}
}
