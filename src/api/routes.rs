//! Route handlers.

// crates.io
use axum::{
	Form, Json, Router,
	extract::{
		FromRequestParts, Path, Query, State,
		rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
	},
	http::{HeaderValue, StatusCode, header, request::Parts},
	response::{IntoResponse, Response},
	routing::{get, post},
};
// self
use crate::{
	_prelude::*,
	api::{ACCESS_TOKEN_HEADER, ApiError, SharedState},
	auth::{RecordId, RedirectTarget, SObjectName},
	flows::{AccountSummary, IssuedTokens, SObjectDescribe, Session},
};

const DEFAULT_SOBJECT: &str = "Opportunity";

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Routes without middleware; see [`crate::api::router`].
pub fn router(state: SharedState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/login", get(login))
		.route("/callback", post(callback))
		.route("/metadata", get(metadata))
		.route("/metadata/{sobject}", get(metadata_for))
		.route("/accounts/{account_id}", get(account))
		.route("/api-keys", post(api_key_issue))
		.route("/api-keys/verify", post(api_key_verify))
		.with_state(state)
}

/// `GET /health` body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
	/// Always `Ok!`.
	pub message: String,
}

/// `GET /login` query.
#[derive(Clone, Debug, Deserialize)]
pub struct LoginParams {
	/// Caller-chosen state nonce.
	pub state: Option<String>,
	/// `direct` or `delegated` (default).
	pub redirect: Option<String>,
}

/// `POST /callback` form.
#[derive(Clone, Debug, Deserialize)]
pub struct CallbackForm {
	/// Authorization code issued by the provider.
	pub code: Option<String>,
	/// State echoed back by the provider.
	pub state: Option<String>,
}

/// `POST /callback` body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
	/// Access token; also the bearer credential for this gateway.
	pub access_token: String,
	/// Refresh token, empty when none was issued.
	pub refresh_token: String,
	/// Instance serving the data API.
	pub instance_url: String,
	/// Token type reported by the provider.
	pub token_type: String,
	/// Provider issue timestamp, passed through.
	pub issued_at: Option<String>,
}
impl From<IssuedTokens> for TokenResponse {
	fn from(issued: IssuedTokens) -> Self {
		Self {
			access_token: issued.record.access_token.expose().to_owned(),
			refresh_token: issued.record.refresh_token.expose().to_owned(),
			instance_url: issued.record.instance_url,
			token_type: issued.token_type,
			issued_at: issued.issued_at,
		}
	}
}

/// `POST /api-keys` body.
#[derive(Clone, Debug, Deserialize)]
pub struct IssueKeyRequest {
	/// Owner email.
	pub email: String,
}

/// `POST /api-keys` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyResponse {
	/// Newly issued key.
	pub api_key: String,
	/// Owner email.
	pub email: String,
	/// Issue instant.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

/// `POST /api-keys/verify` body.
#[derive(Clone, Debug, Deserialize)]
pub struct VerifyKeyRequest {
	/// Key to verify.
	pub api_key: String,
}

/// `POST /api-keys/verify` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedKeyResponse {
	/// Owner email.
	pub email: String,
	/// Issue instant.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

/// Credential taken from `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerCredential(pub String);
impl<S> FromRequestParts<S> for BearerCredential
where
	S: Send + Sync,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, _: &S) -> ApiResult<Self> {
		let token = parts
			.headers
			.get(header::AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| {
				let (scheme, token) = value.split_once(' ')?;

				scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
			})
			.filter(|token| !token.is_empty())
			.ok_or(Error::InvalidCredential)?;

		Ok(Self(token.to_owned()))
	}
}

async fn health() -> Json<HealthResponse> {
	Json(HealthResponse { message: "Ok!".into() })
}

async fn login(
	State(state): State<SharedState>,
	params: std::result::Result<Query<LoginParams>, QueryRejection>,
) -> ApiResult<Response> {
	let Query(params) = params.map_err(invalid_request)?;
	let nonce = params
		.state
		.ok_or_else(|| Error::InvalidRequest { reason: "missing `state`".into() })?;
	let redirect = match params.redirect.as_deref() {
		Some(raw) => raw.parse::<RedirectTarget>()?,
		None => RedirectTarget::default(),
	};
	let url = state.broker.start_login(&nonce, redirect).await?;

	Ok((StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response())
}

async fn callback(
	State(state): State<SharedState>,
	form: std::result::Result<Form<CallbackForm>, FormRejection>,
) -> ApiResult<Json<TokenResponse>> {
	let Form(form) = form.map_err(invalid_request)?;
	let issued =
		state.broker.complete_callback(form.code.as_deref(), form.state.as_deref()).await?;

	Ok(Json(issued.into()))
}

async fn metadata(
	State(state): State<SharedState>,
	BearerCredential(credential): BearerCredential,
) -> ApiResult<Response> {
	let sobject = SObjectName::new(DEFAULT_SOBJECT).map_err(invalid_request)?;

	describe(&state, &credential, &sobject).await
}

async fn metadata_for(
	State(state): State<SharedState>,
	BearerCredential(credential): BearerCredential,
	sobject: std::result::Result<Path<String>, PathRejection>,
) -> ApiResult<Response> {
	let Path(sobject) = sobject.map_err(invalid_request)?;
	let sobject = SObjectName::new(sobject).map_err(invalid_request)?;

	describe(&state, &credential, &sobject).await
}

async fn describe(
	state: &SharedState,
	credential: &str,
	sobject: &SObjectName,
) -> ApiResult<Response> {
	let mut session = admitted_session(state, credential).await?;
	let describe: SObjectDescribe = state.broker.describe_sobject(&mut session, sobject).await?;

	Ok(with_session(&session, Json(describe)))
}

async fn account(
	State(state): State<SharedState>,
	BearerCredential(credential): BearerCredential,
	account_id: std::result::Result<Path<String>, PathRejection>,
) -> ApiResult<Response> {
	let Path(account_id) = account_id.map_err(invalid_request)?;
	let account_id = RecordId::new(account_id).map_err(invalid_request)?;
	let mut session = admitted_session(&state, &credential).await?;
	let account: AccountSummary = state.broker.fetch_account(&mut session, &account_id).await?;

	Ok(with_session(&session, Json(account)))
}

async fn api_key_issue(
	State(state): State<SharedState>,
	body: std::result::Result<Json<IssueKeyRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiKeyResponse>)> {
	let Json(body) = body.map_err(invalid_request)?;
	let key = state.broker.issue_api_key(&body.email).await?;

	Ok((
		StatusCode::CREATED,
		Json(ApiKeyResponse {
			api_key: key.api_key.expose().to_owned(),
			email: key.email.into(),
			created_at: key.created_at,
		}),
	))
}

async fn api_key_verify(
	State(state): State<SharedState>,
	body: std::result::Result<Json<VerifyKeyRequest>, JsonRejection>,
) -> ApiResult<Json<VerifiedKeyResponse>> {
	let Json(body) = body.map_err(invalid_request)?;
	let key = state.broker.verify_api_key(&body.api_key).await?;

	state.api_key_limiter.admit(&body.api_key).await?;

	Ok(Json(VerifiedKeyResponse { email: key.email.into(), created_at: key.created_at }))
}

/// Resolves (and possibly refreshes) the session, then charges the presented credential.
async fn admitted_session(state: &SharedState, credential: &str) -> ApiResult<Session> {
	let session = state.broker.resolve_session(credential).await?;

	state.bearer_limiter.admit(credential).await?;

	Ok(session)
}

fn with_session(session: &Session, body: impl IntoResponse) -> Response {
	let mut response = body.into_response();

	if session.rotated {
		match HeaderValue::from_str(session.access_token.expose()) {
			Ok(value) => {
				response.headers_mut().insert(ACCESS_TOKEN_HEADER, value);
			},
			Err(_) => tracing::warn!("rotated access token is not a valid header value"),
		}
	}

	response
}

fn invalid_request(err: impl Display) -> ApiError {
	Error::InvalidRequest { reason: err.to_string() }.into()
}
