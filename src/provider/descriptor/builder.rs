// self
use crate::{
	_prelude::*,
	provider::{ClientAuthMethod, DEFAULT_API_VERSION, ProviderDescriptor, ProviderEndpoints},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required for the login redirect.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is mandatory for all flows.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// API version must look like `v59.0`.
	#[error("API version `{version}` is not of the form `v<major>.<minor>`.")]
	InvalidApiVersion {
		/// Rejected version string.
		version: String,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug, Default)]
pub struct ProviderDescriptorBuilder {
	/// Authorization endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint used for exchanges and refreshes.
	pub token_endpoint: Option<Url>,
	/// Preferred client authentication method for the token endpoint.
	pub preferred_client_auth_method: ClientAuthMethod,
	/// Data API version; defaults to [`DEFAULT_API_VERSION`].
	pub api_version: Option<String>,
}
impl ProviderDescriptorBuilder {
	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Overrides the preferred client authentication method.
	pub fn preferred_client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.preferred_client_auth_method = method;

		self
	}

	/// Overrides the data API version.
	pub fn api_version(mut self, version: impl Into<String>) -> Self {
		self.api_version = Some(version.into());

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let descriptor = ProviderDescriptor {
			endpoints: ProviderEndpoints { authorization, token },
			preferred_client_auth_method: self.preferred_client_auth_method,
			api_version: self.api_version.unwrap_or_else(|| DEFAULT_API_VERSION.into()),
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;
		validate_api_version(&self.api_version)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

	if url.scheme() == "https" || (url.scheme() == "http" && loopback) {
		Ok(())
	} else {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn validate_api_version(version: &str) -> Result<(), ProviderDescriptorError> {
	let valid = version.strip_prefix('v').and_then(|rest| rest.split_once('.')).is_some_and(
		|(major, minor)| {
			!major.is_empty()
				&& !minor.is_empty()
				&& major.chars().all(|c| c.is_ascii_digit())
				&& minor.chars().all(|c| c.is_ascii_digit())
		},
	);

	if valid {
		Ok(())
	} else {
		Err(ProviderDescriptorError::InvalidApiVersion { version: version.to_owned() })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("URL fixture should parse.")
	}

	#[test]
	fn plain_http_is_only_allowed_for_loopback_hosts() {
		let err = ProviderDescriptorBuilder::default()
			.authorization_endpoint(url("http://login.example.com/authorize"))
			.token_endpoint(url("https://login.example.com/token"))
			.build()
			.expect_err("Remote plain-HTTP endpoints must be rejected.");

		assert!(matches!(
			err,
			ProviderDescriptorError::InsecureEndpoint { endpoint: "authorization", .. }
		));

		ProviderDescriptorBuilder::default()
			.authorization_endpoint(url("http://127.0.0.1:9000/authorize"))
			.token_endpoint(url("http://localhost:9000/token"))
			.build()
			.expect("Loopback endpoints should be accepted.");
	}

	#[test]
	fn api_version_is_validated() {
		let builder = || {
			ProviderDescriptorBuilder::default()
				.authorization_endpoint(url("https://login.example.com/authorize"))
				.token_endpoint(url("https://login.example.com/token"))
		};

		assert_eq!(
			builder().build().expect("Default version should be valid.").api_version,
			DEFAULT_API_VERSION
		);
		assert!(builder().api_version("v60.0").build().is_ok());

		for bad in ["59.0", "v59", "v59.x", "v/../x.0"] {
			assert_eq!(
				builder().api_version(bad).build(),
				Err(ProviderDescriptorError::InvalidApiVersion { version: bad.into() })
			);
		}
	}

	#[test]
	fn missing_endpoints_are_reported() {
		assert_eq!(
			ProviderDescriptorBuilder::default().build(),
			Err(ProviderDescriptorError::MissingAuthorizationEndpoint)
		);
	}
}
