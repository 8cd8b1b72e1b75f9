//! Immutable per-provider-type metadata.

// crates.io
use url::Host;
// self
use crate::{
	_prelude::*,
	auth::{ProviderId, ScopeSet},
	retry::RetryOverrides,
};

/// Credential scheme a provider uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
	/// OAuth 2.0 authorization code with refreshable tokens.
	#[serde(rename = "oauth2")]
	OAuth2,
	/// Static API key.
	ApiKey,
	/// HTTP Basic username and password.
	Basic,
}
impl AuthKind {
	/// Stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::OAuth2 => "oauth2",
			Self::ApiKey => "api_key",
			Self::Basic => "basic",
		}
	}
}
impl Display for AuthKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// OAuth endpoints declared by an OAuth 2.0 provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthEndpoints {
	/// Authorization endpoint users are redirected to.
	pub authorization: Url,
	/// Token endpoint used for code exchange and refresh.
	pub token: Url,
	/// Optional RFC 7009 revocation endpoint.
	pub revocation: Option<Url>,
}

/// Descriptor of a provider type, fixed at registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
	/// Provider identifier.
	pub id: ProviderId,
	/// Display name.
	pub name: String,
	/// Credential scheme.
	pub auth: AuthKind,
	/// OAuth endpoints (OAuth 2.0 providers only).
	pub oauth: Option<OAuthEndpoints>,
	/// Base URL that relative request paths are joined to.
	pub api_base_url: Option<Url>,
	/// Scopes requested during authorization.
	pub scopes: ScopeSet,
	/// Character used to join scopes in the authorize URL.
	pub scope_delimiter: char,
	/// Whether the authorize request must carry a PKCE challenge.
	pub pkce_required: bool,
	/// Extra query parameters appended to the authorize URL.
	pub authorize_params: Vec<(String, String)>,
	/// Declared refill rate in requests per second.
	pub rate_limit: Option<f64>,
	/// Retry tuning for slow or flaky providers.
	pub retry: Option<RetryOverrides>,
}
impl ProviderMetadata {
	/// Starts a builder.
	pub fn builder(id: ProviderId, auth: AuthKind) -> ProviderMetadataBuilder {
		ProviderMetadataBuilder::new(id, auth)
	}

	/// OAuth endpoints, or a `ConfigurationError` for non-OAuth providers.
	pub fn oauth_endpoints(&self) -> Result<&OAuthEndpoints> {
		self.oauth.as_ref().ok_or_else(|| {
			Error::configuration(format!("Provider `{}` does not declare OAuth endpoints.", self.id))
				.with_provider(self.id.clone())
		})
	}

	fn validate(&self) -> Result<(), ProviderMetadataError> {
		match (&self.oauth, self.auth) {
			(Some(endpoints), _) => {
				validate_endpoint("authorization", &endpoints.authorization)?;
				validate_endpoint("token", &endpoints.token)?;

				if let Some(revocation) = &endpoints.revocation {
					validate_endpoint("revocation", revocation)?;
				}
			},
			(None, AuthKind::OAuth2) =>
				return Err(ProviderMetadataError::MissingAuthorizationEndpoint),
			(None, _) => {},
		}

		if self.pkce_required && self.auth != AuthKind::OAuth2 {
			return Err(ProviderMetadataError::PkceWithoutOAuth);
		}
		if let Some(base) = &self.api_base_url {
			validate_endpoint("api", base)?;
		}
		if self.scope_delimiter.is_control() {
			return Err(ProviderMetadataError::InvalidScopeDelimiter {
				delimiter: self.scope_delimiter,
			});
		}
		if let Some(rate) = self.rate_limit.filter(|rate| !(rate.is_finite() && *rate > 0.)) {
			return Err(ProviderMetadataError::InvalidRateLimit { rate });
		}

		Ok(())
	}
}

/// Errors raised while validating provider metadata.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum ProviderMetadataError {
	/// OAuth 2.0 providers need an authorization endpoint.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// OAuth 2.0 providers need a token endpoint.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Endpoints must use HTTPS (plain HTTP is accepted for loopback hosts).
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Scope delimiters must be printable.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Rejected delimiter.
		delimiter: char,
	},
	/// Declared rate limits must be positive.
	#[error("Rate limit must be a positive number, got {rate}.")]
	InvalidRateLimit {
		/// Rejected rate.
		rate: f64,
	},
	/// PKCE only applies to OAuth 2.0 providers.
	#[error("The `pkce_required` flag requires an OAuth 2.0 provider.")]
	PkceWithoutOAuth,
}
impl From<ProviderMetadataError> for Error {
	fn from(e: ProviderMetadataError) -> Self {
		Error::configuration(e.to_string()).with_source(e)
	}
}

/// Builder for [`ProviderMetadata`].
#[derive(Debug)]
pub struct ProviderMetadataBuilder {
	id: ProviderId,
	name: Option<String>,
	auth: AuthKind,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	revocation_endpoint: Option<Url>,
	api_base_url: Option<Url>,
	scopes: ScopeSet,
	scope_delimiter: char,
	pkce_required: bool,
	authorize_params: Vec<(String, String)>,
	rate_limit: Option<f64>,
	retry: Option<RetryOverrides>,
}
impl ProviderMetadataBuilder {
	fn new(id: ProviderId, auth: AuthKind) -> Self {
		Self {
			id,
			name: None,
			auth,
			authorization_endpoint: None,
			token_endpoint: None,
			revocation_endpoint: None,
			api_base_url: None,
			scopes: ScopeSet::default(),
			scope_delimiter: ' ',
			pkce_required: false,
			authorize_params: Vec::new(),
			rate_limit: None,
			retry: None,
		}
	}

	/// Sets the display name (defaults to the identifier).
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());

		self
	}

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

	/// Sets the revocation endpoint.
	pub fn revocation_endpoint(mut self, url: Url) -> Self {
		self.revocation_endpoint = Some(url);

		self
	}

	/// Sets the API base URL.
	pub fn api_base_url(mut self, url: Url) -> Self {
		self.api_base_url = Some(url);

		self
	}

	/// Sets the requested scopes.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Overrides the scope delimiter (space by default).
	pub fn scope_delimiter(mut self, delimiter: char) -> Self {
		self.scope_delimiter = delimiter;

		self
	}

	/// Requires PKCE on the authorize request.
	pub fn pkce_required(mut self, required: bool) -> Self {
		self.pkce_required = required;

		self
	}

	/// Appends an extra authorize-URL parameter.
	pub fn authorize_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.authorize_params.push((key.into(), value.into()));

		self
	}

	/// Declares the provider's refill rate in requests per second.
	pub fn rate_limit(mut self, per_second: f64) -> Self {
		self.rate_limit = Some(per_second);

		self
	}

	/// Declares retry tuning.
	pub fn retry(mut self, overrides: RetryOverrides) -> Self {
		self.retry = Some(overrides);

		self
	}

	/// Validates and produces the metadata.
	pub fn build(self) -> Result<ProviderMetadata, ProviderMetadataError> {
		let oauth = match (self.authorization_endpoint, self.token_endpoint) {
			(Some(authorization), Some(token)) =>
				Some(OAuthEndpoints { authorization, token, revocation: self.revocation_endpoint }),
			(None, None) if self.auth != AuthKind::OAuth2 => None,
			(None, _) => return Err(ProviderMetadataError::MissingAuthorizationEndpoint),
			(Some(_), None) => return Err(ProviderMetadataError::MissingTokenEndpoint),
		};
		let metadata = ProviderMetadata {
			name: self.name.unwrap_or_else(|| self.id.to_string()),
			id: self.id,
			auth: self.auth,
			oauth,
			api_base_url: self.api_base_url,
			scopes: self.scopes,
			scope_delimiter: self.scope_delimiter,
			pkce_required: self.pkce_required,
			authorize_params: self.authorize_params,
			rate_limit: self.rate_limit,
			retry: self.retry,
		};

		metadata.validate()?;

		Ok(metadata)
	}
}

fn validate_endpoint(endpoint: &'static str, url: &Url) -> Result<(), ProviderMetadataError> {
	let loopback = match url.host() {
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(Host::Ipv4(addr)) => addr.is_loopback(),
		Some(Host::Ipv6(addr)) => addr.is_loopback(),
		None => false,
	};

	match url.scheme() {
		"https" => Ok(()),
		"http" if loopback => Ok(()),
		_ => Err(ProviderMetadataError::InsecureEndpoint { endpoint, url: url.to_string() }),
	}
}
