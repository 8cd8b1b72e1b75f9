//! OAuth 2.0 authorization-URL construction and the token-endpoint facade.
//!
//! Both the per-instance [`crate::provider::OAuthClient`] and the tenant-scoped
//! [`crate::manager::OAuthManager`] build authorize URLs and call token endpoints the same way,
//! so the wire details live here once. Token requests go through the `oauth2` crate, driven by
//! the crate's [`HttpTransport`] seam.

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{DEFAULT_TOKEN_TYPE, OAuth2Tokens, PkcePair, ProviderId, ScopeSet, TokenSecret},
	error::wrap_error,
	http::{HttpTransport, ResponseMetadata, ResponseMetadataSlot, TransportFailure, TransportHandle},
	provider::ProviderMetadata,
};

/// Lifetime assumed when a token response omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::HOUR;

type TokenClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;
type TokenRequestError = RequestTokenError<TransportFailure, BasicErrorResponse>;

/// Token-endpoint grants used by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenGrant {
	/// `grant_type=authorization_code`.
	AuthorizationCode,
	/// `grant_type=refresh_token`.
	RefreshToken,
}
impl TokenGrant {
	/// Wire value of the grant.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AuthorizationCode => "authorization_code",
			Self::RefreshToken => "refresh_token",
		}
	}

	/// Error raised when the grant is rejected.
	fn rejected(self, message: String) -> Error {
		match self {
			Self::AuthorizationCode => Error::authentication(message),
			Self::RefreshToken => Error::token_refresh(message),
		}
	}
}
impl Display for TokenGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// OAuth application registered with a provider.
#[derive(Clone, Debug)]
pub struct OAuthApp {
	/// Public client identifier.
	pub client_id: String,
	/// Client secret; `None` for public clients relying on PKCE.
	pub client_secret: Option<TokenSecret>,
	/// Callback URL registered with the provider.
	pub redirect_uri: Url,
}
impl OAuthApp {
	/// Creates a confidential client.
	pub fn new(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		redirect_uri: Url,
	) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: Some(TokenSecret::new(client_secret)),
			redirect_uri,
		}
	}

	/// Creates a public client without a secret.
	pub fn public(client_id: impl Into<String>, redirect_uri: Url) -> Self {
		Self { client_id: client_id.into(), client_secret: None, redirect_uri }
	}
}

/// Builds the provider's authorize URL.
///
/// The client secret is never part of the URL. Scopes are joined with the provider's delimiter.
pub fn authorization_url(
	metadata: &ProviderMetadata,
	app: &OAuthApp,
	state: Option<&str>,
	pkce: Option<&PkcePair>,
) -> Result<Url> {
	let endpoints = metadata.oauth_endpoints()?;
	let mut url = endpoints.authorization.clone();

	{
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("client_id", &app.client_id);
		pairs.append_pair("redirect_uri", app.redirect_uri.as_str());
		pairs.append_pair("response_type", "code");

		if !metadata.scopes.is_empty() {
			pairs.append_pair("scope", &metadata.scopes.join(metadata.scope_delimiter));
		}

		if let Some(state) = state {
			pairs.append_pair("state", state);
		}

		if let Some(pkce) = pkce {
			pairs.append_pair("code_challenge", &pkce.challenge);
			pairs.append_pair("code_challenge_method", pkce.method.as_str());
		}
		for (key, value) in &metadata.authorize_params {
			pairs.append_pair(key, value);
		}
	}

	Ok(url)
}

/// Token-endpoint client for one provider application.
pub struct TokenEndpoint {
	provider: ProviderId,
	scopes: ScopeSet,
	scope_delimiter: char,
	client: TokenClient,
	transport: Arc<dyn HttpTransport>,
}
impl TokenEndpoint {
	/// Configures the endpoint from provider metadata and application credentials.
	///
	/// Client credentials are sent in the form body alongside the grant parameters.
	pub fn new(
		metadata: &ProviderMetadata,
		app: &OAuthApp,
		transport: Arc<dyn HttpTransport>,
	) -> Result<Self> {
		let endpoints = metadata.oauth_endpoints()?;
		let token_url = TokenUrl::new(endpoints.token.to_string())
			.map_err(|e| Error::configuration("Token endpoint URL is invalid.").with_source(e))?;
		let redirect_url = RedirectUrl::new(app.redirect_uri.to_string())
			.map_err(|e| Error::configuration("Redirect URI is invalid.").with_source(e))?;
		let mut client = BasicClient::new(ClientId::new(app.client_id.clone()))
			.set_token_uri(token_url)
			.set_redirect_uri(redirect_url)
			.set_auth_type(AuthType::RequestBody);

		if let Some(secret) = &app.client_secret {
			client = client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}

		Ok(Self {
			provider: metadata.id.clone(),
			scopes: metadata.scopes.clone(),
			scope_delimiter: metadata.scope_delimiter,
			client,
			transport,
		})
	}

	/// Provider this endpoint belongs to.
	pub fn provider(&self) -> &ProviderId {
		&self.provider
	}

	/// Exchanges an authorization code for a token set.
	///
	/// Rejections surface as `AuthenticationError`; transport failures are normalized through
	/// [`wrap_error`]. Nothing is retried here.
	pub fn exchange_code<'a>(
		&'a self,
		code: &'a str,
		pkce_verifier: Option<&'a str>,
	) -> FacadeFuture<'a, OAuth2Tokens> {
		const GRANT: TokenGrant = TokenGrant::AuthorizationCode;

		let slot = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = TransportHandle::new(self.transport.clone(), slot.clone());
			let mut request = self.client.exchange_code(AuthorizationCode::new(code.to_owned()));

			if let Some(verifier) = pkce_verifier {
				request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_owned()));
			}

			let response = request
				.request_async(&handle)
				.await
				.map_err(|e| self.map_request_error(GRANT, slot.take(), e))?;

			self.map_token_response(GRANT, response, None)
		})
	}

	/// Exchanges a refresh token for a new token set.
	///
	/// The prior refresh token is kept when the provider does not rotate it. Rejections surface
	/// as `TokenRefreshError`.
	pub fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> FacadeFuture<'a, OAuth2Tokens> {
		const GRANT: TokenGrant = TokenGrant::RefreshToken;

		let slot = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = TransportHandle::new(self.transport.clone(), slot.clone());
			let secret = RefreshToken::new(refresh_token.expose().to_owned());
			let response = self
				.client
				.exchange_refresh_token(&secret)
				.request_async(&handle)
				.await
				.map_err(|e| self.map_request_error(GRANT, slot.take(), e))?;

			self.map_token_response(GRANT, response, Some(refresh_token))
		})
	}

	fn map_token_response(
		&self,
		grant: TokenGrant,
		response: BasicTokenResponse,
		prior_refresh: Option<&TokenSecret>,
	) -> Result<OAuth2Tokens> {
		let expires_in = match response.expires_in() {
			Some(lifetime) => Duration::try_from(lifetime).map_err(|e| {
				grant.rejected("Token endpoint returned an out-of-range expires_in.".into())
					.with_source(e)
			})?,
			None => DEFAULT_EXPIRES_IN,
		};
		let scopes = match response.scopes() {
			Some(granted) => {
				let raw = granted.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" ");

				ScopeSet::from_delimited(&raw, self.scope_delimiter)
			},
			None => self.scopes.clone(),
		};
		let token_type: &str = response.token_type().as_ref();
		let token_type = if token_type.eq_ignore_ascii_case(DEFAULT_TOKEN_TYPE) {
			DEFAULT_TOKEN_TYPE
		} else {
			token_type
		};
		let mut builder = OAuth2Tokens::builder(response.access_token().secret().to_owned())
			.token_type(token_type)
			.expires_in(expires_in)
			.scopes(scopes);

		if let Some(refresh) = response.refresh_token() {
			builder = builder.refresh_token(refresh.secret().to_owned());
		}

		let tokens = builder.build().map_err(|e| {
			grant.rejected(format!("Token endpoint returned an unusable token set: {e}"))
				.with_source(e)
				.with_provider(self.provider.clone())
		})?;

		Ok(tokens.retain_refresh_token(prior_refresh))
	}

	fn map_request_error(
		&self,
		grant: TokenGrant,
		meta: Option<ResponseMetadata>,
		err: TokenRequestError,
	) -> Error {
		let status = meta
			.and_then(|meta| meta.status)
			.map(|code| format!(" (HTTP {code})"))
			.unwrap_or_default();
		let err = match err {
			RequestTokenError::Request(failure) =>
				return wrap_error(failure.into_inner(), Some(&self.provider)),
			RequestTokenError::ServerResponse(response) => {
				let detail = response
					.error_description()
					.map(String::as_str)
					.unwrap_or_else(|| response.error().as_ref());

				grant.rejected(format!("Token endpoint rejected the {grant} grant{status}: {detail}."))
			},
			RequestTokenError::Parse(e, _) => grant
				.rejected(format!("Token endpoint returned an unreadable response{status}."))
				.with_source(e),
			RequestTokenError::Other(message) =>
				grant.rejected(format!("Token endpoint call failed{status}: {message}.")),
		};

		err.with_provider(self.provider.clone())
	}
}
impl Debug for TokenEndpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpoint")
			.field("provider", &self.provider)
			.field("scopes", &self.scopes)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::provider::AuthKind;

	fn metadata(pkce: bool) -> ProviderMetadata {
		ProviderMetadata::builder(
			ProviderId::new("chat").expect("Provider fixture should be valid."),
			AuthKind::OAuth2,
		)
		.authorization_endpoint(
			Url::parse("https://chat.example.com/oauth/authorize")
				.expect("Authorization URL fixture should parse."),
		)
		.token_endpoint(
			Url::parse("https://chat.example.com/oauth/token")
				.expect("Token URL fixture should parse."),
		)
		.scopes(ScopeSet::new(["users:read", "chat:write"]).expect("Scopes should be valid."))
		.scope_delimiter(',')
		.pkce_required(pkce)
		.build()
		.expect("Metadata fixture should build.")
	}

	fn app() -> OAuthApp {
		OAuthApp::new(
			"client-123",
			"super-secret",
			Url::parse("https://hr.example.com/oauth/callback")
				.expect("Redirect fixture should parse."),
		)
	}

	#[test]
	fn authorize_url_carries_client_scopes_and_state() {
		let pkce = PkcePair::generate();
		let url = authorization_url(&metadata(true), &app(), Some("opaque-state"), Some(&pkce))
			.expect("Authorize URL should build.");
		let pairs = url.query_pairs().into_owned().collect::<HashMap<_, _>>();

		assert_eq!(pairs["client_id"], "client-123");
		assert_eq!(pairs["redirect_uri"], "https://hr.example.com/oauth/callback");
		assert_eq!(pairs["response_type"], "code");
		assert_eq!(pairs["scope"], "users:read,chat:write");
		assert_eq!(pairs["state"], "opaque-state");
		assert_eq!(pairs["code_challenge"], pkce.challenge);
		assert_eq!(pairs["code_challenge_method"], "S256");
		assert!(!url.as_str().contains("super-secret"));
	}

	#[test]
	fn authorize_url_omits_pkce_when_not_requested() {
		let url = authorization_url(&metadata(false), &app(), None, None)
			.expect("Authorize URL should build.");

		assert!(url.query_pairs().all(|(key, _)| key != "code_challenge" && key != "state"));
	}

	#[test]
	fn grant_rejections_map_to_kinds() {
		assert_eq!(
			TokenGrant::AuthorizationCode.rejected("x".into()).kind(),
			&ErrorKind::Authentication
		);
		assert_eq!(TokenGrant::RefreshToken.rejected("x".into()).kind(), &ErrorKind::TokenRefresh);
	}
}
