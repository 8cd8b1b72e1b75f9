//! Credential strategies injected into [`crate::provider::Provider`].
//!
//! Static strategies (API key, HTTP Basic) render the same header on every request. The OAuth
//! strategy holds a token set in memory and refreshes it before use once less than the refresh
//! margin remains; concurrent callers share one in-flight refresh.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	auth::{CredentialState, OAuth2Tokens, PkcePair, TokenSecret},
	context::IntegrationContext,
	error::wrap_error,
	http::{
		ApiResponse, HttpTransport,
		http::{HeaderName, HeaderValue, Method, header::AUTHORIZATION},
	},
	oauth::{self, OAuthApp, TokenEndpoint},
	obs::{self, Operation, OperationSpan, Outcome, RefreshMetrics},
	provider::{AuthKind, ProviderMetadata, RequestOptions},
};

/// Header name/value pair attached to outgoing requests.
pub type AuthorizationHeader = (HeaderName, HeaderValue);

/// Mutually exclusive credential schemes.
#[derive(Debug)]
pub enum AuthStrategy {
	/// OAuth 2.0 with refreshable tokens.
	OAuth2(Box<OAuthClient>),
	/// Static API key.
	ApiKey(ApiKeyAuth),
	/// HTTP Basic credentials.
	Basic(BasicAuth),
}
impl AuthStrategy {
	/// Credential scheme implemented by this strategy.
	pub fn kind(&self) -> AuthKind {
		match self {
			Self::OAuth2(_) => AuthKind::OAuth2,
			Self::ApiKey(_) => AuthKind::ApiKey,
			Self::Basic(_) => AuthKind::Basic,
		}
	}

	/// Header carrying the credential, refreshing OAuth tokens first when needed.
	pub async fn authorization(&self) -> Result<AuthorizationHeader> {
		match self {
			Self::OAuth2(client) => {
				let tokens = client.valid_access_token().await?;

				sensitive_header(AUTHORIZATION, &tokens.authorization_header())
			},
			Self::ApiKey(auth) => auth.header(),
			Self::Basic(auth) => auth.header(),
		}
	}

	/// Error returned when the provider answers 401.
	///
	/// OAuth strategies drop the rejected access token so the next attempt refreshes first.
	pub fn on_unauthorized(&self) -> Error {
		match self {
			Self::OAuth2(client) => {
				client.invalidate_access_token();

				Error::token_expired("Provider rejected the access token.")
			},
			Self::ApiKey(_) | Self::Basic(_) => Error::from_status(401, None, None),
		}
	}
}
impl From<OAuthClient> for AuthStrategy {
	fn from(client: OAuthClient) -> Self {
		Self::OAuth2(Box::new(client))
	}
}
impl From<ApiKeyAuth> for AuthStrategy {
	fn from(auth: ApiKeyAuth) -> Self {
		Self::ApiKey(auth)
	}
}
impl From<BasicAuth> for AuthStrategy {
	fn from(auth: BasicAuth) -> Self {
		Self::Basic(auth)
	}
}

/// API key sent as `Authorization: Bearer <key>` or verbatim in a custom header.
#[derive(Clone, Debug)]
pub struct ApiKeyAuth {
	key: TokenSecret,
	header: Option<HeaderName>,
}
impl ApiKeyAuth {
	/// Sends the key as a bearer credential.
	pub fn new(key: impl Into<String>) -> Self {
		Self { key: TokenSecret::new(key), header: None }
	}

	/// Sends the key verbatim in `header` instead.
	pub fn in_header(mut self, header: HeaderName) -> Self {
		self.header = Some(header);

		self
	}

	fn header(&self) -> Result<AuthorizationHeader> {
		if self.key.is_empty() {
			return Err(Error::invalid_credentials("API key is empty."));
		}

		match &self.header {
			Some(name) => sensitive_header(name.clone(), self.key.expose()),
			None => sensitive_header(AUTHORIZATION, &format!("Bearer {}", self.key.expose())),
		}
	}
}

/// HTTP Basic username and password.
#[derive(Clone, Debug)]
pub struct BasicAuth {
	username: String,
	password: TokenSecret,
}
impl BasicAuth {
	/// Wraps the credentials.
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self { username: username.into(), password: TokenSecret::new(password) }
	}

	fn header(&self) -> Result<AuthorizationHeader> {
		if self.username.is_empty() || self.username.contains(':') {
			return Err(Error::invalid_credentials(
				"Basic auth username must be non-empty and free of `:`.",
			));
		}

		let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password.expose()));

		sensitive_header(AUTHORIZATION, &format!("Basic {encoded}"))
	}
}

#[derive(Debug, Default)]
struct OAuthSession {
	tokens: Option<OAuth2Tokens>,
	pkce_verifier: Option<TokenSecret>,
}

/// Per-instance OAuth 2.0 credential holder.
///
/// States move from unauthenticated to authorized on code exchange or [`OAuthClient::set_tokens`],
/// back through a refresh once inside the margin, and to unauthenticated again on
/// [`OAuthClient::clear_tokens`].
pub struct OAuthClient {
	metadata: Arc<ProviderMetadata>,
	app: OAuthApp,
	endpoint: TokenEndpoint,
	transport: Arc<dyn HttpTransport>,
	session: Mutex<OAuthSession>,
	refresh_guard: AsyncMutex<()>,
	refresh_margin: Duration,
	metrics: RefreshMetrics,
}
impl OAuthClient {
	/// Binds `app` to an OAuth 2.0 provider using the context's transport and refresh margin.
	pub fn new(
		metadata: Arc<ProviderMetadata>,
		app: OAuthApp,
		context: &IntegrationContext,
	) -> Result<Self> {
		let endpoint = TokenEndpoint::new(&metadata, &app, context.transport().clone())?;

		Ok(Self {
			metadata,
			app,
			endpoint,
			transport: context.transport().clone(),
			session: Mutex::new(OAuthSession::default()),
			refresh_guard: AsyncMutex::new(()),
			refresh_margin: context.refresh_margin(),
			metrics: RefreshMetrics::default(),
		})
	}

	/// Provider metadata.
	pub fn metadata(&self) -> &ProviderMetadata {
		&self.metadata
	}

	/// Registered OAuth application.
	pub fn app(&self) -> &OAuthApp {
		&self.app
	}

	/// Refresh counters for this instance.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Builds the authorize URL. When the provider requires PKCE a fresh verifier is generated
	/// and kept for the following code exchange.
	pub fn authorization_url(&self, state: Option<&str>) -> Result<Url> {
		let pkce = self.metadata.pkce_required.then(PkcePair::generate);
		let url = oauth::authorization_url(&self.metadata, &self.app, state, pkce.as_ref())?;

		self.session.lock().pkce_verifier = pkce.map(|pair| pair.verifier);

		Ok(url)
	}

	/// Exchanges an authorization code and stores the resulting tokens.
	pub async fn exchange_code_for_tokens(&self, code: &str) -> Result<OAuth2Tokens> {
		const OP: Operation = Operation::CodeExchange;

		let verifier = self.session.lock().pkce_verifier.take();

		obs::record_operation(OP, Outcome::Attempt);

		let result = OperationSpan::new(OP, &self.metadata.id)
			.instrument(self.endpoint.exchange_code(code, verifier.as_ref().map(TokenSecret::expose)))
			.await;

		obs::record_operation(OP, Outcome::of(&result));

		let tokens = result?;

		self.set_tokens(tokens.clone());

		Ok(tokens)
	}

	/// Exchanges `refresh_token` for a new token set and stores it.
	///
	/// The prior refresh token is kept when the provider does not rotate it.
	pub async fn refresh_access_token(&self, refresh_token: &TokenSecret) -> Result<OAuth2Tokens> {
		const OP: Operation = Operation::TokenRefresh;

		obs::record_operation(OP, Outcome::Attempt);
		self.metrics.record_attempt();

		let result = OperationSpan::new(OP, &self.metadata.id)
			.instrument(self.endpoint.refresh(refresh_token))
			.await;

		obs::record_operation(OP, Outcome::of(&result));
		self.metrics.record(&result);

		let tokens = result?;

		self.set_tokens(tokens.clone());

		Ok(tokens)
	}

	/// Returns a token set valid beyond the refresh margin, refreshing it first if needed.
	///
	/// Fails with `AuthenticationError` when no tokens are held and with `TokenExpiredError`
	/// when a refresh is due but no refresh token is available.
	pub async fn valid_access_token(&self) -> Result<OAuth2Tokens> {
		if let Some(tokens) = self.fresh_tokens()? {
			return Ok(tokens);
		}

		let _singleflight = self.refresh_guard.lock().await;

		// A concurrent caller may have refreshed while this one waited.
		if let Some(tokens) = self.fresh_tokens()? {
			return Ok(tokens);
		}

		let refresh_token = self
			.session
			.lock()
			.tokens
			.as_ref()
			.and_then(|tokens| tokens.refresh_token.clone())
			.ok_or_else(|| {
				Error::token_expired("Access token expired and no refresh token is available.")
					.with_provider(self.metadata.id.clone())
			})?;

		self.refresh_access_token(&refresh_token).await
	}

	/// Replaces the held token set.
	pub fn set_tokens(&self, tokens: OAuth2Tokens) {
		self.session.lock().tokens = Some(tokens);
	}

	/// Currently held token set.
	pub fn tokens(&self) -> Option<OAuth2Tokens> {
		self.session.lock().tokens.clone()
	}

	/// Drops the held token set and any pending PKCE verifier.
	pub fn clear_tokens(&self) -> Option<OAuth2Tokens> {
		let mut session = self.session.lock();

		session.pkce_verifier = None;

		session.tokens.take()
	}

	/// Marks the access token as expired so the next use refreshes it.
	pub fn invalidate_access_token(&self) {
		if let Some(tokens) = self.session.lock().tokens.as_mut() {
			tokens.expires_at = tokens.expires_at.min(OffsetDateTime::now_utc());
		}
	}

	/// Freshness of the held credential.
	pub fn credential_state(&self) -> CredentialState {
		match self.session.lock().tokens.as_ref() {
			Some(tokens) => tokens.state_at(OffsetDateTime::now_utc(), self.refresh_margin),
			None => CredentialState::Unauthenticated,
		}
	}

	/// Revokes `tokens` at the provider's RFC 7009 endpoint, if one is declared.
	///
	/// The refresh token is revoked when present, since that also invalidates derived access
	/// tokens at most providers.
	pub async fn revoke_remote(&self, tokens: &OAuth2Tokens) -> Result<()> {
		const OP: Operation = Operation::TokenRevoke;

		let Some(endpoint) = self.metadata.oauth_endpoints()?.revocation.clone() else {
			return Ok(());
		};
		let (token, hint) = match &tokens.refresh_token {
			Some(refresh) => (refresh, "refresh_token"),
			None => (&tokens.access_token, "access_token"),
		};
		let mut form = vec![
			("token", token.expose().to_owned()),
			("token_type_hint", hint.to_owned()),
			("client_id", self.app.client_id.clone()),
		];

		if let Some(secret) = &self.app.client_secret {
			form.push(("client_secret", secret.expose().to_owned()));
		}

		let request = RequestOptions::url(Method::POST, endpoint.clone())
			.form(form)
			.to_http(&endpoint, None)?;

		obs::record_operation(OP, Outcome::Attempt);

		let result = OperationSpan::new(OP, &self.metadata.id)
			.instrument(async {
				let response = self
					.transport
					.execute(request)
					.await
					.map(ApiResponse::from)
					.map_err(|e| wrap_error(e, Some(&self.metadata.id)))?;

				if response.is_success() {
					Ok(())
				} else {
					Err(Error::from_status(
						response.status,
						response.retry_after(),
						Some(response.text()),
					)
					.with_provider(self.metadata.id.clone()))
				}
			})
			.await;

		obs::record_operation(OP, Outcome::of(&result));

		result
	}

	fn fresh_tokens(&self) -> Result<Option<OAuth2Tokens>> {
		let session = self.session.lock();
		let tokens = session.tokens.as_ref().ok_or_else(|| {
			Error::authentication("No OAuth tokens are available; complete the authorization flow.")
				.with_provider(self.metadata.id.clone())
		})?;

		if tokens.needs_refresh_at(OffsetDateTime::now_utc(), self.refresh_margin) {
			Ok(None)
		} else {
			Ok(Some(tokens.clone()))
		}
	}
}
impl Debug for OAuthClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthClient")
			.field("provider", &self.metadata.id)
			.field("client_id", &self.app.client_id)
			.field("state", &self.credential_state())
			.finish_non_exhaustive()
	}
}

fn sensitive_header(name: HeaderName, value: &str) -> Result<AuthorizationHeader> {
	let mut value = HeaderValue::from_str(value).map_err(|e| {
		Error::invalid_credentials("Credential contains characters not allowed in a header.")
			.with_source(e)
	})?;

	value.set_sensitive(true);

	Ok((name, value))
}
