//! Tenant-scoped OAuth 2.0 orchestration with persisted, encrypted credentials.
//!
//! [`OAuthManager`] runs the server side of the authorization-code flow for any number of
//! tenants and providers. Routing context travels inside an encrypted `state` value, token sets
//! are encrypted before they reach the [`CredentialStore`], and refreshes are serialized per
//! integration so concurrent callers share one token-endpoint call. Token-endpoint failures are
//! surfaced as typed errors and never retried here.

pub mod refresh;
pub mod state;

pub use state::*;

// crates.io
use serde_json::{Map, Value, json};
// self
use crate::{
	_prelude::*,
	auth::{IntegrationId, OAuth2Tokens, PkcePair, ProviderId, TenantId, TokenSecret, UserId},
	context::IntegrationContext,
	crypto::SecretCipher,
	oauth::{self, OAuthApp, TokenEndpoint},
	obs::{self, IntegrationLogger, Operation, OperationSpan, Outcome, RefreshMetrics},
	provider::{AuthKind, ProviderMetadata},
	store::{CredentialStore, StoredTokenRecord},
};

/// Tokens and routing context produced by a successful code exchange.
#[derive(Clone, Debug)]
pub struct AuthorizationResult {
	/// Issued token set.
	pub tokens: OAuth2Tokens,
	/// Provider the flow ran against.
	pub provider: ProviderId,
	/// Tenant that started the flow.
	pub tenant: TenantId,
	/// User that started the flow.
	pub user: Option<UserId>,
	/// Caller-supplied state fields.
	pub custom: Map<String, Value>,
}

struct RegisteredProvider {
	metadata: Arc<ProviderMetadata>,
	app: OAuthApp,
	endpoint: Arc<TokenEndpoint>,
}

/// Authorization-code flow coordinator shared across tenants.
pub struct OAuthManager {
	store: Arc<dyn CredentialStore>,
	cipher: Arc<dyn SecretCipher>,
	context: Arc<IntegrationContext>,
	logger: IntegrationLogger,
	providers: RwLock<HashMap<ProviderId, Arc<RegisteredProvider>>>,
	refresh_guards: Mutex<HashMap<IntegrationId, Arc<AsyncMutex<()>>>>,
	access_cache: Mutex<HashMap<IntegrationId, OAuth2Tokens>>,
	refresh_metrics: Arc<RefreshMetrics>,
}
impl OAuthManager {
	/// Creates a manager persisting into `store` and sealing values with `cipher`.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		cipher: Arc<dyn SecretCipher>,
		context: Arc<IntegrationContext>,
	) -> Self {
		let logger = context.logger().with_context("component", "oauth_manager");

		Self {
			store,
			cipher,
			context,
			logger,
			providers: RwLock::new(HashMap::new()),
			refresh_guards: Mutex::new(HashMap::new()),
			access_cache: Mutex::new(HashMap::new()),
			refresh_metrics: Arc::new(RefreshMetrics::default()),
		}
	}

	/// Refresh counters across all integrations.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.refresh_metrics
	}

	/// Registers an OAuth 2.0 provider and the application credentials used with it.
	///
	/// Registering the same provider again replaces its application.
	pub fn register_provider(
		&self,
		metadata: impl Into<Arc<ProviderMetadata>>,
		app: OAuthApp,
	) -> Result<()> {
		let metadata = metadata.into();

		if metadata.auth != AuthKind::OAuth2 {
			return Err(Error::configuration(format!(
				"Provider `{}` does not use OAuth 2.0.",
				metadata.id
			))
			.with_provider(metadata.id.clone()));
		}

		let endpoint = TokenEndpoint::new(&metadata, &app, self.context.transport().clone())?;

		self.providers.write().insert(
			metadata.id.clone(),
			Arc::new(RegisteredProvider { metadata, app, endpoint: Arc::new(endpoint) }),
		);

		Ok(())
	}

	/// Builds an authorize URL whose `state` is the encrypted routing context.
	///
	/// When the provider requires PKCE the verifier rides inside the sealed state.
	pub fn get_authorization_url(
		&self,
		provider: &ProviderId,
		tenant: &TenantId,
		user: Option<&UserId>,
		custom_state: Map<String, Value>,
	) -> Result<Url> {
		let registered = self.registered(provider)?;
		let pkce = registered.metadata.pkce_required.then(PkcePair::generate);
		let mut state =
			OAuthState::new(provider.clone(), tenant.clone(), user.cloned(), custom_state)?;

		state.pkce_verifier = pkce.as_ref().map(|pair| pair.verifier.clone());

		let sealed = self.seal_state(&state)?;
		let url = oauth::authorization_url(
			&registered.metadata,
			&registered.app,
			Some(&sealed),
			pkce.as_ref(),
		)?;

		self.logger.debug(
			"Authorization URL issued.",
			json!({
				"provider": provider.as_str(),
				"tenant": tenant.as_str(),
				"pkce": pkce.is_some(),
			}),
		);

		Ok(url)
	}

	/// Encrypts a state payload.
	pub fn seal_state(&self, state: &OAuthState) -> Result<String> {
		state.seal(self.cipher.as_ref())
	}

	/// Decrypts a state payload and enforces the replay window.
	pub fn open_state(&self, sealed: &str) -> Result<OAuthState> {
		let state = OAuthState::open(sealed, self.cipher.as_ref())?;

		state.validate_age(OffsetDateTime::now_utc(), self.context.settings().state_max_age())?;

		Ok(state)
	}

	/// Validates `state`, then exchanges `code` at the provider's token endpoint.
	///
	/// Expired, tampered, or foreign states fail with `AuthenticationError` before any network
	/// call. The tokens are returned, not persisted; callers store them with
	/// [`OAuthManager::save_tokens`] once they have created the integration.
	pub async fn exchange_code_for_tokens(
		&self,
		code: &str,
		state: &str,
	) -> Result<AuthorizationResult> {
		const OP: Operation = Operation::CodeExchange;

		let state = self.open_state(state)?;
		let registered = self.registered(&state.provider_id)?;
		let logger = self
			.logger
			.with_context("provider", state.provider_id.as_str())
			.with_context("tenant", state.tenant_id.as_str());

		obs::record_operation(OP, Outcome::Attempt);

		let result = OperationSpan::new(OP, &state.provider_id)
			.instrument(logger.measure(
				OP.as_str(),
				registered
					.endpoint
					.exchange_code(code, state.pkce_verifier.as_ref().map(TokenSecret::expose)),
			))
			.await;

		obs::record_operation(OP, Outcome::of(&result));

		Ok(AuthorizationResult {
			tokens: result?,
			provider: state.provider_id,
			tenant: state.tenant_id,
			user: state.user_id,
			custom: state.custom,
		})
	}

	/// Encrypts and persists `tokens` for `integration`.
	///
	/// The record is always rewritten so freshness timestamps stay accurate; refresh
	/// bookkeeping from an earlier record is carried over.
	pub async fn save_tokens(
		&self,
		integration: &IntegrationId,
		tokens: &OAuth2Tokens,
	) -> Result<()> {
		let previous = self.store.load_tokens(integration).await?;
		let (refresh_count, last_refreshed) = previous
			.map(|record| (record.refresh_count, record.last_refreshed))
			.unwrap_or_default();

		self.persist(integration, tokens, refresh_count, last_refreshed).await
	}

	/// Decrypts the stored token set, if any.
	pub async fn load_tokens(&self, integration: &IntegrationId) -> Result<Option<OAuth2Tokens>> {
		match self.store.load_tokens(integration).await? {
			Some(record) => self.open_record(&record).map(Some),
			None => Ok(None),
		}
	}

	/// Access token valid beyond the refresh margin, refreshing it first when needed.
	///
	/// Decrypted tokens are cached in memory per integration.
	pub async fn valid_access_token(&self, integration: &IntegrationId) -> Result<OAuth2Tokens> {
		let margin = self.context.refresh_margin();
		let is_fresh =
			|tokens: &OAuth2Tokens| !tokens.needs_refresh_at(OffsetDateTime::now_utc(), margin);

		if let Some(tokens) = self.access_cache.lock().get(integration).filter(|t| is_fresh(t)) {
			return Ok(tokens.clone());
		}

		let record = self.stored_record(integration).await?;
		let tokens = self.open_record(&record)?;

		if is_fresh(&tokens) {
			self.access_cache.lock().insert(integration.clone(), tokens.clone());

			return Ok(tokens);
		}

		self.refresh_unless_rotated(integration, record.refresh_count).await
	}

	/// Hard-deletes the stored token record and drops cached tokens.
	pub async fn revoke_tokens(&self, integration: &IntegrationId) -> Result<()> {
		const OP: Operation = Operation::TokenRevoke;

		obs::record_operation(OP, Outcome::Attempt);

		let result = self.store.delete_tokens(integration).await.map_err(Error::from);

		self.access_cache.lock().remove(integration);
		self.drop_refresh_guard(integration);
		obs::record_operation(OP, Outcome::of(&result));

		let existed = result?;

		self.logger.info(
			"OAuth tokens revoked.",
			json!({ "integration": integration.as_str(), "existed": existed }),
		);

		Ok(())
	}

	fn registered(&self, provider: &ProviderId) -> Result<Arc<RegisteredProvider>> {
		self.providers
			.read()
			.get(provider)
			.cloned()
			.ok_or_else(|| Error::provider_not_found(provider))
	}

	async fn persist(
		&self,
		integration: &IntegrationId,
		tokens: &OAuth2Tokens,
		refresh_count: u64,
		last_refreshed: Option<OffsetDateTime>,
	) -> Result<()> {
		let cipher = self.cipher.as_ref();
		let record = StoredTokenRecord {
			integration_id: integration.clone(),
			access_token: cipher.encrypt_str(tokens.access_token.expose())?,
			refresh_token: tokens
				.refresh_token
				.as_ref()
				.map(|secret| cipher.encrypt_str(secret.expose()))
				.transpose()?,
			token_type: tokens.token_type.clone(),
			expires_at: tokens.expires_at,
			scopes: tokens.scopes.clone(),
			last_refreshed,
			refresh_count,
		};

		self.store.save_tokens(record).await?;
		self.access_cache.lock().insert(integration.clone(), tokens.clone());

		Ok(())
	}

	fn open_record(&self, record: &StoredTokenRecord) -> Result<OAuth2Tokens> {
		let cipher = self.cipher.as_ref();
		let mut builder = OAuth2Tokens::builder(cipher.decrypt_string(&record.access_token)?)
			.token_type(record.token_type.clone())
			.expires_at(record.expires_at)
			.scopes(record.scopes.clone());

		if let Some(refresh) = &record.refresh_token {
			builder = builder.refresh_token(cipher.decrypt_string(refresh)?);
		}

		Ok(builder.build()?)
	}
}
impl Debug for OAuthManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthManager")
			.field("providers", &self.providers.read().keys().collect::<Vec<_>>())
			.field("refresh_metrics", &self.refresh_metrics)
			.finish_non_exhaustive()
	}
}
