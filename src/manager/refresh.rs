//! Refresh-token rotation with per-integration singleflight guards.
//!
//! Callers carry the `refresh_count` of the record they judged stale into the integration's
//! guard. A caller that finds the count moved once it holds the guard knows another task already
//! refreshed and returns that result instead of spending the refresh token a second time, which
//! matters for providers that rotate and invalidate refresh tokens.

// crates.io
use serde_json::json;
// self
use crate::{
	_prelude::*,
	auth::{IntegrationId, OAuth2Tokens, TokenSecret},
	manager::OAuthManager,
	obs::{self, Operation, OperationSpan, Outcome},
	store::StoredTokenRecord,
};

impl OAuthManager {
	/// Refreshes the stored token set of `integration` and persists the result.
	///
	/// Increments the record's `refresh_count` and stamps `last_refreshed`. Rejections surface as
	/// `TokenRefreshError` and are not retried.
	pub async fn refresh_access_token(&self, integration: &IntegrationId) -> Result<OAuth2Tokens> {
		let observed = self.stored_record(integration).await?.refresh_count;

		self.refresh_unless_rotated(integration, observed).await
	}

	/// Refreshes `integration` unless its record moved past `observed` refreshes meanwhile, in
	/// which case the stored token set is returned as is.
	pub(super) async fn refresh_unless_rotated(
		&self,
		integration: &IntegrationId,
		observed: u64,
	) -> Result<OAuth2Tokens> {
		const OP: Operation = Operation::TokenRefresh;

		let guard = self.refresh_guard(integration);
		let _singleflight = guard.lock().await;
		let current = self.stored_record(integration).await?;

		if current.refresh_count != observed {
			return self.open_record(&current);
		}

		let config = self
			.store
			.load_integration(integration)
			.await?
			.ok_or_else(|| Error::integration_not_found(integration))?;
		let registered = self.registered(&config.provider)?;
		let refresh_token = current
			.refresh_token
			.as_deref()
			.map(|sealed| self.cipher.decrypt_string(sealed).map(TokenSecret::new))
			.transpose()?
			.ok_or_else(|| {
				Error::token_refresh("No refresh token is stored for this integration.")
					.with_provider(config.provider.clone())
			})?;
		let logger = self
			.logger
			.with_context("provider", config.provider.as_str())
			.with_context("integration", integration.as_str())
			.with_context("tenant", config.tenant.as_str());

		obs::record_operation(OP, Outcome::Attempt);
		self.refresh_metrics.record_attempt();

		let result = OperationSpan::new(OP, &config.provider)
			.instrument(logger.measure(OP.as_str(), registered.endpoint.refresh(&refresh_token)))
			.await;

		obs::record_operation(OP, Outcome::of(&result));
		self.refresh_metrics.record(&result);

		let tokens = result?;
		let refresh_count = current.refresh_count.saturating_add(1);

		self.persist(integration, &tokens, refresh_count, Some(OffsetDateTime::now_utc())).await?;
		logger.debug("Refreshed token set persisted.", json!({ "refresh_count": refresh_count }));

		Ok(tokens)
	}

	pub(super) async fn stored_record(
		&self,
		integration: &IntegrationId,
	) -> Result<StoredTokenRecord> {
		self.store
			.load_tokens(integration)
			.await?
			.ok_or_else(|| Error::integration_not_found(integration))
	}

	pub(super) fn drop_refresh_guard(&self, integration: &IntegrationId) {
		self.refresh_guards.lock().remove(integration);
	}

	fn refresh_guard(&self, integration: &IntegrationId) -> Arc<AsyncMutex<()>> {
		self.refresh_guards
			.lock()
			.entry(integration.clone())
			.or_insert_with(|| Arc::new(AsyncMutex::new(())))
			.clone()
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::build_test_manager, config::IntegrationSettings};

	#[tokio::test]
	async fn revocation_drops_the_refresh_guard() {
		let (manager, _, _) = build_test_manager(IntegrationSettings::default());
		let integration =
			IntegrationId::new("int-guarded").expect("Integration fixture should be valid.");
		let other = IntegrationId::new("int-other").expect("Integration fixture should be valid.");

		manager.refresh_guard(&integration);
		manager.refresh_guard(&other);

		assert_eq!(manager.refresh_guards.lock().len(), 2);

		manager.revoke_tokens(&integration).await.expect("Revocation should succeed.");

		let guards = manager.refresh_guards.lock();

		assert_eq!(guards.len(), 1);
		assert!(guards.contains_key(&other));
	}
}
