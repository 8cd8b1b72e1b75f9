//! Storage contract for installed integrations and their encrypted OAuth credentials.
//!
//! Stores only ever see ciphertext for token values; encryption happens in
//! [`crate::manager::OAuthManager`] before a record is handed over.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{IntegrationId, ScopeSet},
	provider::IntegrationConfig,
};

/// Boxed future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence backend for integrations and token records.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces an integration config.
	fn save_integration(&self, config: IntegrationConfig) -> StoreFuture<'_, ()>;

	/// Fetches an integration config.
	fn load_integration<'a>(
		&'a self,
		integration: &'a IntegrationId,
	) -> StoreFuture<'a, Option<IntegrationConfig>>;

	/// Persists or replaces the token record of `record.integration_id`.
	fn save_tokens(&self, record: StoredTokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the token record of an integration.
	fn load_tokens<'a>(
		&'a self,
		integration: &'a IntegrationId,
	) -> StoreFuture<'a, Option<StoredTokenRecord>>;

	/// Hard-deletes the token record, returning whether one existed.
	fn delete_tokens<'a>(&'a self, integration: &'a IntegrationId) -> StoreFuture<'a, bool>;
}

/// Persisted token set; `access_token` and `refresh_token` hold ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokenRecord {
	/// Owning integration.
	pub integration_id: IntegrationId,
	/// Encrypted access token.
	pub access_token: String,
	/// Encrypted refresh token.
	pub refresh_token: Option<String>,
	/// Token type reported by the provider.
	pub token_type: String,
	/// Absolute expiry of the access token.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Granted scopes.
	pub scopes: ScopeSet,
	/// Last successful refresh.
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_refreshed: Option<OffsetDateTime>,
	/// Number of successful refreshes since the code exchange.
	pub refresh_count: u64,
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Records could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl From<StoreError> for Error {
	fn from(e: StoreError) -> Self {
		match &e {
			StoreError::Serialization { .. } =>
				Error::configuration(format!("Credential store rejected a record: {e}")),
			StoreError::Backend { .. } =>
				Error::api(format!("Credential store is unavailable: {e}"), None, None),
		}
		.with_source(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_error_converts_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let err: Error = store_error.clone().into();

		assert!(matches!(err.kind(), crate::error::ErrorKind::Api { .. }));
		assert!(err.message().contains("database unreachable"));
		assert!(!err.is_retryable());

		let source = StdError::source(&err).expect("Store error should stay attached as source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn token_records_use_camel_case() {
		let record = StoredTokenRecord {
			integration_id: IntegrationId::new("int-1").expect("Integration fixture should be valid."),
			access_token: "sealed-access".into(),
			refresh_token: None,
			token_type: "Bearer".into(),
			expires_at: time::macros::datetime!(2030-01-01 00:00 UTC),
			scopes: ScopeSet::new(["calendar.read"]).expect("Scope fixture should be valid."),
			last_refreshed: None,
			refresh_count: 2,
		};
		let json = serde_json::to_value(&record).expect("Record should serialize.");

		assert_eq!(json["integrationId"], "int-1");
		assert_eq!(json["expiresAt"], "2030-01-01T00:00:00Z");
		assert_eq!(json["refreshCount"], 2);
		assert!(json["lastRefreshed"].is_null());
	}
}
