//! Thread-safe in-memory [`CredentialStore`] for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::IntegrationId,
	provider::IntegrationConfig,
	store::{CredentialStore, StoreError, StoreFuture, StoredTokenRecord},
};

#[derive(Debug, Default)]
struct Tables {
	integrations: HashMap<IntegrationId, IntegrationConfig>,
	tokens: HashMap<IntegrationId, StoredTokenRecord>,
}

/// Storage backend that keeps records in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Tables>>);
impl MemoryStore {
	/// Number of stored token records.
	pub fn token_count(&self) -> usize {
		self.0.read().tokens.len()
	}

	fn ready<'a, T>(value: T) -> StoreFuture<'a, T>
	where
		T: 'a + Send,
	{
		Box::pin(async move { Ok::<_, StoreError>(value) })
	}
}
impl CredentialStore for MemoryStore {
	fn save_integration(&self, config: IntegrationConfig) -> StoreFuture<'_, ()> {
		self.0.write().integrations.insert(config.id.clone(), config);

		Self::ready(())
	}

	fn load_integration<'a>(
		&'a self,
		integration: &'a IntegrationId,
	) -> StoreFuture<'a, Option<IntegrationConfig>> {
		Self::ready(self.0.read().integrations.get(integration).cloned())
	}

	fn save_tokens(&self, record: StoredTokenRecord) -> StoreFuture<'_, ()> {
		self.0.write().tokens.insert(record.integration_id.clone(), record);

		Self::ready(())
	}

	fn load_tokens<'a>(
		&'a self,
		integration: &'a IntegrationId,
	) -> StoreFuture<'a, Option<StoredTokenRecord>> {
		Self::ready(self.0.read().tokens.get(integration).cloned())
	}

	fn delete_tokens<'a>(&'a self, integration: &'a IntegrationId) -> StoreFuture<'a, bool> {
		Self::ready(self.0.write().tokens.remove(integration).is_some())
	}
}
