//! File-backed [`CredentialStore`] for single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::IntegrationId,
	provider::IntegrationConfig,
	store::{CredentialStore, StoreError, StoreFuture, StoredTokenRecord},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
	integrations: BTreeMap<IntegrationId, IntegrationConfig>,
	tokens: BTreeMap<IntegrationId, StoredTokenRecord>,
}

/// Persists every record to one JSON file after each mutation.
///
/// Writes go to a sibling `.tmp` file that is synced and renamed over the snapshot, so readers
/// never observe a partially written file.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at `path`, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Snapshot location.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(Snapshot::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn mutate<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let out = f(&mut guard);

		self.persist_locked(&guard)?;

		Ok(out)
	}
}
impl CredentialStore for FileStore {
	fn save_integration(&self, config: IntegrationConfig) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.integrations.insert(config.id.clone(), config);
			})
		})
	}

	fn load_integration<'a>(
		&'a self,
		integration: &'a IntegrationId,
	) -> StoreFuture<'a, Option<IntegrationConfig>> {
		Box::pin(async move { Ok(self.inner.read().integrations.get(integration).cloned()) })
	}

	fn save_tokens(&self, record: StoredTokenRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.tokens.insert(record.integration_id.clone(), record);
			})
		})
	}

	fn load_tokens<'a>(
		&'a self,
		integration: &'a IntegrationId,
	) -> StoreFuture<'a, Option<StoredTokenRecord>> {
		Box::pin(async move { Ok(self.inner.read().tokens.get(integration).cloned()) })
	}

	fn delete_tokens<'a>(&'a self, integration: &'a IntegrationId) -> StoreFuture<'a, bool> {
		Box::pin(async move { self.mutate(|snapshot| snapshot.tokens.remove(integration).is_some()) })
	}
}
