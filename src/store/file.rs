//! File-backed [`TokenPersistence`] for single-host deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, TokenRecord},
	store::{StoreError, StoreFuture, TokenPersistence},
};

/// Persists token records to a JSON snapshot after each mutation.
///
/// Entries are keyed by [`CredentialKey`], so the file never contains identities or secrets,
/// only the access/refresh tokens themselves. Protect it like any credential file.
#[derive(Clone, Debug)]
pub struct FilePersistence {
	path: PathBuf,
	inner: Arc<RwLock<HashMap<CredentialKey, TokenRecord>>>,
}
impl FilePersistence {
	/// Opens (or creates) a snapshot at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Path of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<HashMap<CredentialKey, TokenRecord>, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(HashMap::new());
		}

		let entries: Vec<(CredentialKey, TokenRecord)> =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(entries.into_iter().collect())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create snapshot directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(
		&self,
		contents: &HashMap<CredentialKey, TokenRecord>,
	) -> Result<(), StoreError> {
		let snapshot = contents.iter().collect::<Vec<_>>();
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize token snapshot: {e}"),
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

	fn save_now(&self, key: &CredentialKey, record: Option<&TokenRecord>) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		let changed = match record {
			Some(record) => guard.insert(key.clone(), record.clone()).as_ref() != Some(record),
			None => guard.remove(key).is_some(),
		};

		if changed { self.persist_locked(&guard) } else { Ok(()) }
	}
}
impl TokenPersistence for FilePersistence {
	fn load<'a>(&'a self, key: &'a CredentialKey) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move { Ok(self.inner.read().get(key).cloned()) })
	}

	fn save<'a>(
		&'a self,
		key: &'a CredentialKey,
		record: Option<&'a TokenRecord>,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.save_now(key, record) })
	}
}
