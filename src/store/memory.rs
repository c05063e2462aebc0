//! Thread-safe in-memory [`TokenPersistence`] for local development and tests.

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, TokenRecord},
	store::{StoreError, StoreFuture, TokenPersistence},
};

type StoreMap = Arc<RwLock<HashMap<CredentialKey, TokenRecord>>>;

/// Process-local backend; clones share the same map, which makes it a stand-in for an external
/// store shared by several caches.
#[derive(Clone, Debug, Default)]
pub struct MemoryPersistence {
	map: StoreMap,
	saves: Arc<AtomicUsize>,
}
impl MemoryPersistence {
	/// Returns the stored record for `key`, bypassing any cache.
	pub fn snapshot(&self, key: &CredentialKey) -> Option<TokenRecord> {
		self.map.read().get(key).cloned()
	}

	/// Seeds `record` directly, as if another process had written it.
	pub fn seed(&self, key: CredentialKey, record: TokenRecord) {
		self.map.write().insert(key, record);
	}

	/// Number of save hook invocations (writes and deletions).
	pub fn save_count(&self) -> usize {
		self.saves.load(Ordering::Relaxed)
	}

	fn save_now(&self, key: &CredentialKey, record: Option<&TokenRecord>) {
		let mut map = self.map.write();

		match record {
			Some(record) => map.insert(key.clone(), record.clone()),
			None => map.remove(key),
		};

		self.saves.fetch_add(1, Ordering::Relaxed);
	}
}
impl TokenPersistence for MemoryPersistence {
	fn load<'a>(&'a self, key: &'a CredentialKey) -> StoreFuture<'a, Option<TokenRecord>> {
		let record = self.snapshot(key);

		Box::pin(async move { Ok::<_, StoreError>(record) })
	}

	fn save<'a>(
		&'a self,
		key: &'a CredentialKey,
		record: Option<&'a TokenRecord>,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.save_now(key, record);

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::TokenCache;

	#[tokio::test]
	async fn caches_sharing_a_backend_see_each_others_tokens() {
		let backend = MemoryPersistence::default();
		let writer = TokenCache::new().with_persistence(Arc::new(backend.clone()));
		let reader = TokenCache::new().with_persistence(Arc::new(backend.clone()));
		let key = CredentialKey::derive(Some("alice"), Some("pw1"));
		let record = TokenRecord::builder()
			.access_token("t1")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Fixture record should build.");

		writer.set(&key, record.clone()).await;

		assert_eq!(backend.snapshot(&key), Some(record.clone()));
		assert_eq!(reader.get(&key).await, Some(record));

		writer.clear(&key).await;

		assert!(backend.snapshot(&key).is_none());
		assert_eq!(backend.save_count(), 2);
	}
}
