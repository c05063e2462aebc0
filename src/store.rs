//! Concurrency-safe token cache with pluggable persistence hooks.
//!
//! [`TokenCache`] is the only shared mutable state of the crate. Build one per service (or per
//! vendor) and hand the same `Arc` to every [`SessionManager`](crate::session::SessionManager)
//! that should share cached tokens and single-flight coordination.

pub mod file;
pub mod memory;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;

// crates.io
use tokio::time::timeout;
// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, ExpiryPolicy, TokenRecord, TokenSecret},
	clock::{Clock, SystemClock},
	session::single_flight::SingleFlight,
};

/// Boxed future returned by [`TokenPersistence`] hooks.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable backing for a [`TokenCache`] (database row, distributed cache, file, ...).
///
/// Both hooks are best effort: failures and hooks running past
/// [`TokenCache::with_hook_timeout`] are logged by the cache and never reach the caller's
/// request flow.
pub trait TokenPersistence
where
	Self: Send + Sync,
{
	/// Loads the record stored under `key`; invoked on a cache miss.
	fn load<'a>(&'a self, key: &'a CredentialKey) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Stores `record` under `key`, or deletes the entry when `record` is `None`.
	fn save<'a>(
		&'a self,
		key: &'a CredentialKey,
		record: Option<&'a TokenRecord>,
	) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`TokenPersistence`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures (e.g., serde) surfaced by the backend.
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

/// Result of a cache lookup that keeps stale records for refresh exchanges.
#[derive(Clone, Debug)]
pub(crate) enum Lookup {
	/// Record passes the expiry policy.
	Fresh(TokenRecord),
	/// Record failed the expiry policy and was evicted; its refresh token may still work.
	Stale(TokenRecord),
	/// Nothing cached or persisted.
	Miss,
}

/// Shared token cache keyed by [`CredentialKey`].
///
/// Reads take a shared lock on the record map; writes for one key are serialized through a
/// per-key async mutex that is held across the persistence hook, so the cache and the backend
/// observe the same write order. The non-cacheable sentinel key is never stored.
pub struct TokenCache {
	entries: RwLock<HashMap<CredentialKey, TokenRecord>>,
	write_guards: Mutex<HashMap<CredentialKey, Arc<AsyncMutex<()>>>>,
	persistence: Option<Arc<dyn TokenPersistence>>,
	clock: Arc<dyn Clock>,
	expiry: ExpiryPolicy,
	hook_timeout: StdDuration,
	flights: SingleFlight,
}
impl TokenCache {
	/// Default bound for a single load or save hook call.
	pub const DEFAULT_HOOK_TIMEOUT: StdDuration = StdDuration::from_secs(5);

	/// Creates an in-memory cache using the system clock and the default expiry policy.
	pub fn new() -> Self {
		Self {
			entries: Default::default(),
			write_guards: Default::default(),
			persistence: None,
			clock: Arc::new(SystemClock),
			expiry: ExpiryPolicy::default(),
			hook_timeout: Self::DEFAULT_HOOK_TIMEOUT,
			flights: SingleFlight::default(),
		}
	}

	/// Replaces the clock used for expiry decisions.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Replaces the expiry policy applied by [`TokenCache::get`].
	pub fn with_expiry_policy(mut self, expiry: ExpiryPolicy) -> Self {
		self.expiry = expiry;

		self
	}

	/// Attaches load/save persistence hooks.
	pub fn with_persistence(mut self, persistence: Arc<dyn TokenPersistence>) -> Self {
		self.persistence = Some(persistence);

		self
	}

	/// Bounds each persistence hook call; a hook running longer is treated as failed.
	pub fn with_hook_timeout(mut self, hook_timeout: StdDuration) -> Self {
		self.hook_timeout = hook_timeout;

		self
	}

	/// Returns the clock used for expiry decisions.
	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	/// Returns the expiry policy.
	pub fn expiry_policy(&self) -> ExpiryPolicy {
		self.expiry
	}

	/// Current instant according to the cache clock.
	pub fn now(&self) -> OffsetDateTime {
		self.clock.now()
	}

	/// Returns a valid record for `key`, loading it through the persistence hook on a miss.
	///
	/// Records failing the expiry policy are evicted and reported as absent.
	pub async fn get(&self, key: &CredentialKey) -> Option<TokenRecord> {
		match self.lookup(key).await {
			Lookup::Fresh(record) => Some(record),
			Lookup::Stale(_) | Lookup::Miss => None,
		}
	}

	/// Stores `record` under `key` and forwards it to the save hook.
	///
	/// Records already past their hard expiry are dropped instead of being written.
	pub async fn set(&self, key: &CredentialKey, record: TokenRecord) {
		if self.insert(key, record.clone()) {
			self.persist_current(key, &record).await;
		}
	}

	/// Evicts the record for `key` and forwards the deletion to the save hook.
	pub async fn clear(&self, key: &CredentialKey) {
		if !key.is_cacheable() {
			return;
		}

		let guard = self.write_guard(key);
		let _write = guard.lock().await;

		self.entries.write().remove(key);
		self.persist(key, None).await;
	}

	/// Evicts the record for `key` only if it still carries `stale`.
	///
	/// Returns `false` when another caller already replaced the token, in which case the newer
	/// record is kept.
	pub async fn clear_if(&self, key: &CredentialKey, stale: &TokenSecret) -> bool {
		if !key.is_cacheable() {
			return false;
		}

		let guard = self.write_guard(key);
		let _write = guard.lock().await;
		let removed = Self::remove_matching(&self.entries, key, stale);

		match removed {
			// Replaced by a newer token; leave both the map and the backend alone.
			Some(false) => false,
			// Removed here, or only present in the backend.
			Some(true) | None => {
				self.persist(key, None).await;

				true
			},
		}
	}

	/// Evicts every in-memory record. Persistence backends are left untouched.
	pub fn clear_all(&self) {
		self.entries.write().clear();
	}

	/// Number of records held in memory.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns `true` when no record is held in memory.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	pub(crate) fn flights(&self) -> &SingleFlight {
		&self.flights
	}

	/// Stores `record` in memory only; returns `false` when it was refused.
	pub(crate) fn insert(&self, key: &CredentialKey, record: TokenRecord) -> bool {
		if !key.is_cacheable() {
			return false;
		}
		if record.is_expired_at(self.now()) {
			tracing::warn!(key = %key, "Refusing to cache a token that is already expired.");

			return false;
		}

		self.entries.write().insert(key.clone(), record);

		true
	}

	/// Forwards `record` to the save hook if it is still the cached token for `key`.
	///
	/// Runs under the key's write guard, so the backend never ends up behind a newer write or
	/// a clear that happened after [`TokenCache::insert`].
	pub(crate) async fn persist_current(&self, key: &CredentialKey, record: &TokenRecord) {
		if self.persistence.is_none() {
			return;
		}

		let guard = self.write_guard(key);
		let _write = guard.lock().await;
		let current = self.entries.read().get(key).is_some_and(|cached| cached.same_token(record));

		if current {
			self.persist(key, Some(record)).await;
		}
	}

	pub(crate) async fn lookup(&self, key: &CredentialKey) -> Lookup {
		if !key.is_cacheable() {
			return Lookup::Miss;
		}

		let cached = self.entries.read().get(key).cloned();

		if let Some(record) = cached {
			if self.expiry.is_valid(&record, self.now()) {
				return Lookup::Fresh(record);
			}

			self.evict_if_unchanged(key, &record).await;

			return Lookup::Stale(record);
		}

		self.load(key).await
	}

	async fn load(&self, key: &CredentialKey) -> Lookup {
		let Some(persistence) = self.persistence.as_ref() else {
			return Lookup::Miss;
		};
		let loaded = match timeout(self.hook_timeout, persistence.load(key)).await {
			Ok(Ok(Some(record))) => record,
			Ok(Ok(None)) => return Lookup::Miss,
			Ok(Err(e)) => {
				tracing::warn!(key = %key, error = %e, "Token load hook failed; treating as a miss.");

				return Lookup::Miss;
			},
			Err(_) => {
				tracing::warn!(
					key = %key,
					timeout_ms = self.hook_timeout.as_millis() as u64,
					"Token load hook timed out; treating as a miss."
				);

				return Lookup::Miss;
			},
		};

		if !self.expiry.is_valid(&loaded, self.now()) {
			let guard = self.write_guard(key);
			let _write = guard.lock().await;

			self.persist(key, None).await;

			return Lookup::Stale(loaded);
		}

		let guard = self.write_guard(key);
		let _write = guard.lock().await;
		let record = self.entries.write().entry(key.clone()).or_insert(loaded).clone();

		tracing::debug!(key = %key, "Token restored from persistence.");

		Lookup::Fresh(record)
	}

	async fn evict_if_unchanged(&self, key: &CredentialKey, observed: &TokenRecord) {
		let guard = self.write_guard(key);
		let _write = guard.lock().await;
		let removed = Self::remove_matching(&self.entries, key, &observed.access_token);

		if removed == Some(true) {
			tracing::debug!(key = %key, "Evicted a token that failed the expiry policy.");

			self.persist(key, None).await;
		}
	}

	async fn persist(&self, key: &CredentialKey, record: Option<&TokenRecord>) {
		let Some(persistence) = self.persistence.as_ref() else {
			return;
		};

		match timeout(self.hook_timeout, persistence.save(key, record)).await {
			Ok(Ok(())) => {},
			Ok(Err(e)) => {
				tracing::warn!(key = %key, error = %e, "Token save hook failed; continuing without it.");
			},
			Err(_) => {
				tracing::warn!(
					key = %key,
					timeout_ms = self.hook_timeout.as_millis() as u64,
					"Token save hook timed out; continuing without it."
				);
			},
		}
	}

	fn write_guard(&self, key: &CredentialKey) -> Arc<AsyncMutex<()>> {
		self.write_guards.lock().entry(key.clone()).or_default().clone()
	}

	// `None` when absent, `Some(removed)` when present.
	fn remove_matching(
		entries: &RwLock<HashMap<CredentialKey, TokenRecord>>,
		key: &CredentialKey,
		token: &TokenSecret,
	) -> Option<bool> {
		let mut entries = entries.write();
		let matches = entries.get(key).map(|current| &current.access_token == token)?;

		if matches {
			entries.remove(key);
		}

		Some(matches)
	}
}
impl Default for TokenCache {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache")
			.field("entries", &self.len())
			.field("persistent", &self.persistence.is_some())
			.field("expiry", &self.expiry)
			.field("hook_timeout", &self.hook_timeout)
			.finish()
	}
}
