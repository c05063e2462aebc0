//! Session manager: token acquisition, single-flight renewal, and invalidation.
//!
//! A [`SessionManager`] binds one credential pair (or one static token) to a shared
//! [`TokenCache`]. Per credential key it walks the state machine
//! `NoToken -> Authenticating -> Valid -> ExpiringSoon -> Refreshing -> Valid`; while an
//! exchange is in flight every other caller for the same key, in any manager sharing the
//! cache, awaits that exchange instead of starting its own.

pub mod authenticator;
pub mod endpoint;
pub(crate) mod single_flight;

mod metrics;

pub use authenticator::*;
pub use endpoint::*;
pub use metrics::SessionMetrics;

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, Credentials, TokenRecord, TokenSecret},
	context::RequestContext,
	error::ConfigError,
	obs::{self, Op},
	retry::{self, RetryPolicy},
	session::single_flight::Role,
	store::{Lookup, TokenCache},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Renewal {
	/// Re-check the cache as leader, then refresh or log in.
	Ensure,
	/// Skip the cache, then refresh or log in.
	Refresh,
	/// Skip the cache and log in with the bound credentials.
	Login,
}

#[derive(Default)]
struct SessionState {
	credentials: Option<Credentials>,
	key: CredentialKey,
	// Last record seen for `key`; may be stale and still carry a usable refresh token.
	current: Option<TokenRecord>,
	fixed: Option<TokenRecord>,
}

/// Per-adapter session over a shared [`TokenCache`].
pub struct SessionManager {
	cache: Arc<TokenCache>,
	authenticator: Option<Arc<dyn Authenticator>>,
	retry: RetryPolicy,
	state: Mutex<SessionState>,
	metrics: SessionMetrics,
}
impl SessionManager {
	/// Creates a session that logs in through `authenticator`.
	///
	/// Bind credentials with [`SessionManager::with_credentials`] or
	/// [`SessionManager::authenticate`].
	pub fn new(cache: Arc<TokenCache>, authenticator: Arc<dyn Authenticator>) -> Self {
		Self {
			cache,
			authenticator: Some(authenticator),
			retry: RetryPolicy::default(),
			state: Mutex::new(SessionState::default()),
			metrics: SessionMetrics::default(),
		}
	}

	/// Creates a session around a pre-shared token with no identity/secret behind it.
	///
	/// The token never touches the shared cache and cannot be renewed; a vendor rejection is
	/// final.
	pub fn with_static_token(cache: Arc<TokenCache>, token: impl Into<String>) -> Self {
		let fixed = TokenRecord::unbounded(token, cache.now());
		let state = SessionState { fixed: Some(fixed), ..Default::default() };

		Self {
			cache,
			authenticator: None,
			retry: RetryPolicy::default(),
			state: Mutex::new(state),
			metrics: SessionMetrics::default(),
		}
	}

	/// Binds the identity/secret pair used for logins.
	pub fn with_credentials(self, identity: impl AsRef<str>, secret: impl AsRef<str>) -> Self {
		self.bind(Credentials::new(identity, secret));

		self
	}

	/// Replaces the retry policy applied to login and refresh exchanges.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Returns the credential key currently bound (the sentinel for static sessions).
	pub fn key(&self) -> CredentialKey {
		self.state.lock().key.clone()
	}

	/// Returns the shared cache.
	pub fn cache(&self) -> &Arc<TokenCache> {
		&self.cache
	}

	/// Returns the session counters.
	pub fn metrics(&self) -> &SessionMetrics {
		&self.metrics
	}

	/// Returns `true` for sessions built from a static token.
	pub fn is_static(&self) -> bool {
		self.state.lock().fixed.is_some()
	}

	/// Returns `true` when a rejected token can be replaced by a new exchange.
	pub fn can_reauthenticate(&self) -> bool {
		let state = self.state.lock();

		state.fixed.is_none() && state.key.is_cacheable() && self.authenticator.is_some()
	}

	/// Returns a currently valid token, authenticating or refreshing when needed.
	///
	/// Concurrent callers for the same credential key share one exchange and its outcome.
	pub async fn ensure_token(&self, ctx: &RequestContext) -> Result<TokenRecord> {
		obs::observe(Op::EnsureToken, "ensure_token", async {
			let (key, fixed) = self.binding();

			if let Some(fixed) = fixed {
				return Ok(fixed);
			}
			if !key.is_cacheable() {
				return Err(self.unbound_error());
			}

			match self.lookup(ctx, &key).await? {
				Lookup::Fresh(record) => {
					self.remember(&key, record.clone());

					return Ok(record);
				},
				Lookup::Stale(record) => self.remember(&key, record),
				Lookup::Miss => {},
			}

			self.renew(ctx, &key, Renewal::Ensure).await
		})
		.await
	}

	/// Logs in with `identity`/`secret`, rebinding the session to that pair.
	///
	/// Blank inputs are rejected with [`Error::Client`] (status 400) before any network call.
	pub async fn authenticate(
		&self,
		ctx: &RequestContext,
		identity: impl AsRef<str>,
		secret: impl AsRef<str>,
	) -> Result<TokenRecord> {
		let credentials = Credentials::new(identity, secret);

		obs::observe(Op::Authenticate, "authenticate", async move {
			credentials.validate()?;

			let key = credentials.key();

			self.bind(credentials);
			self.renew(ctx, &key, Renewal::Login).await
		})
		.await
	}

	/// Obtains a new access token, preferring the refresh token when the vendor supports one.
	///
	/// A rejected refresh falls back to one full login with the bound credentials.
	pub async fn refresh(&self, ctx: &RequestContext) -> Result<TokenRecord> {
		obs::observe(Op::Refresh, "refresh", async {
			let (key, fixed) = self.binding();

			if fixed.is_some() {
				return Err(Error::authentication("Static tokens cannot be refreshed"));
			}
			if !key.is_cacheable() {
				return Err(self.unbound_error());
			}

			self.renew(ctx, &key, Renewal::Refresh).await
		})
		.await
	}

	/// Evicts the cached token for this session and clears local state.
	pub async fn invalidate(&self, ctx: &RequestContext) -> Result<()> {
		obs::observe(Op::Invalidate, "invalidate", async {
			let key = {
				let mut state = self.state.lock();

				state.current = None;

				state.key.clone()
			};

			self.metrics.record_invalidation();
			ctx.run(async {
				self.cache.clear(&key).await;

				Ok(())
			})
			.await
		})
		.await
	}

	/// Evicts the cached token only if it is still `stale`, keeping tokens minted meanwhile by
	/// concurrent callers.
	pub(crate) async fn invalidate_if_current(
		&self,
		ctx: &RequestContext,
		stale: &TokenSecret,
	) -> Result<()> {
		obs::observe(Op::Invalidate, "invalidate_if_current", async {
			let key = {
				let mut state = self.state.lock();

				if state.current.as_ref().is_some_and(|record| &record.access_token == stale) {
					state.current = None;
				}

				state.key.clone()
			};

			if !key.is_cacheable() {
				return Ok(());
			}

			self.metrics.record_invalidation();
			ctx.run(async {
				if !self.cache.clear_if(&key, stale).await {
					tracing::debug!(key = %key, "Token was already replaced; keeping the newer one.");
				}

				Ok(())
			})
			.await
		})
		.await
	}

	async fn renew(
		&self,
		ctx: &RequestContext,
		key: &CredentialKey,
		mode: Renewal,
	) -> Result<TokenRecord> {
		let leader = match self.cache.flights().join(key) {
			Role::Leader(leader) => leader,
			Role::Follower(rx) => {
				self.metrics.record_join();
				tracing::debug!(key = %key, "Awaiting an in-flight token exchange.");

				let record = ctx.run(single_flight::wait(rx)).await?;

				self.remember(key, record.clone());

				return Ok(record);
			},
		};

		if mode == Renewal::Ensure {
			// Another flight may have completed between our lookup and `join`.
			match self.lookup(ctx, key).await? {
				Lookup::Fresh(record) => {
					self.remember(key, record.clone());
					leader.complete(&Ok(record.clone()));

					return Ok(record);
				},
				Lookup::Stale(record) => self.remember(key, record),
				Lookup::Miss => {},
			}
		}

		let outcome = self.exchange(ctx, key, mode).await;

		match &outcome {
			Ok(record) => {
				self.cache.insert(key, record.clone());
				self.remember(key, record.clone());
			},
			Err(e) => {
				self.metrics.record_failure();
				self.forget(key);
				tracing::warn!(key = %key, error = %e, "Token exchange failed.");
			},
		}

		// Followers get the token before the save hook runs.
		leader.complete(&outcome);

		let record = outcome?;
		let persisted = ctx
			.run(async {
				self.cache.persist_current(key, &record).await;

				Ok(())
			})
			.await;

		if let Err(e) = persisted {
			tracing::warn!(
				key = %key,
				error = %e,
				"Token save hook abandoned; the token stays cached in memory."
			);
		}

		Ok(record)
	}

	async fn lookup(&self, ctx: &RequestContext, key: &CredentialKey) -> Result<Lookup> {
		ctx.run(async { Ok(self.cache.lookup(key).await) }).await
	}

	async fn exchange(
		&self,
		ctx: &RequestContext,
		key: &CredentialKey,
		mode: Renewal,
	) -> Result<TokenRecord> {
		let authenticator = self.authenticator.clone().ok_or(ConfigError::MissingAuthenticator)?;
		let (credentials, refresh_token) = {
			let state = self.state.lock();
			let refresh_token = state.current.as_ref().and_then(|record| record.refresh_token.clone());

			(state.credentials.clone(), refresh_token)
		};
		let refresh_token = refresh_token
			.filter(|_| mode != Renewal::Login && authenticator.supports_refresh());

		if let Some(refresh_token) = refresh_token {
			match self.refresh_with(ctx, authenticator.as_ref(), &refresh_token).await {
				Ok(record) => return Ok(record),
				Err(e @ (Error::Authentication { .. } | Error::Client { .. }))
					if credentials.is_some() =>
				{
					tracing::warn!(
						key = %key,
						error = %e,
						"Refresh token rejected; falling back to a full login."
					);
				},
				Err(e) => return Err(e),
			}
		}

		let credentials = credentials
			.ok_or_else(|| Error::authentication("No credentials are bound to this session"))?;

		self.login_with(ctx, authenticator.as_ref(), &credentials).await
	}

	async fn login_with(
		&self,
		ctx: &RequestContext,
		authenticator: &dyn Authenticator,
		credentials: &Credentials,
	) -> Result<TokenRecord> {
		let grant = retry::run(&self.retry, ctx, "authenticate", move |_| {
			authenticator.authenticate(ctx, credentials)
		})
		.await?;
		let record = grant.into_record(self.cache.now())?;

		self.metrics.record_authentication();

		Ok(record)
	}

	async fn refresh_with(
		&self,
		ctx: &RequestContext,
		authenticator: &dyn Authenticator,
		refresh_token: &TokenSecret,
	) -> Result<TokenRecord> {
		let grant = retry::run(&self.retry, ctx, "refresh", move |_| {
			authenticator.refresh(ctx, refresh_token)
		})
		.await?;
		let mut record = grant.into_record(self.cache.now())?;

		// Vendors that do not rotate refresh tokens keep accepting the old one.
		if record.refresh_token.is_none() {
			record.refresh_token = Some(refresh_token.clone());
		}

		self.metrics.record_refresh();

		Ok(record)
	}

	fn binding(&self) -> (CredentialKey, Option<TokenRecord>) {
		let state = self.state.lock();

		(state.key.clone(), state.fixed.clone())
	}

	fn bind(&self, credentials: Credentials) {
		let key = credentials.key();
		let mut state = self.state.lock();

		if state.key != key {
			state.current = None;
		}

		state.key = key;
		state.credentials = Some(credentials);
		state.fixed = None;
	}

	fn remember(&self, key: &CredentialKey, record: TokenRecord) {
		let mut state = self.state.lock();

		if &state.key == key {
			state.current = Some(record);
		}
	}

	fn forget(&self, key: &CredentialKey) {
		let mut state = self.state.lock();

		if &state.key == key {
			state.current = None;
		}
	}

	fn unbound_error(&self) -> Error {
		let credentials = self.state.lock().credentials.clone();

		match credentials.map(|credentials| credentials.validate()) {
			Some(Err(e)) => e,
			_ => Error::authentication("No credentials are bound to this session"),
		}
	}
}
impl Debug for SessionManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("SessionManager")
			.field("key", &state.key)
			.field("static", &state.fixed.is_some())
			.field("has_token", &state.current.is_some())
			.field("retry", &self.retry)
			.finish()
	}
}
