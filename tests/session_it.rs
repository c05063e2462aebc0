mod support;

// crates.io
use color_eyre::Result;
// self
use support::*;
use vendor_session::{
	auth::{CredentialKey, ExpiryPolicy, TokenRecord},
	clock::ManualClock,
	retry::RetryPolicy,
	session::SessionManager,
	store::{StoreError, StoreFuture, TokenCache, TokenPersistence},
};

const START: OffsetDateTime = datetime!(2026-03-01 09:00:00 UTC);

fn manual_cache() -> (Arc<TokenCache>, ManualClock) {
	let clock = ManualClock::new(START);
	let cache = TokenCache::new().with_clock(Arc::new(clock.clone()));

	(Arc::new(cache), clock)
}

fn session_for(
	cache: &Arc<TokenCache>,
	authenticator: &Arc<CountingAuthenticator>,
	identity: &str,
	secret: &str,
) -> SessionManager {
	SessionManager::new(cache.clone(), authenticator.clone()).with_credentials(identity, secret)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_login() -> Result<()> {
	let authenticator =
		Arc::new(CountingAuthenticator::new().with_delay(StdDuration::from_millis(50)));
	let cache = Arc::new(TokenCache::new());
	let session = Arc::new(session_for(&cache, &authenticator, "alice", "pw1"));
	let tasks = (0..16)
		.map(|_| {
			let session = session.clone();

			tokio::spawn(async move { session.ensure_token(&RequestContext::new()).await })
		})
		.collect::<Vec<_>>();
	let mut tokens = Vec::new();

	for task in tasks {
		tokens.push(task.await??);
	}

	assert_eq!(authenticator.logins(), 1);
	assert!(tokens.iter().all(|token| token.access_token.expose() == "token-1"));
	assert_eq!(session.metrics().authentications(), 1);

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_failure() {
	let authenticator = Arc::new(
		CountingAuthenticator::new().with_delay(StdDuration::from_millis(50)).rejecting(),
	);
	let cache = Arc::new(TokenCache::new());
	let session = Arc::new(session_for(&cache, &authenticator, "alice", "bad"));
	let tasks = (0..8)
		.map(|_| {
			let session = session.clone();

			tokio::spawn(async move { session.ensure_token(&RequestContext::new()).await })
		})
		.collect::<Vec<_>>();

	for task in tasks {
		let outcome = task.await.expect("Task should not panic.");

		assert!(matches!(outcome, Err(Error::Authentication { status: Some(401), .. })));
	}

	assert_eq!(authenticator.logins(), 1);
	assert!(cache.is_empty());
}

#[tokio::test]
async fn managers_sharing_a_cache_share_the_flight() -> Result<()> {
	let authenticator =
		Arc::new(CountingAuthenticator::new().with_delay(StdDuration::from_millis(20)));
	let cache = Arc::new(TokenCache::new());
	let first = session_for(&cache, &authenticator, "alice", "pw1");
	let second = session_for(&cache, &authenticator, "alice", "pw1");
	let ctx = RequestContext::new();
	let (a, b) = tokio::join!(first.ensure_token(&ctx), second.ensure_token(&ctx));

	assert_eq!(a?.access_token, b?.access_token);
	assert_eq!(authenticator.logins(), 1);
	assert_eq!(first.metrics().joins() + second.metrics().joins(), 1);

	Ok(())
}

#[tokio::test]
async fn tokens_inside_the_buffer_are_renewed() -> Result<()> {
	let (cache, _clock) = manual_cache();
	let authenticator = Arc::new(CountingAuthenticator::new());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let key = session.key();
	let nearly_expired = TokenRecord::builder()
		.access_token("seeded")
		.issued_at(START)
		.expires_at(START + Duration::seconds(200))
		.build()?;

	cache.set(&key, nearly_expired).await;

	assert_eq!(cache.expiry_policy(), ExpiryPolicy::default());
	assert!(cache.get(&key).await.is_none());

	let token = session.ensure_token(&RequestContext::new()).await?;

	assert_eq!(token.access_token.expose(), "token-1");
	assert_eq!(authenticator.logins(), 1);

	Ok(())
}

#[tokio::test]
async fn distinct_credentials_never_share_tokens() -> Result<()> {
	let authenticator = Arc::new(CountingAuthenticator::new());
	let cache = Arc::new(TokenCache::new());
	let ctx = RequestContext::new();
	let alice = session_for(&cache, &authenticator, "alice", "pw1");
	let bob = session_for(&cache, &authenticator, "bob", "pw1");
	let alice_again = session_for(&cache, &authenticator, "alice", "pw1");
	let alice_token = alice.ensure_token(&ctx).await?;
	let bob_token = bob.ensure_token(&ctx).await?;

	assert_ne!(alice.key(), bob.key());
	assert_ne!(alice_token.access_token, bob_token.access_token);
	assert_eq!(alice.key(), alice_again.key());
	assert_eq!(alice_again.ensure_token(&ctx).await?.access_token, alice_token.access_token);
	assert_eq!(authenticator.logins(), 2);
	assert_eq!(cache.len(), 2);

	Ok(())
}

#[tokio::test]
async fn login_then_reuse_until_the_buffer() -> Result<()> {
	let (cache, clock) = manual_cache();
	let authenticator = Arc::new(CountingAuthenticator::new().with_lifetime(Duration::hours(1)));
	let session = SessionManager::new(cache.clone(), authenticator.clone());
	let ctx = RequestContext::new();
	let t1 = session.authenticate(&ctx, "alice", "pw1").await?;

	assert_eq!(t1.expires_at, Some(START + Duration::seconds(3600)));
	assert_eq!(session.ensure_token(&ctx).await?, t1);
	assert_eq!(authenticator.logins(), 1);

	clock.advance(Duration::seconds(3600 - 300 + 1));

	let t2 = session.ensure_token(&ctx).await?;

	assert_ne!(t2.access_token, t1.access_token);
	assert_eq!(authenticator.logins(), 2);
	assert_eq!(session.ensure_token(&ctx).await?, t2);
	assert_eq!(authenticator.logins(), 2);

	Ok(())
}

#[tokio::test]
async fn stale_tokens_refresh_and_fall_back_to_login() -> Result<()> {
	let (cache, clock) = manual_cache();
	let authenticator = Arc::new(CountingAuthenticator::new().with_refresh());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let ctx = RequestContext::new();
	let first = session.ensure_token(&ctx).await?;

	assert_eq!(first.access_token.expose(), "token-1");

	clock.advance(Duration::minutes(58));

	let refreshed = session.ensure_token(&ctx).await?;

	assert_eq!(refreshed.access_token.expose(), "token-1-r1");
	assert_eq!(refreshed.refresh_token, first.refresh_token);
	assert_eq!((authenticator.logins(), authenticator.refreshes()), (1, 1));

	authenticator.reject_refreshes.store(true, Ordering::SeqCst);
	clock.advance(Duration::minutes(58));

	let relogged = session.ensure_token(&ctx).await?;

	assert_eq!(relogged.access_token.expose(), "token-2");
	assert_eq!((authenticator.logins(), authenticator.refreshes()), (2, 2));

	Ok(())
}

#[tokio::test]
async fn rejected_refresh_and_login_fail_once() -> Result<()> {
	let (cache, clock) = manual_cache();
	let authenticator = Arc::new(CountingAuthenticator::new().with_refresh());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let ctx = RequestContext::new();

	session.ensure_token(&ctx).await?;
	clock.advance(Duration::minutes(58));
	authenticator.reject_refreshes.store(true, Ordering::SeqCst);
	authenticator.reject_logins.store(true, Ordering::SeqCst);

	let err = session.ensure_token(&ctx).await.expect_err("Both exchanges were rejected.");

	assert!(matches!(
		err,
		Error::Authentication { ref reason, status: Some(401) } if reason == "invalid credentials"
	));
	assert_eq!((authenticator.logins(), authenticator.refreshes()), (2, 1));
	assert_eq!(session.metrics().failures(), 1);
	assert!(cache.is_empty());

	Ok(())
}

#[tokio::test]
async fn explicit_refresh_bypasses_a_valid_cache_entry() -> Result<()> {
	let authenticator = Arc::new(CountingAuthenticator::new().with_refresh());
	let cache = Arc::new(TokenCache::new());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let ctx = RequestContext::new();

	session.ensure_token(&ctx).await?;

	let refreshed = session.refresh(&ctx).await?;

	assert_eq!(refreshed.access_token.expose(), "token-1-r1");
	assert_eq!(cache.get(&session.key()).await, Some(refreshed));
	assert_eq!(session.metrics().refreshes(), 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn transient_login_failures_are_retried_with_backoff() -> Result<()> {
	let authenticator = Arc::new(CountingAuthenticator::new().with_transient_failures(2));
	let session = session_for(&Arc::new(TokenCache::new()), &authenticator, "alice", "pw1");
	let started = tokio::time::Instant::now();
	let token = session.ensure_token(&RequestContext::new()).await?;

	assert_eq!(token.access_token.expose(), "token-3");
	assert_eq!(authenticator.logins(), 3);
	assert!(started.elapsed() >= StdDuration::from_secs(3));

	let failing = Arc::new(CountingAuthenticator::new().with_transient_failures(10));
	let session = session_for(&Arc::new(TokenCache::new()), &failing, "alice", "pw1")
		.with_retry_policy(RetryPolicy::default().with_max_retries(2));
	let err = session
		.ensure_token(&RequestContext::new())
		.await
		.expect_err("Persistent 503s must exhaust the policy.");

	assert!(matches!(err, Error::Transport(TransportError::Exhausted { attempts: 2, .. })));
	assert_eq!(failing.logins(), 2);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_leader_releases_waiters() -> Result<()> {
	let authenticator =
		Arc::new(CountingAuthenticator::new().with_delay(StdDuration::from_secs(10)));
	let session = session_for(&Arc::new(TokenCache::new()), &authenticator, "alice", "pw1");
	let leader_ctx = RequestContext::new();
	let follower_ctx = RequestContext::new();
	let cancel = async {
		tokio::time::sleep(StdDuration::from_secs(1)).await;
		leader_ctx.cancel();
	};
	let (leader, follower, ()) = tokio::join!(
		session.ensure_token(&leader_ctx),
		session.ensure_token(&follower_ctx),
		cancel
	);

	assert!(matches!(leader, Err(Error::Cancelled)));
	assert!(matches!(follower, Err(Error::Cancelled)));
	assert_eq!(authenticator.logins(), 0);

	let token = session.ensure_token(&RequestContext::new()).await?;

	assert_eq!(token.access_token.expose(), "token-1");

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadlines_bound_the_login() {
	let authenticator =
		Arc::new(CountingAuthenticator::new().with_delay(StdDuration::from_secs(60)));
	let session = session_for(&Arc::new(TokenCache::new()), &authenticator, "alice", "pw1");
	let ctx = RequestContext::new().with_timeout(StdDuration::from_secs(5));

	assert!(matches!(session.ensure_token(&ctx).await, Err(Error::DeadlineExceeded)));
}

struct BrokenBackend {
	loads: AtomicUsize,
	saves: AtomicUsize,
}
impl TokenPersistence for BrokenBackend {
	fn load<'a>(&'a self, _: &'a CredentialKey) -> StoreFuture<'a, Option<TokenRecord>> {
		self.loads.fetch_add(1, Ordering::SeqCst);

		Box::pin(async { Err(StoreError::Backend { message: "connection refused".into() }) })
	}

	fn save<'a>(
		&'a self,
		_: &'a CredentialKey,
		_: Option<&'a TokenRecord>,
	) -> StoreFuture<'a, ()> {
		self.saves.fetch_add(1, Ordering::SeqCst);

		Box::pin(async { Err(StoreError::Backend { message: "read-only replica".into() }) })
	}
}

#[tokio::test]
async fn persistence_failures_never_reach_callers() -> Result<()> {
	let backend = Arc::new(BrokenBackend { loads: AtomicUsize::new(0), saves: AtomicUsize::new(0) });
	let cache = Arc::new(TokenCache::new().with_persistence(backend.clone()));
	let authenticator = Arc::new(CountingAuthenticator::new());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let ctx = RequestContext::new();
	let first = session.ensure_token(&ctx).await?;
	let second = session.ensure_token(&ctx).await?;

	assert_eq!(first, second);
	assert_eq!(authenticator.logins(), 1);
	assert!(backend.loads.load(Ordering::SeqCst) >= 1);
	assert_eq!(backend.saves.load(Ordering::SeqCst), 1);

	session.invalidate(&ctx).await?;

	assert!(cache.is_empty());
	assert_eq!(backend.saves.load(Ordering::SeqCst), 2);

	Ok(())
}

// Never answers within a test run.
struct StalledBackend {
	stall_loads: bool,
	saves: AtomicUsize,
}
impl StalledBackend {
	fn new(stall_loads: bool) -> Arc<Self> {
		Arc::new(Self { stall_loads, saves: AtomicUsize::new(0) })
	}
}
impl TokenPersistence for StalledBackend {
	fn load<'a>(&'a self, _: &'a CredentialKey) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move {
			if self.stall_loads {
				tokio::time::sleep(StdDuration::from_secs(3600)).await;
			}

			Ok(None)
		})
	}

	fn save<'a>(
		&'a self,
		_: &'a CredentialKey,
		_: Option<&'a TokenRecord>,
	) -> StoreFuture<'a, ()> {
		self.saves.fetch_add(1, Ordering::SeqCst);

		Box::pin(async {
			tokio::time::sleep(StdDuration::from_secs(3600)).await;

			Ok(())
		})
	}
}

#[tokio::test(start_paused = true)]
async fn slow_saves_never_hold_back_the_token() -> Result<()> {
	let backend = StalledBackend::new(false);
	let cache = Arc::new(TokenCache::new().with_persistence(backend.clone()));
	let authenticator = Arc::new(CountingAuthenticator::new());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let ctx = RequestContext::new().with_timeout(StdDuration::from_secs(1));
	let other_ctx = RequestContext::new();
	let started = tokio::time::Instant::now();
	let (leader, other) =
		tokio::join!(session.ensure_token(&ctx), session.ensure_token(&other_ctx));
	let token = leader?;

	assert_eq!(other?, token);
	assert!(started.elapsed() <= StdDuration::from_secs(1));
	assert_eq!(session.ensure_token(&RequestContext::new()).await?, token);
	assert_eq!(authenticator.logins(), 1);
	assert_eq!(backend.saves.load(Ordering::SeqCst), 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn hook_timeouts_turn_stalled_hooks_into_misses() -> Result<()> {
	let backend = StalledBackend::new(true);
	let cache = Arc::new(
		TokenCache::new()
			.with_persistence(backend.clone())
			.with_hook_timeout(StdDuration::from_secs(2)),
	);
	let authenticator = Arc::new(CountingAuthenticator::new());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let started = tokio::time::Instant::now();
	let token = session.ensure_token(&RequestContext::new()).await?;

	// Two timed-out loads and one timed-out save.
	assert!(started.elapsed() <= StdDuration::from_secs(6));
	assert_eq!(token.access_token.expose(), "token-1");
	assert_eq!(cache.len(), 1);
	assert_eq!(authenticator.logins(), 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadlines_cover_the_load_hook() -> Result<()> {
	let backend = StalledBackend::new(true);
	let cache = Arc::new(TokenCache::new().with_persistence(backend));
	let authenticator = Arc::new(CountingAuthenticator::new());
	let session = session_for(&cache, &authenticator, "alice", "pw1");
	let ctx = RequestContext::new().with_timeout(StdDuration::from_secs(1));

	assert!(matches!(session.ensure_token(&ctx).await, Err(Error::DeadlineExceeded)));
	assert_eq!(authenticator.logins(), 0);

	let token = session.ensure_token(&RequestContext::new()).await?;

	assert_eq!(token.access_token.expose(), "token-1");
	assert_eq!(authenticator.logins(), 1);

	Ok(())
}

#[tokio::test]
async fn persisted_tokens_survive_a_new_cache() -> Result<()> {
	let backend = vendor_session::store::MemoryPersistence::default();
	let authenticator = Arc::new(CountingAuthenticator::new());
	let ctx = RequestContext::new();
	let first_cache = Arc::new(TokenCache::new().with_persistence(Arc::new(backend.clone())));
	let token = session_for(&first_cache, &authenticator, "alice", "pw1").ensure_token(&ctx).await?;
	let second_cache = Arc::new(TokenCache::new().with_persistence(Arc::new(backend.clone())));
	let restored =
		session_for(&second_cache, &authenticator, "alice", "pw1").ensure_token(&ctx).await?;

	assert_eq!(restored, token);
	assert_eq!(authenticator.logins(), 1);
	assert_eq!(backend.snapshot(&Credentials::new("alice", "pw1").key()), Some(token));

	Ok(())
}
