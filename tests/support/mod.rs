//! Shared fakes for integration tests.

#![allow(dead_code, unused_imports)]

pub use std::{
	collections::VecDeque,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};

pub use parking_lot::Mutex;
pub use serde_json::json;
pub use time::{Duration, OffsetDateTime, macros::datetime};
pub use vendor_session::{
	auth::{Credentials, TokenSecret},
	context::RequestContext,
	error::{Error, TransportError},
	http::{HttpRequest, HttpResponse, HttpTransport, TransportFuture},
	session::{AuthFuture, AuthGrant, Authenticator},
};

type Responder =
	dyn Fn(&HttpRequest, usize) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Transport answering from a closure and recording every request it sees.
pub struct ScriptedTransport {
	responder: Box<Responder>,
	requests: Mutex<Vec<HttpRequest>>,
}
impl ScriptedTransport {
	/// Answers call `n` (zero-based) with `responder(request, n)`.
	pub fn from_fn<F>(responder: F) -> Arc<Self>
	where
		F: 'static + Send + Sync + Fn(&HttpRequest, usize) -> Result<HttpResponse, TransportError>,
	{
		Arc::new(Self { responder: Box::new(responder), requests: Mutex::new(Vec::new()) })
	}

	/// Plays `script` in order, then repeats its last entry.
	pub fn scripted(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
		Self::from_fn(move |_, n| {
			let step = script.get(n).or_else(|| script.last()).expect("Script must not be empty.");

			match step {
				Ok(response) => Ok(response.clone()),
				Err(e) => Err(e.clone()),
			}
		})
	}

	/// Always answers with `response`.
	pub fn always(response: HttpResponse) -> Arc<Self> {
		Self::scripted(vec![Ok(response)])
	}

	pub fn calls(&self) -> usize {
		self.requests.lock().len()
	}

	pub fn requests(&self) -> Vec<HttpRequest> {
		self.requests.lock().clone()
	}

	pub fn authorization_headers(&self) -> Vec<Option<String>> {
		self.requests.lock().iter().map(|r| r.header("authorization").map(str::to_owned)).collect()
	}
}
impl HttpTransport for ScriptedTransport {
	fn send(&self, request: HttpRequest, _: Option<StdDuration>) -> TransportFuture<'_> {
		let n = {
			let mut requests = self.requests.lock();

			requests.push(request.clone());

			requests.len() - 1
		};
		let outcome = (self.responder)(&request, n);

		Box::pin(async move { outcome })
	}
}

/// Authenticator issuing `token-N` (and `refresh-N`) with call counters and failure switches.
pub struct CountingAuthenticator {
	pub logins: AtomicUsize,
	pub refreshes: AtomicUsize,
	pub delay: StdDuration,
	pub lifetime: Duration,
	pub refresh_supported: bool,
	pub reject_logins: AtomicBool,
	pub reject_refreshes: AtomicBool,
	pub transient_failures: AtomicUsize,
}
impl CountingAuthenticator {
	pub fn new() -> Self {
		Self {
			logins: AtomicUsize::new(0),
			refreshes: AtomicUsize::new(0),
			delay: StdDuration::ZERO,
			lifetime: Duration::hours(1),
			refresh_supported: false,
			reject_logins: AtomicBool::new(false),
			reject_refreshes: AtomicBool::new(false),
			transient_failures: AtomicUsize::new(0),
		}
	}

	pub fn with_delay(mut self, delay: StdDuration) -> Self {
		self.delay = delay;

		self
	}

	pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
		self.lifetime = lifetime;

		self
	}

	pub fn with_refresh(mut self) -> Self {
		self.refresh_supported = true;

		self
	}

	pub fn rejecting(self) -> Self {
		self.reject_logins.store(true, Ordering::SeqCst);

		self
	}

	/// Fails the next `n` logins with a retryable 503.
	pub fn with_transient_failures(self, n: usize) -> Self {
		self.transient_failures.store(n, Ordering::SeqCst);

		self
	}

	pub fn logins(&self) -> usize {
		self.logins.load(Ordering::SeqCst)
	}

	pub fn refreshes(&self) -> usize {
		self.refreshes.load(Ordering::SeqCst)
	}

	fn grant(&self, n: usize) -> AuthGrant {
		AuthGrant::new(format!("token-{n}"))
			.with_refresh_token(format!("refresh-{n}"))
			.with_expires_in(self.lifetime)
	}
}
impl Authenticator for CountingAuthenticator {
	fn authenticate<'a>(&'a self, _: &'a RequestContext, _: &'a Credentials) -> AuthFuture<'a> {
		Box::pin(async move {
			if !self.delay.is_zero() {
				tokio::time::sleep(self.delay).await;
			}

			let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;

			if self
				.transient_failures
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
				.is_ok()
			{
				return Err(TransportError::Server {
					status: 503,
					message: "login backend unavailable".into(),
					retry_after: None,
				}
				.into());
			}
			if self.reject_logins.load(Ordering::SeqCst) {
				return Err(Error::Authentication {
					reason: "invalid credentials".into(),
					status: Some(401),
				});
			}

			Ok(self.grant(n))
		})
	}

	fn refresh<'a>(&'a self, _: &'a RequestContext, refresh: &'a TokenSecret) -> AuthFuture<'a> {
		Box::pin(async move {
			let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;

			if self.reject_refreshes.load(Ordering::SeqCst) {
				return Err(Error::Authentication {
					reason: "refresh token revoked".into(),
					status: Some(400),
				});
			}

			Ok(AuthGrant::new(format!("{}-r{n}", refresh.expose().replace("refresh", "token")))
				.with_expires_in(self.lifetime))
		})
	}

	fn supports_refresh(&self) -> bool {
		self.refresh_supported
	}
}

pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
	HttpResponse::new(status, body.to_string()).with_header("Content-Type", "application/json")
}

pub fn ok_json(body: serde_json::Value) -> HttpResponse {
	json_response(200, body)
}
