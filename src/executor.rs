//! Resilient request pipeline.
//!
//! [`RequestExecutor::execute`] wraps one logical vendor request:
//!
//! 1. Ask the [`SessionManager`] for a valid token when the request requires authentication.
//! 2. Send the request and classify the response through the [`VendorStrategy`].
//! 3. Retry network failures and 5xx responses with bounded exponential backoff, keeping the
//!    same token.
//! 4. On a rejected token, evict it, obtain a new one, and replay the request exactly once.
//!
//! At most `2 * max_retries` HTTP attempts are made per logical request.

pub mod attempt;
pub mod strategy;

pub use attempt::*;
pub use strategy::{DefaultVendorStrategy, ResponseClass, VendorStrategy, classify_status};

// std
use std::sync::atomic::{AtomicU32, Ordering};
// crates.io
use serde::de::DeserializeOwned;
use url::form_urlencoded;
// self
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;
use crate::{
	_prelude::*,
	auth::TokenRecord,
	context::RequestContext,
	error::{ConfigError, TransportError},
	http::{HttpRequest, HttpResponse, HttpTransport, Method},
	obs::{self, Op},
	retry::{self, RetryPolicy},
	session::SessionManager,
};

/// Request body variants.
#[derive(Clone)]
pub enum RequestBody {
	/// JSON document.
	Json(serde_json::Value),
	/// `application/x-www-form-urlencoded` pairs.
	Form(Vec<(String, String)>),
}

/// Description of one vendor endpoint call.
#[derive(Clone)]
pub struct RequestSpec {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the executor's base URL.
	pub path: String,
	/// Query parameters.
	pub query: Vec<(String, String)>,
	/// Optional body.
	pub body: Option<RequestBody>,
	/// Extra headers for this call.
	pub headers: Vec<(String, String)>,
	/// Whether a session token must be attached.
	pub requires_auth: bool,
}
impl RequestSpec {
	/// Creates an authenticated request without query, body, or extra headers.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			body: None,
			headers: Vec::new(),
			requires_auth: true,
		}
	}

	/// Shortcut for `GET`.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::Get, path)
	}

	/// Shortcut for `POST`.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::Post, path)
	}

	/// Shortcut for `PUT`.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::Put, path)
	}

	/// Shortcut for `PATCH`.
	pub fn patch(path: impl Into<String>) -> Self {
		Self::new(Method::Patch, path)
	}

	/// Shortcut for `DELETE`.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::Delete, path)
	}

	/// Appends a query parameter.
	pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
		self.query.push((name.into(), value.to_string()));

		self
	}

	/// Sets a JSON body.
	pub fn json(mut self, body: serde_json::Value) -> Self {
		self.body = Some(RequestBody::Json(body));

		self
	}

	/// Serializes `body` as the JSON body.
	pub fn json_from<B>(self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		let value = serde_json::to_value(body).map_err(ConfigError::from)?;

		Ok(self.json(value))
	}

	/// Sets a form body.
	pub fn form<I, K, V>(mut self, pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.body = Some(RequestBody::Form(
			pairs.into_iter().map(|(name, value)| (name.into(), value.into())).collect(),
		));

		self
	}

	/// Adds a header for this call only.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Marks the call as not requiring a token (login, health, public catalog endpoints).
	pub fn anonymous(mut self) -> Self {
		self.requires_auth = false;

		self
	}
}
impl Debug for RequestSpec {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		// Bodies and header values may carry per-request credentials.
		let header_names = self.headers.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
		let body = self.body.as_ref().map(|body| match body {
			RequestBody::Json(_) => "json",
			RequestBody::Form(_) => "form",
		});

		f.debug_struct("RequestSpec")
			.field("method", &self.method)
			.field("path", &self.path)
			.field("query", &self.query)
			.field("body", &body)
			.field("headers", &header_names)
			.field("requires_auth", &self.requires_auth)
			.finish()
	}
}

enum Attempted {
	Success(HttpResponse),
	AuthExpired(HttpResponse),
}

/// Executor bound to a reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestExecutor = RequestExecutor<ReqwestTransport>;

/// Executes vendor requests with token attachment, classification, and bounded retries.
pub struct RequestExecutor<T = dyn HttpTransport>
where
	T: ?Sized,
{
	base_url: Url,
	transport: Arc<T>,
	session: Option<Arc<SessionManager>>,
	strategy: Arc<dyn VendorStrategy>,
	retry: RetryPolicy,
	request_timeout: StdDuration,
	default_headers: Vec<(String, String)>,
}
impl<T> RequestExecutor<T>
where
	T: ?Sized + HttpTransport,
{
	const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

	/// Creates an executor for `base_url`; paths in [`RequestSpec`] are resolved against it.
	pub fn new(base_url: impl AsRef<str>, transport: Arc<T>) -> Result<Self> {
		let mut base_url = Url::parse(base_url.as_ref()).map_err(ConfigError::from)?;

		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		Ok(Self {
			base_url,
			transport,
			session: None,
			strategy: Arc::new(DefaultVendorStrategy::default()),
			retry: RetryPolicy::default(),
			request_timeout: Self::DEFAULT_TIMEOUT,
			default_headers: Vec::new(),
		})
	}

	/// Attaches the session supplying tokens.
	pub fn with_session(mut self, session: Arc<SessionManager>) -> Self {
		self.session = Some(session);

		self
	}

	/// Replaces the vendor strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn VendorStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Replaces the retry policy.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the per-attempt timeout (defaults to 30 seconds).
	pub fn with_request_timeout(mut self, timeout: StdDuration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Adds a header sent with every call (language, API version, ...).
	pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.default_headers.push((name.into(), value.into()));

		self
	}

	/// Returns the normalized base URL.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Returns the attached session.
	pub fn session(&self) -> Option<&Arc<SessionManager>> {
		self.session.as_ref()
	}

	/// Executes `spec` and decodes the payload as JSON (`null` for empty bodies).
	pub async fn execute(&self, ctx: &RequestContext, spec: RequestSpec) -> Result<serde_json::Value> {
		self.execute_as(ctx, spec).await
	}

	/// Executes `spec` and decodes the payload into `R`.
	pub async fn execute_as<R>(&self, ctx: &RequestContext, spec: RequestSpec) -> Result<R>
	where
		R: DeserializeOwned,
	{
		obs::observe(Op::Execute, "execute", async {
			let response = self.run(ctx, &spec).await?;

			decode(&response)
		})
		.await
	}

	/// Executes a vendor logout call, then invalidates the session whatever the outcome.
	pub async fn logout(&self, ctx: &RequestContext, spec: RequestSpec) -> Result<serde_json::Value> {
		let outcome = self.execute(ctx, spec).await;

		if let Some(session) = &self.session {
			// Detached context: a cancelled logout must still drop the token.
			if let Err(e) = session.invalidate(&RequestContext::new()).await {
				tracing::warn!(error = %e, "Session invalidation after logout failed.");
			}
		}

		outcome
	}

	async fn run(&self, ctx: &RequestContext, spec: &RequestSpec) -> Result<HttpResponse> {
		let session = match (spec.requires_auth, self.session.as_deref()) {
			(false, _) => None,
			(true, Some(session)) => Some(session),
			(true, None) => return Err(ConfigError::MissingSession.into()),
		};
		let attempts = AtomicU32::new(0);
		let mut reauthenticated = false;

		loop {
			let token = match session {
				Some(session) => Some(session.ensure_token(ctx).await?),
				None => None,
			};
			let round = {
				let token = token.as_ref();
				let attempts = &attempts;

				retry::run(&self.retry, ctx, "execute", move |_| {
					self.attempt(ctx, spec, token, attempts.fetch_add(1, Ordering::Relaxed))
				})
				.await?
			};
			let response = match round {
				Attempted::Success(response) => return Ok(response),
				Attempted::AuthExpired(response) => response,
			};
			let (Some(session), Some(token)) = (session, token) else {
				return Err(self.client_error(&response));
			};

			let rejected = Error::Authentication {
				reason: self.strategy.message(&response),
				status: Some(response.status),
			};

			// Static tokens have nothing to evict or replace.
			if !session.can_reauthenticate() {
				return Err(rejected);
			}

			session.invalidate_if_current(ctx, &token.access_token).await?;

			if reauthenticated {
				return Err(rejected);
			}

			tracing::warn!(
				method = %spec.method,
				path = %spec.path,
				"Vendor rejected the token; re-authenticating once."
			);

			reauthenticated = true;
		}
	}

	async fn attempt(
		&self,
		ctx: &RequestContext,
		spec: &RequestSpec,
		token: Option<&TokenRecord>,
		index: u32,
	) -> Result<Attempted> {
		let request = self.build_request(spec, token)?;
		let outcome = match self.transport.send(request, Some(ctx.clamp_timeout(self.request_timeout))).await
		{
			Ok(response) => self.classify(spec, response),
			Err(e) => Err(e.into()),
		};
		let classified = match &outcome {
			Ok(Attempted::Success(_)) => AttemptOutcome::Success,
			Ok(Attempted::AuthExpired(_)) => AttemptOutcome::AuthExpired,
			Err(e) => AttemptOutcome::of_error(e),
		};

		RequestAttempt {
			method: spec.method,
			path: spec.path.clone(),
			requires_auth: spec.requires_auth,
			index,
			outcome: classified,
		}
		.log();

		outcome
	}

	fn classify(&self, spec: &RequestSpec, response: HttpResponse) -> Result<Attempted> {
		match self.strategy.classify(&response) {
			ResponseClass::Success => Ok(Attempted::Success(response)),
			ResponseClass::AuthExpired if spec.requires_auth => Ok(Attempted::AuthExpired(response)),
			ResponseClass::AuthExpired | ResponseClass::Client => Err(self.client_error(&response)),
			ResponseClass::Server => Err(TransportError::Server {
				status: response.status,
				message: self.strategy.message(&response),
				retry_after: response.retry_after(),
			}
			.into()),
		}
	}

	fn client_error(&self, response: &HttpResponse) -> Error {
		Error::Client {
			status: response.status,
			message: self.strategy.message(response),
			payload: serde_json::from_slice(&response.body).ok(),
		}
	}

	fn build_request(&self, spec: &RequestSpec, token: Option<&TokenRecord>) -> Result<HttpRequest> {
		let mut url =
			self.base_url.join(spec.path.trim_start_matches('/')).map_err(ConfigError::from)?;

		if !spec.query.is_empty() {
			url.query_pairs_mut()
				.extend_pairs(spec.query.iter().map(|(name, value)| (name.as_str(), value.as_str())));
		}

		let mut request = HttpRequest::new(spec.method, url);

		request.set_header("Accept", "application/json");

		for (name, value) in self.default_headers.iter().chain(&spec.headers) {
			request.set_header(name.as_str(), value.as_str());
		}

		match &spec.body {
			Some(RequestBody::Json(value)) => {
				request.set_header("Content-Type", "application/json");
				request.body = Some(serde_json::to_vec(value).map_err(ConfigError::from)?);
			},
			Some(RequestBody::Form(pairs)) => {
				let encoded = form_urlencoded::Serializer::new(String::new())
					.extend_pairs(pairs.iter().map(|(name, value)| (name.as_str(), value.as_str())))
					.finish();

				request.set_header("Content-Type", "application/x-www-form-urlencoded");
				request.body = Some(encoded.into_bytes());
			},
			None => {},
		}

		if let Some(token) = token {
			self.strategy.attach_token(&mut request, &token.access_token);
		}

		Ok(request)
	}
}
impl<T> Debug for RequestExecutor<T>
where
	T: ?Sized,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestExecutor")
			.field("base_url", &self.base_url.as_str())
			.field("session", &self.session)
			.field("retry", &self.retry)
			.field("request_timeout", &self.request_timeout)
			.finish()
	}
}

fn decode<R>(response: &HttpResponse) -> Result<R>
where
	R: DeserializeOwned,
{
	let body: &[u8] =
		if response.body.iter().all(u8::is_ascii_whitespace) { b"null" } else { &response.body };
	let mut de = serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(&mut de)
		.map_err(|e| Error::malformed(response.status, &response.body, e))
}
