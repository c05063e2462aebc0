//! Ready-made [`Authenticator`] for vendors with a plain token endpoint.
//!
//! Covers the shapes seen across supplier APIs:
//!
//! - OAuth client-credentials form posts (`grant_type=client_credentials`).
//! - JSON logins such as `{"login": .., "password": ..}` or `{"email": .., "password": ..}`.
//! - Optional refresh-token exchanges, form or JSON encoded.
//!
//! Responses may name the token `access_token` or `token`, and report the lifetime as
//! `expires_in` seconds or an `expires_at` timestamp. Missing lifetimes default to one hour.

// crates.io
use time::{PrimitiveDateTime, format_description::well_known::Rfc3339, macros::format_description};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{Credentials, TokenSecret},
	context::RequestContext,
	error::{ConfigError, TransportError},
	executor::strategy,
	http::{HttpRequest, HttpResponse, HttpTransport, Method},
	session::authenticator::{AuthFuture, AuthGrant, Authenticator},
};

/// Login exchange shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginStyle {
	/// Form-encoded `grant_type=client_credentials` with `client_id` and `client_secret`.
	ClientCredentials {
		/// Optional `scope` parameter.
		scope: Option<String>,
	},
	/// JSON object carrying the identity and secret under vendor-specific field names.
	JsonLogin {
		/// Field receiving the identity (`login`, `email`, ...).
		identity_field: String,
		/// Field receiving the secret (`password`, ...).
		secret_field: String,
	},
}

/// Refresh exchange shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshStyle {
	/// Form-encoded `grant_type=refresh_token&refresh_token=..`.
	Form,
	/// JSON object carrying the refresh token under `field`.
	Json {
		/// Field receiving the refresh token.
		field: String,
	},
}

#[derive(Clone, Debug)]
struct RefreshEndpoint {
	url: Url,
	style: RefreshStyle,
}

enum Body {
	Form(Vec<(String, String)>),
	Json(serde_json::Map<String, serde_json::Value>),
}

#[derive(Deserialize)]
struct TokenResponse {
	#[serde(default, alias = "token")]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	expires_at: Option<String>,
}

/// Token-endpoint [`Authenticator`] built on any [`HttpTransport`].
pub struct TokenEndpointAuthenticator<T>
where
	T: ?Sized,
{
	transport: Arc<T>,
	login_url: Url,
	login: LoginStyle,
	refresh: Option<RefreshEndpoint>,
	extra_fields: Vec<(String, String)>,
	timeout: StdDuration,
	default_lifetime: Duration,
}
impl<T> TokenEndpointAuthenticator<T>
where
	T: ?Sized + HttpTransport,
{
	const DEFAULT_LIFETIME: Duration = Duration::hours(1);
	const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

	/// Creates an authenticator for an OAuth client-credentials token endpoint.
	pub fn client_credentials(transport: Arc<T>, token_url: Url) -> Self {
		Self::new(transport, token_url, LoginStyle::ClientCredentials { scope: None })
	}

	/// Creates an authenticator for a JSON login endpoint.
	pub fn json_login(
		transport: Arc<T>,
		login_url: Url,
		identity_field: impl Into<String>,
		secret_field: impl Into<String>,
	) -> Self {
		Self::new(
			transport,
			login_url,
			LoginStyle::JsonLogin {
				identity_field: identity_field.into(),
				secret_field: secret_field.into(),
			},
		)
	}

	/// Creates an authenticator with an explicit login style.
	pub fn new(transport: Arc<T>, login_url: Url, login: LoginStyle) -> Self {
		Self {
			transport,
			login_url,
			login,
			refresh: None,
			extra_fields: Vec::new(),
			timeout: Self::DEFAULT_TIMEOUT,
			default_lifetime: Self::DEFAULT_LIFETIME,
		}
	}

	/// Sets the `scope` parameter of client-credentials exchanges.
	pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
		if let LoginStyle::ClientCredentials { scope: current } = &mut self.login {
			*current = Some(scope.into());
		}

		self
	}

	/// Enables refresh-token exchanges against `url`.
	pub fn with_refresh(mut self, url: Url, style: RefreshStyle) -> Self {
		self.refresh = Some(RefreshEndpoint { url, style });

		self
	}

	/// Adds a constant field to every login and refresh body (device fingerprints, ...).
	pub fn with_extra_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_fields.push((name.into(), value.into()));

		self
	}

	/// Overrides the per-exchange timeout (defaults to 30 seconds).
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Overrides the lifetime assumed when the vendor reports none (defaults to one hour).
	pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
		self.default_lifetime = lifetime;

		self
	}

	fn login_body(&self, credentials: &Credentials) -> Body {
		match &self.login {
			LoginStyle::ClientCredentials { scope } => {
				let mut pairs = vec![
					("grant_type".to_owned(), "client_credentials".to_owned()),
					("client_id".to_owned(), credentials.identity().to_owned()),
					("client_secret".to_owned(), credentials.secret().expose().to_owned()),
				];

				if let Some(scope) = scope {
					pairs.push(("scope".to_owned(), scope.clone()));
				}

				Body::Form(self.with_extras(pairs))
			},
			LoginStyle::JsonLogin { identity_field, secret_field } => Body::Json(
				self.json_with_extras([
					(identity_field.clone(), credentials.identity().to_owned()),
					(secret_field.clone(), credentials.secret().expose().to_owned()),
				]),
			),
		}
	}

	fn refresh_body(&self, style: &RefreshStyle, refresh_token: &TokenSecret) -> Body {
		match style {
			RefreshStyle::Form => Body::Form(self.with_extras(vec![
				("grant_type".to_owned(), "refresh_token".to_owned()),
				("refresh_token".to_owned(), refresh_token.expose().to_owned()),
			])),
			RefreshStyle::Json { field } =>
				Body::Json(self.json_with_extras([(field.clone(), refresh_token.expose().to_owned())])),
		}
	}

	fn with_extras(&self, mut pairs: Vec<(String, String)>) -> Vec<(String, String)> {
		pairs.extend(self.extra_fields.iter().cloned());

		pairs
	}

	fn json_with_extras<const N: usize>(
		&self,
		fields: [(String, String); N],
	) -> serde_json::Map<String, serde_json::Value> {
		fields
			.into_iter()
			.chain(self.extra_fields.iter().cloned())
			.map(|(name, value)| (name, serde_json::Value::String(value)))
			.collect()
	}

	async fn exchange(&self, ctx: &RequestContext, url: &Url, body: Body) -> Result<AuthGrant> {
		let mut request = HttpRequest::new(Method::Post, url.clone());

		request.set_header("Accept", "application/json");

		match body {
			Body::Form(pairs) => {
				let encoded = form_urlencoded::Serializer::new(String::new())
					.extend_pairs(pairs.iter().map(|(name, value)| (name.as_str(), value.as_str())))
					.finish();

				request.set_header("Content-Type", "application/x-www-form-urlencoded");
				request.body = Some(encoded.into_bytes());
			},
			Body::Json(fields) => {
				let encoded = serde_json::to_vec(&fields).map_err(ConfigError::from)?;

				request.set_header("Content-Type", "application/json");
				request.body = Some(encoded);
			},
		}

		let response = self.transport.send(request, Some(ctx.clamp_timeout(self.timeout))).await?;

		self.grant_from(&response)
	}

	fn grant_from(&self, response: &HttpResponse) -> Result<AuthGrant> {
		let status = response.status;

		match status {
			200..=299 => {},
			400 | 401 | 403 => {
				return Err(Error::Authentication {
					reason: strategy::vendor_message(&response.body),
					status: Some(status),
				});
			},
			500..=u16::MAX => {
				return Err(TransportError::Server {
					status,
					message: strategy::vendor_message(&response.body),
					retry_after: response.retry_after(),
				}
				.into());
			},
			_ => {
				return Err(Error::Client {
					status,
					message: strategy::vendor_message(&response.body),
					payload: serde_json::from_slice(&response.body).ok(),
				});
			},
		}

		let parsed = response.json::<TokenResponse>()?;
		let access_token = parsed
			.access_token
			.filter(|token| !token.trim().is_empty())
			.ok_or_else(|| Error::Authentication {
				reason: "No access token received from the vendor".into(),
				status: Some(status),
			})?;
		let mut grant = AuthGrant::new(access_token);

		if let Some(refresh_token) = parsed.refresh_token.filter(|token| !token.trim().is_empty()) {
			grant = grant.with_refresh_token(refresh_token);
		}

		match (parsed.expires_at.as_deref().and_then(parse_expires_at), parsed.expires_in) {
			(Some(at), _) => Ok(grant.with_expires_at(at)),
			(None, Some(secs)) => Ok(grant.with_expires_in(Duration::seconds(secs))),
			(None, None) => Ok(grant.with_expires_in(self.default_lifetime)),
		}
	}
}
impl<T> Authenticator for TokenEndpointAuthenticator<T>
where
	T: ?Sized + HttpTransport,
{
	fn authenticate<'a>(
		&'a self,
		ctx: &'a RequestContext,
		credentials: &'a Credentials,
	) -> AuthFuture<'a> {
		Box::pin(async move {
			let body = self.login_body(credentials);

			self.exchange(ctx, &self.login_url, body).await
		})
	}

	fn refresh<'a>(
		&'a self,
		ctx: &'a RequestContext,
		refresh_token: &'a TokenSecret,
	) -> AuthFuture<'a> {
		Box::pin(async move {
			let Some(endpoint) = self.refresh.as_ref() else {
				return Err(Error::authentication("Vendor does not support token refresh"));
			};
			let body = self.refresh_body(&endpoint.style, refresh_token);

			self.exchange(ctx, &endpoint.url, body).await
		})
	}

	fn supports_refresh(&self) -> bool {
		self.refresh.is_some()
	}
}
impl<T> Debug for TokenEndpointAuthenticator<T>
where
	T: ?Sized,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpointAuthenticator")
			.field("login_url", &self.login_url.as_str())
			.field("login", &self.login)
			.field("refresh", &self.refresh)
			.field("timeout", &self.timeout)
			.finish()
	}
}

// RFC 3339, or the naive `YYYY-MM-DD HH:MM:SS` (UTC) some vendors return.
fn parse_expires_at(raw: &str) -> Option<OffsetDateTime> {
	let raw = raw.trim();

	if let Ok(instant) = OffsetDateTime::parse(raw, &Rfc3339) {
		return Some(instant);
	}

	let naive = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

	match PrimitiveDateTime::parse(raw, naive) {
		Ok(instant) => Some(instant.assume_utc()),
		Err(e) => {
			tracing::warn!(error = %e, "Ignoring an unparseable token expiry timestamp.");

			None
		},
	}
}
