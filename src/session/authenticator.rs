//! Vendor login seam supplied by adapters.

// self
use crate::{
	_prelude::*,
	auth::{Credentials, TokenRecord, TokenSecret},
	context::RequestContext,
};

/// Boxed future returned by [`Authenticator`] methods.
pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthGrant>> + 'a + Send>>;

/// Performs a vendor's login (and optionally refresh) exchange.
///
/// Implementations perform exactly one network exchange per call; the session manager owns
/// retries, caching, and single-flight coordination. Hard rejections must be reported as
/// [`Error::Authentication`], transient failures as [`Error::Transport`].
pub trait Authenticator
where
	Self: Send + Sync,
{
	/// Exchanges `credentials` for a token.
	fn authenticate<'a>(
		&'a self,
		ctx: &'a RequestContext,
		credentials: &'a Credentials,
	) -> AuthFuture<'a>;

	/// Exchanges a refresh token for a new access token.
	fn refresh<'a>(
		&'a self,
		ctx: &'a RequestContext,
		refresh_token: &'a TokenSecret,
	) -> AuthFuture<'a> {
		let _ = (ctx, refresh_token);

		Box::pin(async { Err(Error::authentication("Vendor does not support token refresh")) })
	}

	/// Returns `true` when [`Authenticator::refresh`] is implemented.
	fn supports_refresh(&self) -> bool {
		false
	}
}

/// Raw outcome of a login or refresh exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthGrant {
	/// Access token issued by the vendor.
	pub access_token: TokenSecret,
	/// Refresh token, when the vendor issues one.
	pub refresh_token: Option<TokenSecret>,
	/// Relative lifetime reported by the vendor.
	pub expires_in: Option<Duration>,
	/// Absolute expiry reported by the vendor; wins over `expires_in`.
	pub expires_at: Option<OffsetDateTime>,
}
impl AuthGrant {
	/// Creates a grant carrying only an access token.
	pub fn new(access_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			expires_in: None,
			expires_at: None,
		}
	}

	/// Sets the refresh token.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(refresh_token));

		self
	}

	/// Sets the relative lifetime.
	pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
		self.expires_in = Some(expires_in);

		self
	}

	/// Sets the absolute expiry.
	pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
		self.expires_at = Some(expires_at);

		self
	}

	/// Converts the grant into a cacheable record issued at `now`.
	///
	/// Empty tokens and lifetimes that are already over are authentication failures: the vendor
	/// returned nothing usable.
	pub fn into_record(self, now: OffsetDateTime) -> Result<TokenRecord> {
		let mut builder = TokenRecord::builder()
			.access_token(self.access_token.expose())
			.issued_at(now);

		if let Some(refresh_token) = &self.refresh_token {
			builder = builder.refresh_token(refresh_token.expose());
		}

		match (self.expires_at, self.expires_in) {
			(Some(at), _) if at <= now =>
				return Err(Error::authentication("Vendor issued a token that is already expired")),
			(Some(at), _) => builder = builder.expires_at(at),
			(None, Some(delta)) => builder = builder.expires_in(delta),
			(None, None) => {},
		}

		Ok(builder.build()?)
	}
}
impl Debug for AuthGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthGrant")
			.field("access_token", &self.access_token)
			.field("refresh_token", &self.refresh_token)
			.field("expires_in", &self.expires_in)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Adapts an async closure into an [`Authenticator`] without refresh support.
///
/// The closure receives owned copies of its inputs so it may move them into the future.
pub struct AuthenticateFn<F>(F);
impl<F> AuthenticateFn<F> {
	/// Wraps `f`.
	pub fn new(f: F) -> Self {
		Self(f)
	}
}
impl<F, Fut> Authenticator for AuthenticateFn<F>
where
	F: Send + Sync + Fn(RequestContext, Credentials) -> Fut,
	Fut: 'static + Send + Future<Output = Result<AuthGrant>>,
{
	fn authenticate<'a>(
		&'a self,
		ctx: &'a RequestContext,
		credentials: &'a Credentials,
	) -> AuthFuture<'a> {
		Box::pin((self.0)(ctx.clone(), credentials.clone()))
	}
}
impl<F> Debug for AuthenticateFn<F> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("AuthenticateFn(..)")
	}
}
