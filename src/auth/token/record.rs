//! Immutable token record structs and builders.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no (or an empty) access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the relative lifetime is zero or negative.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl From<TokenRecordBuilderError> for Error {
	fn from(e: TokenRecordBuilderError) -> Self {
		Error::authentication(e.to_string())
	}
}

/// One cached authentication outcome.
///
/// Records are replaced, never mutated in place. `expires_at == None` means the token stays
/// valid until explicitly invalidated (static pre-shared tokens).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Bearer value presented to the vendor; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh secret, when the vendor supports refresh exchanges.
	pub refresh_token: Option<TokenSecret>,
	/// Instant the record was minted.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// Absolute expiry, if the vendor reported one.
	#[serde(with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
}
impl TokenRecord {
	/// Returns a builder.
	pub fn builder() -> TokenRecordBuilder {
		TokenRecordBuilder::default()
	}

	/// Builds a record that never expires on its own.
	pub fn unbounded(access_token: impl Into<String>, issued_at: OffsetDateTime) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			issued_at,
			expires_at: None,
		}
	}

	/// Returns `true` if the record has hard-expired at `instant` (no safety buffer).
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at <= instant)
	}

	/// Returns the remaining lifetime at `instant`; `None` for unbounded records.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires_at| expires_at - instant)
	}

	/// Returns `true` when both records carry the same access token.
	pub fn same_token(&self, other: &TokenRecord) -> bool {
		self.access_token == other.access_token
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug, Default)]
pub struct TokenRecordBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	/// Sets the issued-at instant (defaults to the current UTC time).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a lifetime relative to the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self
			.access_token
			.filter(|token| !token.is_blank())
			.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => Some(instant),
			(None, Some(delta)) if !delta.is_positive() =>
				return Err(TokenRecordBuilderError::NonPositiveExpiresIn),
			(None, Some(delta)) => Some(issued_at + delta),
			(None, None) => None,
		};
		let refresh_token = self.refresh_token.filter(|token| !token.is_blank());

		Ok(TokenRecord { access_token, refresh_token, issued_at, expires_at })
	}
}
