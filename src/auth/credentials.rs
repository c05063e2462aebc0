//! Identity/secret pairs supplied by the caller at construction time or per request.

// self
use crate::{
	_prelude::*,
	auth::{CredentialKey, TokenSecret},
};

/// Identity/secret pair used for login exchanges (client id + secret, login + password, ...).
///
/// The secret is wrapped in [`TokenSecret`] so formatting the pair never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
	identity: String,
	secret: TokenSecret,
}
impl Credentials {
	/// Creates a pair; surrounding whitespace is trimmed as the vendors' login forms do.
	pub fn new(identity: impl AsRef<str>, secret: impl AsRef<str>) -> Self {
		Self {
			identity: identity.as_ref().trim().to_owned(),
			secret: TokenSecret::new(secret.as_ref().trim()),
		}
	}

	/// Returns the identity (client id, login, email).
	pub fn identity(&self) -> &str {
		&self.identity
	}

	/// Returns the secret. Callers must avoid logging it.
	pub fn secret(&self) -> &TokenSecret {
		&self.secret
	}

	/// Derives the cache key for this pair.
	pub fn key(&self) -> CredentialKey {
		CredentialKey::derive(Some(&self.identity), Some(self.secret.expose()))
	}

	/// Rejects blank identities or secrets before any network call is made.
	pub fn validate(&self) -> Result<()> {
		let blank = if self.identity.is_empty() {
			Some("Identity cannot be empty")
		} else if self.secret.is_blank() {
			Some("Secret cannot be empty")
		} else {
			None
		};

		match blank {
			Some(message) =>
				Err(Error::Client { status: 400, message: message.into(), payload: None }),
			None => Ok(()),
		}
	}
}
impl Debug for Credentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credentials")
			.field("identity", &self.identity)
			.field("secret", &self.secret)
			.finish()
	}
}
