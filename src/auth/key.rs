//! Credential key derivation.
//!
//! A [`CredentialKey`] is the cache index and the unit of single-flight coordination. It is a
//! versioned SHA-256 digest over the identity/secret pair, so the secret never appears as a
//! map key or log field. Changing [`KEY_VERSION`] or the framing below invalidates every
//! previously persisted entry and requires flushing external caches.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Version prefix baked into every derived key.
pub const KEY_VERSION: &str = "v1";

const KEY_DOMAIN: &[u8] = b"vendor-session/credential-key";
const SEPARATOR: u8 = 0x1f;

/// Opaque, deterministic, non-reversible identifier for an identity/secret pair.
///
/// The empty key is the "not cacheable" sentinel used for sessions without an underlying
/// identity/secret (static pre-shared tokens). Caches skip it instead of storing under a key
/// shared by unrelated sessions.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialKey(String);
impl CredentialKey {
	/// Derives the key for `identity` and `secret`; blank or absent inputs yield the sentinel.
	pub fn derive(identity: Option<&str>, secret: Option<&str>) -> Self {
		let present = |value: &&str| !value.trim().is_empty();
		let (Some(identity), Some(secret)) = (identity.filter(present), secret.filter(present))
		else {
			return Self::uncacheable();
		};
		let mut hasher = Sha256::new();

		hasher.update(KEY_DOMAIN);
		hasher.update([SEPARATOR]);
		// Length framing keeps ("a\x1fb", "c") and ("a", "b\x1fc") apart.
		hasher.update((identity.len() as u64).to_be_bytes());
		hasher.update(identity.as_bytes());
		hasher.update([SEPARATOR]);
		hasher.update(secret.as_bytes());

		Self(format!("{KEY_VERSION}.{}", URL_SAFE_NO_PAD.encode(hasher.finalize())))
	}

	/// Returns the "skip the cache" sentinel.
	pub fn uncacheable() -> Self {
		Self(String::new())
	}

	/// Returns `false` for the sentinel.
	pub fn is_cacheable(&self) -> bool {
		!self.0.is_empty()
	}

	/// Returns the encoded key.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for CredentialKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "CredentialKey({self})")
	}
}
impl Display for CredentialKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		if self.is_cacheable() { f.write_str(&self.0) } else { f.write_str("<uncacheable>") }
	}
}
