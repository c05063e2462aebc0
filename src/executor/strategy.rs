//! Per-vendor hooks that classify responses and attach tokens.
//!
//! Vendors disagree on how they signal an expired token (plain 401, 403 with a marker, even a
//! 200 with an error payload) and on where the token goes. A [`VendorStrategy`] captures those
//! conventions so the executor's retry logic is written once.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	http::{HttpRequest, HttpResponse},
};

const MESSAGE_FIELDS: [&str; 5] = ["message", "error_description", "detail", "error", "msg"];

/// Canonical response categories used by the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClass {
	/// Payload should be decoded and returned.
	Success,
	/// The vendor reported the token as invalid or expired.
	AuthExpired,
	/// The request itself was rejected; never retried.
	Client,
	/// Vendor-side failure; retried with backoff.
	Server,
}

/// Strategy hook that lets vendors customize classification and token placement.
///
/// Implementors are required to be `Send + Sync`. Every hook has a default following the common
/// REST conventions, so override only what a vendor does differently.
pub trait VendorStrategy
where
	Self: Send + Sync,
{
	/// Classifies a response.
	fn classify(&self, response: &HttpResponse) -> ResponseClass {
		if response.status == 401 || self.is_token_expired(response) {
			return ResponseClass::AuthExpired;
		}

		classify_status(response.status)
	}

	/// Detects vendor-specific "token expired" payloads on non-401 responses.
	fn is_token_expired(&self, response: &HttpResponse) -> bool {
		let _ = response;

		false
	}

	/// Extracts the vendor's human-readable message.
	fn message(&self, response: &HttpResponse) -> String {
		vendor_message(&response.body)
	}

	/// Attaches the token to an outbound request (`Authorization: Bearer` by default).
	fn attach_token(&self, request: &mut HttpRequest, token: &TokenSecret) {
		request.set_header("Authorization", token.bearer());
	}
}

/// Strategy implementing the common conventions plus optional expired-token markers.
#[derive(Clone, Debug, Default)]
pub struct DefaultVendorStrategy {
	expired_markers: Vec<String>,
	token_header: Option<String>,
}
impl DefaultVendorStrategy {
	/// Treats any non-5xx response whose body contains `marker` (case-insensitive) as an
	/// expired token.
	pub fn with_expired_marker(mut self, marker: impl Into<String>) -> Self {
		self.expired_markers.push(marker.into().to_ascii_lowercase());

		self
	}

	/// Sends the raw token in `header` instead of `Authorization: Bearer`.
	pub fn with_token_header(mut self, header: impl Into<String>) -> Self {
		self.token_header = Some(header.into());

		self
	}
}
impl Display for DefaultVendorStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-vendor-strategy")
	}
}
impl VendorStrategy for DefaultVendorStrategy {
	fn is_token_expired(&self, response: &HttpResponse) -> bool {
		if self.expired_markers.is_empty() || response.status >= 500 {
			return false;
		}

		let lowered = String::from_utf8_lossy(&response.body).to_ascii_lowercase();

		self.expired_markers.iter().any(|marker| lowered.contains(marker.as_str()))
	}

	fn attach_token(&self, request: &mut HttpRequest, token: &TokenSecret) {
		match &self.token_header {
			Some(header) => request.set_header(header.as_str(), token.expose()),
			None => request.set_header("Authorization", token.bearer()),
		}
	}
}

/// Maps a status code onto its default class.
pub fn classify_status(status: u16) -> ResponseClass {
	match status {
		200..=299 => ResponseClass::Success,
		401 => ResponseClass::AuthExpired,
		500..=u16::MAX => ResponseClass::Server,
		_ => ResponseClass::Client,
	}
}

/// Extracts a message from common JSON error shapes, falling back to a body preview.
pub(crate) fn vendor_message(body: &[u8]) -> String {
	let Ok(payload) = serde_json::from_slice::<serde_json::Value>(body) else {
		return crate::error::body_preview(body);
	};

	message_from_payload(&payload).unwrap_or_else(|| crate::error::body_preview(body))
}

fn message_from_payload(payload: &serde_json::Value) -> Option<String> {
	MESSAGE_FIELDS.iter().find_map(|field| match payload.get(field)? {
		serde_json::Value::String(text) => Some(text.clone()),
		// `{"error": {"message": ...}}`
		nested @ serde_json::Value::Object(_) => message_from_payload(nested),
		_ => None,
	})
}
