//! Per-attempt bookkeeping for one logical request.

// self
use crate::{_prelude::*, http::Method};

/// Classified outcome of one HTTP execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
	/// 2xx with a decodable payload.
	Success,
	/// Network failure, timeout, or 5xx; retried with backoff.
	RetryableNetworkError,
	/// The vendor rejected the token.
	AuthExpired,
	/// 4xx other than the token rejection, or an undecodable 2xx payload.
	FatalClientError,
	/// Terminal failure that is not the caller's fault (cancellation, configuration).
	FatalServerError,
}
impl AttemptOutcome {
	/// Classifies the error returned by an attempt.
	pub fn of_error(error: &Error) -> Self {
		match error {
			e if e.is_retryable() => AttemptOutcome::RetryableNetworkError,
			Error::Authentication { .. } => AttemptOutcome::AuthExpired,
			Error::Client { .. } | Error::MalformedResponse { .. } =>
				AttemptOutcome::FatalClientError,
			_ => AttemptOutcome::FatalServerError,
		}
	}

	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AttemptOutcome::Success => "success",
			AttemptOutcome::RetryableNetworkError => "retryable_network_error",
			AttemptOutcome::AuthExpired => "auth_expired",
			AttemptOutcome::FatalClientError => "fatal_client_error",
			AttemptOutcome::FatalServerError => "fatal_server_error",
		}
	}
}
impl Display for AttemptOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Ephemeral record of one HTTP execution; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestAttempt {
	/// HTTP method.
	pub method: Method,
	/// Endpoint path relative to the executor's base URL.
	pub path: String,
	/// Whether a token was attached.
	pub requires_auth: bool,
	/// Zero-based attempt index across the whole logical request.
	pub index: u32,
	/// Classified outcome.
	pub outcome: AttemptOutcome,
}
impl RequestAttempt {
	pub(crate) fn log(&self) {
		match self.outcome {
			AttemptOutcome::Success => tracing::debug!(
				method = %self.method,
				path = %self.path,
				attempt = self.index,
				outcome = %self.outcome,
				"Vendor call finished."
			),
			_ => tracing::info!(
				method = %self.method,
				path = %self.path,
				requires_auth = self.requires_auth,
				attempt = self.index,
				outcome = %self.outcome,
				"Vendor call did not succeed."
			),
		}
	}
}
