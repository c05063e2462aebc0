//! Session-level error types shared across the cache, session manager, and request executor.
//!
//! The public taxonomy is closed: callers match on [`Error`] instead of catching a broad
//! hierarchy. Retryable failures ([`TransportError`]) are absorbed by the executor up to its
//! retry ceiling, so only terminal outcomes ever reach a caller.

// self
use crate::_prelude::*;

/// Session-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shareable error source; single-flight outcomes are cloned to every waiter.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

const BODY_PREVIEW_LIMIT: usize = 256;

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Network or 5xx failure; retryable until the retry ceiling is reached.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Vendor rejected the credentials, or a second 401 followed a fresh login.
	#[error("Vendor rejected the credentials: {reason}.")]
	Authentication {
		/// Vendor- or session-supplied reason string.
		reason: String,
		/// HTTP status code, when the rejection came from a response.
		status: Option<u16>,
	},
	/// Vendor rejected the request shape (4xx other than the handled 401 path).
	#[error("Vendor rejected the request with status {status}: {message}.")]
	Client {
		/// HTTP status code returned by the vendor.
		status: u16,
		/// Vendor-reported message.
		message: String,
		/// Decoded error payload, when the vendor returned JSON.
		payload: Option<serde_json::Value>,
	},
	/// Vendor returned a 2xx payload that could not be decoded.
	#[error("Vendor returned an undecodable payload with status {status}: {preview}.")]
	MalformedResponse {
		/// HTTP status code returned by the vendor.
		status: u16,
		/// Truncated body preview for messages.
		preview: String,
		/// Raw body kept for diagnostics.
		body: Arc<[u8]>,
		/// Structured decoding failure, including the failing JSON path.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
	},
	/// The caller cancelled the operation (or the in-flight login it joined).
	#[error("Operation was cancelled.")]
	Cancelled,
	/// The caller-supplied deadline elapsed.
	#[error("Operation exceeded its deadline.")]
	DeadlineExceeded,
}
impl Error {
	/// Returns `true` if the failure may be retried with backoff.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transport(err) if err.is_retryable())
	}

	/// Returns the vendor-suggested delay before retrying, if any.
	pub fn retry_after(&self) -> Option<StdDuration> {
		match self {
			Self::Transport(TransportError::Server { retry_after, .. }) => *retry_after,
			_ => None,
		}
	}

	/// Returns the HTTP status associated with the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Authentication { status, .. } => *status,
			Self::Client { status, .. } | Self::MalformedResponse { status, .. } => Some(*status),
			Self::Transport(TransportError::Server { status, .. }) => Some(*status),
			_ => None,
		}
	}

	pub(crate) fn authentication(reason: impl Into<String>) -> Self {
		Self::Authentication { reason: reason.into(), status: None }
	}

	pub(crate) fn malformed(
		status: u16,
		body: &[u8],
		source: serde_path_to_error::Error<serde_json::Error>,
	) -> Self {
		Self::MalformedResponse {
			status,
			preview: body_preview(body),
			body: Arc::from(body),
			source: Arc::new(source),
		}
	}

	pub(crate) fn into_transport(self) -> Option<TransportError> {
		match self {
			Self::Transport(err) => Some(err),
			_ => None,
		}
	}
}

/// Configuration and validation failures raised before any network call.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// A base URL or endpoint path cannot be parsed.
	#[error("Endpoint URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A request body could not be encoded.
	#[error("Request body could not be encoded.")]
	RequestEncode {
		/// Underlying serialization failure.
		#[source]
		source: Arc<serde_json::Error>,
	},
	/// The session has no authenticator to obtain tokens with.
	#[error("Session has no authenticator configured.")]
	MissingAuthenticator,
	/// An authenticated request was issued through an executor without a session.
	#[error("Request requires authentication but the executor has no session.")]
	MissingSession,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<url::ParseError> for ConfigError {
	fn from(source: url::ParseError) -> Self {
		Self::InvalidUrl { source }
	}
}
impl From<serde_json::Error> for ConfigError {
	fn from(e: serde_json::Error) -> Self {
		Self::RequestEncode { source: Arc::new(e) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, timeouts, 5xx).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure (DNS, TCP, TLS, reset).
	#[error("Network error occurred while calling the vendor.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// The call did not complete within its timeout.
	#[error("Vendor call timed out.")]
	Timeout,
	/// Vendor answered with a 5xx status.
	#[error("Vendor returned server error {status}: {message}.")]
	Server {
		/// HTTP status code.
		status: u16,
		/// Vendor-reported message.
		message: String,
		/// Retry-After hint, if supplied.
		retry_after: Option<StdDuration>,
	},
	/// Every retry was used; wraps the last underlying failure.
	#[error("Vendor call failed after {attempts} attempts.")]
	Exhausted {
		/// Number of attempts performed.
		attempts: u32,
		/// Last underlying failure.
		#[source]
		last: Box<TransportError>,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}

	/// Returns `true` for failures the retry loop may repeat.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::Exhausted { .. })
	}

	/// Returns the last underlying failure, unwrapping [`TransportError::Exhausted`].
	pub fn last(&self) -> &TransportError {
		match self {
			Self::Exhausted { last, .. } => last.last(),
			other => other,
		}
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

pub(crate) fn body_preview(body: &[u8]) -> String {
	let text = String::from_utf8_lossy(body);

	if text.chars().count() <= BODY_PREVIEW_LIMIT {
		return text.into_owned();
	}

	let mut buf = text.chars().take(BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}
