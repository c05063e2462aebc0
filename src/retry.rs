//! Bounded exponential backoff shared by logins, refreshes, and vendor requests.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, context::RequestContext, error::TransportError};

/// Retry configuration for retryable ([`TransportError`]) failures.
///
/// The delay before retry `n` (0-based) is `base_delay * 2^n`, raised to any vendor
/// `Retry-After` hint, capped at `max_delay`, then stretched by up to `jitter` (a fraction).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts per call, including the first one.
	pub max_retries: u32,
	/// Base backoff delay.
	#[serde(with = "secs_f64")]
	pub base_delay: StdDuration,
	/// Upper bound for a single delay.
	#[serde(with = "secs_f64")]
	pub max_delay: StdDuration,
	/// Random stretch applied to each delay, as a fraction (`0.0` disables jitter).
	pub jitter: f64,
}
impl RetryPolicy {
	/// Policy performing a single attempt.
	pub fn none() -> Self {
		Self { max_retries: 1, ..Default::default() }
	}

	/// Sets the total attempt count (clamped to at least one).
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries.max(1);

		self
	}

	/// Sets the base delay.
	pub fn with_base_delay(mut self, base_delay: StdDuration) -> Self {
		self.base_delay = base_delay;

		self
	}

	/// Sets the delay cap.
	pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
		self.max_delay = max_delay;

		self
	}

	/// Sets the jitter fraction (clamped to `0.0..=1.0`).
	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };

		self
	}

	/// Computes the delay before retry `retry` (0-based), honoring an optional vendor hint.
	pub fn delay_for(&self, retry: u32, hint: Option<StdDuration>) -> StdDuration {
		let factor = 2_u32.saturating_pow(retry);
		let backoff = self.base_delay.saturating_mul(factor);
		let delay = hint.map_or(backoff, |hint| backoff.max(hint)).min(self.max_delay);

		if self.jitter > 0.0 {
			let stretch = rand::rng().random_range(0.0..=self.jitter);

			delay.mul_f64(1.0 + stretch).min(self.max_delay)
		} else {
			delay
		}
	}

	fn attempts(&self) -> u32 {
		self.max_retries.max(1)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: StdDuration::from_secs(1),
			max_delay: StdDuration::from_secs(60),
			jitter: 0.0,
		}
	}
}

/// Runs `attempt` until it succeeds, fails terminally, or the policy is exhausted.
///
/// Each attempt and each backoff sleep is bound to `ctx`. Only retryable failures are repeated;
/// exhaustion yields [`TransportError::Exhausted`] wrapping the last failure.
pub(crate) async fn run<T, F, Fut>(
	policy: &RetryPolicy,
	ctx: &RequestContext,
	label: &'static str,
	mut attempt: F,
) -> Result<T>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let attempts = policy.attempts();
	let mut last = TransportError::Timeout;

	for index in 0..attempts {
		if index > 0 {
			let delay = policy.delay_for(index - 1, last.retry_after_hint());

			tracing::warn!(
				label,
				attempt = index + 1,
				max = attempts,
				delay_ms = delay.as_millis() as u64,
				error = %last,
				"Retrying after a transient vendor failure."
			);

			ctx.sleep(delay).await?;
		}

		match ctx.run(attempt(index)).await {
			Ok(value) => return Ok(value),
			Err(e) if e.is_retryable() =>
				if let Some(transport) = e.into_transport() {
					last = transport;
				},
			Err(e) => return Err(e),
		}
	}

	Err(TransportError::Exhausted { attempts, last: Box::new(last) }.into())
}

impl TransportError {
	fn retry_after_hint(&self) -> Option<StdDuration> {
		match self {
			Self::Server { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}

mod secs_f64 {
	// std
	use std::time::Duration;
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_f64(value.as_secs_f64())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let secs = f64::deserialize(deserializer)?;

		Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
	}
}
