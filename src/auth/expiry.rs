//! Expiry policy deciding when a cached token must be renewed.

// self
use crate::{_prelude::*, auth::TokenRecord};

/// Default renewal buffer before the vendor-reported expiry (5 minutes).
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::seconds(300);

/// Classification of a record at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenState {
	/// Usable as-is.
	Valid,
	/// Still accepted by the vendor but inside the renewal buffer.
	ExpiringSoon,
	/// Past its hard expiry.
	Expired,
}

/// Renewal buffer applied to vendor-reported expiries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryPolicy {
	/// Tokens are renewed once fewer than this many seconds remain.
	#[serde(with = "buffer_seconds")]
	pub buffer: Duration,
}
impl ExpiryPolicy {
	/// Creates a policy with the provided buffer; negative buffers are clamped to zero.
	pub fn new(buffer: Duration) -> Self {
		Self { buffer: buffer.max(Duration::ZERO) }
	}

	/// Returns `true` when `record` may be used at `now`.
	pub fn is_valid(&self, record: &TokenRecord, now: OffsetDateTime) -> bool {
		is_valid(record, now, self.buffer)
	}

	/// Instant from which the record should be renewed; `None` for unbounded records.
	pub fn refresh_at(&self, record: &TokenRecord) -> Option<OffsetDateTime> {
		record.expires_at.map(|expires_at| expires_at - self.buffer)
	}

	/// Classifies `record` at `now`.
	pub fn state_at(&self, record: &TokenRecord, now: OffsetDateTime) -> TokenState {
		if record.is_expired_at(now) {
			TokenState::Expired
		} else if self.is_valid(record, now) {
			TokenState::Valid
		} else {
			TokenState::ExpiringSoon
		}
	}
}
impl Default for ExpiryPolicy {
	fn default() -> Self {
		Self { buffer: DEFAULT_EXPIRY_BUFFER }
	}
}

/// Returns `true` iff the token is non-empty and either never expires or expires strictly
/// after `now + buffer`.
pub fn is_valid(record: &TokenRecord, now: OffsetDateTime, buffer: Duration) -> bool {
	!record.access_token.is_blank()
		&& record.expires_at.is_none_or(|expires_at| now + buffer < expires_at)
}

mod buffer_seconds {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	use time::Duration;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(|secs| Duration::seconds(secs.max(0)))
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn record_expiring_in(now: OffsetDateTime, secs: i64) -> TokenRecord {
		TokenRecord::builder()
			.access_token("token")
			.issued_at(now)
			.expires_at(now + Duration::seconds(secs))
			.build()
			.expect("Fixture record should build.")
	}

	#[test]
	fn buffer_excludes_tokens_close_to_expiry() {
		let now = macros::datetime!(2025-01-01 12:00 UTC);
		let policy = ExpiryPolicy::default();

		assert!(!policy.is_valid(&record_expiring_in(now, 200), now));
		assert!(!policy.is_valid(&record_expiring_in(now, 300), now));
		assert!(policy.is_valid(&record_expiring_in(now, 301), now));
		assert!(policy.is_valid(&TokenRecord::unbounded("static", now), now));
	}

	#[test]
	fn states_and_refresh_instant() {
		let now = macros::datetime!(2025-01-01 12:00 UTC);
		let policy = ExpiryPolicy::default();
		let record = record_expiring_in(now, 200);

		assert_eq!(policy.state_at(&record, now), TokenState::ExpiringSoon);
		assert_eq!(policy.state_at(&record, now + Duration::seconds(200)), TokenState::Expired);
		assert_eq!(policy.state_at(&record_expiring_in(now, 3600), now), TokenState::Valid);
		assert_eq!(policy.refresh_at(&record), Some(now - Duration::seconds(100)));
	}

	#[test]
	fn policy_deserializes_from_seconds() {
		let policy: ExpiryPolicy =
			serde_json::from_str(r#"{"buffer":60}"#).expect("Policy should deserialize.");

		assert_eq!(policy, ExpiryPolicy::new(Duration::minutes(1)));
		assert_eq!(ExpiryPolicy::new(Duration::seconds(-5)).buffer, Duration::ZERO);
	}
}
