//! Per-session counters for token exchanges, flight joins, and evictions.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for session activity.
#[derive(Debug, Default)]
pub struct SessionMetrics {
	authentications: AtomicU64,
	refreshes: AtomicU64,
	joins: AtomicU64,
	failures: AtomicU64,
	invalidations: AtomicU64,
}
impl SessionMetrics {
	/// Returns the number of successful login exchanges performed by this session.
	pub fn authentications(&self) -> u64 {
		self.authentications.load(Ordering::Relaxed)
	}

	/// Returns the number of successful refresh-token exchanges performed by this session.
	pub fn refreshes(&self) -> u64 {
		self.refreshes.load(Ordering::Relaxed)
	}

	/// Returns how often a caller awaited another caller's in-flight exchange.
	pub fn joins(&self) -> u64 {
		self.joins.load(Ordering::Relaxed)
	}

	/// Returns the number of failed exchanges led by this session.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	/// Returns the number of cache evictions requested by this session.
	pub fn invalidations(&self) -> u64 {
		self.invalidations.load(Ordering::Relaxed)
	}

	pub(crate) fn record_authentication(&self) {
		self.authentications.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh(&self) {
		self.refreshes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_join(&self) {
		self.joins.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_invalidation(&self) {
		self.invalidations.fetch_add(1, Ordering::Relaxed);
	}
}
