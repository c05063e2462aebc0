//! Observability helpers for session operations.
//!
//! Spans are always emitted through `tracing` as `vendor_session.op` with the `op` and `stage`
//! fields; the host service decides whether a subscriber is installed.
//!
//! # Feature Flags
//!
//! - Enable `metrics` to increment the `vendor_session_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Session operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
	/// Cache lookup plus authentication when needed.
	EnsureToken,
	/// Explicit login with a credential pair.
	Authenticate,
	/// Forced token renewal.
	Refresh,
	/// Cache eviction.
	Invalidate,
	/// One logical vendor request through the executor.
	Execute,
}
impl Op {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Op::EnsureToken => "ensure_token",
			Op::Authenticate => "authenticate",
			Op::Refresh => "refresh",
			Op::Invalidate => "invalidate",
			Op::Execute => "execute",
		}
	}
}
impl Display for Op {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}

	/// Maps a result onto its outcome label.
	pub fn of<T>(result: &Result<T>) -> Self {
		if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure }
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside an [`OpSpan`], recording attempt and outcome metrics around it.
pub(crate) async fn observe<T, F>(op: Op, stage: &'static str, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	let span = OpSpan::new(op, stage);

	record_op_outcome(op, OpOutcome::Attempt);

	let result = span.instrument(fut).await;

	record_op_outcome(op, OpOutcome::of(&result));

	result
}
