//! Caller-supplied deadline and cancellation signal.
//!
//! Every network call (login, refresh, vendor request) and every backoff sleep runs through
//! [`RequestContext::run`], which races the work against the context's cancellation token and
//! deadline.

// crates.io
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Deadline and cancellation scope for one logical operation.
///
/// Contexts are cheap to clone; clones share the cancellation token. Use
/// [`RequestContext::child`] to derive a context that can be cancelled independently of
/// its parent while still observing the parent's cancellation.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
	deadline: Option<Instant>,
	cancel: CancellationToken,
}
impl RequestContext {
	/// Creates a context without deadline.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets a deadline `timeout` from now, keeping the earlier deadline when one already exists.
	pub fn with_timeout(self, timeout: StdDuration) -> Self {
		self.with_deadline(Instant::now() + timeout)
	}

	/// Sets an absolute deadline, keeping the earlier deadline when one already exists.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));

		self
	}

	/// Replaces the cancellation token.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = token;

		self
	}

	/// Derives a child context sharing the deadline and observing this context's cancellation.
	pub fn child(&self) -> Self {
		Self { deadline: self.deadline, cancel: self.cancel.child_token() }
	}

	/// Returns the cancellation token.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Cancels the context (and its children).
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Returns `true` once the context was cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Returns the deadline, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Time left before the deadline; `None` means unbounded.
	pub fn remaining(&self) -> Option<StdDuration> {
		self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
	}

	/// Drives `fut` until it completes, the context is cancelled, or the deadline passes.
	pub async fn run<T, F>(&self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		if self.cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		match self.deadline {
			Some(deadline) => tokio::select! {
				biased;
				_ = self.cancel.cancelled() => Err(Error::Cancelled),
				outcome = time::timeout_at(deadline, fut) =>
					outcome.unwrap_or(Err(Error::DeadlineExceeded)),
			},
			None => tokio::select! {
				biased;
				_ = self.cancel.cancelled() => Err(Error::Cancelled),
				outcome = fut => outcome,
			},
		}
	}

	/// Cancellable sleep used between retries.
	pub async fn sleep(&self, delay: StdDuration) -> Result<()> {
		self.run(async move {
			time::sleep(delay).await;

			Ok(())
		})
		.await
	}

	/// Clamps a per-call timeout to the time left before the deadline.
	pub(crate) fn clamp_timeout(&self, timeout: StdDuration) -> StdDuration {
		self.remaining().map_or(timeout, |left| left.min(timeout))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn deadline_interrupts_slow_work() {
		let ctx = RequestContext::new().with_timeout(StdDuration::from_secs(5));
		let err = ctx
			.run(async {
				time::sleep(StdDuration::from_secs(60)).await;

				Ok(())
			})
			.await
			.expect_err("Work outliving the deadline should fail.");

		assert!(matches!(err, Error::DeadlineExceeded));
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_interrupts_sleep() {
		let ctx = RequestContext::new();
		let canceller = ctx.clone();
		let handle = tokio::spawn(async move { ctx.sleep(StdDuration::from_secs(3600)).await });

		time::sleep(StdDuration::from_millis(10)).await;
		canceller.cancel();

		let outcome = handle.await.expect("Sleep task should not panic.");

		assert!(matches!(outcome, Err(Error::Cancelled)));
	}

	#[tokio::test]
	async fn already_cancelled_context_never_polls_work() {
		// std
		use std::sync::atomic::{AtomicBool, Ordering};

		let ctx = RequestContext::new();
		let polled = AtomicBool::new(false);

		ctx.cancel();

		let outcome = ctx
			.run(async {
				polled.store(true, Ordering::SeqCst);

				Ok(())
			})
			.await;

		assert!(matches!(outcome, Err(Error::Cancelled)));
		assert!(!polled.load(Ordering::SeqCst));
	}

	#[tokio::test(start_paused = true)]
	async fn child_observes_parent_and_keeps_earliest_deadline() {
		let parent = RequestContext::new().with_timeout(StdDuration::from_secs(10));
		let child = parent.child().with_timeout(StdDuration::from_secs(60));

		assert_eq!(child.deadline(), parent.deadline());
		assert_eq!(child.clamp_timeout(StdDuration::from_secs(30)), StdDuration::from_secs(10));

		parent.cancel();

		assert!(child.is_cancelled());
	}
}
