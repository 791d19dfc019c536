//! Cancellation context for potentially-blocking public operations.
//!
//! Every potentially-blocking operation (`ping`, `launch_session`, the
//! rate limiter's `wait`, LLM requests) accepts a [`Context`] carrying a
//! deadline and an explicit cancel signal. Cancellation never partially
//! applies a write: if the signal fires after a commit point (e.g. the
//! metadata rename step) the write stands and the error is simply
//! returned on the way out.

use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::SshmError;

/// A deadline plus a cooperative cancel signal, threaded through blocking
/// operations so callers can bound wait time and abort in flight.
#[derive(Clone)]
pub struct Context {
	deadline: Option<Instant>,
	cancel: watch::Receiver<bool>,
}

impl Context {
	/// A context with no deadline and no way to be canceled early.
	pub fn background() -> Self {
		let (_tx, rx) = watch::channel(false);
		Context { deadline: None, cancel: rx }
	}

	/// A context that expires `timeout` from now.
	pub fn with_timeout(timeout: Duration) -> Self {
		let mut ctx = Context::background();
		ctx.deadline = Some(Instant::now() + timeout);
		ctx
	}

	/// Pair a context with the handle used to cancel it.
	pub fn cancelable() -> (Self, CancelHandle) {
		let (tx, rx) = watch::channel(false);
		(Context { deadline: None, cancel: rx }, CancelHandle { tx })
	}

	pub fn is_canceled(&self) -> bool {
		*self.cancel.borrow()
	}

	pub fn is_expired(&self) -> bool {
		matches!(self.deadline, Some(d) if Instant::now() >= d)
	}

	/// Remaining time until the deadline, or `None` if unbounded.
	pub fn remaining(&self) -> Option<Duration> {
		self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
	}

	/// Check the context for cancellation or expiry, translating either into
	/// the corresponding distinct error kind (`Canceled` is distinct from
	/// `Timeout`).
	pub fn check(&self, op: &str) -> Result<(), SshmError> {
		if self.is_canceled() {
			return Err(SshmError::Canceled { op: op.to_string() });
		}
		if self.is_expired() {
			return Err(SshmError::Timeout { op: op.to_string() });
		}
		Ok(())
	}

	/// Sleep until either `dur` elapses, the deadline is hit, or the context
	/// is canceled — whichever comes first. Returns the reason.
	pub async fn sleep_or_cancel(&mut self, dur: Duration) -> SleepOutcome {
		let bounded = match self.remaining() {
			Some(r) if r < dur => r,
			_ => dur,
		};
		tokio::select! {
			_ = tokio::time::sleep(bounded) => {
				if self.is_expired() { SleepOutcome::Expired } else { SleepOutcome::Elapsed }
			}
			_ = self.cancel.changed() => SleepOutcome::Canceled,
		}
	}
}

#[derive(Debug, PartialEq, Eq)]
pub enum SleepOutcome {
	Elapsed,
	Expired,
	Canceled,
}

/// Handle used by the operation's owner to fire cancellation independently
/// of the deadline.
pub struct CancelHandle {
	tx: watch::Sender<bool>,
}

impl CancelHandle {
	pub fn cancel(&self) {
		let _ = self.tx.send(true);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn background_never_expires_or_cancels() {
		let ctx = Context::background();
		assert!(!ctx.is_canceled());
		assert!(!ctx.is_expired());
		assert!(ctx.check("op").is_ok());
	}

	#[test]
	fn timeout_context_expires() {
		let ctx = Context::with_timeout(Duration::from_millis(0));
		std::thread::sleep(Duration::from_millis(5));
		assert!(ctx.is_expired());
		match ctx.check("op") {
			Err(SshmError::Timeout { .. }) => {}
			other => panic!("expected Timeout, got {other:?}"),
		}
	}

	#[test]
	fn cancel_handle_fires_independently_of_deadline() {
		let (ctx, handle) = Context::cancelable();
		assert!(!ctx.is_canceled());
		handle.cancel();
		assert!(ctx.is_canceled());
		match ctx.check("op") {
			Err(SshmError::Canceled { .. }) => {}
			other => panic!("expected Canceled, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn sleep_or_cancel_respects_short_deadline() {
		let mut ctx = Context::with_timeout(Duration::from_millis(5));
		let outcome = ctx.sleep_or_cancel(Duration::from_secs(10)).await;
		assert_eq!(outcome, SleepOutcome::Expired);
	}

	#[tokio::test]
	async fn sleep_or_cancel_returns_canceled_on_signal() {
		let (mut ctx, handle) = Context::cancelable();
		let sleeper = tokio::spawn(async move { ctx.sleep_or_cancel(Duration::from_secs(10)).await });
		tokio::time::sleep(Duration::from_millis(5)).await;
		handle.cancel();
		let outcome = sleeper.await.unwrap();
		assert_eq!(outcome, SleepOutcome::Canceled);
	}
}

// vim: ts=4
