//! Token-bucket rate limiter.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::cancel::{Context, SleepOutcome};
use crate::error::SshmError;

struct State {
	tokens: f64,
	last_refill: Instant,
}

pub struct RateLimiter {
	max_tokens: f64,
	refill_rate_per_second: f64,
	block_on_exhaust: bool,
	state: Mutex<State>,
}

impl RateLimiter {
	pub fn new(max_tokens: f64, refill_rate_per_second: f64, block_on_exhaust: bool, initial_tokens: f64) -> Self {
		RateLimiter {
			max_tokens,
			refill_rate_per_second,
			block_on_exhaust,
			state: Mutex::new(State { tokens: initial_tokens.min(max_tokens), last_refill: Instant::now() }),
		}
	}

	fn refill(state: &mut State, max_tokens: f64, rate: f64) {
		let now = Instant::now();
		let elapsed = now.duration_since(state.last_refill).as_secs_f64();
		if elapsed > 0.0 {
			state.tokens = (state.tokens + elapsed * rate).min(max_tokens);
			state.last_refill = now;
		}
	}

	/// Refills, then deducts `n` tokens and returns `true` if enough are
	/// available; otherwise leaves the bucket untouched and returns `false`.
	pub fn allow(&self, n: f64) -> bool {
		let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
		Self::refill(&mut state, self.max_tokens, self.refill_rate_per_second);
		if state.tokens >= n {
			state.tokens -= n;
			true
		} else {
			false
		}
	}

	/// Only valid when `block_on_exhaust` is true. Refills, computes how
	/// long until `n` tokens would be available, and sleeps that long or
	/// until `ctx` cancels/expires, looping until tokens are granted.
	pub async fn wait(&self, ctx: &mut Context, n: f64) -> Result<(), SshmError> {
		if !self.block_on_exhaust {
			return Err(SshmError::RateLimited { op: "wait".into() });
		}
		loop {
			ctx.check("rate_limiter.wait")?;
			let needed_wait = {
				let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
				Self::refill(&mut state, self.max_tokens, self.refill_rate_per_second);
				if state.tokens >= n {
					state.tokens -= n;
					None
				} else {
					let deficit = n - state.tokens;
					Some(Duration::from_secs_f64(deficit / self.refill_rate_per_second))
				}
			};
			match needed_wait {
				None => return Ok(()),
				Some(dur) => {
					trace!(?dur, "rate limiter waiting for tokens");
					match ctx.sleep_or_cancel(dur).await {
						SleepOutcome::Elapsed => continue,
						SleepOutcome::Expired => {
							return Err(SshmError::Timeout { op: "rate_limiter.wait".into() })
						}
						SleepOutcome::Canceled => {
							return Err(SshmError::Canceled { op: "rate_limiter.wait".into() })
						}
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allow_deducts_available_tokens() {
		let rl = RateLimiter::new(10.0, 1.0, false, 10.0);
		assert!(rl.allow(5.0));
		assert!(rl.allow(5.0));
		assert!(!rl.allow(1.0));
	}

	#[test]
	fn allow_refills_over_time() {
		let rl = RateLimiter::new(10.0, 1000.0, false, 0.0);
		std::thread::sleep(Duration::from_millis(20));
		assert!(rl.allow(1.0));
	}

	#[test]
	fn allow_never_exceeds_max() {
		let rl = RateLimiter::new(5.0, 1000.0, false, 5.0);
		std::thread::sleep(Duration::from_millis(50));
		assert!(rl.allow(5.0));
		assert!(!rl.allow(1.0));
	}

	#[tokio::test]
	async fn wait_fails_immediately_when_not_blocking() {
		let rl = RateLimiter::new(1.0, 1.0, false, 0.0);
		let mut ctx = Context::background();
		let err = rl.wait(&mut ctx, 1.0).await.unwrap_err();
		assert!(matches!(err, SshmError::RateLimited { .. }));
	}

	#[tokio::test]
	async fn wait_blocks_then_succeeds() {
		let rl = RateLimiter::new(1.0, 50.0, true, 0.0);
		let mut ctx = Context::background();
		rl.wait(&mut ctx, 1.0).await.unwrap();
	}

	#[tokio::test]
	async fn wait_respects_cancellation() {
		let rl = RateLimiter::new(1.0, 0.001, true, 0.0);
		let (mut ctx, handle) = Context::cancelable();
		handle.cancel();
		let err = rl.wait(&mut ctx, 1.0).await.unwrap_err();
		assert!(matches!(err, SshmError::Canceled { .. }));
	}
}

// vim: ts=4
