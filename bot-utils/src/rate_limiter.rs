//! Token-bucket rate limiter gating outbound sends.
//!
//! Unlike the sliding-window limiter an earlier generation of this codebase
//! used (a `VecDeque<Instant>` of past sends, pruned on each call), this is a
//! textbook token bucket: tokens accumulate continuously at `refill_per_sec`
//! up to `capacity`, and `wait` blocks only long enough for the next token to
//! become available. `wait` must be called before every outbound attempt,
//! including retries, or a retry storm can exceed the remote API's rate
//! limit.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::cancel::CancellationToken;

struct State {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<State>,
}

impl RateLimiter {
    /// `rate` tokens are added per second, up to `burst` tokens banked.
    pub fn new(rate: f64, burst: u32) -> Self {
        assert!(rate > 0.0, "rate must be positive");
        assert!(burst >= 1, "burst must be at least 1");

        Self {
            capacity: burst as f64,
            refill_per_sec: rate,
            state: Mutex::new(State {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Blocks until a token is available, `cancel` fires, or `deadline` elapses.
    ///
    /// Returns `false` if `cancel` fired (or the deadline passed) before a
    /// token became available.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        loop {
            let wait_for = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return true;
                }

                let missing = 1.0 - state.tokens;
                Duration::from_secs_f64(missing / self.refill_per_sec)
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = tokio::time::sleep(wait_for) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_immediate() {
        let limiter = RateLimiter::new(1.0, 3);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.wait(&cancel).await);
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exhausted_bucket_waits() {
        let limiter = RateLimiter::new(20.0, 1);
        let cancel = CancellationToken::new();

        assert!(limiter.wait(&cancel).await);
        let start = Instant::now();
        assert!(limiter.wait(&cancel).await);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(0.1, 1);
        let cancel = CancellationToken::new();

        assert!(limiter.wait(&cancel).await);

        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });

        assert!(!limiter.wait(&cancel).await);
    }
}
