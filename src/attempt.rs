//! Deadline-bounded retry scheduling.
//!
//! A [`Strategy`] describes how long an operation may keep being retried, how
//! far apart attempts should be, and how many attempts must happen no matter
//! what the deadline says. An [`Attempt`] is the mutable cursor over one run of
//! that strategy.
//!
//! ```
//! use weo_client::attempt::Strategy;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let strategy = Strategy {
//!     total: Duration::from_secs(5),
//!     delay: Duration::from_millis(200),
//!     min: 3,
//! };
//!
//! let result: Result<u32, std::io::Error> = strategy.run(|| async { Ok(42) }).await;
//! assert_eq!(result.unwrap(), 42);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Deadline used when `now + total` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Retry budget for an operation.
///
/// `Strategy` is plain configuration: it is `Copy`, never mutated, and can be
/// shared freely between concurrent runs. Each run gets its own [`Attempt`]
/// from [`Strategy::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Strategy {
    /// Overall deadline, measured from [`Strategy::start`].
    pub total: Duration,

    /// Minimum spacing between the start of consecutive attempts.
    ///
    /// Time spent inside the operation counts towards the spacing, so a slow
    /// operation is retried without any additional sleep.
    pub delay: Duration,

    /// Number of attempts that always happen, even past the deadline.
    pub min: usize,
}

impl Strategy {
    /// A strategy that performs exactly one attempt.
    pub const fn none() -> Self {
        Self {
            total: Duration::ZERO,
            delay: Duration::ZERO,
            min: 1,
        }
    }

    /// Starts a new run of this strategy.
    ///
    /// The first call to [`Attempt::next`] on the returned value always
    /// succeeds immediately.
    pub fn start(&self) -> Attempt {
        let now = Instant::now();
        Attempt {
            strategy: *self,
            last: now,
            end: now
                .checked_add(self.total)
                .unwrap_or_else(|| now + FAR_FUTURE),
            force: true,
            count: 0,
        }
    }

    /// Runs `operation` until it succeeds or the strategy is exhausted.
    ///
    /// Every error is considered retryable. The last error is returned once
    /// the strategy gives up.
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_validator(operation, |_| true).await
    }

    /// Runs `operation` until it succeeds, `should_retry` rejects the latest
    /// error, or the strategy is exhausted.
    pub async fn run_with_validator<F, Fut, T, E, V>(
        &self,
        mut operation: F,
        mut should_retry: V,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        V: FnMut(&E) -> bool,
    {
        let mut attempt = self.start();
        // The first step is forced, so it never reports exhaustion.
        attempt.next().await;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !should_retry(&err) || !attempt.next().await {
                return Err(err);
            }
        }
    }
}

/// Cursor over a single run of a [`Strategy`].
///
/// Not meant to be shared: each retried operation owns exactly one `Attempt`.
#[derive(Debug)]
pub struct Attempt {
    strategy: Strategy,
    last: Instant,
    end: Instant,
    force: bool,
    count: usize,
}

impl Attempt {
    /// Waits until the next attempt may start and reports whether it should.
    ///
    /// Returns `false` once the deadline has passed and at least
    /// [`Strategy::min`] attempts have been made. The first call never sleeps.
    pub async fn next(&mut self) -> bool {
        let mut now = Instant::now();
        let sleep = self.next_sleep(now);
        if !self.force && self.past_deadline(now, sleep) && self.strategy.min <= self.count {
            return false;
        }
        self.force = false;
        if !sleep.is_zero() && self.count > 0 {
            tokio::time::sleep(sleep).await;
            now = Instant::now();
        }
        self.count += 1;
        self.last = now;
        true
    }

    /// Reports whether another attempt would be made, without sleeping or
    /// counting it.
    ///
    /// When the answer is `true` because the deadline has not yet passed, the
    /// next call to [`Attempt::next`] is reserved: it will proceed even if the
    /// deadline passes in the meantime.
    pub fn has_next(&mut self) -> bool {
        if self.force || self.strategy.min > self.count {
            return true;
        }
        let now = Instant::now();
        if !self.past_deadline(now, self.next_sleep(now)) {
            self.force = true;
            return true;
        }
        false
    }

    /// Number of attempts started so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether an attempt started after `sleep` would begin at or past the
    /// deadline. A sleep too long to represent always is.
    fn past_deadline(&self, now: Instant, sleep: Duration) -> bool {
        now.checked_add(sleep).map_or(true, |at| at >= self.end)
    }

    fn next_sleep(&self, now: Instant) -> Duration {
        self.strategy
            .delay
            .saturating_sub(now.saturating_duration_since(self.last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[tokio::test(start_paused = true)]
    async fn test_min_attempts_past_deadline() {
        let strategy = Strategy {
            total: Duration::ZERO,
            delay: Duration::ZERO,
            min: 4,
        };
        let calls = Cell::new(0);

        let result: Result<(), &str> = strategy
            .run(|| {
                calls.set(calls.get() + 1);
                async { Err("boom") }
            })
            .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_runs_once() {
        let calls = Cell::new(0);

        let _: Result<(), ()> = Strategy::none()
            .run(|| {
                calls.set(calls.get() + 1);
                async { Err(()) }
            })
            .await;

        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_not_delayed() {
        let strategy = Strategy {
            total: Duration::from_secs(10),
            delay: Duration::from_secs(1),
            min: 0,
        };
        let start = Instant::now();

        let mut attempt = strategy.start();
        assert!(attempt.next().await);
        assert_eq!(Instant::now(), start);
        assert_eq!(attempt.count(), 1);

        assert!(attempt.next().await);
        assert!(Instant::now() - start >= Duration::from_secs(1));
        assert_eq!(attempt.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_spaced_by_delay() {
        let strategy = Strategy {
            total: Duration::from_millis(100),
            delay: Duration::from_millis(10),
            min: 0,
        };
        let starts = RefCell::new(Vec::new());

        let _: Result<(), ()> = strategy
            .run(|| {
                starts.borrow_mut().push(Instant::now());
                async { Err(()) }
            })
            .await;

        let starts = starts.into_inner();
        assert!(starts.len() > 1);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_exhausts_after_min() {
        let strategy = Strategy {
            total: Duration::from_millis(100),
            delay: Duration::from_millis(10),
            min: 3,
        };
        let start = Instant::now();
        let calls = Cell::new(0);

        let result: Result<(), usize> = strategy
            .run(|| {
                calls.set(calls.get() + 1);
                let call = calls.get();
                async move {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Err(call)
                }
            })
            .await;

        assert_eq!(result, Err(3));
        assert_eq!(calls.get(), 3);
        assert!(Instant::now() - start >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validator_stops_retrying() {
        let strategy = Strategy {
            total: Duration::from_secs(10),
            delay: Duration::from_millis(10),
            min: 5,
        };
        let calls = Cell::new(0);

        let result: Result<(), &str> = strategy
            .run_with_validator(
                || {
                    calls.set(calls.get() + 1);
                    let err = if calls.get() < 2 { "transient" } else { "fatal" };
                    async move { Err(err) }
                },
                |err| *err == "transient",
            )
            .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_immediately() {
        let strategy = Strategy {
            total: Duration::from_secs(10),
            delay: Duration::from_millis(10),
            min: 5,
        };
        let calls = Cell::new(0);

        let result: Result<&str, ()> = strategy
            .run(|| {
                calls.set(calls.get() + 1);
                async { Ok("done") }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probing_does_not_consume() {
        let strategy = Strategy {
            total: Duration::ZERO,
            delay: Duration::ZERO,
            min: 2,
        };
        let mut attempt = strategy.start();

        assert!(attempt.has_next());
        assert!(attempt.has_next());
        assert!(attempt.next().await);
        assert_eq!(attempt.count(), 1);

        assert!(attempt.has_next());
        assert!(attempt.next().await);
        assert_eq!(attempt.count(), 2);

        assert!(!attempt.has_next());
        assert!(!attempt.next().await);
        assert_eq!(attempt.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_reserves_attempt_past_deadline() {
        let strategy = Strategy {
            total: Duration::from_secs(1),
            delay: Duration::ZERO,
            min: 0,
        };
        let mut attempt = strategy.start();
        assert!(attempt.next().await);

        assert!(attempt.has_next());
        tokio::time::advance(Duration::from_secs(2)).await;

        // Reserved by the probe above.
        assert!(attempt.next().await);
        assert!(!attempt.has_next());
        assert!(!attempt.next().await);
        assert_eq!(attempt.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_total() {
        let strategy = Strategy {
            total: Duration::MAX,
            delay: Duration::ZERO,
            min: 0,
        };
        let calls = Cell::new(0);

        let result: Result<usize, usize> = strategy
            .run(|| {
                calls.set(calls.get() + 1);
                let call = calls.get();
                async move { if call < 3 { Err(call) } else { Ok(call) } }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert!(strategy.start().has_next());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_delay_stops_after_min() {
        let strategy = Strategy {
            total: Duration::ZERO,
            delay: Duration::MAX,
            min: 1,
        };
        let mut attempt = strategy.start();

        assert!(attempt.next().await);
        assert!(!attempt.has_next());
        assert!(!attempt.next().await);
        assert_eq!(attempt.count(), 1);
    }
}
