//! Injected clock and timeout guard.
//!
//! Every blocking operation in this crate is a caller-driven retry loop: no
//! mutex, no async. The loop is bounded by a [`TimeoutGuard`] sampled from a
//! [`Clock`], so "wait for condition or timeout" is deterministic under test
//! ([`ManualClock`]) and wall-clock-driven in production ([`MonotonicClock`]).

use crate::error::{Result, TraceError};
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonic time source threaded through every retry loop.
pub trait Clock {
    /// Time since an arbitrary fixed epoch. Must never go backwards.
    fn now(&self) -> Duration;

    /// Pause between retries. A zero duration is a pure spin hint.
    fn sleep(&self, dur: Duration);
}

/// Wall-clock [`Clock`] backed by [`Instant`].
pub struct MonotonicClock {
    base: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Duration {
        self.base.elapsed()
    }

    fn sleep(&self, dur: Duration) {
        if dur.is_zero() {
            core::hint::spin_loop();
        } else {
            std::thread::sleep(dur);
        }
    }
}

/// Hand-advanced [`Clock`] for deterministic tests.
///
/// `sleep` advances the clock instead of blocking, so a retry loop with a
/// nonzero retry delay makes progress toward its deadline without any real
/// time passing.
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, dur: Duration) {
        self.now.set(self.now.get() + dur);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
    }
}

/// Elapsed-time budget for one blocking call-chain.
///
/// Created once at the top of `reserve`/`flush`/`get` and consulted on every
/// retry iteration. The budget is immutable; only the elapsed sample moves.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    start: Duration,
    budget: Option<Duration>,
}

impl TimeoutGuard {
    /// Start a guard with the given budget. `Duration::MAX` means no limit.
    pub fn new<C: Clock>(clock: &C, budget: Duration) -> Self {
        Self {
            start: clock.now(),
            budget: (budget != Duration::MAX).then_some(budget),
        }
    }

    /// Time spent inside this call-chain so far.
    pub fn elapsed<C: Clock>(&self, clock: &C) -> Duration {
        clock.now().saturating_sub(self.start)
    }

    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        match self.budget {
            Some(budget) => self.elapsed(clock) >= budget,
            None => false,
        }
    }

    /// Ok while the budget holds, `TraceError::Timeout` once it is spent.
    pub fn check<C: Clock>(&self, clock: &C) -> Result<()> {
        if self.expired(clock) {
            Err(TraceError::Timeout)
        } else {
            Ok(())
        }
    }
}
