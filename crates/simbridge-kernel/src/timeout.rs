//! [`Timeout`] – start time plus interval, with drift-compensated rescheduling.
//!
//! Times are plain `i64` milliseconds on whatever clock the caller uses; the
//! executive feeds wall-clock epoch milliseconds.  A clock that runs
//! backwards always counts as a timeout so a procedure never stalls waiting
//! for a deadline that moved into the future.
//!
//! # Example
//!
//! ```
//! use simbridge_kernel::timeout::Timeout;
//!
//! let mut poll = Timeout::new(1000, 40);
//! assert!(!poll.is_timeout(1020));
//! assert!(poll.is_timeout(1045));
//!
//! // Rebase onto the interval grid; one whole interval elapsed.
//! assert_eq!(poll.reschedule(1045), 1);
//! assert_eq!(poll.start(), 1040);
//! ```

/// An interval timer that reports whether its interval has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    start: i64,
    interval: i64,
    forced: bool,
}

impl Timeout {
    /// Create a timer starting at `start` with the given `interval`.
    ///
    /// An interval of zero (or less) never elapses on its own; only
    /// [`force_timeout`][Self::force_timeout] can trigger it.
    pub fn new(start: i64, interval: i64) -> Self {
        Self {
            start,
            interval,
            forced: false,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// The next point in time at which the interval elapses.
    pub fn deadline(&self) -> i64 {
        self.start.saturating_add(self.interval)
    }

    /// `true` when the interval has elapsed at `now`, when `now` lies before
    /// the start (clock regression), or once after
    /// [`force_timeout`][Self::force_timeout].
    pub fn is_timeout(&mut self, now: i64) -> bool {
        if self.forced {
            self.forced = false;
            return true;
        }
        if self.interval <= 0 {
            return false;
        }
        now < self.start || now - self.start >= self.interval
    }

    /// Rebase the start time.
    pub fn reset(&mut self, start: i64) {
        self.start = start;
    }

    /// Make the next [`is_timeout`][Self::is_timeout] call return `true`.
    pub fn force_timeout(&mut self) {
        self.forced = true;
    }

    /// Advance the start onto the interval grid and return the number of
    /// whole intervals that elapsed since the previous rebase.
    ///
    /// - Whole intervals elapsed: the start moves forward by exactly that
    ///   many intervals, keeping the grid phase (no drift).
    /// - Less than one interval elapsed: the start moves to the next
    ///   boundary and `0` is returned.
    /// - `now` at or before the start: the grid is restarted at `now` and the
    ///   (zero or negative) interval count is returned.
    pub fn reschedule(&mut self, now: i64) -> i64 {
        if self.interval <= 0 {
            return 0;
        }
        let elapsed = now - self.start;
        let frames = elapsed / self.interval;
        if frames > 0 {
            self.start += frames * self.interval;
        } else if elapsed > 0 {
            self.start += self.interval;
        } else {
            self.start = now;
        }
        frames
    }
}
