//! Run clock for the scheduler
//!
//! The scheduler operates in discrete ticks of a fixed length in milliseconds.
//! Every phase and every agent reads the same clock, so all timing decisions
//! are expressed as milliseconds since run start.

use serde::{Deserialize, Serialize};

/// Logical clock shared by all phases of a run
///
/// # Example
/// ```
/// use phase_scheduler_core::RunClock;
///
/// let mut clock = RunClock::new(10); // 10ms per tick
/// assert_eq!(clock.current_tick(), 0);
/// assert_eq!(clock.elapsed_ms(), 0);
///
/// clock.advance_tick();
/// assert_eq!(clock.current_tick(), 1);
/// assert_eq!(clock.elapsed_ms(), 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunClock {
    /// Total ticks elapsed since run start
    current_tick: u64,
    /// Length of one tick in milliseconds
    tick_interval_ms: u64,
}

impl RunClock {
    /// Create a new clock
    ///
    /// # Arguments
    /// * `tick_interval_ms` - Length of one scheduler tick in milliseconds
    ///
    /// # Panics
    /// Panics if `tick_interval_ms` is zero. `SchedulerConfig` validation
    /// rejects that value before a clock is ever built.
    pub fn new(tick_interval_ms: u64) -> Self {
        assert!(tick_interval_ms > 0, "tick_interval_ms must be positive");
        Self {
            current_tick: 0,
            tick_interval_ms,
        }
    }

    /// Advance time by one tick
    pub fn advance_tick(&mut self) {
        self.current_tick += 1;
    }

    /// Get the current tick (total ticks since start)
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Milliseconds since run start at the current tick
    ///
    /// # Example
    /// ```
    /// use phase_scheduler_core::RunClock;
    ///
    /// let mut clock = RunClock::new(250);
    /// for _ in 0..4 {
    ///     clock.advance_tick();
    /// }
    /// assert_eq!(clock.elapsed_ms(), 1000);
    /// ```
    pub fn elapsed_ms(&self) -> u64 {
        self.current_tick * self.tick_interval_ms
    }

    /// Length of one tick in milliseconds
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    /// Number of ticks needed to cover `ms` milliseconds (rounded up)
    ///
    /// # Example
    /// ```
    /// use phase_scheduler_core::RunClock;
    ///
    /// let clock = RunClock::new(10);
    /// assert_eq!(clock.ticks_for(25), 3);
    /// assert_eq!(clock.ticks_for(30), 3);
    /// ```
    pub fn ticks_for(&self, ms: u64) -> u64 {
        ms.div_ceil(self.tick_interval_ms)
    }
}
