use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::timer_lock::error::TimerLockError;
use crate::timer_lock::event::TimerEvent;

/// Default interval between ticks
pub const DEFAULT_GRANULARITY: Duration = Duration::from_millis(1000);

/// Lock timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Running,
    Finished,
}

/// Countdown state machine
///
/// Remaining time is derived from the number of ticks applied times the
/// granularity, never from wall-clock deltas. Every mutating call returns the
/// events it produced, in emission order; the caller is responsible for
/// publishing them.
#[derive(Debug, Clone)]
pub struct LockTimer {
    state: TimerState,
    total_duration_ms: u64,
    remaining_ms: u64,
    started_at: Option<DateTime<Utc>>,
    granularity_ms: u64,
}

impl LockTimer {
    /// Create an idle timer with the given tick granularity
    pub fn new(granularity: Duration) -> Self {
        Self {
            state: TimerState::Idle,
            total_duration_ms: 0,
            remaining_ms: 0,
            started_at: None,
            granularity_ms: (granularity.as_millis() as u64).max(1),
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.total_duration_ms
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn granularity(&self) -> Duration {
        Duration::from_millis(self.granularity_ms)
    }

    /// Start a new run
    ///
    /// A run already in progress is stopped first, so the returned events are
    /// either `[Started]` or `[Stopped, Started]`. A zero duration is rejected
    /// and leaves the timer untouched.
    pub fn start(&mut self, duration_ms: u64) -> Result<Vec<TimerEvent>, TimerLockError> {
        if duration_ms == 0 {
            return Err(TimerLockError::InvalidDuration);
        }

        let mut events = Vec::with_capacity(2);
        match self.state {
            TimerState::Running => events.extend(self.stop()),
            // The finished run was never reset, nobody is waiting on it
            TimerState::Finished => self.reset(),
            TimerState::Idle => {}
        }

        self.state = TimerState::Running;
        self.total_duration_ms = duration_ms;
        self.remaining_ms = duration_ms;
        self.started_at = Some(Utc::now());

        events.push(TimerEvent::Started { duration_ms });
        Ok(events)
    }

    /// Apply one granularity unit
    ///
    /// Ignored unless running. The tick that reaches zero emits the final
    /// `Tick { remaining_ms: 0 }` followed by exactly one `Finished`.
    pub fn tick(&mut self) -> Vec<TimerEvent> {
        if self.state != TimerState::Running {
            return Vec::new();
        }

        self.remaining_ms = self.remaining_ms.saturating_sub(self.granularity_ms);

        let mut events = vec![TimerEvent::Tick {
            remaining_ms: self.remaining_ms,
        }];

        if self.remaining_ms == 0 {
            self.state = TimerState::Finished;
            events.push(TimerEvent::Finished);
        }

        events
    }

    /// Cancel the current run
    ///
    /// No-op outside of `Running`; in particular a second stop emits nothing.
    pub fn stop(&mut self) -> Vec<TimerEvent> {
        if self.state != TimerState::Running {
            return Vec::new();
        }

        self.reset();
        vec![TimerEvent::Stopped]
    }

    /// Return to `Idle` once the `Finished` event has been delivered
    pub fn acknowledge_finished(&mut self) {
        if self.state == TimerState::Finished {
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.state = TimerState::Idle;
        self.total_duration_ms = 0;
        self.remaining_ms = 0;
        self.started_at = None;
    }
}

impl Default for LockTimer {
    fn default() -> Self {
        Self::new(DEFAULT_GRANULARITY)
    }
}
