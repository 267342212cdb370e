use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Periodic tick source for the lock timer
///
/// While armed, a background task calls the tick callback once per period.
/// The first tick fires one full period after arming. The task ends when the
/// callback returns `ControlFlow::Break`, or when the ticker is disarmed or
/// dropped.
///
/// Disarming aborts the task at its next await point. A callback that is
/// already running when `disarm` is called still completes, so the owner must
/// re-check its own state inside the callback; see
/// [`ServiceSupervisor`](crate::timer_lock::ServiceSupervisor).
#[derive(Debug, Default)]
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `period`, replacing any previous schedule
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, period: Duration, mut on_tick: F)
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        self.disarm();

        let period = period.max(Duration::from_millis(1));
        self.handle = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if on_tick().is_break() {
                    break;
                }
            }
        }));
    }

    /// Stop ticking; safe to call when not armed
    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a tick task is scheduled and has not exited
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.disarm();
    }
}
