use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::timer_lock::bus::{EventBus, Subscriber, SubscriptionId};
use crate::timer_lock::config::{TimerLockConfig, UnlockFailurePolicy};
use crate::timer_lock::controller::LockController;
use crate::timer_lock::error::TimerLockError;
use crate::timer_lock::gate::{UnlockGate, UnlockRequest};
use crate::timer_lock::store::CredentialStore;
use crate::timer_lock::ticker::Ticker;
use crate::timer_lock::timer::{LockTimer, TimerState};

/// Validated start command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartCommand {
    pub duration_ms: u64,
}

impl StartCommand {
    pub fn from_millis(ms: i64) -> Result<Self, TimerLockError> {
        match u64::try_from(ms) {
            Ok(duration_ms) if duration_ms > 0 => Ok(Self { duration_ms }),
            _ => Err(TimerLockError::InvalidDuration),
        }
    }

    pub fn from_seconds(seconds: i64) -> Result<Self, TimerLockError> {
        Self::from_millis(seconds.checked_mul(1000).ok_or(TimerLockError::InvalidDuration)?)
    }

    pub fn from_minutes(minutes: i64) -> Result<Self, TimerLockError> {
        Self::from_millis(minutes.checked_mul(60_000).ok_or(TimerLockError::InvalidDuration)?)
    }
}

/// Result of an authorized stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Whether a running timer was actually cancelled
    pub stopped: bool,
    /// Release failure, only filled in under [`UnlockFailurePolicy::Report`]
    pub release_error: Option<String>,
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: TimerState,
    pub total_ms: u64,
    pub remaining_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_lock_failure: Option<String>,
}

struct Core {
    timer: LockTimer,
    ticker: Ticker,
    /// Incremented on every start and stop; ticks carry the run they were armed for
    run: u64,
}

/// State shared with the ticker task
///
/// All timer transitions and their event publication happen under the
/// `core` mutex, so a tick racing a stop is either applied in full before the
/// stop or discarded after it.
struct Shared {
    core: Mutex<Core>,
    bus: EventBus,
    alive: watch::Sender<bool>,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_tick(&self, run: u64) -> ControlFlow<()> {
        let mut core = self.lock_core();

        if core.run != run || core.timer.state() != TimerState::Running {
            warn!("Discarding late tick for inactive run {}", run);
            return ControlFlow::Break(());
        }

        for event in core.timer.tick() {
            self.bus.publish(&event);
        }
        debug!("Run {}: {} ms remaining", run, core.timer.remaining_ms());

        if core.timer.state() == TimerState::Finished {
            // Finished has been delivered; nothing keeps the process busy now
            core.timer.acknowledge_finished();
            self.alive.send_replace(false);
            info!("Timer run {} finished", run);
            return ControlFlow::Break(());
        }

        ControlFlow::Continue(())
    }
}

/// Owns the single lock timer and its lifecycle
///
/// Exposes the start and stop commands, drives the timer from a [`Ticker`],
/// fans events out over an [`EventBus`], and dispatches the device lock
/// through the [`LockController`] when a run finishes.
pub struct ServiceSupervisor {
    shared: Arc<Shared>,
    gate: UnlockGate,
    controller: Arc<LockController>,
    failure_policy: UnlockFailurePolicy,
    granularity: Duration,
}

impl ServiceSupervisor {
    pub fn new(
        granularity: Duration,
        gate: UnlockGate,
        controller: Arc<LockController>,
        failure_policy: UnlockFailurePolicy,
    ) -> Self {
        let (alive, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                timer: LockTimer::new(granularity),
                ticker: Ticker::new(),
                run: 0,
            }),
            bus: EventBus::new(),
            alive,
        });

        let lock_subscriber: Arc<dyn Subscriber> = controller.clone();
        shared.bus.subscribe(&lock_subscriber);

        Self {
            shared,
            gate,
            controller,
            failure_policy,
            granularity,
        }
    }

    /// Build a supervisor from configuration and a credential store
    pub fn from_config(config: &TimerLockConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self::new(
            config.granularity(),
            UnlockGate::new(store, config.attempt_limit()),
            Arc::new(LockController::from_config(&config.lock)),
            config.unlock.failure_policy,
        )
    }

    /// Register a status subscriber; the caller keeps it alive
    pub fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) -> SubscriptionId {
        self.shared.bus.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.bus.unsubscribe(id);
    }

    pub fn gate(&self) -> &UnlockGate {
        &self.gate
    }

    pub fn controller(&self) -> &Arc<LockController> {
        &self.controller
    }

    /// Keep-alive signal: `true` while a timer is active
    pub fn keep_alive(&self) -> watch::Receiver<bool> {
        self.shared.alive.subscribe()
    }

    /// Start a countdown, replacing any run in progress
    ///
    /// Must be called from within a tokio runtime. A zero duration is
    /// rejected without touching the current run.
    pub async fn handle_start(&self, duration_ms: u64) -> Result<(), TimerLockError> {
        let mut core = self.shared.lock_core();

        let events = core.timer.start(duration_ms)?;
        core.run += 1;
        let run = core.run;

        let shared = Arc::downgrade(&self.shared);
        core.ticker.arm(self.granularity, move || match shared.upgrade() {
            Some(shared) => shared.apply_tick(run),
            None => ControlFlow::Break(()),
        });

        for event in &events {
            self.shared.bus.publish(event);
        }
        self.shared.alive.send_replace(true);

        info!("Timer run {} started for {} ms", run, duration_ms);
        Ok(())
    }

    /// Stop the countdown after checking the guardian PIN
    ///
    /// A wrong PIN fails with `Unauthorized` and leaves the run untouched.
    /// Stopping while idle is a no-op reported as `stopped: false`.
    pub async fn handle_stop(&self, request: UnlockRequest) -> Result<StopReport, TimerLockError> {
        if !self.gate.verify(request)? {
            warn!("Stop rejected: incorrect PIN");
            return Err(TimerLockError::Unauthorized);
        }

        let stopped = {
            let mut core = self.shared.lock_core();
            let events = core.timer.stop();

            if !events.is_empty() {
                core.ticker.disarm();
                core.run += 1;
                for event in &events {
                    self.shared.bus.publish(event);
                }
                self.shared.alive.send_replace(false);
            }

            !events.is_empty()
        };

        if !stopped {
            debug!("Stop requested while idle");
            return Ok(StopReport {
                stopped: false,
                release_error: None,
            });
        }

        info!("Timer stopped by guardian");

        let release_error = match self.controller.release().await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to release device lock: {}", e);
                match self.failure_policy {
                    UnlockFailurePolicy::Log => None,
                    UnlockFailurePolicy::Report => Some(e.to_string()),
                }
            }
        };

        Ok(StopReport {
            stopped: true,
            release_error,
        })
    }

    /// Current timer state
    pub fn status(&self) -> SupervisorStatus {
        let core = self.shared.lock_core();
        SupervisorStatus {
            state: core.timer.state(),
            total_ms: core.timer.total_duration_ms(),
            remaining_ms: core.timer.remaining_ms(),
            started_at: core.timer.started_at(),
            last_lock_failure: self.controller.last_failure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer_lock::bus::tests::Recorder;
    use crate::timer_lock::controller::tests::FakeTrigger;
    use crate::timer_lock::event::TimerEvent;
    use crate::timer_lock::gate::AttemptLimit;
    use crate::timer_lock::store::{Credential, MemoryCredentialStore};
    use tokio::time::sleep;

    struct Harness {
        supervisor: ServiceSupervisor,
        trigger: Arc<FakeTrigger>,
        recorder: Arc<Recorder>,
        _recorder_sub: Arc<dyn Subscriber>,
    }

    fn harness_with(
        pin: Option<&str>,
        trigger: FakeTrigger,
        policy: UnlockFailurePolicy,
    ) -> Harness {
        build_harness(pin, trigger, policy, AttemptLimit::default())
    }

    fn build_harness(
        pin: Option<&str>,
        trigger: FakeTrigger,
        policy: UnlockFailurePolicy,
        limit: AttemptLimit,
    ) -> Harness {
        let store = match pin {
            Some(pin) => MemoryCredentialStore::with_credential(Credential::parse(pin).unwrap()),
            None => MemoryCredentialStore::new(),
        };
        let trigger = Arc::new(trigger);
        let controller = Arc::new(LockController::new(
            trigger.clone(),
            Duration::from_secs(5),
            true,
        ));
        let supervisor = ServiceSupervisor::new(
            Duration::from_millis(1000),
            UnlockGate::new(Arc::new(store), limit),
            controller,
            policy,
        );

        let recorder = Arc::new(Recorder::default());
        let recorder_sub: Arc<dyn Subscriber> = recorder.clone();
        supervisor.subscribe(&recorder_sub);

        Harness {
            supervisor,
            trigger,
            recorder,
            _recorder_sub: recorder_sub,
        }
    }

    fn harness() -> Harness {
        harness_with(Some("1234"), FakeTrigger::default(), UnlockFailurePolicy::Log)
    }

    fn count(events: &[TimerEvent], wanted: TimerEvent) -> usize {
        events.iter().filter(|e| **e == wanted).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_minute_run_locks_once() {
        let h = harness();
        h.supervisor.handle_start(120_000).await.unwrap();

        sleep(Duration::from_millis(119_500)).await;
        let status = h.supervisor.status();
        assert_eq!(status.state, TimerState::Running);
        assert_eq!(status.remaining_ms, 1000);
        assert_eq!(h.trigger.locks(), 0);

        sleep(Duration::from_millis(1000)).await;
        h.supervisor.controller().settle().await;

        let events = h.recorder.events();
        assert_eq!(events.len(), 1 + 120 + 1);
        assert_eq!(events.first(), Some(&TimerEvent::Started { duration_ms: 120_000 }));
        assert_eq!(
            &events[events.len() - 2..],
            &[TimerEvent::Tick { remaining_ms: 0 }, TimerEvent::Finished]
        );
        assert_eq!(h.trigger.locks(), 1);

        // Finished has been consumed; the supervisor is idle again
        assert_eq!(h.supervisor.status().state, TimerState::Idle);
        assert!(!*h.supervisor.keep_alive().borrow());

        // Nothing follows the terminal event
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.recorder.events().len(), events.len());
        assert_eq!(h.trigger.locks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_correct_pin() {
        let h = harness();
        h.supervisor.handle_start(60_000).await.unwrap();
        sleep(Duration::from_millis(5500)).await;

        let report = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();
        assert!(report.stopped);
        assert!(report.release_error.is_none());
        assert_eq!(h.supervisor.status().state, TimerState::Idle);
        assert_eq!(h.trigger.releases(), 1);

        // The ticker is gone: no more ticks, no lock
        sleep(Duration::from_secs(120)).await;
        let events = h.recorder.events();
        assert_eq!(events.last(), Some(&TimerEvent::Stopped));
        assert_eq!(count(&events, TimerEvent::Stopped), 1);
        assert_eq!(count(&events, TimerEvent::Finished), 0);
        assert_eq!(h.trigger.locks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_wrong_pin_keeps_running() {
        let h = harness();
        h.supervisor.handle_start(60_000).await.unwrap();
        sleep(Duration::from_millis(3500)).await;

        let before = h.supervisor.status();
        let err = h.supervisor.handle_stop(UnlockRequest::new("0000")).await.unwrap_err();
        assert!(matches!(err, TimerLockError::Unauthorized));
        assert_eq!(err.kind(), crate::timer_lock::error::ErrorKind::Authorization);

        let after = h.supervisor.status();
        assert_eq!(after.state, TimerState::Running);
        assert_eq!(after.remaining_ms, before.remaining_ms);
        assert_eq!(after.remaining_ms, 57_000);
        assert!(*h.supervisor.keep_alive().borrow());

        // Countdown continues to the end
        sleep(Duration::from_secs(60)).await;
        h.supervisor.controller().settle().await;
        assert_eq!(h.trigger.locks(), 1);
        assert_eq!(count(&h.recorder.events(), TimerEvent::Stopped), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_stop_is_noop() {
        let h = harness();
        h.supervisor.handle_start(60_000).await.unwrap();

        let first = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();
        let second = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();

        assert!(first.stopped);
        assert!(!second.stopped);
        assert_eq!(count(&h.recorder.events(), TimerEvent::Stopped), 1);
        assert_eq!(h.trigger.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_zero_duration() {
        let h = harness();

        let err = h.supervisor.handle_start(0).await.unwrap_err();
        assert!(matches!(err, TimerLockError::InvalidDuration));
        assert_eq!(h.supervisor.status().state, TimerState::Idle);
        assert!(h.recorder.events().is_empty());
        assert!(!*h.supervisor.keep_alive().borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_does_not_disturb_running_timer() {
        let h = harness();
        h.supervisor.handle_start(10_000).await.unwrap();
        sleep(Duration::from_millis(2500)).await;

        assert!(h.supervisor.handle_start(0).await.is_err());
        let status = h.supervisor.status();
        assert_eq!(status.state, TimerState::Running);
        assert_eq!(status.remaining_ms, 8000);
    }

    #[test]
    fn test_start_command_rejects_non_positive() {
        for ms in [0, -1, -60_000] {
            assert!(matches!(
                StartCommand::from_millis(ms),
                Err(TimerLockError::InvalidDuration)
            ));
        }
        assert!(StartCommand::from_minutes(-5).is_err());
        assert!(StartCommand::from_minutes(i64::MAX).is_err());
        assert_eq!(StartCommand::from_minutes(2).unwrap().duration_ms, 120_000);
        assert_eq!(StartCommand::from_seconds(90).unwrap().duration_ms, 90_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_stops_previous_run() {
        let h = harness();
        h.supervisor.handle_start(60_000).await.unwrap();
        sleep(Duration::from_millis(2500)).await;

        h.supervisor.handle_start(3000).await.unwrap();
        sleep(Duration::from_millis(3500)).await;
        h.supervisor.controller().settle().await;

        let events = h.recorder.events();
        assert_eq!(
            events,
            vec![
                TimerEvent::Started { duration_ms: 60_000 },
                TimerEvent::Tick { remaining_ms: 59_000 },
                TimerEvent::Tick { remaining_ms: 58_000 },
                TimerEvent::Stopped,
                TimerEvent::Started { duration_ms: 3000 },
                TimerEvent::Tick { remaining_ms: 2000 },
                TimerEvent::Tick { remaining_ms: 1000 },
                TimerEvent::Tick { remaining_ms: 0 },
                TimerEvent::Finished,
            ]
        );
        assert_eq!(h.trigger.locks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_credential() {
        let h = harness_with(None, FakeTrigger::default(), UnlockFailurePolicy::Log);
        h.supervisor.handle_start(60_000).await.unwrap();

        let err = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap_err();
        assert!(matches!(err, TimerLockError::NoCredentialSet));
        assert_eq!(h.supervisor.status().state, TimerState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_after_stop_is_discarded() {
        let h = harness();
        h.supervisor.handle_start(60_000).await.unwrap();
        let stale_run = h.supervisor.shared.lock_core().run;

        h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();
        let seen = h.recorder.events().len();

        assert!(h.supervisor.shared.apply_tick(stale_run).is_break());
        assert_eq!(h.recorder.events().len(), seen);
        assert_eq!(h.supervisor.status().remaining_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_for_replaced_run_is_discarded() {
        let h = harness();
        h.supervisor.handle_start(60_000).await.unwrap();
        let stale_run = h.supervisor.shared.lock_core().run;
        h.supervisor.handle_start(30_000).await.unwrap();

        assert!(h.supervisor.shared.apply_tick(stale_run).is_break());
        assert_eq!(h.supervisor.status().remaining_ms, 30_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_failure_is_reported_not_fatal() {
        let h = harness_with(Some("1234"), FakeTrigger::failing(10), UnlockFailurePolicy::Log);
        h.supervisor.handle_start(2000).await.unwrap();

        sleep(Duration::from_millis(2500)).await;
        h.supervisor.controller().settle().await;

        let status = h.supervisor.status();
        assert_eq!(status.state, TimerState::Idle);
        assert!(status.last_lock_failure.is_some());
        assert_eq!(h.trigger.locks(), 2);

        // The supervisor keeps working
        h.supervisor.handle_start(1000).await.unwrap();
        assert_eq!(h.supervisor.status().state, TimerState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_failure_policy() {
        let failing_release = || FakeTrigger {
            fail_release: true,
            ..FakeTrigger::default()
        };

        let h = harness_with(Some("1234"), failing_release(), UnlockFailurePolicy::Log);
        h.supervisor.handle_start(60_000).await.unwrap();
        let report = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();
        assert!(report.stopped);
        assert!(report.release_error.is_none());

        let h = harness_with(Some("1234"), failing_release(), UnlockFailurePolicy::Report);
        h.supervisor.handle_start(60_000).await.unwrap();
        let report = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();
        assert!(report.stopped);
        assert!(report.release_error.unwrap().contains("lock task mode"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_follows_run() {
        let h = harness();
        let mut alive = h.supervisor.keep_alive();
        assert!(!*alive.borrow());

        h.supervisor.handle_start(3000).await.unwrap();
        assert!(*alive.borrow_and_update());

        alive.changed().await.unwrap();
        assert!(!*alive.borrow());
        assert_eq!(h.supervisor.status().state, TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_stop_keeps_running() {
        let limit = AttemptLimit {
            max_attempts: 5,
            window: Duration::from_secs(60),
        };
        let h = build_harness(Some("1234"), FakeTrigger::default(), UnlockFailurePolicy::Log, limit);
        h.supervisor.handle_start(60_000).await.unwrap();

        for _ in 0..5 {
            let _ = h.supervisor.handle_stop(UnlockRequest::new("9999")).await;
        }
        let err = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap_err();
        assert!(matches!(err, TimerLockError::TooManyAttempts { .. }));
        assert_eq!(h.supervisor.status().state, TimerState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correct_pin_stops_after_many_wrong_ones() {
        let h = harness();
        h.supervisor.handle_start(60_000).await.unwrap();

        for _ in 0..20 {
            let err = h.supervisor.handle_stop(UnlockRequest::new("0000")).await.unwrap_err();
            assert!(matches!(err, TimerLockError::Unauthorized));
        }

        let report = h.supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();
        assert!(report.stopped);
        assert_eq!(h.supervisor.status().state, TimerState::Idle);
        assert_eq!(count(&h.recorder.events(), TimerEvent::Stopped), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_config_never_refuses_correct_pin() {
        let config = TimerLockConfig::default();
        let store = MemoryCredentialStore::with_credential(Credential::parse("1234").unwrap());
        let supervisor = ServiceSupervisor::from_config(&config, Arc::new(store));
        supervisor.handle_start(60_000).await.unwrap();

        for _ in 0..10 {
            assert!(supervisor.handle_stop(UnlockRequest::new("9999")).await.is_err());
        }

        assert!(supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap().stopped);
        assert_eq!(supervisor.status().state, TimerState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_command_failure_is_reported() {
        let mut config = TimerLockConfig::default();
        config.lock.command = Some(vec!["true".to_string()]);
        config.lock.release_command = Some(vec!["false".to_string()]);
        config.unlock.failure_policy = UnlockFailurePolicy::Report;

        let store = MemoryCredentialStore::with_credential(Credential::parse("1234").unwrap());
        let supervisor = ServiceSupervisor::from_config(&config, Arc::new(store));
        supervisor.handle_start(60_000).await.unwrap();

        let report = supervisor.handle_stop(UnlockRequest::new("1234")).await.unwrap();
        assert!(report.stopped);
        assert!(report.release_error.is_some());
        assert_eq!(supervisor.status().state, TimerState::Idle);
    }
}
