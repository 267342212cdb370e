use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::timer_lock::bus::Subscriber;
use crate::timer_lock::config::{LockAction, LockConfig};
use crate::timer_lock::error::TimerLockError;
use crate::timer_lock::event::TimerEvent;
use crate::timer_lock::platform;

/// External device-lock collaborator
#[async_trait]
pub trait LockTrigger: Send + Sync {
    /// Enforce the device lock
    async fn trigger_device_lock(&self) -> Result<()>;

    /// Undo any lock side effect after an authorized stop
    async fn release_device_lock(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// Locks the device with the built-in platform mechanism
///
/// Keeps the default no-op release: the OS lock is undone by the user
/// signing back in.
pub struct PlatformLock {
    action: LockAction,
}

impl PlatformLock {
    pub fn new(action: LockAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl LockTrigger for PlatformLock {
    async fn trigger_device_lock(&self) -> Result<()> {
        let action = if platform::supports_action(self.action) {
            self.action
        } else {
            warn!("Platform does not support action {:?}, falling back to Lock", self.action);
            LockAction::Lock
        };

        platform::lock_computer(action).await
    }

    fn name(&self) -> &'static str {
        "platform"
    }
}

/// Locks the device by running a configured command
pub struct CommandLock {
    program: String,
    args: Vec<String>,
    release: Option<(String, Vec<String>)>,
}

impl CommandLock {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            release: None,
        }
    }

    /// Command run on release, after an authorized stop
    pub fn with_release(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.release = Some((program.into(), args));
        self
    }
}

async fn run_command(program: &str, args: &[String]) -> Result<()> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    platform::try_command(program, &args).await
}

#[async_trait]
impl LockTrigger for CommandLock {
    async fn trigger_device_lock(&self) -> Result<()> {
        run_command(&self.program, &self.args).await
    }

    async fn release_device_lock(&self) -> Result<()> {
        match &self.release {
            Some((program, args)) => run_command(program, args).await,
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Build the lock trigger described by the configuration
pub fn lock_trigger_from_config(config: &LockConfig) -> Arc<dyn LockTrigger> {
    match config.command.as_deref() {
        Some([program, args @ ..]) => {
            let mut trigger = CommandLock::new(program.clone(), args.to_vec());
            if let Some([release, release_args @ ..]) = config.release_command.as_deref() {
                trigger = trigger.with_release(release.clone(), release_args.to_vec());
            }
            Arc::new(trigger)
        }
        _ => Arc::new(PlatformLock::new(config.action)),
    }
}

/// Shared, cloneable part of the controller that background tasks run on
#[derive(Clone)]
struct LockRunner {
    trigger: Arc<dyn LockTrigger>,
    timeout: Duration,
    retry: bool,
    last_failure: Arc<Mutex<Option<String>>>,
}

impl LockRunner {
    async fn lock(&self) -> Result<(), TimerLockError> {
        let attempts = if self.retry { 2 } else { 1 };
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.timeout, self.trigger.trigger_device_lock()).await {
                Ok(Ok(())) => {
                    info!("Device locked via {} trigger", self.trigger.name());
                    self.set_failure(None);
                    return Ok(());
                }
                Ok(Err(e)) => last_error = format!("{:#}", e),
                Err(_) => last_error = format!("timed out after {:?}", self.timeout),
            }

            warn!(
                "Lock attempt {}/{} via {} failed: {}",
                attempt,
                attempts,
                self.trigger.name(),
                last_error
            );
        }

        error!("Failed to lock device: {}", last_error);
        self.set_failure(Some(last_error.clone()));
        Err(TimerLockError::LockAction(last_error))
    }

    async fn release(&self) -> Result<(), TimerLockError> {
        match tokio::time::timeout(self.timeout, self.trigger.release_device_lock()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TimerLockError::LockAction(format!("{:#}", e))),
            Err(_) => Err(TimerLockError::LockAction(format!(
                "release timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn set_failure(&self, failure: Option<String>) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }
}

/// Invokes the device lock when a run finishes
///
/// Subscribed to the event bus; every `Finished` event dispatches exactly one
/// lock action on a background task, bounded by a timeout and at most one
/// retry. Failures are logged and kept for status reporting, never
/// propagated into the tick path.
pub struct LockController {
    runner: LockRunner,
    dispatched: AtomicU64,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl LockController {
    pub fn new(trigger: Arc<dyn LockTrigger>, timeout: Duration, retry: bool) -> Self {
        Self {
            runner: LockRunner {
                trigger,
                timeout,
                retry,
                last_failure: Arc::new(Mutex::new(None)),
            },
            dispatched: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(lock_trigger_from_config(config), config.timeout(), config.retry)
    }

    /// Run the lock action inline
    pub async fn lock_now(&self) -> Result<(), TimerLockError> {
        self.runner.lock().await
    }

    /// Release any external lock side effect, bounded by the timeout
    pub async fn release(&self) -> Result<(), TimerLockError> {
        self.runner.release().await
    }

    /// Number of lock actions dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Error from the most recent lock action, if it failed
    pub fn last_failure(&self) -> Option<String> {
        self.runner
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for a dispatched lock action to complete
    pub async fn settle(&self) {
        let handle = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn dispatch_lock(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("No async runtime available, cannot lock device");
            self.runner
                .set_failure(Some("no async runtime available".to_string()));
            return;
        };

        self.dispatched.fetch_add(1, Ordering::SeqCst);

        let runner = self.runner.clone();
        let handle = runtime.spawn(async move {
            // Already logged and recorded by the runner
            let _ = runner.lock().await;
        });

        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

impl Subscriber for LockController {
    fn on_event(&self, event: &TimerEvent) {
        if *event == TimerEvent::Finished {
            info!("Countdown finished, locking device");
            self.dispatch_lock();
        }
    }

    fn name(&self) -> &'static str {
        "lock-controller"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Lock trigger that records calls and fails a configurable number of times
    #[derive(Default)]
    pub(crate) struct FakeTrigger {
        pub(crate) locks: AtomicUsize,
        pub(crate) releases: AtomicUsize,
        pub(crate) failures_left: AtomicUsize,
        pub(crate) fail_release: bool,
        pub(crate) hang: bool,
    }

    impl FakeTrigger {
        pub(crate) fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                ..Self::default()
            }
        }

        pub(crate) fn locks(&self) -> usize {
            self.locks.load(Ordering::SeqCst)
        }

        pub(crate) fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LockTrigger for FakeTrigger {
        async fn trigger_device_lock(&self) -> Result<()> {
            self.locks.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("screen locker not available");
            }
            Ok(())
        }

        async fn release_device_lock(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                anyhow::bail!("lock task mode not active");
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn controller(trigger: &Arc<FakeTrigger>, retry: bool) -> LockController {
        LockController::new(trigger.clone(), Duration::from_secs(5), retry)
    }

    #[tokio::test]
    async fn test_lock_succeeds_first_try() {
        let trigger = Arc::new(FakeTrigger::default());
        let controller = controller(&trigger, true);

        controller.lock_now().await.unwrap();
        assert_eq!(trigger.locks(), 1);
        assert!(controller.last_failure().is_none());
    }

    #[tokio::test]
    async fn test_lock_retries_once() {
        let trigger = Arc::new(FakeTrigger::failing(1));
        let controller = controller(&trigger, true);

        controller.lock_now().await.unwrap();
        assert_eq!(trigger.locks(), 2);
    }

    #[tokio::test]
    async fn test_lock_gives_up_after_one_retry() {
        let trigger = Arc::new(FakeTrigger::failing(5));
        let controller = controller(&trigger, true);

        let err = controller.lock_now().await.unwrap_err();
        assert!(matches!(err, TimerLockError::LockAction(_)));
        assert_eq!(trigger.locks(), 2);
        assert!(controller.last_failure().unwrap().contains("screen locker"));
    }

    #[tokio::test]
    async fn test_lock_without_retry() {
        let trigger = Arc::new(FakeTrigger::failing(1));
        let controller = controller(&trigger, false);

        assert!(controller.lock_now().await.is_err());
        assert_eq!(trigger.locks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_times_out() {
        let trigger = Arc::new(FakeTrigger {
            hang: true,
            ..FakeTrigger::default()
        });
        let controller = controller(&trigger, true);

        let err = controller.lock_now().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(trigger.locks(), 2);
    }

    #[tokio::test]
    async fn test_finished_event_dispatches_one_lock() {
        let trigger = Arc::new(FakeTrigger::default());
        let controller = controller(&trigger, true);

        controller.on_event(&TimerEvent::Tick { remaining_ms: 0 });
        controller.on_event(&TimerEvent::Stopped);
        assert_eq!(controller.dispatched(), 0);

        controller.on_event(&TimerEvent::Finished);
        controller.settle().await;

        assert_eq!(controller.dispatched(), 1);
        assert_eq!(trigger.locks(), 1);
    }

    #[test]
    fn test_finished_without_runtime_is_reported() {
        let trigger = Arc::new(FakeTrigger::default());
        let controller = controller(&trigger, true);

        controller.on_event(&TimerEvent::Finished);
        assert_eq!(controller.dispatched(), 0);
        assert!(controller.last_failure().is_some());
    }

    #[tokio::test]
    async fn test_release_failure_is_lock_action_error() {
        let trigger = Arc::new(FakeTrigger {
            fail_release: true,
            ..FakeTrigger::default()
        });
        let controller = controller(&trigger, true);

        let err = controller.release().await.unwrap_err();
        assert!(matches!(err, TimerLockError::LockAction(_)));
        assert_eq!(trigger.releases(), 1);
    }

    #[test]
    fn test_trigger_from_config() {
        let mut config = LockConfig::default();
        assert_eq!(lock_trigger_from_config(&config).name(), "platform");

        config.command = Some(vec!["i3lock".to_string(), "-c".to_string(), "000000".to_string()]);
        assert_eq!(lock_trigger_from_config(&config).name(), "command");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_lock_runs_program() {
        let ok = CommandLock::new("true", vec![]);
        assert!(ok.trigger_device_lock().await.is_ok());

        let failing = CommandLock::new("false", vec![]);
        assert!(failing.trigger_device_lock().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_lock_release() {
        let no_release = CommandLock::new("true", vec![]);
        assert!(no_release.release_device_lock().await.is_ok());

        let releasing = CommandLock::new("true", vec![]).with_release("true", vec![]);
        assert!(releasing.release_device_lock().await.is_ok());

        let failing = CommandLock::new("true", vec![]).with_release("false", vec![]);
        assert!(failing.release_device_lock().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_command_from_config_reaches_controller() {
        let config = LockConfig {
            command: Some(vec!["true".to_string()]),
            release_command: Some(vec!["false".to_string()]),
            ..LockConfig::default()
        };
        let controller = LockController::from_config(&config);

        controller.lock_now().await.unwrap();
        let err = controller.release().await.unwrap_err();
        assert!(matches!(err, TimerLockError::LockAction(_)));
    }
}
