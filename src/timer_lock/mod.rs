/// Countdown timer that locks the device when it expires
///
/// This module provides functionality to:
/// - Run a single countdown at a fixed tick granularity
/// - Publish lifecycle events to status subscribers
/// - Lock the device through a platform or custom trigger
/// - Allow early stops behind a guardian PIN

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod gate;
pub mod platform;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod ticker;
pub mod timer;

pub use bus::{EventBus, Subscriber, SubscriptionId};
pub use config::{LockAction, TimerLockConfig, UnlockFailurePolicy};
pub use controller::{LockController, LockTrigger};
pub use error::{ErrorKind, TimerLockError};
pub use event::TimerEvent;
pub use gate::{AttemptLimit, UnlockGate, UnlockRequest};
pub use status::{DesktopNotifier, StatusLine};
pub use store::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use supervisor::{ServiceSupervisor, StartCommand, StopReport, SupervisorStatus};
pub use timer::{LockTimer, TimerState};
