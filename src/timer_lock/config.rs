use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::timer_lock::gate::AttemptLimit;

/// Main timer lock configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimerLockConfig {
    /// Interval between countdown ticks in milliseconds
    #[serde(default = "default_granularity_ms")]
    pub granularity_ms: u64,

    /// Where the guardian PIN is stored (defaults to the user data dir)
    #[serde(default)]
    pub credential_path: Option<PathBuf>,

    /// What happens when the countdown expires
    #[serde(default)]
    pub lock: LockConfig,

    /// Early-stop (PIN) settings
    #[serde(default)]
    pub unlock: UnlockConfig,

    /// Status notifications
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Ignore Ctrl+C while a timer is running
    #[serde(default = "default_true")]
    pub require_pin_to_quit: bool,
}

impl Default for TimerLockConfig {
    fn default() -> Self {
        Self {
            granularity_ms: default_granularity_ms(),
            credential_path: None,
            lock: LockConfig::default(),
            unlock: UnlockConfig::default(),
            notifications: NotificationConfig::default(),
            require_pin_to_quit: true,
        }
    }
}

impl TimerLockConfig {
    pub fn granularity(&self) -> Duration {
        Duration::from_millis(self.granularity_ms)
    }

    pub fn attempt_limit(&self) -> AttemptLimit {
        AttemptLimit {
            max_attempts: self.unlock.max_attempts,
            window: Duration::from_secs(self.unlock.window_secs),
        }
    }
}

fn default_granularity_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Lock-trigger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// Action when time expires
    #[serde(default)]
    pub action: LockAction,

    /// Custom command (program followed by arguments) used instead of the
    /// built-in platform mechanism
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Command run after an authorized stop to undo the lock; only used
    /// together with `command`
    #[serde(default)]
    pub release_command: Option<Vec<String>>,

    /// Time allowed for a single lock attempt
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry once if the first attempt fails or times out
    #[serde(default = "default_true")]
    pub retry: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            action: LockAction::Lock,
            command: None,
            release_command: None,
            timeout_secs: default_lock_timeout_secs(),
            retry: true,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_lock_timeout_secs() -> u64 {
    5
}

/// Action to take when the countdown expires
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockAction {
    /// Lock the screen
    #[default]
    Lock,
    /// Log out the user
    Logout,
    /// Shutdown the computer
    Shutdown,
}

/// Early-stop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnlockConfig {
    /// How a failed release of the external lock is handled on stop
    #[serde(default)]
    pub failure_policy: UnlockFailurePolicy,

    /// PIN attempts allowed per window; 0 disables the limit
    #[serde(default)]
    pub max_attempts: usize,

    /// Attempt window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            failure_policy: UnlockFailurePolicy::default(),
            max_attempts: 0,
            window_secs: default_window_secs(),
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

/// What to do when releasing the external lock fails after a successful stop
///
/// Only `lock.release_command` can fail here; the built-in platform lock has
/// nothing to release.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnlockFailurePolicy {
    /// Log the failure; the stop is still reported as clean
    #[default]
    Log,
    /// Log the failure and include it in the stop result
    Report,
}

/// Notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Send desktop notifications
    #[serde(default)]
    pub desktop: bool,

    /// Warn this many minutes before expiry (descending)
    #[serde(default = "default_warnings")]
    pub warnings: Vec<u32>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            desktop: false,
            warnings: default_warnings(),
        }
    }
}

fn default_warnings() -> Vec<u32> {
    vec![5, 1]
}

/// Get the default config file path
pub fn get_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "smart-timer-lock")
        .context("Could not determine config directory")?;

    Ok(dirs.config_dir().join("timer-lock.yaml"))
}

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<TimerLockConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: TimerLockConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load configuration, falling back to defaults when the file is missing
pub fn load_config_or_default(path: &Path) -> Result<TimerLockConfig> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(TimerLockConfig::default());
    }

    load_config(path)
}

/// Validate configuration
pub fn validate_config(config: &TimerLockConfig) -> Result<()> {
    if config.granularity_ms == 0 {
        anyhow::bail!("granularity_ms must be greater than zero");
    }

    if config.lock.timeout_secs == 0 {
        anyhow::bail!("lock.timeout_secs must be greater than zero");
    }

    if let Some(command) = &config.lock.command {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            anyhow::bail!("lock.command must name a program");
        }
    }

    if config.unlock.max_attempts > 0 && config.unlock.window_secs == 0 {
        anyhow::bail!("unlock.window_secs must be greater than zero when max_attempts is set");
    }

    if let Some(command) = &config.lock.release_command {
        if config.lock.command.is_none() {
            anyhow::bail!("lock.release_command requires lock.command");
        }
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            anyhow::bail!("lock.release_command must name a program");
        }
    }

    let warnings = &config.notifications.warnings;
    for i in 1..warnings.len() {
        if warnings[i] >= warnings[i - 1] {
            anyhow::bail!(
                "notifications.warnings must be in descending order, got: {:?}",
                warnings
            );
        }
    }

    Ok(())
}

/// Example configuration written by `init`
pub const EXAMPLE_CONFIG: &str = r#"# Smart Timer Lock configuration

# Countdown tick interval in milliseconds
granularity_ms: 1000

# Where the guardian PIN is stored (default: user data directory)
# credential_path: /var/lib/smart-timer-lock/credential.json

# Ignore Ctrl+C while a timer is running; stop with the PIN instead
require_pin_to_quit: true

lock:
  # lock | logout | shutdown
  action: lock
  # Custom lock command, replaces the built-in platform mechanism
  # command: ["i3lock", "-c", "000000"]
  # Run after the guardian stops the timer, undoing the custom command
  # release_command: ["pkill", "i3lock"]
  # Seconds allowed per lock attempt
  timeout_secs: 5
  # Retry once on failure
  retry: true

unlock:
  # What to do if releasing the lock fails after a correct PIN:
  #   log    - only log it
  #   report - also show it to the person who stopped the timer
  failure_policy: log
  # PIN attempts allowed per window (0 = unlimited, a correct PIN always
  # stops the timer)
  max_attempts: 0
  window_secs: 60

notifications:
  # Desktop notifications (notify-send / osascript)
  desktop: false
  # Minutes before expiry to warn at
  warnings: [5, 1]
"#;
