/// Platform-specific device locking implementations

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

use anyhow::Result;
use tokio::process::Command;

use crate::timer_lock::config::LockAction;

/// Lock the computer using the platform-specific mechanism
pub async fn lock_computer(action: LockAction) -> Result<()> {
    #[cfg(target_os = "windows")]
    {
        windows::lock_computer(action).await
    }

    #[cfg(target_os = "macos")]
    {
        macos::lock_computer(action).await
    }

    #[cfg(target_os = "linux")]
    {
        linux::lock_computer(action).await
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        let _ = action;
        anyhow::bail!("Unsupported operating system for device locking")
    }
}

/// Check if the platform supports a specific lock action
pub fn supports_action(action: LockAction) -> bool {
    #[cfg(any(target_os = "windows", target_os = "macos", target_os = "linux"))]
    {
        // Availability of the underlying tools is only known at run time
        matches!(action, LockAction::Lock | LockAction::Logout | LockAction::Shutdown)
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        let _ = action;
        false
    }
}

/// Run a command to completion, returning Ok if it exited successfully
///
/// The child is killed if the returned future is dropped, so callers can
/// bound it with a timeout.
pub async fn try_command(cmd: &str, args: &[&str]) -> Result<()> {
    let output = Command::new(cmd)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;

    if output.status.success() {
        Ok(())
    } else {
        anyhow::bail!("Command failed: {} {:?} ({})", cmd, args, output.status)
    }
}

/// Try commands in order until one succeeds
pub(crate) async fn try_commands(candidates: &[(&str, &[&str])], what: &str) -> Result<()> {
    for (cmd, args) in candidates {
        match try_command(cmd, args).await {
            Ok(()) => {
                tracing::debug!("{} via {}", what, cmd);
                return Ok(());
            }
            Err(e) => tracing::debug!("{} via {} failed: {:#}", what, cmd, e),
        }
    }

    anyhow::bail!("No supported mechanism found to {}", what)
}
