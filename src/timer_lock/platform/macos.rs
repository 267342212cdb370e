use anyhow::Result;

use super::try_commands;
use crate::timer_lock::config::LockAction;

/// Lock the computer on macOS
pub async fn lock_computer(action: LockAction) -> Result<()> {
    match action {
        LockAction::Lock => {
            try_commands(
                &[
                    // Sleeping the display locks when a password is required on wake
                    ("pmset", &["displaysleepnow"]),
                    (
                        "osascript",
                        &["-e", "tell application \"System Events\" to keystroke \"q\" using {command down, control down}"],
                    ),
                ],
                "lock the screen",
            )
            .await
        }
        LockAction::Logout => {
            try_commands(
                &[("osascript", &["-e", "tell application \"System Events\" to log out"])],
                "log out",
            )
            .await
        }
        LockAction::Shutdown => {
            try_commands(
                &[("osascript", &["-e", "tell application \"System Events\" to shut down"])],
                "shut down",
            )
            .await
        }
    }
}
