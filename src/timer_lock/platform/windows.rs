use anyhow::Result;

use super::try_commands;
use crate::timer_lock::config::LockAction;

/// Lock the computer on Windows
pub async fn lock_computer(action: LockAction) -> Result<()> {
    match action {
        LockAction::Lock => {
            try_commands(
                &[("rundll32.exe", &["user32.dll,LockWorkStation"])],
                "lock the workstation",
            )
            .await
        }
        LockAction::Logout => try_commands(&[("shutdown", &["/l"])], "log out").await,
        LockAction::Shutdown => {
            try_commands(&[("shutdown", &["/s", "/f", "/t", "0"])], "shut down").await
        }
    }
}
