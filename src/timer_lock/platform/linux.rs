use anyhow::Result;

use super::try_commands;
use crate::timer_lock::config::LockAction;

/// Lock the computer on Linux
pub async fn lock_computer(action: LockAction) -> Result<()> {
    match action {
        LockAction::Lock => lock_screen().await,
        LockAction::Logout => logout_user().await,
        LockAction::Shutdown => shutdown_computer().await,
    }
}

/// Lock the screen, trying the common desktop mechanisms in order
async fn lock_screen() -> Result<()> {
    try_commands(
        &[
            // systemd-logind works across desktop environments
            ("loginctl", &["lock-session"]),
            ("xdg-screensaver", &["lock"]),
            ("gnome-screensaver-command", &["--lock"]),
            ("cinnamon-screensaver-command", &["--lock"]),
            ("mate-screensaver-command", &["--lock"]),
            ("xscreensaver-command", &["-lock"]),
            ("light-locker-command", &["--lock"]),
        ],
        "lock the screen",
    )
    .await
}

/// Log out the current session
async fn logout_user() -> Result<()> {
    let session_id = std::env::var("XDG_SESSION_ID").unwrap_or_default();

    if !session_id.is_empty()
        && try_commands(
            &[("loginctl", &["terminate-session", session_id.as_str()])],
            "log out",
        )
        .await
        .is_ok()
    {
        return Ok(());
    }

    try_commands(
        &[
            ("gnome-session-quit", &["--logout", "--no-prompt"]),
            ("qdbus", &["org.kde.ksmserver", "/KSMServer", "logout", "0", "0", "0"]),
            ("xfce4-session-logout", &["--logout"]),
        ],
        "log out",
    )
    .await
}

/// Shutdown the computer
async fn shutdown_computer() -> Result<()> {
    try_commands(
        &[
            ("systemctl", &["poweroff"]),
            ("shutdown", &["-h", "now"]),
            ("poweroff", &[]),
        ],
        "shut down",
    )
    .await
}
