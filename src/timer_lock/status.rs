use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::timer_lock::bus::Subscriber;
use crate::timer_lock::event::TimerEvent;

const NOTIFICATION_TITLE: &str = "Smart Timer Lock";

/// Format milliseconds as `Xm Ys`
pub fn format_remaining(ms: u64) -> String {
    format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
}

/// Human-readable line for an event
pub fn render(event: &TimerEvent) -> String {
    match event {
        TimerEvent::Started { duration_ms } => {
            format!("Timer started: {}", format_remaining(*duration_ms))
        }
        TimerEvent::Tick { remaining_ms } => format!("Remaining: {}", format_remaining(*remaining_ms)),
        TimerEvent::Finished => "Finished - locking device".to_string(),
        TimerEvent::Stopped => "Timer stopped".to_string(),
    }
}

/// Renders each event as a status line
///
/// Lines are handed to a channel rather than written inline, so a slow or
/// blocked stdout never stalls the publishing path.
#[derive(Debug)]
pub struct StatusLine {
    lines: mpsc::UnboundedSender<String>,
}

impl StatusLine {
    pub fn new(lines: mpsc::UnboundedSender<String>) -> Self {
        Self { lines }
    }

    /// Status line printed to stdout by a dedicated writer thread
    ///
    /// The thread exits once the `StatusLine` is dropped and every queued
    /// line has been written; join it to flush before the process exits.
    pub fn stdout() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer = std::thread::spawn(move || {
            let stdout = std::io::stdout();
            while let Some(line) = rx.blocking_recv() {
                let mut out = stdout.lock();
                if writeln!(out, "{}", line).and_then(|()| out.flush()).is_err() {
                    break;
                }
            }
        });

        (Self::new(tx), writer)
    }
}

impl Subscriber for StatusLine {
    fn on_event(&self, event: &TimerEvent) {
        let line = render(event);
        debug!("status: {}", line);
        if self.lines.send(line).is_err() {
            debug!("Status writer closed, dropping line");
        }
    }

    fn name(&self) -> &'static str {
        "status-line"
    }
}

/// Tracks which expiry warnings are due for the current run
#[derive(Debug, Default)]
struct WarningTracker {
    thresholds_ms: Vec<u64>,
    pending: Vec<u64>,
}

impl WarningTracker {
    fn new(warning_minutes: &[u32]) -> Self {
        Self {
            thresholds_ms: warning_minutes.iter().map(|m| u64::from(*m) * 60_000).collect(),
            pending: Vec::new(),
        }
    }

    /// Arm warnings that fall inside the run's duration
    fn start(&mut self, duration_ms: u64) {
        self.pending = self
            .thresholds_ms
            .iter()
            .copied()
            .filter(|t| *t > 0 && *t < duration_ms)
            .collect();
    }

    /// Take the warning crossed by this tick, if any
    ///
    /// When several thresholds are crossed at once only the smallest is
    /// reported.
    fn on_tick(&mut self, remaining_ms: u64) -> Option<u64> {
        if remaining_ms == 0 {
            self.pending.clear();
            return None;
        }

        let crossed: Vec<u64> = self
            .pending
            .iter()
            .copied()
            .filter(|t| remaining_ms <= *t)
            .collect();
        self.pending.retain(|t| remaining_ms > *t);
        crossed.into_iter().min()
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Sends desktop notifications for lifecycle events and expiry warnings
pub struct DesktopNotifier {
    warnings: Mutex<WarningTracker>,
}

impl DesktopNotifier {
    pub fn new(warning_minutes: &[u32]) -> Self {
        Self {
            warnings: Mutex::new(WarningTracker::new(warning_minutes)),
        }
    }

    /// Message to show for an event, if any
    fn message_for(&self, event: &TimerEvent) -> Option<String> {
        let mut warnings = self.warnings.lock().unwrap_or_else(PoisonError::into_inner);

        match event {
            TimerEvent::Started { duration_ms } => {
                warnings.start(*duration_ms);
                Some(format!(
                    "Timer started. The device will lock in {}.",
                    format_remaining(*duration_ms)
                ))
            }
            TimerEvent::Tick { remaining_ms } => warnings.on_tick(*remaining_ms).map(|t| {
                let minutes = t / 60_000;
                format!(
                    "{} minute{} remaining. Please save your work.",
                    minutes,
                    if minutes == 1 { "" } else { "s" }
                )
            }),
            TimerEvent::Finished => {
                warnings.clear();
                Some("Time is up. Locking the device.".to_string())
            }
            TimerEvent::Stopped => {
                warnings.clear();
                Some("Timer stopped by guardian.".to_string())
            }
        }
    }
}

impl Subscriber for DesktopNotifier {
    fn on_event(&self, event: &TimerEvent) {
        let Some(message) = self.message_for(event) else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, skipping notification: {}", message);
            return;
        };

        runtime.spawn(async move {
            if let Err(e) = send_system_notification(NOTIFICATION_TITLE, &message).await {
                warn!("Failed to send notification: {:#}", e);
            }
        });
    }

    fn name(&self) -> &'static str {
        "desktop-notifier"
    }
}

/// Send a system notification (platform-specific)
async fn send_system_notification(title: &str, message: &str) -> anyhow::Result<()> {
    #[cfg(target_os = "linux")]
    {
        crate::timer_lock::platform::try_command(
            "notify-send",
            &[title, message, "--urgency=critical", "--icon=dialog-warning"],
        )
        .await
    }

    #[cfg(target_os = "macos")]
    {
        let script = format!(
            "display notification \"{}\" with title \"{}\" sound name \"Glass\"",
            message.replace('"', "'"),
            title
        );
        crate::timer_lock::platform::try_command("osascript", &["-e", script.as_str()]).await
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        // No notification tool without extra dependencies; log it instead
        tracing::info!("Notification: {} - {}", title, message);
        Ok(())
    }
}
