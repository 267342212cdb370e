use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::StartArgs;
use crate::commands::utils::prompt;
use crate::platform::atomic_write;
use crate::timer_lock::config::{
    get_config_path, load_config, load_config_or_default, TimerLockConfig, EXAMPLE_CONFIG,
};
use crate::timer_lock::store::{get_credential_path, CredentialStore, FileCredentialStore};
use crate::timer_lock::{
    DesktopNotifier, ServiceSupervisor, StartCommand, StatusLine, Subscriber, TimerLockError,
    UnlockGate, UnlockRequest,
};

/// Initialize a new configuration file
pub fn init(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output_path = match output {
        Some(path) => path,
        None => get_config_path()?,
    };

    write_example_config(&output_path, force)?;

    println!("✓ Created configuration file: {}", output_path.display());
    println!("\nNext, set the guardian PIN: smart-timer-lock pin set");

    Ok(())
}

fn write_example_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            path.display()
        );
    }

    atomic_write(path, EXAMPLE_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// Set or replace the guardian PIN
pub fn pin_set(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_settings(config_path)?;
    let gate = UnlockGate::new(credential_store(&config)?, config.attempt_limit());

    let stdin = std::io::stdin();
    set_pin_interactive(&gate, &mut stdin.lock())?;

    println!("✓ Guardian PIN saved");
    Ok(())
}

fn set_pin_interactive<R: BufRead>(gate: &UnlockGate, input: &mut R) -> Result<()> {
    let current = if gate.has_credential()? {
        Some(UnlockRequest::new(prompt(input, "Current PIN")?))
    } else {
        None
    };

    let pin = prompt(input, "New PIN (4 digits)")?;
    let confirm = prompt(input, "Confirm PIN")?;

    gate.setup_credential(&pin, &confirm, current)?;
    Ok(())
}

/// Report whether a guardian PIN is configured
pub fn pin_check(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_settings(config_path)?;
    let store = credential_store(&config)?;

    if store.get()?.is_some() {
        println!("✓ Guardian PIN is configured");
    } else {
        println!("No guardian PIN set.\nRun: smart-timer-lock pin set");
    }

    Ok(())
}

/// Run a countdown in the foreground until it finishes or is stopped
pub async fn start(config_path: Option<PathBuf>, args: StartArgs) -> Result<()> {
    let command = match (args.minutes, args.seconds) {
        (Some(minutes), _) => StartCommand::from_minutes(minutes)?,
        (None, Some(seconds)) => StartCommand::from_seconds(seconds)?,
        (None, None) => return Err(TimerLockError::InvalidDuration.into()),
    };

    let config = load_settings(config_path)?;
    let supervisor = ServiceSupervisor::from_config(&config, credential_store(&config)?);

    if !supervisor.gate().has_credential()? {
        anyhow::bail!(
            "{}\nRun: smart-timer-lock pin set",
            TimerLockError::NoCredentialSet
        );
    }

    let (status_line, status_writer) = StatusLine::stdout();
    let status_line: Arc<dyn Subscriber> = Arc::new(status_line);
    supervisor.subscribe(&status_line);

    let notifier: Option<Arc<dyn Subscriber>> = config
        .notifications
        .desktop
        .then(|| Arc::new(DesktopNotifier::new(&config.notifications.warnings)) as Arc<dyn Subscriber>);
    if let Some(notifier) = &notifier {
        supervisor.subscribe(notifier);
    }

    supervisor.handle_start(command.duration_ms).await?;
    println!("Enter the guardian PIN and press Enter to stop early.");

    run_until_idle(&supervisor, spawn_stdin_reader(), config.require_pin_to_quit).await;

    // Flush the remaining status lines
    drop(status_line);
    if status_writer.join().is_err() {
        warn!("Status writer thread panicked");
    }

    Ok(())
}

/// Forward stdin lines from a plain thread
///
/// A blocking stdin read cannot be cancelled, so it must not hold up
/// runtime shutdown once the countdown is over.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Feed entered PINs to the supervisor until the keep-alive signal drops
async fn run_until_idle(
    supervisor: &ServiceSupervisor,
    mut pins: mpsc::UnboundedReceiver<String>,
    require_pin_to_quit: bool,
) {
    let mut alive = supervisor.keep_alive();
    let mut input_open = true;

    while *alive.borrow_and_update() {
        tokio::select! {
            changed = alive.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = pins.recv(), if input_open => match line {
                Some(pin) => match supervisor.handle_stop(UnlockRequest::new(pin.trim())).await {
                    Ok(report) => {
                        if let Some(e) = report.release_error {
                            eprintln!("Warning: failed to release device lock: {}", e);
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                },
                None => {
                    debug!("Input closed, waiting for the countdown to finish");
                    input_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                if require_pin_to_quit {
                    eprintln!("\nEnter the guardian PIN to stop the timer.");
                } else {
                    info!("Interrupted, exiting without locking");
                    break;
                }
            }
        }
    }

    supervisor.controller().settle().await;
}

fn load_settings(config_path: Option<PathBuf>) -> Result<TimerLockConfig> {
    match config_path {
        Some(path) => load_config(&path),
        None => load_config_or_default(&get_config_path()?),
    }
}

fn credential_store(config: &TimerLockConfig) -> Result<Arc<dyn CredentialStore>> {
    let path = match &config.credential_path {
        Some(path) => path.clone(),
        None => get_credential_path()?,
    };

    Ok(Arc::new(FileCredentialStore::new(path)))
}
