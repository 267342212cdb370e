use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::platform::common::atomic_write_private;
use crate::timer_lock::error::TimerLockError;

/// Credential file format version
const CREDENTIAL_VERSION: &str = "1.0";

/// Number of digits in a guardian PIN
pub const PIN_LENGTH: usize = 4;

/// Guardian PIN gating early cancellation
///
/// Always exactly [`PIN_LENGTH`] ASCII digits. Compared for equality only and
/// never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credential(String);

impl Credential {
    /// Validate and wrap a PIN
    pub fn parse(pin: &str) -> Result<Self, TimerLockError> {
        if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(pin.to_string()))
        } else {
            Err(TimerLockError::InvalidPinFormat)
        }
    }

    /// Compare against an entered PIN without stopping at the first difference
    pub fn matches(&self, entered: &str) -> bool {
        let stored = self.0.as_bytes();
        let entered = entered.as_bytes();

        let mut diff = stored.len() ^ entered.len();
        for (i, &b) in stored.iter().enumerate() {
            let other = entered.get(i).copied().unwrap_or(0);
            diff |= usize::from(b ^ other);
        }
        diff == 0
    }
}

impl TryFrom<String> for Credential {
    type Error = TimerLockError;

    fn try_from(pin: String) -> Result<Self, Self::Error> {
        Self::parse(&pin)
    }
}

impl From<Credential> for String {
    fn from(credential: Credential) -> Self {
        credential.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

/// Storage for the guardian credential
///
/// Set once during setup, read on every unlock attempt.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<Credential>>;
    fn set(&self, credential: &Credential) -> Result<()>;
}

/// Credential store kept in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        Ok(self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }
}

/// On-disk credential record
#[derive(Debug, Clone, Deserialize, Serialize)]
struct CredentialFile {
    version: String,
    pin: Credential,
    set_at: DateTime<Utc>,
}

/// Credential store backed by an owner-only JSON file
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credential file: {}", self.path.display()))?;

        let file: CredentialFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse credential file: {}", self.path.display()))?;

        if file.version != CREDENTIAL_VERSION {
            anyhow::bail!(
                "Unsupported credential file version {} (expected {}): {}",
                file.version,
                CREDENTIAL_VERSION,
                self.path.display()
            );
        }

        Ok(Some(file.pin))
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        let file = CredentialFile {
            version: CREDENTIAL_VERSION.to_string(),
            pin: credential.clone(),
            set_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&file)
            .context("Failed to serialize credential")?;

        atomic_write_private(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write credential file: {}", self.path.display()))?;

        tracing::info!("Guardian PIN saved to {}", self.path.display());
        Ok(())
    }
}

/// Get the default credential file path
pub fn get_credential_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "smart-timer-lock")
        .context("Could not determine data directory")?;

    Ok(dirs.data_local_dir().join("credential.json"))
}
