use std::time::Duration;
use thiserror::Error;

/// Broad class of a [`TimerLockError`]
///
/// Nothing in the timer core is fatal to the hosting process; the class tells
/// the caller how to react (fix the input, re-enter the PIN, or just report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad duration or PIN format, correctable by the caller
    Validation,
    /// Wrong or missing PIN; the timer keeps running
    Authorization,
    /// The external lock/unlock action failed; terminal timer state stands
    ExternalAction,
    /// The credential store could not be read or written
    Storage,
}

/// Errors reported by the timer lock core
#[derive(Debug, Error)]
pub enum TimerLockError {
    #[error("duration must be greater than zero")]
    InvalidDuration,

    #[error("PIN must be exactly 4 digits")]
    InvalidPinFormat,

    #[error("PIN confirmation does not match")]
    PinConfirmationMismatch,

    #[error("incorrect PIN")]
    Unauthorized,

    #[error("no PIN has been set up yet")]
    NoCredentialSet,

    #[error("too many PIN attempts, try again in {}s", retry_after.as_secs().max(1))]
    TooManyAttempts { retry_after: Duration },

    #[error("device lock action failed: {0}")]
    LockAction(String),

    #[error("credential store error: {0:#}")]
    CredentialStore(#[from] anyhow::Error),
}

impl TimerLockError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDuration | Self::InvalidPinFormat | Self::PinConfirmationMismatch => {
                ErrorKind::Validation
            }
            Self::Unauthorized | Self::NoCredentialSet | Self::TooManyAttempts { .. } => {
                ErrorKind::Authorization
            }
            Self::LockAction(_) => ErrorKind::ExternalAction,
            Self::CredentialStore(_) => ErrorKind::Storage,
        }
    }
}
