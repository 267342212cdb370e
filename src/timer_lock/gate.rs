use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::timer_lock::error::TimerLockError;
use crate::timer_lock::store::{Credential, CredentialStore};

/// PIN entered by the user to stop a running timer
///
/// Consumed by [`UnlockGate::verify`] and not retained afterwards.
pub struct UnlockRequest {
    entered_pin: String,
}

impl UnlockRequest {
    pub fn new(entered_pin: impl Into<String>) -> Self {
        Self {
            entered_pin: entered_pin.into(),
        }
    }
}

impl fmt::Debug for UnlockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnlockRequest(****)")
    }
}

/// Sliding-window limit on PIN attempts
///
/// `max_attempts == 0` disables limiting, which is the default: a correct PIN
/// always stops the timer.
#[derive(Debug, Clone, Copy)]
pub struct AttemptLimit {
    pub max_attempts: usize,
    pub window: Duration,
}

impl AttemptLimit {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            window: Duration::from_secs(60),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }
}

impl Default for AttemptLimit {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Rate limiter for PIN attempts
#[derive(Debug)]
struct RateLimiter {
    attempts: Vec<Instant>,
    limit: AttemptLimit,
}

impl RateLimiter {
    fn new(limit: AttemptLimit) -> Self {
        Self {
            attempts: Vec::new(),
            limit,
        }
    }

    /// Record an attempt if allowed, otherwise return the time until one is
    fn try_acquire(&mut self) -> Result<(), Duration> {
        if !self.limit.is_enabled() {
            return Ok(());
        }

        let now = Instant::now();
        let window = self.limit.window;

        self.attempts.retain(|&attempt| now.duration_since(attempt) < window);

        if self.attempts.len() < self.limit.max_attempts {
            self.attempts.push(now);
            return Ok(());
        }

        let oldest = self.attempts.first().copied().unwrap_or(now);
        Err(window.saturating_sub(now.duration_since(oldest)))
    }

    fn reset(&mut self) {
        self.attempts.clear();
    }
}

/// Validates the guardian PIN before a stop is allowed through
pub struct UnlockGate {
    store: Arc<dyn CredentialStore>,
    limiter: Mutex<RateLimiter>,
}

impl UnlockGate {
    pub fn new(store: Arc<dyn CredentialStore>, limit: AttemptLimit) -> Self {
        Self {
            store,
            limiter: Mutex::new(RateLimiter::new(limit)),
        }
    }

    /// Whether a credential has been set up
    pub fn has_credential(&self) -> Result<bool, TimerLockError> {
        Ok(self.store.get()?.is_some())
    }

    /// Check an entered PIN against the stored credential
    ///
    /// A wrong PIN is `Ok(false)`, not an error. Fails with `NoCredentialSet`
    /// when setup has never happened. With an attempt limit configured, fails
    /// with `TooManyAttempts` once the window is exhausted; a correct PIN
    /// clears the window.
    pub fn verify(&self, request: UnlockRequest) -> Result<bool, TimerLockError> {
        let credential = self.store.get()?.ok_or(TimerLockError::NoCredentialSet)?;

        let mut limiter = self.limiter.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(retry_after) = limiter.try_acquire() {
            tracing::warn!("PIN attempt rejected by rate limit");
            return Err(TimerLockError::TooManyAttempts { retry_after });
        }

        let ok = credential.matches(&request.entered_pin);
        if ok {
            limiter.reset();
        } else {
            tracing::warn!("Incorrect PIN entered");
        }

        Ok(ok)
    }

    /// Store a new credential
    pub fn set_credential(&self, pin: &str) -> Result<(), TimerLockError> {
        let credential = Credential::parse(pin)?;
        self.store.set(&credential)?;
        Ok(())
    }

    /// Guardian setup flow: new PIN plus confirmation
    ///
    /// Replacing an existing credential requires the current PIN.
    pub fn setup_credential(
        &self,
        pin: &str,
        confirm: &str,
        current: Option<UnlockRequest>,
    ) -> Result<(), TimerLockError> {
        Credential::parse(pin)?;
        if pin != confirm {
            return Err(TimerLockError::PinConfirmationMismatch);
        }

        if self.has_credential()? {
            let current = current.ok_or(TimerLockError::Unauthorized)?;
            if !self.verify(current)? {
                return Err(TimerLockError::Unauthorized);
            }
        }

        self.set_credential(pin)
    }
}
