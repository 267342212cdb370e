use serde::Serialize;

/// Lifecycle event emitted by the lock timer
///
/// Events are emitted one per tick or transition and must be observed in
/// emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimerEvent {
    /// A run began with the given total duration
    Started { duration_ms: u64 },
    /// One granularity unit elapsed
    Tick { remaining_ms: u64 },
    /// The countdown reached zero
    Finished,
    /// The run was cancelled before expiry
    Stopped,
}

impl TimerEvent {
    /// Whether this event ends the current run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(TimerEvent::Finished.is_terminal());
        assert!(TimerEvent::Stopped.is_terminal());
        assert!(!TimerEvent::Tick { remaining_ms: 0 }.is_terminal());
        assert!(!TimerEvent::Started { duration_ms: 1000 }.is_terminal());
    }

    #[test]
    fn test_serializes_as_tagged_json() {
        let json = serde_json::to_string(&TimerEvent::Tick { remaining_ms: 1000 }).unwrap();
        assert_eq!(json, r#"{"event":"tick","remaining_ms":1000}"#);

        let json = serde_json::to_string(&TimerEvent::Finished).unwrap();
        assert_eq!(json, r#"{"event":"finished"}"#);
    }
}
