//! Endpoint liveness state machine.
//!
//! # States
//! - Offline: not seen since startup, or the last observation failed
//! - Reconnecting: recovering, fewer than `recovery_successes` in a row
//! - Active: reachable
//!
//! # State Transitions
//! ```text
//! Offline      → Active:       success, recovery_successes == 1
//! Offline      → Reconnecting: success, recovery_successes > 1
//! Reconnecting → Active:       consecutive successes >= recovery_successes
//! Active | Reconnecting → Offline: any failed or abandoned probe
//! ```
//!
//! Observations carry the number of the round that produced them. An
//! observation from a round older than the last one applied is dropped, so
//! overlapping rounds cannot move a target backwards.

use serde::{Serialize, Serializer};

/// Liveness of a heartbeat target, serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LivenessState {
    #[default]
    Offline = 0,
    Active = 1,
    Reconnecting = 2,
}

impl LivenessState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LivenessState::Offline => "offline",
            LivenessState::Active => "active",
            LivenessState::Reconnecting => "reconnecting",
        }
    }
}

impl From<u8> for LivenessState {
    fn from(v: u8) -> Self {
        match v {
            1 => LivenessState::Active,
            2 => LivenessState::Reconnecting,
            _ => LivenessState::Offline,
        }
    }
}

impl Serialize for LivenessState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

/// Result of applying one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// A newer round was already applied; nothing changed.
    Stale,
    Applied {
        from: LivenessState,
        to: LivenessState,
    },
}

impl Update {
    pub fn changed(&self) -> bool {
        matches!(self, Update::Applied { from, to } if from != to)
    }
}

/// Mutable liveness of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    pub state: LivenessState,
    pub consecutive_successes: u32,
    /// Round that produced the current state; 0 before the first round.
    pub last_round: u64,
    pub last_error: Option<String>,
}

impl Liveness {
    /// Apply a successful probe from `round`.
    pub fn record_success(&mut self, round: u64, recovery_successes: u32) -> Update {
        if round < self.last_round {
            return Update::Stale;
        }
        let from = self.state;
        self.last_round = round;
        self.last_error = None;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);

        self.state = match from {
            LivenessState::Active => LivenessState::Active,
            LivenessState::Offline | LivenessState::Reconnecting => {
                if self.consecutive_successes >= recovery_successes.max(1) {
                    LivenessState::Active
                } else {
                    LivenessState::Reconnecting
                }
            }
        };
        Update::Applied {
            from,
            to: self.state,
        }
    }

    /// Apply a failed or abandoned probe from `round`.
    pub fn record_failure(&mut self, round: u64, error: impl Into<String>) -> Update {
        if round < self.last_round {
            return Update::Stale;
        }
        let from = self.state;
        self.last_round = round;
        self.last_error = Some(error.into());
        self.consecutive_successes = 0;
        self.state = LivenessState::Offline;
        Update::Applied {
            from,
            to: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert_eq!(LivenessState::Offline.as_u8(), 0);
        assert_eq!(LivenessState::Active.as_u8(), 1);
        assert_eq!(LivenessState::Reconnecting.as_u8(), 2);
        assert_eq!(LivenessState::from(2), LivenessState::Reconnecting);
        assert_eq!(LivenessState::from(9), LivenessState::Offline);
        assert_eq!(serde_json::to_string(&LivenessState::Active).unwrap(), "1");
    }

    #[test]
    fn test_success_activates_and_failure_drops_offline() {
        let mut liveness = Liveness::default();

        let update = liveness.record_success(1, 1);
        assert_eq!(
            update,
            Update::Applied {
                from: LivenessState::Offline,
                to: LivenessState::Active
            }
        );

        let update = liveness.record_failure(2, "connection refused");
        assert!(update.changed());
        assert_eq!(liveness.state, LivenessState::Offline);
        assert_eq!(liveness.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_failure_while_offline_stays_offline() {
        let mut liveness = Liveness::default();
        let update = liveness.record_failure(1, "timeout");
        assert!(!update.changed());
        assert_eq!(liveness.state, LivenessState::Offline);
    }

    #[test]
    fn test_recovery_passes_through_reconnecting() {
        let mut liveness = Liveness::default();

        liveness.record_success(1, 3);
        assert_eq!(liveness.state, LivenessState::Reconnecting);
        liveness.record_success(2, 3);
        assert_eq!(liveness.state, LivenessState::Reconnecting);
        liveness.record_success(3, 3);
        assert_eq!(liveness.state, LivenessState::Active);

        // A failure mid-recovery restarts the count.
        liveness.record_failure(4, "timeout");
        liveness.record_success(5, 3);
        assert_eq!(liveness.state, LivenessState::Reconnecting);
        assert_eq!(liveness.consecutive_successes, 1);
    }

    #[test]
    fn test_older_round_is_ignored() {
        let mut liveness = Liveness::default();
        liveness.record_success(4, 1);

        assert_eq!(liveness.record_failure(3, "late"), Update::Stale);
        assert_eq!(liveness.state, LivenessState::Active);
        assert_eq!(liveness.last_round, 4);
        assert!(liveness.last_error.is_none());
    }
}
