//! Per-round probe results.

use serde::Serialize;

/// Why a target did not count as reachable in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every attempt failed to connect.
    Unreachable,
    /// The probe could not be executed (e.g. the address did not resolve).
    ProbeFailed,
    /// The probe was still running when the round's fan-out budget elapsed.
    Abandoned,
}

/// One target's failure in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointError {
    pub target: String,
    pub address: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Summary of one health round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub round: u64,
    pub started_at_unix_ms: u64,
    pub duration_ms: u64,
    /// Targets the round fanned out to.
    pub probed: usize,
    pub succeeded: usize,
    pub abandoned: usize,
    /// The overall round deadline elapsed before reporting completed.
    pub timed_out: bool,
    /// Failures sorted by target name.
    pub errors: Vec<EndpointError>,
}

impl RoundReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.timed_out
    }
}
