//! Runner event types

use serde::{Deserialize, Serialize};

use crate::evidence::RawObservation;

/// Why a probe produced no (further) results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Exceeded its own per-probe budget
    Timeout,
    /// Returned an error or its task died
    Error,
    /// Still running when the overall deadline passed
    Abandoned,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Error => "error",
            FailureReason::Abandoned => "abandoned",
        }
    }
}

/// Failure marker for one probe in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub probe_name: String,
    pub reason: FailureReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeFailure {
    pub fn new(probe_name: &str, reason: FailureReason, detail: Option<String>) -> Self {
        Self {
            probe_name: probe_name.to_string(),
            reason,
            detail,
        }
    }
}

/// One item of the runner's output sequence
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Observation(RawObservation),
    Failure(ProbeFailure),
    /// Probe returned normally
    Finished { probe: String, observations: usize },
}

impl RunnerEvent {
    /// Name of the probe that produced this event
    pub fn probe_name(&self) -> &str {
        match self {
            RunnerEvent::Observation(obs) => &obs.probe_name,
            RunnerEvent::Failure(failure) => &failure.probe_name,
            RunnerEvent::Finished { probe, .. } => probe,
        }
    }

    /// True for the last event a probe produces
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunnerEvent::Observation(_))
    }
}
