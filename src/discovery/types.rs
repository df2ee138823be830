//! Discovery run types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlator::DeviceProfile;
use crate::runner::ProbeFailure;

/// Discovery request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// CIDR range or single address
    pub scope: String,
    /// Probe names; empty = every registered probe
    #[serde(default)]
    pub probes: Vec<String>,
    /// Overrides the configured per-probe timeout
    pub per_probe_timeout_ms: Option<u64>,
    /// Overrides the configured overall timeout
    pub overall_timeout_ms: Option<u64>,
}

impl DiscoveryRequest {
    pub fn new(scope: &str) -> Self {
        Self {
            scope: scope.to_string(),
            probes: Vec::new(),
            per_probe_timeout_ms: None,
            overall_timeout_ms: None,
        }
    }

    pub fn with_probes(mut self, probes: &[&str]) -> Self {
        self.probes = probes.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_timeouts(mut self, per_probe_ms: u64, overall_ms: u64) -> Self {
        self.per_probe_timeout_ms = Some(per_probe_ms);
        self.overall_timeout_ms = Some(overall_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every probe finished
    Success,
    /// Some probes failed, others produced results
    Partial,
    /// Every launched probe failed
    Failed,
}

impl RunStatus {
    pub fn from_counts(launched: usize, failed: usize) -> Self {
        if failed == 0 {
            RunStatus::Success
        } else if failed >= launched {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLogEventType {
    Info,
    ProbeFinished,
    ProbeFailed,
    Merged,
}

/// Run log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: RunLogEventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<String>,
}

impl RunLogEntry {
    pub fn new(event_type: RunLogEventType, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            message: message.to_string(),
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: &str) -> Self {
        self.probe = Some(probe.to_string());
        self
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub probes_launched: usize,
    pub probes_failed: usize,
    /// Raw observations received
    pub observations: usize,
    /// Observations that normalized to evidence
    pub records: usize,
    /// Devices created or updated
    pub devices: usize,
}

/// Recorded discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRun {
    pub run_id: Uuid,
    pub scope: String,
    pub probes: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<RunSummary>,
    #[serde(default)]
    pub failures: Vec<ProbeFailure>,
    #[serde(default)]
    pub logs: Vec<RunLogEntry>,
}

/// Result of one discovery call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Profiles touched by this run, ranked
    pub profiles: Vec<DeviceProfile>,
    /// Probes that timed out, errored or were abandoned
    pub failures: Vec<ProbeFailure>,
    pub summary: RunSummary,
}

impl DiscoveryReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
