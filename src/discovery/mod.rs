//! DeviceDiscovery - discovery runs over the probe catalog
//!
//! ## Flow
//!
//! request → validate (scope, probe names, timeouts) → runner fan-out →
//! normalize each observation → one atomic registry upsert → ranked report
//!
//! Configuration errors are the only errors returned; they are raised
//! before any probe is launched. Probe failures come back as metadata.
//!
//! Run history keeps the newest [`MAX_RUN_HISTORY`] runs. Each run log holds
//! one entry per probe outcome with its counts, not one per observation.

mod types;

pub use types::*;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::evidence::normalize;
use crate::probe::{Probe, ProbeCatalog, Scope};
use crate::registry::{sort_ranked, DeviceRegistry};
use crate::runner::{self, RunnerEvent};
use crate::state::EngineConfig;

/// Validated request, ready to launch
struct Plan {
    scope: Scope,
    probes: Vec<Arc<dyn Probe>>,
    per_probe_timeout: Duration,
    overall_timeout: Duration,
}

impl Plan {
    fn probe_names(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.name().to_string()).collect()
    }
}

/// Runs kept by default
pub const MAX_RUN_HISTORY: usize = 64;

/// Recorded runs in insertion order; the oldest is evicted past the limit
#[derive(Default)]
struct RunHistory {
    runs: HashMap<Uuid, DiscoveryRun>,
    order: VecDeque<Uuid>,
}

impl RunHistory {
    fn insert(&mut self, run: DiscoveryRun, limit: usize) {
        self.order.push_back(run.run_id);
        self.runs.insert(run.run_id, run);
        while self.order.len() > limit {
            if let Some(oldest) = self.order.pop_front() {
                self.runs.remove(&oldest);
            }
        }
    }
}

/// Per-probe counters folded into the probe's outcome log entry
#[derive(Debug, Default)]
struct ProbeTally {
    observations: usize,
    records: usize,
    dropped: usize,
}

impl ProbeTally {
    fn describe(&self) -> String {
        format!(
            "{} observation(s), {} record(s), {} dropped",
            self.observations, self.records, self.dropped
        )
    }
}

/// Discovery service
pub struct DeviceDiscovery {
    catalog: Arc<ProbeCatalog>,
    registry: Arc<DeviceRegistry>,
    config: EngineConfig,
    runs: Arc<RwLock<RunHistory>>,
    history_limit: usize,
}

impl DeviceDiscovery {
    pub fn new(catalog: Arc<ProbeCatalog>, registry: Arc<DeviceRegistry>, config: EngineConfig) -> Self {
        Self {
            catalog,
            registry,
            config,
            runs: Arc::new(RwLock::new(RunHistory::default())),
            history_limit: MAX_RUN_HISTORY,
        }
    }

    /// Keep at most `limit` runs (at least one)
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn catalog(&self) -> &ProbeCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    fn plan(&self, request: &DiscoveryRequest) -> Result<Plan> {
        let scope = Scope::parse(&request.scope)?;
        let probes = self.catalog.resolve(&request.probes)?;

        let per_probe_ms = request
            .per_probe_timeout_ms
            .unwrap_or(self.config.per_probe_timeout_ms);
        let overall_ms = request
            .overall_timeout_ms
            .unwrap_or(self.config.overall_timeout_ms);
        if per_probe_ms == 0 || overall_ms == 0 {
            return Err(Error::Validation("timeouts must be greater than zero".to_string()));
        }
        if per_probe_ms > overall_ms {
            return Err(Error::Validation(format!(
                "per-probe timeout {}ms exceeds overall timeout {}ms",
                per_probe_ms, overall_ms
            )));
        }

        Ok(Plan {
            scope,
            probes,
            per_probe_timeout: Duration::from_millis(per_probe_ms),
            overall_timeout: Duration::from_millis(overall_ms),
        })
    }

    /// Raw runner sequence for callers consuming results incrementally.
    /// Nothing is merged into the registry.
    pub fn discover_stream(&self, request: &DiscoveryRequest) -> Result<BoxStream<'static, RunnerEvent>> {
        let plan = self.plan(request)?;
        Ok(runner::discover(
            plan.scope,
            plan.probes,
            plan.per_probe_timeout,
            plan.overall_timeout,
        ))
    }

    /// Run one discovery and merge its evidence into the registry
    pub async fn discover(&self, request: DiscoveryRequest) -> Result<DiscoveryReport> {
        let plan = match self.plan(&request) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(scope = %request.scope, error = %e, "Discovery request rejected");
                return Err(e);
            }
        };

        let run_id = Uuid::new_v4();
        let probe_names = plan.probe_names();
        let run = DiscoveryRun {
            run_id,
            scope: plan.scope.to_string(),
            probes: probe_names.clone(),
            status: RunStatus::Running,
            started_at: chrono::Utc::now(),
            ended_at: None,
            summary: None,
            failures: Vec::new(),
            logs: vec![RunLogEntry::new(
                RunLogEventType::Info,
                &format!("Discovery started: scope={} probes={:?}", plan.scope, probe_names),
            )],
        };
        self.runs.write().await.insert(run, self.history_limit);

        tracing::info!(
            run_id = %run_id,
            scope = %plan.scope,
            probes = ?probe_names,
            "Discovery started"
        );

        let mut summary = RunSummary {
            probes_launched: plan.probes.len(),
            ..Default::default()
        };
        let mut records = Vec::new();
        let mut failures = Vec::new();
        let mut tallies: HashMap<String, ProbeTally> = HashMap::new();

        let mut events = runner::discover(
            plan.scope,
            plan.probes,
            plan.per_probe_timeout,
            plan.overall_timeout,
        );
        while let Some(event) = events.next().await {
            match event {
                RunnerEvent::Observation(observation) => {
                    summary.observations += 1;
                    let tally = tallies.entry(observation.probe_name.clone()).or_default();
                    tally.observations += 1;
                    match normalize(&observation) {
                        Some(record) => {
                            tracing::debug!(
                                probe = %record.probe_name,
                                address = %record.device_address,
                                attributes = record.attributes.len(),
                                "Evidence normalized"
                            );
                            tally.records += 1;
                            records.push(record);
                        }
                        None => {
                            tracing::debug!(
                                probe = %observation.probe_name,
                                address = %observation.address,
                                "Nothing mappable"
                            );
                            tally.dropped += 1;
                        }
                    }
                }
                RunnerEvent::Finished { probe, .. } => {
                    let tally = tallies.remove(&probe).unwrap_or_default();
                    self.add_log(
                        &run_id,
                        RunLogEntry::new(RunLogEventType::ProbeFinished, &tally.describe()).with_probe(&probe),
                    )
                    .await;
                }
                RunnerEvent::Failure(failure) => {
                    let tally = tallies.remove(&failure.probe_name).unwrap_or_default();
                    let message = match &failure.detail {
                        Some(detail) => format!("{}: {} ({})", failure.reason.as_str(), detail, tally.describe()),
                        None => format!("{} ({})", failure.reason.as_str(), tally.describe()),
                    };
                    self.add_log(
                        &run_id,
                        RunLogEntry::new(RunLogEventType::ProbeFailed, &message).with_probe(&failure.probe_name),
                    )
                    .await;
                    failures.push(failure);
                }
            }
        }

        summary.records = records.len();
        summary.probes_failed = failures.len();

        let upsert = self.registry.upsert(&records).await;
        summary.devices = upsert.created.len() + upsert.updated.len();

        let mut profiles = Vec::with_capacity(summary.devices);
        for address in upsert.touched() {
            if let Some(profile) = self.registry.get(address).await {
                profiles.push(profile);
            }
        }
        sort_ranked(&mut profiles);

        let status = RunStatus::from_counts(summary.probes_launched, summary.probes_failed);
        {
            let mut history = self.runs.write().await;
            if let Some(run) = history.runs.get_mut(&run_id) {
                run.logs.push(RunLogEntry::new(
                    RunLogEventType::Merged,
                    &format!(
                        "{} record(s) merged: {} new, {} updated",
                        summary.records,
                        upsert.created.len(),
                        upsert.updated.len()
                    ),
                ));
                run.status = status;
                run.ended_at = Some(chrono::Utc::now());
                run.summary = Some(summary.clone());
                run.failures = failures.clone();
            }
        }

        tracing::info!(
            run_id = %run_id,
            status = ?status,
            observations = summary.observations,
            records = summary.records,
            devices = summary.devices,
            probes_failed = summary.probes_failed,
            "Discovery complete"
        );

        Ok(DiscoveryReport {
            run_id,
            status,
            profiles,
            failures,
            summary,
        })
    }

    async fn add_log(&self, run_id: &Uuid, entry: RunLogEntry) {
        let mut history = self.runs.write().await;
        if let Some(run) = history.runs.get_mut(run_id) {
            run.logs.push(entry);
        }
    }

    pub async fn get_run(&self, run_id: &Uuid) -> Option<DiscoveryRun> {
        self.runs.read().await.runs.get(run_id).cloned()
    }

    /// Retained runs, newest first
    pub async fn list_runs(&self) -> Vec<DiscoveryRun> {
        let history = self.runs.read().await;
        history
            .order
            .iter()
            .rev()
            .filter_map(|id| history.runs.get(id).cloned())
            .collect()
    }
}
