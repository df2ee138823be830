//! Per-probe output sink handed to `Probe::run`

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::evidence::{RawObservation, RawProbeOutput};
use crate::runner::RunnerEvent;

/// Where a running probe emits its observations, incrementally.
/// Observations sent before a timeout are kept by the runner. Once the
/// probe has reported (finished, failed, timed out or abandoned) every
/// clone of its sink is closed.
#[derive(Clone)]
pub struct ProbeSink {
    probe_name: String,
    trust_weight: f64,
    budget: Duration,
    tx: mpsc::UnboundedSender<RunnerEvent>,
    token: CancellationToken,
    emitted: Arc<AtomicUsize>,
}

impl ProbeSink {
    pub(crate) fn new(
        probe_name: &str,
        trust_weight: f64,
        budget: Duration,
        tx: mpsc::UnboundedSender<RunnerEvent>,
        token: CancellationToken,
    ) -> Self {
        Self {
            probe_name: probe_name.to_string(),
            trust_weight,
            budget,
            tx,
            token,
            emitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Emit one observation stamped with the current time.
    /// Returns false once the run is over and nobody is listening.
    pub fn emit(&self, address: IpAddr, output: RawProbeOutput) -> bool {
        self.emit_at(address, Utc::now(), output)
    }

    pub fn emit_at(&self, address: IpAddr, observed_at: DateTime<Utc>, output: RawProbeOutput) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let observation = RawObservation {
            probe_name: self.probe_name.clone(),
            trust_weight: self.trust_weight,
            address,
            observed_at,
            output,
        };
        let sent = self.tx.send(RunnerEvent::Observation(observation)).is_ok();
        if sent {
            self.emitted.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Time budget the probe must apply to its own network operations
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn probe_name(&self) -> &str {
        &self.probe_name
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when this probe's run is over: its own budget expired,
    /// it reported, or the overall deadline passed
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Refuse any further emission from this probe
    pub(crate) fn close(&self) {
        self.token.cancel();
    }

    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }

    pub(crate) fn finish(&self, event: RunnerEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
pub(crate) fn test_sink(
    probe_name: &str,
    trust_weight: f64,
) -> (ProbeSink, mpsc::UnboundedReceiver<RunnerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ProbeSink::new(
        probe_name,
        trust_weight,
        Duration::from_millis(200),
        tx,
        CancellationToken::new(),
    );
    (sink, rx)
}
