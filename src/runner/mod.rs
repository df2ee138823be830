//! Probe Runner
//!
//! Fans a scope out to every enabled probe concurrently and yields raw
//! observations and failure markers as they arrive.
//!
//! ## Deadlines
//! - per probe: `min(descriptor.timeout, per_probe_timeout)`; the probe's
//!   future is dropped on expiry and a `Timeout` marker is emitted
//! - overall: when reached, still-running probes get an `Abandoned`
//!   marker, the shared cancellation token fires and the sequence ends
//!
//! Observations emitted before either deadline are kept. After its terminal
//! event a probe's sink is closed, and anything it still manages to send is
//! discarded. The sequence ends as soon as every probe has reported.

mod types;

pub use types::{FailureReason, ProbeFailure, RunnerEvent};

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::probe::{Probe, ProbeSink, Scope};

/// Run `probes` against `scope`.
///
/// Nothing is launched until the returned stream is first polled. The
/// stream always terminates: at the latest once `overall_timeout` has
/// elapsed since launch.
pub fn discover(
    scope: Scope,
    probes: Vec<Arc<dyn Probe>>,
    per_probe_timeout: Duration,
    overall_timeout: Duration,
) -> BoxStream<'static, RunnerEvent> {
    let launch = Launch {
        scope,
        probes,
        per_probe_timeout,
        overall_timeout,
    };
    stream::unfold(RunState::Pending(launch), step).boxed()
}

struct Launch {
    scope: Scope,
    probes: Vec<Arc<dyn Probe>>,
    per_probe_timeout: Duration,
    overall_timeout: Duration,
}

struct Running {
    rx: mpsc::UnboundedReceiver<RunnerEvent>,
    deadline: Instant,
    token: CancellationToken,
    outstanding: BTreeSet<String>,
}

enum RunState {
    Pending(Launch),
    Running(Running),
    Draining(VecDeque<RunnerEvent>),
}

async fn step(mut state: RunState) -> Option<(RunnerEvent, RunState)> {
    loop {
        state = match state {
            RunState::Pending(launch) => RunState::Running(launch.start()),
            RunState::Running(mut run) => {
                let deadline = run.deadline;
                let next = tokio::select! {
                    biased;
                    event = run.rx.recv() => Some(event),
                    _ = tokio::time::sleep_until(deadline) => None,
                };
                match next {
                    Some(Some(event)) => {
                        if !run.admit(&event) {
                            RunState::Running(run)
                        } else if run.outstanding.is_empty() {
                            // Stray tasks may still hold senders
                            run.token.cancel();
                            return Some((event, RunState::Draining(VecDeque::new())));
                        } else {
                            return Some((event, RunState::Running(run)));
                        }
                    }
                    Some(None) => RunState::Draining(run.orphaned()),
                    None => RunState::Draining(run.abandon()),
                }
            }
            RunState::Draining(mut queue) => {
                let event = queue.pop_front()?;
                return Some((event, RunState::Draining(queue)));
            }
        };
    }
}

impl Launch {
    fn start(self) -> Running {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let scope = Arc::new(self.scope);
        let mut outstanding = BTreeSet::new();

        tracing::info!(
            scope = %scope,
            probes = self.probes.len(),
            overall_timeout_ms = self.overall_timeout.as_millis() as u64,
            "Launching probes"
        );

        for probe in self.probes {
            let descriptor = probe.descriptor();
            let budget = descriptor.timeout.min(self.per_probe_timeout);
            let sink = ProbeSink::new(
                &descriptor.name,
                descriptor.trust_weight,
                budget,
                tx.clone(),
                token.child_token(),
            );
            outstanding.insert(descriptor.name.clone());
            tokio::spawn(run_probe(probe, scope.clone(), sink, budget));
        }

        Running {
            rx,
            deadline: Instant::now() + self.overall_timeout,
            token,
            outstanding,
        }
    }
}

async fn run_probe(probe: Arc<dyn Probe>, scope: Arc<Scope>, sink: ProbeSink, budget: Duration) {
    let name = probe.name().to_string();
    let outcome = tokio::select! {
        outcome = tokio::time::timeout(budget, probe.run(&scope, &sink)) => outcome,
        // Overall deadline: the runner already reported this probe
        _ = sink.cancelled() => return,
    };
    sink.close();

    let event = match outcome {
        Ok(Ok(())) => RunnerEvent::Finished {
            probe: name,
            observations: sink.emitted(),
        },
        Ok(Err(e)) => RunnerEvent::Failure(ProbeFailure::new(
            &name,
            FailureReason::Error,
            Some(e.to_string()),
        )),
        Err(_) => RunnerEvent::Failure(ProbeFailure::new(
            &name,
            FailureReason::Timeout,
            Some(format!("exceeded {} ms", budget.as_millis())),
        )),
    };
    sink.finish(event);
}

impl Running {
    /// Book-keep one received event. Returns false for events from a probe
    /// that has already reported; those are dropped.
    fn admit(&mut self, event: &RunnerEvent) -> bool {
        match event {
            RunnerEvent::Observation(obs) => {
                let live = self.outstanding.contains(&obs.probe_name);
                if !live {
                    tracing::debug!(probe = %obs.probe_name, "Discarding observation after probe reported");
                }
                live
            }
            RunnerEvent::Finished { probe, observations } => {
                if !self.outstanding.remove(probe) {
                    return false;
                }
                tracing::info!(probe = %probe, observations = observations, "Probe finished");
                true
            }
            RunnerEvent::Failure(failure) => {
                if !self.outstanding.remove(&failure.probe_name) {
                    return false;
                }
                tracing::warn!(
                    probe = %failure.probe_name,
                    reason = failure.reason.as_str(),
                    detail = ?failure.detail,
                    "Probe failed"
                );
                true
            }
        }
    }

    /// Every sender is gone. Probes still outstanding died without
    /// reporting (panicked task).
    fn orphaned(self) -> VecDeque<RunnerEvent> {
        self.outstanding
            .iter()
            .map(|name| {
                tracing::warn!(probe = %name, "Probe task ended without reporting");
                RunnerEvent::Failure(ProbeFailure::new(
                    name,
                    FailureReason::Error,
                    Some("probe task ended without reporting".to_string()),
                ))
            })
            .collect()
    }

    /// Overall deadline reached
    fn abandon(mut self) -> VecDeque<RunnerEvent> {
        self.token.cancel();

        let mut queue = VecDeque::new();
        while let Ok(event) = self.rx.try_recv() {
            if self.admit(&event) {
                queue.push_back(event);
            }
        }

        if !self.outstanding.is_empty() {
            tracing::warn!(
                probes = ?self.outstanding,
                "Overall timeout reached, abandoning probes"
            );
        }
        for name in &self.outstanding {
            queue.push_back(RunnerEvent::Failure(ProbeFailure::new(
                name,
                FailureReason::Abandoned,
                Some("overall timeout reached".to_string()),
            )));
        }
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::evidence::{AttributeKey, AttributeKind, RawProbeOutput};
    use crate::probe::ProbeDescriptor;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Finish,
        Sleep(Duration),
        Fail(&'static str),
        Panic,
        /// Hands a sink clone to a detached task that emits after `emit_after`
        Leak { emit_after: Duration, run_for: Duration },
    }

    struct FakeProbe {
        descriptor: ProbeDescriptor,
        addresses: Vec<IpAddr>,
        behavior: Behavior,
        runs: Arc<AtomicUsize>,
    }

    impl FakeProbe {
        fn new(name: &str, addresses: &[&str], behavior: Behavior) -> Self {
            Self {
                descriptor: ProbeDescriptor::new(name, 0.5, Duration::from_secs(60)),
                addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
                behavior,
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        fn descriptor(&self) -> &ProbeDescriptor {
            &self.descriptor
        }

        async fn run(&self, _scope: &Scope, sink: &ProbeSink) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            for address in &self.addresses {
                let mut attrs = BTreeMap::new();
                attrs.insert(AttributeKey::new(AttributeKind::Manufacturer), "Acme".to_string());
                sink.emit(*address, RawProbeOutput::Attributes(attrs));
            }
            match self.behavior {
                Behavior::Finish => Ok(()),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(())
                }
                Behavior::Fail(msg) => Err(Error::probe(self.name(), msg)),
                Behavior::Panic => panic!("probe blew up"),
                Behavior::Leak { emit_after, run_for } => {
                    let leaked = sink.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(emit_after).await;
                        let mut attrs = BTreeMap::new();
                        attrs.insert(AttributeKey::new(AttributeKind::Manufacturer), "Late".to_string());
                        leaked.emit("10.0.0.99".parse().unwrap(), RawProbeOutput::Attributes(attrs));
                    });
                    tokio::time::sleep(run_for).await;
                    Ok(())
                }
            }
        }
    }

    fn scope() -> Scope {
        Scope::parse("10.0.0.0/24").unwrap()
    }

    async fn collect(
        probes: Vec<Arc<dyn Probe>>,
        per_probe: Duration,
        overall: Duration,
    ) -> Vec<RunnerEvent> {
        discover(scope(), probes, per_probe, overall).collect().await
    }

    fn failures(events: &[RunnerEvent]) -> Vec<&ProbeFailure> {
        events
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::Failure(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn observation_count(events: &[RunnerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, RunnerEvent::Observation(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_results() {
        let fast: Arc<dyn Probe> = Arc::new(FakeProbe::new("fast", &["10.0.0.1", "10.0.0.2"], Behavior::Finish));
        let slow: Arc<dyn Probe> = Arc::new(FakeProbe::new(
            "slow",
            &["10.0.0.3"],
            Behavior::Sleep(Duration::from_secs(30)),
        ));

        let events = collect(vec![fast, slow], Duration::from_secs(5), Duration::from_secs(60)).await;

        assert_eq!(observation_count(&events), 3);
        let failed = failures(&events);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].probe_name, "slow");
        assert_eq!(failed[0].reason, FailureReason::Timeout);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunnerEvent::Finished { probe, observations: 2 } if probe == "fast")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_isolated() {
        let ok: Arc<dyn Probe> = Arc::new(FakeProbe::new("ok", &["10.0.0.1"], Behavior::Finish));
        let bad: Arc<dyn Probe> = Arc::new(FakeProbe::new("bad", &[], Behavior::Fail("connection refused")));

        let events = collect(vec![ok, bad], Duration::from_secs(5), Duration::from_secs(10)).await;

        assert_eq!(observation_count(&events), 1);
        let failed = failures(&events);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].reason, FailureReason::Error);
        assert!(failed[0].detail.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_abandons_running_probes() {
        let stuck: Arc<dyn Probe> = Arc::new(FakeProbe::new(
            "stuck",
            &["10.0.0.9"],
            Behavior::Sleep(Duration::from_secs(3600)),
        ));

        let started = Instant::now();
        let events = collect(vec![stuck], Duration::from_secs(600), Duration::from_secs(2)).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(observation_count(&events), 1);
        let failed = failures(&events);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].reason, FailureReason::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_descriptor_timeout_caps_budget() {
        let mut probe = FakeProbe::new("short", &[], Behavior::Sleep(Duration::from_secs(10)));
        probe.descriptor.timeout = Duration::from_secs(1);
        let probe: Arc<dyn Probe> = Arc::new(probe);

        let events = collect(vec![probe], Duration::from_secs(30), Duration::from_secs(60)).await;
        let failed = failures(&events);
        assert_eq!(failed[0].reason, FailureReason::Timeout);
        assert_eq!(failed[0].detail.as_deref(), Some("exceeded 1000 ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_probe_cannot_emit_later() {
        let leaky: Arc<dyn Probe> = Arc::new(FakeProbe::new(
            "leaky",
            &[],
            Behavior::Leak {
                emit_after: Duration::from_secs(10),
                run_for: Duration::from_secs(5),
            },
        ));

        let started = Instant::now();
        let events = collect(vec![leaky], Duration::from_secs(1), Duration::from_secs(60)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(events.len(), 1);
        assert_eq!(failures(&events)[0].reason, FailureReason::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_ends_when_every_probe_reported() {
        let leaky: Arc<dyn Probe> = Arc::new(FakeProbe::new(
            "leaky",
            &["10.0.0.1"],
            Behavior::Leak {
                emit_after: Duration::from_secs(10),
                run_for: Duration::ZERO,
            },
        ));

        let started = Instant::now();
        let events = collect(vec![leaky], Duration::from_secs(30), Duration::from_secs(60)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(observation_count(&events), 1);
        assert!(matches!(events.last(), Some(RunnerEvent::Finished { observations: 1, .. })));
    }

    #[tokio::test]
    async fn test_panicking_probe_reported() {
        let boom: Arc<dyn Probe> = Arc::new(FakeProbe::new("boom", &[], Behavior::Panic));
        let events = collect(vec![boom], Duration::from_secs(5), Duration::from_secs(10)).await;
        let failed = failures(&events);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].probe_name, "boom");
        assert_eq!(failed[0].reason, FailureReason::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_is_lazy() {
        let probe = FakeProbe::new("lazy", &["10.0.0.1"], Behavior::Finish);
        let runs = probe.runs.clone();
        let probe: Arc<dyn Probe> = Arc::new(probe);
        let mut events = discover(
            scope(),
            vec![probe],
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert!(events.next().await.is_some());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_probes_yields_empty_sequence() {
        let events = collect(Vec::new(), Duration::from_secs(1), Duration::from_secs(1)).await;
        assert!(events.is_empty());
    }
}
