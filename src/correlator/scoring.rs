//! Aggregation, value selection and confidence scoring
//!
//! Pure functions of the candidate log. Iteration is over ordered maps only,
//! so identical logs give bit-identical scores.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::types::{AttributeCandidate, AttributeScore, DeviceEvidence, DeviceProfile};
use crate::evidence::{AttributeKey, AttributeKind};

/// Aggregated weights closer than this are a tie
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Static attribute importance for the overall confidence.
/// Kinds that drive downstream protocol selection weigh most.
pub fn importance(kind: AttributeKind) -> f64 {
    match kind {
        AttributeKind::DeviceClass => 3.0,
        AttributeKind::Manufacturer => 3.0,
        AttributeKind::ModelIdentifier => 2.0,
        AttributeKind::ProtocolCapability => 1.5,
        AttributeKind::AddressBinding => 1.0,
        AttributeKind::DisplayName => 0.5,
        AttributeKind::OpenServicePort => 0.5,
    }
}

/// Support for one candidate value
#[derive(Debug, Clone)]
pub struct Tally<'a> {
    pub value: &'a str,
    /// Highest weight each distinct probe reported this value with
    pub weight_by_probe: BTreeMap<&'a str, f64>,
    pub latest: DateTime<Utc>,
}

impl Tally<'_> {
    /// Σ trust weight, each probe counted once
    pub fn aggregated_weight(&self) -> f64 {
        self.weight_by_probe.values().sum()
    }

    pub fn distinct_probes(&self) -> usize {
        self.weight_by_probe.len()
    }
}

/// Group candidates by value
pub fn aggregate(candidates: &[AttributeCandidate]) -> Vec<Tally<'_>> {
    let mut tallies: BTreeMap<&str, Tally<'_>> = BTreeMap::new();
    for c in candidates {
        let tally = tallies.entry(c.value.as_str()).or_insert_with(|| Tally {
            value: &c.value,
            weight_by_probe: BTreeMap::new(),
            latest: c.observed_at,
        });
        let weight = tally.weight_by_probe.entry(c.source_probe.as_str()).or_insert(0.0);
        *weight = weight.max(c.trust_weight);
        tally.latest = tally.latest.max(c.observed_at);
    }
    tallies.into_values().collect()
}

/// Ranking between two tallies: weight, then distinct probes, then recency.
/// The lexicographically smaller value wins a full tie.
pub fn rank(a: &Tally<'_>, b: &Tally<'_>) -> Ordering {
    let (wa, wb) = (a.aggregated_weight(), b.aggregated_weight());
    if (wa - wb).abs() > WEIGHT_EPSILON {
        return wa.total_cmp(&wb);
    }
    a.distinct_probes()
        .cmp(&b.distinct_probes())
        .then_with(|| a.latest.cmp(&b.latest))
        .then_with(|| b.value.cmp(a.value))
}

/// Pick and score the winning value for one attribute key
pub fn score_attribute(candidates: &[AttributeCandidate]) -> Option<AttributeScore> {
    let tallies = aggregate(candidates);
    let total: f64 = tallies.iter().map(Tally::aggregated_weight).sum();
    if total <= 0.0 {
        return None;
    }
    let chosen = tallies.iter().max_by(|a, b| rank(a, b))?;
    let weight = chosen.aggregated_weight();

    Some(AttributeScore {
        chosen_value: chosen.value.to_string(),
        confidence: (weight / total).clamp(0.0, 1.0),
        aggregated_weight: weight,
        contributing_sources: chosen.weight_by_probe.keys().map(|p| p.to_string()).collect(),
        candidate_values: tallies.len(),
    })
}

/// Importance-weighted mean over kinds of the mean confidence per kind.
/// Multi-instance kinds count once, however many instances they have.
pub fn overall_confidence(attributes: &BTreeMap<AttributeKey, AttributeScore>) -> f64 {
    let mut per_kind: BTreeMap<AttributeKind, (f64, usize)> = BTreeMap::new();
    for (key, score) in attributes {
        let entry = per_kind.entry(key.kind).or_insert((0.0, 0));
        entry.0 += score.confidence;
        entry.1 += 1;
    }

    let (weighted, weights) = per_kind
        .iter()
        .fold((0.0, 0.0), |(weighted, weights), (kind, (sum, count))| {
            let w = importance(*kind);
            (weighted + w * (sum / *count as f64), weights + w)
        });

    if weights > 0.0 {
        (weighted / weights).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Score a device from its full candidate log; `None` when nothing scores
pub fn score_device(evidence: &DeviceEvidence) -> Option<DeviceProfile> {
    let attributes: BTreeMap<AttributeKey, AttributeScore> = evidence
        .candidates
        .iter()
        .filter_map(|(key, log)| score_attribute(log).map(|s| (key.clone(), s)))
        .collect();

    if attributes.is_empty() {
        return None;
    }

    Some(DeviceProfile {
        device_address: evidence.address,
        overall_confidence: overall_confidence(&attributes),
        attributes,
        first_seen: evidence.first_seen,
        last_seen: evidence.last_seen,
    })
}
