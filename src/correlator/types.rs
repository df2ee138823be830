//! Correlator types

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::evidence::signatures::{IOT_MANUFACTURERS, IOT_SERVICES};
use crate::evidence::{AttributeKey, AttributeKind, EvidenceRecord};

/// One retained `(value, source_probe, trust_weight, observed_at)` tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCandidate {
    pub value: String,
    pub source_probe: String,
    pub trust_weight: f64,
    pub observed_at: DateTime<Utc>,
}

impl AttributeCandidate {
    /// Total order used to keep candidate logs canonical
    pub(crate) fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.observed_at
            .cmp(&other.observed_at)
            .then_with(|| self.source_probe.cmp(&other.source_probe))
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.trust_weight.total_cmp(&other.trust_weight))
    }
}

/// Append-only candidate log for one address, indexed by attribute key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvidence {
    pub address: IpAddr,
    pub candidates: BTreeMap<AttributeKey, Vec<AttributeCandidate>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceEvidence {
    pub fn new(address: IpAddr, observed_at: DateTime<Utc>) -> Self {
        Self {
            address,
            candidates: BTreeMap::new(),
            first_seen: observed_at,
            last_seen: observed_at,
        }
    }

    /// Empty log whose sighting window is already `[first_seen, last_seen]`.
    /// Seeds a replay so retention-trimmed history keeps its original bounds.
    pub fn spanning(address: IpAddr, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> Self {
        Self {
            address,
            candidates: BTreeMap::new(),
            first_seen,
            last_seen,
        }
    }

    /// Extend the sighting window to cover `[first_seen, last_seen]`
    pub fn widen(&mut self, first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) {
        self.first_seen = self.first_seen.min(first_seen);
        self.last_seen = self.last_seen.max(last_seen);
    }

    /// Fold one record into the log. Identical candidates are kept once,
    /// so absorbing the same record twice is a no-op.
    pub fn absorb(&mut self, record: &EvidenceRecord) {
        self.first_seen = self.first_seen.min(record.observed_at);
        self.last_seen = self.last_seen.max(record.observed_at);

        for (key, value) in &record.attributes {
            let candidate = AttributeCandidate {
                value: value.clone(),
                source_probe: record.probe_name.clone(),
                trust_weight: record.probe_trust_weight,
                observed_at: record.observed_at,
            };
            let log = self.candidates.entry(key.clone()).or_default();
            if let Err(pos) = log.binary_search_by(|c| c.canonical_cmp(&candidate)) {
                log.insert(pos, candidate);
            }
        }
    }

    /// Keep the `max_per_attribute` most recent candidates per key.
    /// Returns how many were dropped.
    pub fn retain_recent(&mut self, max_per_attribute: usize) -> usize {
        let mut dropped = 0;
        for log in self.candidates.values_mut() {
            if log.len() > max_per_attribute {
                let excess = log.len() - max_per_attribute;
                log.drain(..excess);
                dropped += excess;
            }
        }
        self.candidates.retain(|_, log| !log.is_empty());
        dropped
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.values().map(Vec::len).sum()
    }

    /// One single-attribute record per retained candidate, for replaying
    /// the log through the merge
    pub fn to_records(&self) -> Vec<EvidenceRecord> {
        self.candidates
            .iter()
            .flat_map(|(key, log)| {
                log.iter().map(move |c| {
                    EvidenceRecord::new(self.address, &c.source_probe, c.trust_weight, c.observed_at)
                        .with_attribute(key.clone(), c.value.clone())
                })
            })
            .collect()
    }
}

/// Scored attribute on a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeScore {
    pub chosen_value: String,
    /// `aggregated_weight(chosen) / Σ aggregated_weight(all candidates)`
    pub confidence: f64,
    pub aggregated_weight: f64,
    pub contributing_sources: BTreeSet<String>,
    /// Distinct values that competed for this key
    pub candidate_values: usize,
}

/// Confidence-scored description of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub device_address: IpAddr,
    pub attributes: BTreeMap<AttributeKey, AttributeScore>,
    pub overall_confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceProfile {
    pub fn attribute(&self, key: &AttributeKey) -> Option<&AttributeScore> {
        self.attributes.get(key)
    }

    /// Chosen value of a single-instance kind
    pub fn value(&self, kind: AttributeKind) -> Option<&str> {
        self.attributes
            .get(&AttributeKey::new(kind))
            .map(|s| s.chosen_value.as_str())
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.value(AttributeKind::Manufacturer)
    }

    pub fn device_class(&self) -> Option<&str> {
        self.value(AttributeKind::DeviceClass)
    }

    /// All scored instances of one kind
    pub fn instances(&self, kind: AttributeKind) -> impl Iterator<Item = (&AttributeKey, &AttributeScore)> {
        self.attributes.iter().filter(move |(k, _)| k.kind == kind)
    }

    pub fn open_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .instances(AttributeKind::OpenServicePort)
            .filter_map(|(k, _)| k.qualifier.as_deref()?.parse().ok())
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Time since the last corroborating evidence
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_seen
    }

    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }

    /// IoT heuristic: a recognized device class, any protocol capability,
    /// a known IoT vendor, or a known IoT service on an open port
    pub fn is_likely_iot(&self) -> bool {
        if self.device_class().is_some() {
            return true;
        }
        if self.instances(AttributeKind::ProtocolCapability).next().is_some() {
            return true;
        }

        if let Some(manufacturer) = self.manufacturer() {
            let lower = manufacturer.to_lowercase();
            if IOT_MANUFACTURERS.iter().any(|m| lower.contains(m)) {
                return true;
            }
        }

        self.instances(AttributeKind::OpenServicePort).any(|(_, score)| {
            let lower = score.chosen_value.to_lowercase();
            IOT_SERVICES.iter().any(|s| lower.contains(s))
        })
    }
}
