//! Correlator
//!
//! Folds normalized evidence into per-address candidate logs and rescores
//! the touched devices:
//! 1. identity: records are grouped by `device_address` (no cross-address
//!    linking)
//! 2. aggregation: per attribute key and value, Σ trust weight with each
//!    distinct probe counted once
//! 3. selection: highest aggregated weight; ties go to more distinct
//!    probes, then the most recent observation
//! 4. scoring: chosen weight over total weight per key, importance-weighted
//!    mean across kinds for the device
//! 5. re-discovery: new candidates are unioned with the retained log before
//!    rescoring
//!
//! `merge` is pure. Logs are kept in canonical order with duplicates
//! removed, so merging is commutative, associative and idempotent.

mod scoring;
mod types;

pub use scoring::{aggregate, importance, overall_confidence, rank, score_attribute, score_device, Tally, WEIGHT_EPSILON};
pub use types::{AttributeCandidate, AttributeScore, DeviceEvidence, DeviceProfile};

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::evidence::EvidenceRecord;

/// Updated state of one device after a merge
#[derive(Debug, Clone, PartialEq)]
pub struct Correlated {
    pub evidence: DeviceEvidence,
    pub profile: DeviceProfile,
}

/// Merge a batch of records into the existing candidate logs.
///
/// Returns the new state for every address the batch touched. Addresses
/// whose records carry no attributes are left out entirely.
pub fn merge(
    existing: &BTreeMap<IpAddr, DeviceEvidence>,
    records: &[EvidenceRecord],
) -> BTreeMap<IpAddr, Correlated> {
    let mut grouped: BTreeMap<IpAddr, Vec<&EvidenceRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| !r.is_empty()) {
        grouped.entry(record.device_address).or_default().push(record);
    }

    let mut updated = BTreeMap::new();
    for (address, batch) in grouped {
        let mut evidence = match existing.get(&address) {
            Some(evidence) => evidence.clone(),
            None => DeviceEvidence::new(address, batch[0].observed_at),
        };
        for record in &batch {
            evidence.absorb(record);
        }

        if let Some(profile) = score_device(&evidence) {
            updated.insert(address, Correlated { evidence, profile });
        }
    }
    updated
}
