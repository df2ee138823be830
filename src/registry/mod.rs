//! Device Registry
//!
//! Address → profile map plus the retained candidate log behind each
//! profile. All writes go through the correlator's `merge`:
//! - writers are serialized by `merge_lock` for the whole merge
//! - the merge is computed outside the data lock and swapped in under one
//!   write guard, so readers see either the pre- or post-merge state
//!
//! Nothing is deleted automatically. Staleness is exposed through
//! `last_seen`; trimming the candidate log happens only through
//! `apply_retention`.

mod persistence;

pub use persistence::RegistryStore;

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::correlator::{self, AttributeCandidate, DeviceEvidence, DeviceProfile};
use crate::error::{Error, Result};
use crate::evidence::{AttributeKey, EvidenceRecord};

#[derive(Default)]
struct RegistryData {
    evidence: BTreeMap<IpAddr, DeviceEvidence>,
    profiles: BTreeMap<IpAddr, DeviceProfile>,
}

/// Result of one upsert batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertSummary {
    pub records: usize,
    pub created: Vec<IpAddr>,
    pub updated: Vec<IpAddr>,
}

impl UpsertSummary {
    pub fn touched(&self) -> impl Iterator<Item = &IpAddr> {
        self.created.iter().chain(self.updated.iter())
    }
}

pub struct DeviceRegistry {
    data: RwLock<RegistryData>,
    merge_lock: Mutex<()>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(RegistryData::default()),
            merge_lock: Mutex::new(()),
        }
    }

    /// Merge one batch of evidence as a single atomic update
    pub async fn upsert(&self, records: &[EvidenceRecord]) -> UpsertSummary {
        let _merge = self.merge_lock.lock().await;

        let existing = self.touched_logs(records.iter().map(|r| r.device_address)).await;
        let merged = correlator::merge(&existing, records);
        self.commit(&existing, merged, records.len()).await
    }

    /// Merge previously stored candidate logs. Each log's sighting window
    /// is carried over, so history trimmed by retention before the log was
    /// stored does not move `first_seen`.
    pub async fn replay(&self, stored: &[DeviceEvidence]) -> UpsertSummary {
        let _merge = self.merge_lock.lock().await;

        let existing = self.touched_logs(stored.iter().map(|e| e.address)).await;
        let mut seeded = existing.clone();
        for log in stored {
            seeded
                .entry(log.address)
                .and_modify(|e| e.widen(log.first_seen, log.last_seen))
                .or_insert_with(|| DeviceEvidence::spanning(log.address, log.first_seen, log.last_seen));
        }

        let records: Vec<EvidenceRecord> = stored.iter().flat_map(DeviceEvidence::to_records).collect();
        let merged = correlator::merge(&seeded, &records);
        self.commit(&existing, merged, records.len()).await
    }

    /// Current logs of the given addresses. They cannot change while the
    /// caller holds the merge lock.
    async fn touched_logs(&self, addresses: impl Iterator<Item = IpAddr>) -> BTreeMap<IpAddr, DeviceEvidence> {
        let data = self.data.read().await;
        addresses
            .filter_map(|address| data.evidence.get(&address).map(|e| (address, e.clone())))
            .collect()
    }

    async fn commit(
        &self,
        existing: &BTreeMap<IpAddr, DeviceEvidence>,
        merged: BTreeMap<IpAddr, correlator::Correlated>,
        records: usize,
    ) -> UpsertSummary {
        let mut summary = UpsertSummary {
            records,
            ..Default::default()
        };
        let mut data = self.data.write().await;
        for (address, correlated) in merged {
            if existing.contains_key(&address) {
                summary.updated.push(address);
            } else {
                summary.created.push(address);
            }
            data.evidence.insert(address, correlated.evidence);
            data.profiles.insert(address, correlated.profile);
        }
        drop(data);

        tracing::info!(
            records = summary.records,
            created = summary.created.len(),
            updated = summary.updated.len(),
            "Evidence merged"
        );
        summary
    }

    pub async fn get(&self, address: &IpAddr) -> Option<DeviceProfile> {
        self.data.read().await.profiles.get(address).cloned()
    }

    /// Profiles with `overall_confidence >= min_confidence`, by descending
    /// confidence then address
    pub async fn list(&self, min_confidence: f64) -> Vec<DeviceProfile> {
        let data = self.data.read().await;
        let mut profiles: Vec<DeviceProfile> = data
            .profiles
            .values()
            .filter(|p| p.overall_confidence >= min_confidence)
            .cloned()
            .collect();
        sort_ranked(&mut profiles);
        profiles
    }

    pub async fn snapshot(&self) -> Vec<DeviceProfile> {
        self.list(0.0).await
    }

    /// Profiles not corroborated since `cutoff`, oldest first
    pub async fn stale_since(&self, cutoff: DateTime<Utc>) -> Vec<DeviceProfile> {
        let data = self.data.read().await;
        let mut stale: Vec<DeviceProfile> = data
            .profiles
            .values()
            .filter(|p| p.is_stale(cutoff))
            .cloned()
            .collect();
        stale.sort_by(|a, b| {
            a.last_seen
                .cmp(&b.last_seen)
                .then_with(|| a.device_address.cmp(&b.device_address))
        });
        stale
    }

    /// Retained candidate log for one address, chosen or not
    pub async fn candidates(&self, address: &IpAddr) -> Option<BTreeMap<AttributeKey, Vec<AttributeCandidate>>> {
        self.data
            .read()
            .await
            .evidence
            .get(address)
            .map(|e| e.candidates.clone())
    }

    /// Trim every candidate log to its `max_per_attribute` most recent
    /// entries and rescore. Returns the number of candidates dropped.
    pub async fn apply_retention(&self, max_per_attribute: usize) -> Result<usize> {
        if max_per_attribute == 0 {
            return Err(Error::Validation(
                "retention must keep at least one candidate per attribute".to_string(),
            ));
        }

        let _merge = self.merge_lock.lock().await;
        let mut data = self.data.write().await;
        let RegistryData { evidence, profiles } = &mut *data;

        let mut dropped = 0;
        for (address, log) in evidence.iter_mut() {
            let trimmed = log.retain_recent(max_per_attribute);
            if trimmed == 0 {
                continue;
            }
            dropped += trimmed;
            if let Some(profile) = correlator::score_device(log) {
                profiles.insert(*address, profile);
            }
        }

        tracing::info!(
            max_per_attribute = max_per_attribute,
            dropped = dropped,
            "Retention applied"
        );
        Ok(dropped)
    }

    /// Copy of every candidate log, by address
    pub async fn evidence(&self) -> Vec<DeviceEvidence> {
        self.data.read().await.evidence.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.profiles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.profiles.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Descending confidence, then ascending address
pub fn sort_ranked(profiles: &mut [DeviceProfile]) {
    profiles.sort_by(|a, b| {
        b.overall_confidence
            .total_cmp(&a.overall_confidence)
            .then_with(|| a.device_address.cmp(&b.device_address))
    });
}
