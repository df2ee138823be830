//! IoT Device Discovery Engine
//!
//! Identifies unknown network devices by correlating evidence from several
//! independent, unreliable discovery probes into confidence-scored device
//! profiles.
//!
//! ## Components (leaf to root)
//!
//! 1. Probe - one pluggable discovery technique, registered by name
//! 2. Runner - concurrent fan-out with per-probe and overall deadlines
//! 3. Evidence - normalizes raw probe output onto a common vocabulary
//! 4. Correlator - groups by address, resolves conflicts, scores confidence
//! 5. Registry - address → profile map with merge-on-rediscovery
//! 6. Discovery - run orchestration and run history
//!
//! ## Design Principles
//!
//! - Absence of evidence creates nothing; it is never a low score
//! - Every profile is the product of the merge, including reloaded ones
//! - Probe failures are metadata, not errors

pub mod correlator;
pub mod discovery;
pub mod error;
pub mod evidence;
pub mod probe;
pub mod registry;
pub mod runner;
pub mod state;

pub use correlator::{AttributeCandidate, AttributeScore, DeviceProfile};
pub use discovery::{DeviceDiscovery, DiscoveryReport, DiscoveryRequest, DiscoveryRun, RunStatus};
pub use error::{Error, Result};
pub use evidence::{AttributeKey, AttributeKind, EvidenceRecord, RawObservation, RawProbeOutput};
pub use probe::{Probe, ProbeCatalog, ProbeDescriptor, ProbeSink, Scope};
pub use registry::{DeviceRegistry, RegistryStore};
pub use runner::{FailureReason, ProbeFailure, RunnerEvent};
pub use state::{EngineConfig, EngineState};
