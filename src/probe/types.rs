//! Probe descriptor types

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::evidence::AttributeKind;

/// Capability descriptor of a registered probe. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    pub name: String,
    pub produces: BTreeSet<AttributeKind>,
    pub trust_weight: f64,
    pub timeout: Duration,
}

impl ProbeDescriptor {
    pub fn new(name: &str, trust_weight: f64, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            produces: BTreeSet::new(),
            trust_weight,
            timeout,
        }
    }

    pub fn producing(mut self, kinds: &[AttributeKind]) -> Self {
        self.produces.extend(kinds.iter().copied());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("probe name must not be empty".to_string()));
        }
        if !(self.trust_weight.is_finite() && self.trust_weight > 0.0 && self.trust_weight <= 1.0) {
            return Err(Error::Validation(format!(
                "probe {}: trust weight {} outside (0, 1]",
                self.name, self.trust_weight
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Validation(format!(
                "probe {}: timeout budget must be positive",
                self.name
            )));
        }
        Ok(())
    }
}
