//! Name-keyed probe registry

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{HttpBannerProbe, NeighborTableProbe, OuiVendorProbe, Probe, ProbeDescriptor, TcpPortProbe};
use crate::error::{Error, Result};
use crate::state::EngineConfig;

/// Registered probes, keyed by unique name
#[derive(Default)]
pub struct ProbeCatalog {
    probes: BTreeMap<String, Arc<dyn Probe>>,
}

impl ProbeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in probes configured from `config`
    pub fn with_builtins(config: &EngineConfig) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.register(TcpPortProbe::new(config.scan_ports.clone(), config.host_timeout(), config.probe_concurrency))?;
        catalog.register(HttpBannerProbe::new(config.http_ports.clone(), config.host_timeout(), config.probe_concurrency))?;
        catalog.register(NeighborTableProbe::new())?;
        catalog.register(OuiVendorProbe::new())?;
        Ok(catalog)
    }

    pub fn register<P: Probe + 'static>(&mut self, probe: P) -> Result<()> {
        self.register_arc(Arc::new(probe))
    }

    pub fn register_arc(&mut self, probe: Arc<dyn Probe>) -> Result<()> {
        let descriptor = probe.descriptor();
        descriptor.validate()?;
        if self.probes.contains_key(&descriptor.name) {
            return Err(Error::Validation(format!(
                "probe {} is already registered",
                descriptor.name
            )));
        }
        tracing::debug!(
            probe = %descriptor.name,
            trust_weight = descriptor.trust_weight,
            timeout_ms = descriptor.timeout.as_millis() as u64,
            "Probe registered"
        );
        self.probes.insert(descriptor.name.clone(), probe);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Probe>> {
        self.probes.get(name).cloned()
    }

    /// Resolve requested names; an empty request selects every probe.
    /// Any unknown name rejects the whole request.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Probe>>> {
        if names.is_empty() {
            return Ok(self.probes.values().cloned().collect());
        }

        let mut selected: Vec<Arc<dyn Probe>> = Vec::with_capacity(names.len());
        for name in names {
            let probe = self
                .probes
                .get(name)
                .ok_or_else(|| Error::UnknownProbe(name.clone()))?;
            if !selected.iter().any(|p| p.name() == name) {
                selected.push(probe.clone());
            }
        }
        Ok(selected)
    }

    pub fn names(&self) -> Vec<String> {
        self.probes.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<ProbeDescriptor> {
        self.probes.values().map(|p| p.descriptor().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}
