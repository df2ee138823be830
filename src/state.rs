//! Engine state
//!
//! Holds the configuration and all shared components

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::{DeviceDiscovery, DiscoveryRequest};
use crate::error::{Error, Result};
use crate::probe::{ProbeCatalog, Scope};
use crate::registry::{DeviceRegistry, RegistryStore};

const DEFAULT_SCAN_PORTS: &[u16] = &[80, 443, 554, 1400, 8080, 8443, 39500];
const DEFAULT_HTTP_PORTS: &[u16] = &[80, 443, 8080, 8443];
const DEFAULT_SCOPE: &str = "192.168.1.0/24";
// Sized so a /24 sweep fits the per-probe budget (see `sweep_estimate`)
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PROBE_CONCURRENCY: usize = 64;
const DEFAULT_HOST_TIMEOUT_MS: u64 = 1_000;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default discovery scope (CIDR or single address)
    pub scope: String,
    /// Probes enabled by default; empty = every registered probe
    pub enabled_probes: Vec<String>,
    /// Per-probe timeout (ms)
    pub per_probe_timeout_ms: u64,
    /// Whole-run timeout (ms)
    pub overall_timeout_ms: u64,
    /// Hosts a single probe works on at once
    pub probe_concurrency: usize,
    /// Ports for the TCP connect probe
    pub scan_ports: Vec<u16>,
    /// Ports for the HTTP banner probe
    pub http_ports: Vec<u16>,
    /// Per-host connect / request timeout (ms)
    pub host_timeout_ms: u64,
    /// Registry persistence file
    pub registry_path: Option<PathBuf>,
    /// Lowest overall confidence printed by the binary
    pub min_confidence: f64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list<T: FromStr + Clone>(key: &str, default: &[T]) -> Vec<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect(),
        Err(_) => default.to_vec(),
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scope: std::env::var("DISCOVERY_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string()),
            enabled_probes: env_list::<String>("DISCOVERY_PROBES", &[]),
            per_probe_timeout_ms: env_or("PROBE_TIMEOUT_MS", DEFAULT_PROBE_TIMEOUT_MS),
            overall_timeout_ms: env_or("DISCOVERY_TIMEOUT_MS", DEFAULT_DISCOVERY_TIMEOUT_MS),
            probe_concurrency: env_or("PROBE_CONCURRENCY", DEFAULT_PROBE_CONCURRENCY),
            scan_ports: env_list("SCAN_PORTS", DEFAULT_SCAN_PORTS),
            http_ports: env_list("HTTP_PORTS", DEFAULT_HTTP_PORTS),
            host_timeout_ms: env_or("HOST_TIMEOUT_MS", DEFAULT_HOST_TIMEOUT_MS),
            registry_path: std::env::var("REGISTRY_PATH").ok().map(PathBuf::from),
            min_confidence: env_or("MIN_CONFIDENCE", 0.0),
        }
    }
}

impl EngineConfig {
    pub fn per_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.per_probe_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_millis(self.host_timeout_ms)
    }

    /// Worst case for one built-in sweep of the configured scope: every
    /// host silent, `probe_concurrency` at a time, each paying a connect
    /// timeout plus a request timeout
    pub fn sweep_estimate(&self) -> Result<Duration> {
        let hosts = Scope::parse(&self.scope)?.host_count();
        let rounds = hosts.div_ceil(self.probe_concurrency.max(1));
        u32::try_from(rounds * 2)
            .ok()
            .and_then(|n| self.host_timeout().checked_mul(n))
            .ok_or_else(|| Error::Config("HOST_TIMEOUT_MS too large".to_string()))
    }

    /// Reject unusable settings before anything is launched
    pub fn validate(&self) -> Result<()> {
        Scope::parse(&self.scope)?;

        if self.per_probe_timeout_ms == 0 || self.overall_timeout_ms == 0 || self.host_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        if self.per_probe_timeout_ms > self.overall_timeout_ms {
            return Err(Error::Config(format!(
                "PROBE_TIMEOUT_MS ({}) exceeds DISCOVERY_TIMEOUT_MS ({})",
                self.per_probe_timeout_ms, self.overall_timeout_ms
            )));
        }
        if self.probe_concurrency == 0 {
            return Err(Error::Config("PROBE_CONCURRENCY must be at least 1".to_string()));
        }
        let sweep = self.sweep_estimate()?;
        if sweep > self.per_probe_timeout() {
            return Err(Error::Config(format!(
                "PROBE_TIMEOUT_MS ({}) cannot cover {} at PROBE_CONCURRENCY {} and HOST_TIMEOUT_MS {} (worst case {} ms)",
                self.per_probe_timeout_ms,
                self.scope,
                self.probe_concurrency,
                self.host_timeout_ms,
                sweep.as_millis()
            )));
        }
        if self.scan_ports.is_empty() || self.http_ports.is_empty() {
            return Err(Error::Config("port lists must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(Error::Config("MIN_CONFIDENCE must be within [0, 1]".to_string()));
        }
        Ok(())
    }

    /// Request for the configured default discovery
    pub fn default_request(&self) -> DiscoveryRequest {
        DiscoveryRequest {
            scope: self.scope.clone(),
            probes: self.enabled_probes.clone(),
            per_probe_timeout_ms: None,
            overall_timeout_ms: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            scope: "127.0.0.1".to_string(),
            enabled_probes: Vec::new(),
            per_probe_timeout_ms: 2_000,
            overall_timeout_ms: 5_000,
            probe_concurrency: 4,
            scan_ports: DEFAULT_SCAN_PORTS.to_vec(),
            http_ports: DEFAULT_HTTP_PORTS.to_vec(),
            host_timeout_ms: 200,
            registry_path: None,
            min_confidence: 0.0,
        }
    }
}

/// Engine state shared across callers
#[derive(Clone)]
pub struct EngineState {
    pub config: EngineConfig,
    pub registry: Arc<DeviceRegistry>,
    pub discovery: Arc<DeviceDiscovery>,
    pub store: Option<RegistryStore>,
}

impl EngineState {
    /// State with the built-in probe catalog
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let catalog = ProbeCatalog::with_builtins(&config)?;
        Self::with_catalog(config, catalog)
    }

    pub fn with_catalog(config: EngineConfig, catalog: ProbeCatalog) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new());
        let discovery = Arc::new(DeviceDiscovery::new(
            Arc::new(catalog),
            registry.clone(),
            config.clone(),
        ));
        let store = config.registry_path.clone().map(RegistryStore::new);

        Ok(Self {
            config,
            registry,
            discovery,
            store,
        })
    }

    /// Replay persisted evidence, if a store is configured
    pub async fn restore(&self) -> Result<usize> {
        match &self.store {
            Some(store) => store.load_into(&self.registry).await,
            None => Ok(0),
        }
    }

    /// Persist the registry, if a store is configured
    pub async fn persist(&self) -> Result<usize> {
        match &self.store {
            Some(store) => store.save(&self.registry).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(EngineConfig::for_tests().validate().is_ok());

        let mut config = EngineConfig::for_tests();
        config.per_probe_timeout_ms = 10_000;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = EngineConfig::for_tests();
        config.scope = "10.0.0.0/33".to_string();
        assert!(matches!(config.validate(), Err(Error::InvalidScope(_))));

        let mut config = EngineConfig::for_tests();
        config.probe_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_budget_must_cover_scope() {
        let mut config = EngineConfig::for_tests();
        config.scope = "10.0.0.0/24".to_string();
        config.probe_concurrency = 32;
        config.host_timeout_ms = 1_000;
        config.per_probe_timeout_ms = 5_000;
        config.overall_timeout_ms = 30_000;
        // 8 rounds of connect + request
        assert_eq!(config.sweep_estimate().unwrap(), Duration::from_secs(16));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.probe_concurrency = 64;
        config.per_probe_timeout_ms = 15_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shipped_defaults_cover_default_scope() {
        let config = EngineConfig {
            scope: DEFAULT_SCOPE.to_string(),
            enabled_probes: Vec::new(),
            per_probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            overall_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            scan_ports: DEFAULT_SCAN_PORTS.to_vec(),
            http_ports: DEFAULT_HTTP_PORTS.to_vec(),
            host_timeout_ms: DEFAULT_HOST_TIMEOUT_MS,
            registry_path: None,
            min_confidence: 0.0,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_state_from_config() {
        let state = EngineState::from_config(EngineConfig::for_tests()).unwrap();
        assert!(state.store.is_none());
        assert_eq!(state.discovery.catalog().len(), 4);
    }

    #[test]
    fn test_default_request_uses_config() {
        let mut config = EngineConfig::for_tests();
        config.enabled_probes = vec!["tcp_ports".to_string()];
        let request = config.default_request();
        assert_eq!(request.scope, "127.0.0.1");
        assert_eq!(request.probes, vec!["tcp_ports"]);
    }
}
