//! Probes
//!
//! One probe per discovery technique. Each is a pluggable capability keyed
//! by name, satisfying a uniform `run(scope, sink)` contract; the catalog
//! resolves requested names to registered implementations.
//!
//! Built-ins only use plumbing available without protocol responders:
//! TCP connect, HTTP GET, and the OS neighbor table. Service-advertisement
//! and announcement listeners are plugged in by callers.

mod catalog;
mod http_banner;
mod neighbor;
mod network;
mod scope;
mod sink;
mod tcp_ports;
mod types;

pub use catalog::ProbeCatalog;
pub use http_banner::HttpBannerProbe;
pub use neighbor::{parse_neighbor_table, NeighborEntry, NeighborTableProbe, OuiVendorProbe};
pub use network::{for_each_host, open_ports, scan_port, PortScanResult};
pub use scope::{Scope, MAX_SCOPE_HOSTS};
pub use sink::ProbeSink;
pub use tcp_ports::TcpPortProbe;
pub use types::ProbeDescriptor;

#[cfg(test)]
pub(crate) use sink::test_sink;

use async_trait::async_trait;

use crate::error::Result;

/// A discovery technique
#[async_trait]
pub trait Probe: Send + Sync {
    fn descriptor(&self) -> &ProbeDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Run against `scope`, emitting observations through `sink` as they
    /// are made. Must honour `sink.budget()` for its own I/O and should stop
    /// early once `sink.is_cancelled()`.
    async fn run(&self, scope: &Scope, sink: &ProbeSink) -> Result<()>;
}
