//! TCP connect port scan

use std::time::Duration;

use async_trait::async_trait;

use super::network::{for_each_host, open_ports};
use super::{Probe, ProbeDescriptor, ProbeSink, Scope};
use crate::error::Result;
use crate::evidence::{AttributeKind, RawProbeOutput};

pub const TCP_PORTS_PROBE: &str = "tcp_ports";

/// Open-port scan: every host in scope, every configured port
pub struct TcpPortProbe {
    descriptor: ProbeDescriptor,
    ports: Vec<u16>,
    host_timeout: Duration,
    concurrency: usize,
}

impl TcpPortProbe {
    pub fn new(ports: Vec<u16>, host_timeout: Duration, concurrency: usize) -> Self {
        Self {
            descriptor: ProbeDescriptor::new(TCP_PORTS_PROBE, 0.5, Duration::from_secs(20))
                .producing(&[AttributeKind::OpenServicePort]),
            ports,
            host_timeout,
            concurrency,
        }
    }
}

#[async_trait]
impl Probe for TcpPortProbe {
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    async fn run(&self, scope: &Scope, sink: &ProbeSink) -> Result<()> {
        let connect_timeout = self.host_timeout.min(sink.budget());
        let ports = &self.ports;

        for_each_host(scope.hosts(), self.concurrency, sink, |ip| async move {
            let open = open_ports(ip, ports, connect_timeout).await;
            if !open.is_empty() {
                tracing::debug!(address = %ip, ports = ?open, "Open ports");
                sink.emit(ip, RawProbeOutput::OpenPorts { ports: open });
            }
        })
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::test_sink;
    use crate::runner::RunnerEvent;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reports_open_ports_only() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = {
            let tmp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        let probe = TcpPortProbe::new(vec![open_port, closed_port], Duration::from_millis(300), 4);
        let (sink, mut rx) = test_sink(TCP_PORTS_PROBE, 0.5);
        probe
            .run(&Scope::parse("127.0.0.1").unwrap(), &sink)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            RunnerEvent::Observation(obs) => {
                assert_eq!(obs.output, RawProbeOutput::OpenPorts { ports: vec![open_port] });
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
