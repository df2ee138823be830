use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::ProbeSink;

/// Port scan result
#[derive(Debug, Clone)]
pub struct PortScanResult {
    pub ip: IpAddr,
    pub port: u16,
    pub open: bool,
    pub latency_ms: Option<u64>,
}

/// TCP connect to a single port
pub async fn scan_port(ip: IpAddr, port: u16, timeout_dur: Duration) -> PortScanResult {
    let addr = SocketAddr::new(ip, port);
    let start = Instant::now();

    match timeout(timeout_dur, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => PortScanResult {
            ip,
            port,
            open: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Ok(Err(_)) | Err(_) => PortScanResult {
            ip,
            port,
            open: false,
            latency_ms: None,
        },
    }
}

/// Ports of `ip` accepting a TCP connection, probed concurrently
pub async fn open_ports(ip: IpAddr, ports: &[u16], timeout_dur: Duration) -> Vec<u16> {
    futures::future::join_all(ports.iter().map(|&port| scan_port(ip, port, timeout_dur)))
        .await
        .into_iter()
        .filter(|r| r.open)
        .map(|r| r.port)
        .collect()
}

/// Run `f` for every host with at most `concurrency` in flight.
/// Hosts not yet started when the run is cancelled are skipped.
pub async fn for_each_host<F, Fut>(hosts: Vec<IpAddr>, concurrency: usize, sink: &ProbeSink, f: F)
where
    F: Fn(IpAddr) -> Fut,
    Fut: Future<Output = ()>,
{
    futures::stream::iter(hosts)
        .for_each_concurrent(concurrency.max(1), |ip| {
            let work = (!sink.is_cancelled()).then(|| f(ip));
            async move {
                if let Some(work) = work {
                    work.await;
                }
            }
        })
        .await;
}
