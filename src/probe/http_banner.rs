//! HTTP banner grab
//!
//! Ports are first checked with a TCP connect; only those answering get a
//! GET, all of a host's ports at once. Redirects are not followed since the
//! first response usually carries the identifying `Server` header.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;

use super::network::{for_each_host, open_ports};
use super::{Probe, ProbeDescriptor, ProbeSink, Scope};
use crate::error::Result;
use crate::evidence::{AttributeKind, RawProbeOutput};

pub const HTTP_BANNER_PROBE: &str = "http_banner";

/// Body bytes kept for signature matching
const BODY_PREVIEW_LIMIT: usize = 512;

const TLS_PORTS: &[u16] = &[443, 8443];

pub struct HttpBannerProbe {
    descriptor: ProbeDescriptor,
    ports: Vec<u16>,
    host_timeout: Duration,
    concurrency: usize,
}

impl HttpBannerProbe {
    pub fn new(ports: Vec<u16>, host_timeout: Duration, concurrency: usize) -> Self {
        Self {
            descriptor: ProbeDescriptor::new(HTTP_BANNER_PROBE, 0.7, Duration::from_secs(20)).producing(&[
                AttributeKind::Manufacturer,
                AttributeKind::DeviceClass,
                AttributeKind::ModelIdentifier,
                AttributeKind::OpenServicePort,
            ]),
            ports,
            host_timeout,
            concurrency,
        }
    }

    fn build_client(&self, request_timeout: Duration) -> Result<Client> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            // Embedded devices mostly serve self-signed certificates
            .danger_accept_invalid_certs(true)
            .user_agent(concat!("iot-discovery/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(client)
    }
}

/// URL for a device port; TLS ports get https
pub fn banner_url(ip: IpAddr, port: u16) -> String {
    let scheme = if TLS_PORTS.contains(&port) { "https" } else { "http" };
    match ip {
        IpAddr::V4(v4) => format!("{}://{}:{}/", scheme, v4, port),
        IpAddr::V6(v6) => format!("{}://[{}]:{}/", scheme, v6, port),
    }
}

/// Leading slice of a body, cut on a char boundary
pub fn body_preview(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(&body[..body.len().min(BODY_PREVIEW_LIMIT * 4)]);
    let preview: String = text.chars().take(BODY_PREVIEW_LIMIT).collect();
    if preview.trim().is_empty() {
        None
    } else {
        Some(preview)
    }
}

async fn grab(client: &Client, ip: IpAddr, port: u16) -> Option<RawProbeOutput> {
    let response = match client.get(banner_url(ip, port)).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::trace!(address = %ip, port = port, error = %e, "No HTTP answer");
            return None;
        }
    };

    let status = response.status().as_u16();
    let server_header = response
        .headers()
        .get(reqwest::header::SERVER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await.ok();

    Some(RawProbeOutput::Banner {
        port,
        status: Some(status),
        server_header,
        body_preview: body.as_deref().and_then(body_preview),
    })
}

#[async_trait]
impl Probe for HttpBannerProbe {
    fn descriptor(&self) -> &ProbeDescriptor {
        &self.descriptor
    }

    async fn run(&self, scope: &Scope, sink: &ProbeSink) -> Result<()> {
        let host_timeout = self.host_timeout.min(sink.budget());
        let client = self.build_client(host_timeout)?;
        let client = &client;
        let ports = &self.ports;

        for_each_host(scope.hosts(), self.concurrency, sink, |ip| async move {
            let open = open_ports(ip, ports, host_timeout).await;
            if open.is_empty() || sink.is_cancelled() {
                return;
            }
            let banners = join_all(open.into_iter().map(|port| grab(client, ip, port))).await;
            for banner in banners.into_iter().flatten() {
                tracing::debug!(address = %ip, "HTTP banner captured");
                if !sink.emit(ip, banner) {
                    return;
                }
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_banner_url() {
        let v4: IpAddr = "192.168.1.10".parse().unwrap();
        assert_eq!(banner_url(v4, 80), "http://192.168.1.10:80/");
        assert_eq!(banner_url(v4, 8443), "https://192.168.1.10:8443/");
        let v6: IpAddr = "fe80::1".parse().unwrap();
        assert_eq!(banner_url(v6, 8080), "http://[fe80::1]:8080/");
    }

    #[test]
    fn test_body_preview_truncates_on_char_boundary() {
        let body = "é".repeat(2000);
        let preview = body_preview(body.as_bytes()).unwrap();
        assert_eq!(preview.chars().count(), BODY_PREVIEW_LIMIT);
        assert!(body_preview(b"   ").is_none());
    }

    #[tokio::test]
    async fn test_grabs_server_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // The reachability check connects first, so keep accepting
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    if matches!(socket.read(&mut buf).await, Ok(0) | Err(_)) {
                        return;
                    }
                    let body = "<html>Philips hue bridge</html>";
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        let closed = {
            let tmp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        let probe = HttpBannerProbe::new(vec![closed, port], Duration::from_secs(2), 1);
        let (sink, mut rx) = test_sink(HTTP_BANNER_PROBE, 0.7);
        probe
            .run(&Scope::parse("127.0.0.1").unwrap(), &sink)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            RunnerEvent::Observation(obs) => match obs.output {
                RawProbeOutput::Banner {
                    port: p,
                    status,
                    server_header,
                    body_preview,
                } => {
                    assert_eq!(p, port);
                    assert_eq!(status, Some(200));
                    assert_eq!(server_header.as_deref(), Some("nginx"));
                    assert!(body_preview.unwrap().contains("hue"));
                }
                other => panic!("unexpected output {:?}", other),
            },
            other => panic!("unexpected event {:?}", other),
        }
        // Nothing for the closed port
        assert!(rx.try_recv().is_err());
    }
}
