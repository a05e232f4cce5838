//! SSDP M-SEARCH listener

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::ipcam_scan::types::SsdpInfo;

pub const SSDP_MULTICAST: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

const M_SEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 1\r\n\
ST: ssdp:all\r\n\r\n";

/// One-shot SSDP search over a fixed listen window
#[derive(Debug, Clone)]
pub struct SsdpListener {
    target: SocketAddr,
    listen: Duration,
}

impl SsdpListener {
    pub fn new(listen: Duration) -> Self {
        Self {
            target: SSDP_MULTICAST,
            listen,
        }
    }

    /// Send the search to another address (unicast responders, tests)
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// Send one M-SEARCH and collect responders. The last response per IP wins.
    ///
    /// Socket failures yield an empty map; only cancellation is an error.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<HashMap<Ipv4Addr, SsdpInfo>> {
        let mut found = HashMap::new();

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SSDP socket bind failed");
                return Ok(found);
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            tracing::debug!(error = %e, "SSDP set_broadcast failed");
        }
        if let Err(e) = socket.send_to(M_SEARCH.as_bytes(), self.target).await {
            tracing::warn!(target = %self.target, error = %e, "SSDP M-SEARCH send failed");
            return Ok(found);
        }

        let deadline = Instant::now() + self.listen;
        let mut buf = vec![0u8; 8192];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let received = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = timeout(remaining, socket.recv_from(&mut buf)) => r,
            };

            match received {
                Ok(Ok((len, SocketAddr::V4(from)))) => {
                    let text = String::from_utf8_lossy(&buf[..len]);
                    found.insert(*from.ip(), parse_ssdp_response(&text));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "SSDP receive failed");
                    break;
                }
                Err(_) => break,
            }
        }

        tracing::debug!(responders = found.len(), "SSDP listen window closed");
        Ok(found)
    }
}

/// Pick SERVER / USN / ST / LOCATION out of a response, header names case-insensitive
pub fn parse_ssdp_response(text: &str) -> SsdpInfo {
    let mut info = SsdpInfo::default();

    for line in text.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match name.trim().to_ascii_uppercase().as_str() {
            "SERVER" => info.server = Some(value.to_string()),
            "USN" => info.usn = Some(value.to_string()),
            "ST" => info.st = Some(value.to_string()),
            "LOCATION" => info.location = Some(value.to_string()),
            _ => {}
        }
    }

    info
}
