//! WS-Discovery probe for ONVIF NetworkVideoTransmitters

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::xml::{element_texts, looks_like_xml};
use crate::error::{Error, Result};

pub const WS_DISCOVERY_MULTICAST: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 3702);

/// Build a Probe envelope with a fresh MessageID
pub fn probe_message() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope"
            xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing"
            xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery"
            xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <e:Header>
    <w:MessageID>uuid:{}</w:MessageID>
    <w:To e:mustUnderstand="true">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>
    <w:Action e:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>
  </e:Header>
  <e:Body>
    <d:Probe>
      <d:Types>dn:NetworkVideoTransmitter</d:Types>
    </d:Probe>
  </e:Body>
</e:Envelope>"#,
        Uuid::new_v4()
    )
}

/// One-shot WS-Discovery over a fixed listen window
#[derive(Debug, Clone)]
pub struct WsDiscoveryListener {
    target: SocketAddr,
    listen: Duration,
}

impl WsDiscoveryListener {
    pub fn new(listen: Duration) -> Self {
        Self {
            target: WS_DISCOVERY_MULTICAST,
            listen,
        }
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// Send one Probe and collect device-service XAddrs per responding IP.
    ///
    /// Non-XML payloads are dropped. Socket failures yield an empty map.
    pub async fn discover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Ipv4Addr, Vec<String>>> {
        let mut found: HashMap<Ipv4Addr, Vec<String>> = HashMap::new();

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "WS-Discovery socket bind failed");
                return Ok(found);
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            tracing::debug!(error = %e, "WS-Discovery set_broadcast failed");
        }
        if let Err(e) = socket.send_to(probe_message().as_bytes(), self.target).await {
            tracing::warn!(target = %self.target, error = %e, "WS-Discovery probe send failed");
            return Ok(found);
        }

        let deadline = Instant::now() + self.listen;
        let mut buf = vec![0u8; 65535];

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
                    let xaddrs = parse_xaddrs(&text);
                    if xaddrs.is_empty() {
                        continue;
                    }
                    let entry = found.entry(*from.ip()).or_default();
                    for xaddr in xaddrs {
                        if !entry.iter().any(|e| e.eq_ignore_ascii_case(&xaddr)) {
                            entry.push(xaddr);
                        }
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "WS-Discovery receive failed");
                    break;
                }
                Err(_) => break,
            }
        }

        tracing::debug!(devices = found.len(), "WS-Discovery listen window closed");
        Ok(found)
    }
}

/// All whitespace-separated URLs inside any `XAddrs` element
pub fn parse_xaddrs(payload: &str) -> Vec<String> {
    if !looks_like_xml(payload) {
        return Vec::new();
    }

    element_texts(payload, "XAddrs")
        .iter()
        .flat_map(|v| v.split_whitespace())
        .map(str::to_string)
        .collect()
}
