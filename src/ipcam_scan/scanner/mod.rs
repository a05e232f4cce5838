//! Scanner implementation for IpcamScan
//!
//! Discovery (TCP / SSDP / WS-Discovery) and vendor identification

mod discovery;
mod network;
mod probes;
mod ssdp;
mod ws_discovery;
mod xml;

pub use discovery::{discover_hosts, DiscoveryOptions, MAX_HOST_CONCURRENCY};
pub use network::{cidr_host_range, expand_cidr, scan_port, scan_ports, PortScanResult, PORTS_PER_HOST};
pub use probes::{
    decode_body, default_scanners, device_service_url, digest_response, parse_key_values,
    password_digest, AxisVapixScanner, DahuaCgiScanner, DigestChallenge, HikvisionIsapiScanner,
    HttpReply, HttpSession, OnvifScanner, ProbeConfig, ProbeError, ProtocolScanner, ScanContext,
};
pub use ssdp::{parse_ssdp_response, SsdpListener, SSDP_MULTICAST};
pub use ws_discovery::{parse_xaddrs, probe_message, WsDiscoveryListener, WS_DISCOVERY_MULTICAST};
pub use xml::{element_texts, first_element_text};

#[cfg(test)]
mod tests;
