//! Utilities for IpcamScan

use std::sync::Arc;

use super::scanner::{ProbeConfig, ProtocolScanner};
use super::types::{ProtocolAuthResult, ScanHostResult, HostStatus};
use crate::error::{Error, Result};

/// Default scan ports
pub fn default_ports() -> Vec<u16> {
    vec![80, 443, 554, 8000, 8080, 37777, 8899]
}

/// Validate requested ports (1..=65535), dropping duplicates in order
pub fn resolve_ports(requested: Option<&[u32]>) -> Result<Vec<u16>> {
    let Some(requested) = requested.filter(|p| !p.is_empty()) else {
        return Ok(default_ports());
    };

    let mut ports = Vec::with_capacity(requested.len());
    for &port in requested {
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::Validation(format!("port out of range: {}", port)))?;
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    Ok(ports)
}

/// Scanners matching the filter (case-insensitive), registry order kept.
/// An absent or empty filter selects all of them.
pub fn select_scanners(
    registry: &[Arc<dyn ProtocolScanner>],
    filter: Option<&[String]>,
) -> Vec<Arc<dyn ProtocolScanner>> {
    let Some(filter) = filter.filter(|f| !f.is_empty()) else {
        return registry.to_vec();
    };

    for name in filter {
        if !registry.iter().any(|s| s.name().eq_ignore_ascii_case(name.trim())) {
            tracing::warn!(protocol = %name, "Unknown protocol in filter, ignored");
        }
    }

    registry
        .iter()
        .filter(|s| filter.iter().any(|f| f.trim().eq_ignore_ascii_case(s.name())))
        .cloned()
        .collect()
}

/// HTTPS port if open, else HTTP
pub fn select_web_port(host: &ScanHostResult, config: &ProbeConfig) -> Option<u16> {
    [config.https_port, config.http_port]
        .into_iter()
        .find(|p| host.has_port(*p))
}

/// Fold a successful scanner result into the host record
pub fn apply_result(host: &mut ScanHostResult, result: ProtocolAuthResult) {
    host.protocol = Some(result.protocol);
    host.manufacturer = result.manufacturer;
    host.model = result.model;
    host.firmware = result.firmware;
    host.serial_number = result.serial_number;
    host.web_port = result.web_port.or(host.web_port);
    host.sdk_port = result.sdk_port;
    host.credential_id = result.credential_id;
    host.credential_username = result.credential_username;
    // No credential id means nothing was authenticated
    host.status = if host.credential_id.is_some() {
        HostStatus::Authenticated
    } else {
        HostStatus::Identified
    };
}

const RECORDER_MARKERS: [&str; 4] = ["NVR", "DVR", "XVR", "HCVR"];

/// Recorder / Camera from the identified model, else Unknown
pub fn infer_category(host: &ScanHostResult) -> Option<String> {
    let category = match host.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) => {
            let upper = model.to_ascii_uppercase();
            if RECORDER_MARKERS.iter().any(|m| upper.contains(m)) {
                "Recorder"
            } else {
                "Camera"
            }
        }
        None => "Unknown",
    };
    Some(category.to_string())
}
