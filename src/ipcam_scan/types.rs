//! IpcamScan types

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Host status within one scan run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum HostStatus {
    #[default]
    Unknown,
    Found,
    NoPorts,
    SsdpOnly,
    Identified,
    Authenticated,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Found => "Found",
            Self::NoPorts => "NoPorts",
            Self::SsdpOnly => "SsdpOnly",
            Self::Identified => "Identified",
            Self::Authenticated => "Authenticated",
        }
    }

    /// Merge ladder rank. Statuses off the ladder rank as unset.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Authenticated => 3,
            Self::Identified => 2,
            Self::NoPorts => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Self::Unknown,
            "found" => Self::Found,
            "noports" => Self::NoPorts,
            "ssdponly" => Self::SsdpOnly,
            "identified" => Self::Identified,
            "authenticated" => Self::Authenticated,
            other => return Err(format!("unknown host status: {}", other)),
        };
        Ok(status)
    }
}

/// SSDP response headers of one responder
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SsdpInfo {
    pub server: Option<String>,
    pub usn: Option<String>,
    pub st: Option<String>,
    pub location: Option<String>,
}

/// One host's findings for a single scan run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanHostResult {
    pub ip: Ipv4Addr,
    /// Unique, ascending
    pub open_ports: Vec<u16>,
    pub ssdp: Option<SsdpInfo>,
    pub status: HostStatus,
    pub category: Option<String>,
    pub protocol: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub serial_number: Option<String>,
    pub web_port: Option<u16>,
    pub sdk_port: Option<u16>,
    pub credential_id: Option<i64>,
    pub credential_username: Option<String>,
}

impl ScanHostResult {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            open_ports: Vec::new(),
            ssdp: None,
            status: HostStatus::Unknown,
            category: None,
            protocol: None,
            manufacturer: None,
            model: None,
            firmware: None,
            serial_number: None,
            web_port: None,
            sdk_port: None,
            credential_id: None,
            credential_username: None,
        }
    }

    pub fn has_port(&self, port: u16) -> bool {
        self.open_ports.contains(&port)
    }
}

/// Decrypted credential, valid for one scan request
#[derive(Clone)]
pub struct PlainCredential {
    pub credential_id: i64,
    pub username: String,
    pub password: String,
    pub priority: i64,
}

impl fmt::Debug for PlainCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainCredential")
            .field("credential_id", &self.credential_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("priority", &self.priority)
            .finish()
    }
}

/// Outcome returned by a protocol scanner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolAuthResult {
    pub success: bool,
    pub protocol: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub serial_number: Option<String>,
    pub web_port: Option<u16>,
    pub sdk_port: Option<u16>,
    pub credential_id: Option<i64>,
    pub credential_username: Option<String>,
}

impl ProtocolAuthResult {
    pub fn identified(protocol: impl Into<String>) -> Self {
        Self {
            success: true,
            protocol: protocol.into(),
            ..Default::default()
        }
    }

    pub fn with_credential(mut self, credential: Option<&PlainCredential>) -> Self {
        self.credential_id = credential.map(|c| c.credential_id);
        self.credential_username = credential.map(|c| c.username.clone());
        self
    }
}

/// How scan findings are reconciled with the stored asset
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub enum MergeMode {
    LastWins,
    #[default]
    NoDegrade,
    /// Not yet distinct from NoDegrade
    Review,
}

impl MergeMode {
    /// Case-insensitive name; anything unrecognised is NoDegrade
    pub fn normalize(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "lastwins" => Self::LastWins,
            "review" => Self::Review,
            _ => Self::NoDegrade,
        }
    }
}

impl<'de> Deserialize<'de> for MergeMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.as_deref().map(Self::normalize).unwrap_or_default())
    }
}

/// Scan request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Installation code
    pub installation: String,
    pub network_cidr: String,
    pub ports: Option<Vec<u32>>,
    pub protocols: Option<Vec<String>>,
    pub connect_timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
    pub use_ssdp: Option<bool>,
    pub ssdp_listen_ms: Option<u64>,
    pub onvif_listen_ms: Option<u64>,
    pub apply_mode: Option<MergeMode>,
}

impl ScanRequest {
    pub fn new(installation: impl Into<String>, network_cidr: impl Into<String>) -> Self {
        Self {
            installation: installation.into(),
            network_cidr: network_cidr.into(),
            ports: None,
            protocols: None,
            connect_timeout_ms: None,
            max_concurrency: None,
            use_ssdp: None,
            ssdp_listen_ms: None,
            onvif_listen_ms: None,
            apply_mode: None,
        }
    }
}

/// Scan summary counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_hosts: u32,
    pub hosts_with_ports: u32,
    pub identified: u32,
    pub authenticated: u32,
    pub persisted: u32,
}

/// Scan response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub scan_id: Uuid,
    pub installation: String,
    pub network_cidr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: ScanSummary,
    pub hosts: Vec<ScanHostResult>,
}
