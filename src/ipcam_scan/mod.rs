//! IpcamScan - NVR / camera discovery and inventory
//!
//! ## Responsibilities
//!
//! - Expand the target CIDR and probe TCP ports alongside SSDP
//! - Identify each host through the vendor scanners, first match wins
//! - Reconcile findings with the stored asset per merge mode
//!
//! Hosts are merged one at a time right after identification, so an aborted
//! scan leaves the hosts it already finished in the store.

mod credentials;
mod merge;
mod repository;
pub mod scanner;
mod types;
mod utils;

pub use credentials::{promote_preferred, CredentialProvider};
pub use merge::{merge_asset, stored_rank, UNKNOWN_CATEGORY};
pub use repository::{
    AssetRepository, CredentialBinding, CredentialRepository, Installation,
    InstallationRepository, StoredAsset,
};
pub use types::*;
pub use utils::{default_ports, infer_category, resolve_ports, select_web_port};

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::secrets::SecretProtector;
use scanner::{
    cidr_host_range, default_scanners, discover_hosts, DiscoveryOptions, ProbeConfig,
    ProtocolScanner, ScanContext, SsdpListener, WsDiscoveryListener, SSDP_MULTICAST,
    WS_DISCOVERY_MULTICAST,
};
use utils::{apply_result, select_scanners};

/// Largest host range accepted in one request: the usable hosts of a /16
pub const MAX_SCAN_HOSTS: usize = 65_534;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 400;
const DEFAULT_MAX_CONCURRENCY: usize = 200;
const DEFAULT_SSDP_LISTEN_MS: u64 = 1200;
const DEFAULT_ONVIF_LISTEN_MS: u64 = 1200;

/// Where the UDP discovery probes are sent
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryTargets {
    pub ssdp: SocketAddr,
    pub ws_discovery: SocketAddr,
}

impl Default for DiscoveryTargets {
    fn default() -> Self {
        Self {
            ssdp: SSDP_MULTICAST,
            ws_discovery: WS_DISCOVERY_MULTICAST,
        }
    }
}

type RunningScans = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Removes a scan from the running set when the run ends or is dropped
struct RunningScanGuard {
    scan_id: Uuid,
    running: RunningScans,
    cancel: CancellationToken,
}

impl Drop for RunningScanGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.scan_id);
        }
    }
}

/// IpcamScan service
pub struct IpcamScan {
    installations: InstallationRepository,
    assets: AssetRepository,
    credentials: CredentialProvider,
    scanners: Vec<Arc<dyn ProtocolScanner>>,
    probe_config: ProbeConfig,
    targets: DiscoveryTargets,
    running: RunningScans,
}

impl IpcamScan {
    pub fn new(
        pool: SqlitePool,
        protector: Arc<dyn SecretProtector>,
        probe_config: ProbeConfig,
    ) -> Self {
        Self {
            installations: InstallationRepository::new(pool.clone()),
            assets: AssetRepository::new(pool.clone()),
            credentials: CredentialProvider::new(CredentialRepository::new(pool), protector),
            scanners: default_scanners(&probe_config),
            probe_config,
            targets: DiscoveryTargets::default(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the scanner registry (trial order = vector order)
    pub fn with_scanners(mut self, scanners: Vec<Arc<dyn ProtocolScanner>>) -> Self {
        self.scanners = scanners;
        self
    }

    pub fn with_discovery_targets(mut self, targets: DiscoveryTargets) -> Self {
        self.targets = targets;
        self
    }

    pub fn running_scans(&self) -> Vec<Uuid> {
        self.running
            .lock()
            .map(|r| r.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Signal a running scan to stop. Returns false if it is not running.
    pub fn abort_scan(&self, scan_id: &Uuid) -> bool {
        let token = self
            .running
            .lock()
            .ok()
            .and_then(|r| r.get(scan_id).cloned());

        match token {
            Some(token) => {
                tracing::info!(scan_id = %scan_id, "Abort requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stored assets of an installation
    pub async fn list_assets(&self, installation_code: &str) -> Result<Vec<StoredAsset>> {
        let installation = self.require_installation(installation_code).await?;
        self.assets.list(installation.id).await
    }

    /// Run a scan under a fresh id, registered for abort until it returns
    pub async fn run_scan(&self, request: ScanRequest) -> Result<ScanResponse> {
        let scan_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        if let Ok(mut running) = self.running.lock() {
            running.insert(scan_id, cancel.clone());
        }
        let _guard = RunningScanGuard {
            scan_id,
            running: self.running.clone(),
            cancel: cancel.clone(),
        };

        self.run_scan_with(scan_id, request, cancel).await
    }

    /// Run a scan observing an external cancellation token
    pub async fn run_scan_with(
        &self,
        scan_id: Uuid,
        request: ScanRequest,
        cancel: CancellationToken,
    ) -> Result<ScanResponse> {
        // Stage 0: validate before touching the network
        let range = cidr_host_range(&request.network_cidr)?;
        let host_count = (u64::from(*range.end()) + 1).saturating_sub(u64::from(*range.start()));
        if host_count > MAX_SCAN_HOSTS as u64 {
            return Err(Error::Validation(format!(
                "{} expands to {} hosts, limit is {}",
                request.network_cidr, host_count, MAX_SCAN_HOSTS
            )));
        }
        let addresses: Vec<Ipv4Addr> = range.map(Ipv4Addr::from).collect();
        let ports = resolve_ports(request.ports.as_deref())?;
        let connect_timeout_ms = request.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        if connect_timeout_ms == 0 {
            return Err(Error::Validation("connect_timeout_ms must be positive".to_string()));
        }
        let scanners = select_scanners(&self.scanners, request.protocols.as_deref());
        let mode = request.apply_mode.unwrap_or_default();
        let installation = self.require_installation(&request.installation).await?;

        let started_at = Utc::now();
        tracing::info!(
            scan_id = %scan_id,
            installation = %installation.code,
            cidr = %request.network_cidr,
            hosts = addresses.len(),
            ports = ?ports,
            protocols = ?scanners.iter().map(|s| s.name()).collect::<Vec<_>>(),
            mode = ?mode,
            "Scan started"
        );

        // Stage 1: discovery
        let ssdp = request.use_ssdp.unwrap_or(true).then(|| {
            SsdpListener::new(Duration::from_millis(
                request.ssdp_listen_ms.unwrap_or(DEFAULT_SSDP_LISTEN_MS),
            ))
            .with_target(self.targets.ssdp)
        });
        let options = DiscoveryOptions {
            ports,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            max_concurrency: request.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
            ssdp,
        };
        let mut hosts = discover_hosts(&addresses, &options, &cancel).await?;

        // Stage 2: identification + merge, host by host
        let ctx = ScanContext::new(
            cancel.clone(),
            WsDiscoveryListener::new(Duration::from_millis(
                request.onvif_listen_ms.unwrap_or(DEFAULT_ONVIF_LISTEN_MS),
            ))
            .with_target(self.targets.ws_discovery),
        );
        let credentials = self.credentials.load(installation.id).await?;
        let mut summary = ScanSummary {
            total_hosts: hosts.len() as u32,
            ..Default::default()
        };

        for host in hosts.iter_mut() {
            if cancel.is_cancelled() {
                tracing::warn!(scan_id = %scan_id, ip = %host.ip, "Scan cancelled");
                return Err(Error::Cancelled);
            }

            if !host.open_ports.is_empty() {
                summary.hosts_with_ports += 1;
            }
            host.web_port = select_web_port(host, &self.probe_config);

            let eligible: Vec<&Arc<dyn ProtocolScanner>> =
                scanners.iter().filter(|s| s.can_try(host)).collect();
            if !eligible.is_empty() {
                let preferred = self
                    .assets
                    .find(installation.id, &host.ip.to_string())
                    .await?
                    .and_then(|a| a.preferred_credential_id);
                let ordered = promote_preferred(credentials.clone(), preferred);
                identify_host(host, &eligible, &ordered, &ctx).await?;
            }
            host.category = infer_category(host);

            match host.status {
                HostStatus::Identified => summary.identified += 1,
                HostStatus::Authenticated => summary.authenticated += 1,
                _ => {}
            }

            if host.status != HostStatus::NoPorts {
                self.assets
                    .merge_host(installation.id, host, mode, Utc::now())
                    .await?;
                summary.persisted += 1;
            }
        }

        let finished_at = Utc::now();
        tracing::info!(
            scan_id = %scan_id,
            hosts = summary.total_hosts,
            with_ports = summary.hosts_with_ports,
            identified = summary.identified,
            authenticated = summary.authenticated,
            persisted = summary.persisted,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Scan complete"
        );

        Ok(ScanResponse {
            scan_id,
            installation: installation.code,
            network_cidr: request.network_cidr,
            started_at,
            finished_at,
            summary,
            hosts,
        })
    }

    async fn require_installation(&self, code: &str) -> Result<Installation> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::Validation("installation is required".to_string()));
        }
        self.installations
            .find_by_code(code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installation {}", code)))
    }
}

/// Try scanners in order until one reports success
async fn identify_host(
    host: &mut ScanHostResult,
    scanners: &[&Arc<dyn ProtocolScanner>],
    credentials: &[PlainCredential],
    ctx: &ScanContext,
) -> Result<()> {
    for scanner in scanners {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match scanner.try_identify(host, credentials, ctx).await? {
            Some(result) if result.success => {
                apply_result(host, result);
                tracing::info!(
                    ip = %host.ip,
                    protocol = ?host.protocol,
                    manufacturer = ?host.manufacturer,
                    model = ?host.model,
                    status = %host.status,
                    credential_id = ?host.credential_id,
                    "Host identified"
                );
                return Ok(());
            }
            _ => {
                tracing::debug!(ip = %host.ip, scanner = scanner.name(), "No match");
            }
        }
    }
    Ok(())
}
