//! Discovery stage: TCP port probing across hosts alongside SSDP

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::network::{scan_ports, PORTS_PER_HOST};
use super::ssdp::SsdpListener;
use crate::error::{Error, Result};
use crate::ipcam_scan::types::{HostStatus, ScanHostResult, SsdpInfo};

/// Upper bound for hosts probed at once
pub const MAX_HOST_CONCURRENCY: usize = 512;

/// Discovery parameters
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub ports: Vec<u16>,
    pub connect_timeout: Duration,
    /// Hosts in flight, clamped to 1..=512
    pub max_concurrency: usize,
    /// SSDP listener, `None` to skip SSDP
    pub ssdp: Option<SsdpListener>,
}

/// Probe every host and fold in SSDP responders.
///
/// Returns one record per host, status `Found`, `NoPorts` or `SsdpOnly`,
/// in numeric address order.
pub async fn discover_hosts(
    hosts: &[Ipv4Addr],
    options: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> Result<Vec<ScanHostResult>> {
    let ssdp = async {
        match &options.ssdp {
            Some(listener) => listener.discover(cancel).await,
            None => Ok(HashMap::new()),
        }
    };

    let (open_ports, ssdp) = tokio::try_join!(probe_hosts(hosts, options, cancel), ssdp)?;

    let mut results: Vec<ScanHostResult> = hosts
        .iter()
        .zip(open_ports)
        .map(|(ip, ports)| build_host(*ip, ports, ssdp.get(ip)))
        .collect();

    results.sort_by_key(|h| u32::from(h.ip));

    tracing::info!(
        hosts = results.len(),
        found = results.iter().filter(|h| h.status == HostStatus::Found).count(),
        ssdp_only = results.iter().filter(|h| h.status == HostStatus::SsdpOnly).count(),
        "Discovery complete"
    );

    Ok(results)
}

fn build_host(ip: Ipv4Addr, open_ports: Vec<u16>, ssdp: Option<&SsdpInfo>) -> ScanHostResult {
    let mut host = ScanHostResult::new(ip);
    host.status = if open_ports.is_empty() {
        HostStatus::NoPorts
    } else {
        HostStatus::Found
    };
    host.open_ports = open_ports;

    if let Some(info) = ssdp {
        host.ssdp = Some(info.clone());
        if host.status == HostStatus::NoPorts {
            host.status = HostStatus::SsdpOnly;
        }
    }

    host
}

/// Open ports per host, indexed like `hosts`
async fn probe_hosts(
    hosts: &[Ipv4Addr],
    options: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<u16>>> {
    let concurrency = options.max_concurrency.clamp(1, MAX_HOST_CONCURRENCY);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let ports: Arc<[u16]> = options.ports.clone().into();

    let mut slots: Vec<Vec<u16>> = vec![Vec::new(); hosts.len()];
    let mut tasks = JoinSet::new();

    for (idx, ip) in hosts.iter().copied().enumerate() {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = semaphore.clone().acquire_owned() => permit
                .map_err(|e| Error::Internal(format!("semaphore closed: {}", e)))?,
        };

        let ports = ports.clone();
        let cancel = cancel.clone();
        let timeout = options.connect_timeout;

        tasks.spawn(async move {
            let result = scan_ports(IpAddr::V4(ip), &ports, timeout, PORTS_PER_HOST, &cancel).await;
            drop(permit);
            (idx, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Ok(open))) => slots[idx] = open,
            Ok((_, Err(e))) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Host probe task failed");
            }
        }
    }

    Ok(slots)
}
