use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Ports probed in parallel on a single host
pub const PORTS_PER_HOST: usize = 20;

/// Expand `a.b.c.d/prefix` into its usable IPv4 hosts.
///
/// Prefixes up to /30 drop the network and broadcast addresses; /31 and /32
/// return the whole span.
pub fn expand_cidr(cidr: &str) -> Result<Vec<Ipv4Addr>> {
    Ok(cidr_host_range(cidr)?.map(Ipv4Addr::from).collect())
}

/// Usable host range of a CIDR as numeric addresses
pub fn cidr_host_range(cidr: &str) -> Result<RangeInclusive<u32>> {
    let parts: Vec<&str> = cidr.trim().split('/').collect();
    if parts.len() != 2 {
        return Err(Error::Validation(format!("invalid CIDR notation: {}", cidr)));
    }

    let base: Ipv4Addr = parts[0]
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid IPv4 address: {}", parts[0])))?;
    let prefix: u32 = parts[1]
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid prefix length: {}", parts[1])))?;

    if prefix > 32 {
        return Err(Error::Validation(format!(
            "prefix length out of range: {}",
            prefix
        )));
    }

    let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(base) & mask;
    let broadcast = network | !mask;

    let (first, last) = if prefix <= 30 {
        (network + 1, broadcast - 1)
    } else {
        (network, broadcast)
    };

    Ok(first..=last)
}

/// Port scan result
#[derive(Debug, Clone)]
pub struct PortScanResult {
    pub ip: IpAddr,
    pub port: u16,
    pub open: bool,
    pub latency_ms: Option<u64>,
}

/// Single TCP connect attempt; open only if the handshake completes in time
pub async fn scan_port(ip: IpAddr, port: u16, timeout_dur: Duration) -> PortScanResult {
    let addr = SocketAddr::new(ip, port);
    let start = Instant::now();

    match timeout(timeout_dur, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => PortScanResult {
            ip,
            port,
            open: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        _ => PortScanResult {
            ip,
            port,
            open: false,
            latency_ms: None,
        },
    }
}

/// Probe `ports` on one host with at most `max_concurrency` sockets in flight.
///
/// Returns the open ports, ascending and unique.
pub async fn scan_ports(
    ip: IpAddr,
    ports: &[u16],
    timeout_dur: Duration,
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Vec<u16>> {
    let mut unique = ports.to_vec();
    unique.sort_unstable();
    unique.dedup();

    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let probes = unique.into_iter().map(|port| {
        let semaphore = semaphore.clone();
        async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                permit = semaphore.acquire_owned() => permit
                    .map_err(|e| Error::Internal(format!("semaphore closed: {}", e)))?,
            };

            tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = scan_port(ip, port, timeout_dur) => Ok(result),
            }
        }
    });

    let mut open = Vec::new();
    for result in futures::future::join_all(probes).await {
        let result = result?;
        if result.open {
            tracing::trace!(ip = %ip, port = result.port, latency_ms = ?result.latency_ms, "Port open");
            open.push(result.port);
        }
    }

    open.sort_unstable();
    Ok(open)
}
