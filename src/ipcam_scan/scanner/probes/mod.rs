//! Vendor protocol scanners
//!
//! Each scanner answers three questions about a discovered host: its stable
//! name, whether it has any chance against the host (`can_try`), and the
//! identification attempt itself (`try_identify`). Transport errors, timeouts,
//! auth failures and unrecognised payloads all collapse to `Ok(None)`; only
//! cancellation surfaces as an error.

mod axis;
mod dahua;
mod hikvision;
mod http;
mod onvif;

use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::ws_discovery::WsDiscoveryListener;
use crate::error::{Error, Result};
use crate::ipcam_scan::types::{PlainCredential, ProtocolAuthResult, ScanHostResult};

pub use axis::AxisVapixScanner;
pub use dahua::DahuaCgiScanner;
pub use hikvision::HikvisionIsapiScanner;
pub use http::{
    decode_body, digest_response, parse_key_values, DigestChallenge, HttpReply, HttpSession,
    ProbeError,
};
pub use onvif::{device_service_url, password_digest, OnvifScanner};

/// Web ports and per-vendor request timeouts
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub http_port: u16,
    pub https_port: u16,
    pub axis_timeout: Duration,
    pub dahua_timeout: Duration,
    pub hikvision_timeout: Duration,
    pub onvif_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            axis_timeout: Duration::from_millis(1200),
            dahua_timeout: Duration::from_millis(4000),
            hikvision_timeout: Duration::from_millis(2200),
            onvif_timeout: Duration::from_millis(6800),
        }
    }
}

impl ProbeConfig {
    /// Open web endpoints of a host as `(port, https)`, in the given preference
    pub(crate) fn web_endpoints(&self, host: &ScanHostResult, https_first: bool) -> Vec<(u16, bool)> {
        let https = (self.https_port, true);
        let http = (self.http_port, false);
        let order = if https_first { [https, http] } else { [http, https] };

        order
            .into_iter()
            .filter(|(port, _)| host.has_port(*port))
            .collect()
    }

    pub(crate) fn has_web_port(&self, host: &ScanHostResult) -> bool {
        host.has_port(self.http_port) || host.has_port(self.https_port)
    }
}

/// Per-request state shared by scanners: cancellation and the one-shot
/// WS-Discovery result.
pub struct ScanContext {
    cancel: CancellationToken,
    ws_discovery: WsDiscoveryListener,
    onvif_devices: OnceCell<HashMap<Ipv4Addr, Vec<String>>>,
}

impl ScanContext {
    pub fn new(cancel: CancellationToken, ws_discovery: WsDiscoveryListener) -> Self {
        Self {
            cancel,
            ws_discovery,
            onvif_devices: OnceCell::new(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` unless the scan is cancelled first
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// WS-Discovery responders, discovered on first use
    pub async fn onvif_devices(&self) -> Result<&HashMap<Ipv4Addr, Vec<String>>> {
        self.onvif_devices
            .get_or_try_init(|| async {
                let devices = self.ws_discovery.discover(&self.cancel).await?;
                tracing::info!(devices = devices.len(), "ONVIF WS-Discovery complete");
                Ok::<_, Error>(devices)
            })
            .await
    }
}

/// Protocol scanner contract
#[async_trait]
pub trait ProtocolScanner: Send + Sync {
    /// Stable identifier, used for filtering
    fn name(&self) -> &'static str;

    /// Cheap local applicability check over known ports / discovery data
    fn can_try(&self, host: &ScanHostResult) -> bool;

    /// Attempt identification; `Ok(None)` means try the next scanner
    async fn try_identify(
        &self,
        host: &ScanHostResult,
        credentials: &[PlainCredential],
        ctx: &ScanContext,
    ) -> Result<Option<ProtocolAuthResult>>;
}

/// All scanners in default trial order
pub fn default_scanners(config: &ProbeConfig) -> Vec<Arc<dyn ProtocolScanner>> {
    vec![
        Arc::new(AxisVapixScanner::new(config.clone())),
        Arc::new(DahuaCgiScanner::new(config.clone())),
        Arc::new(HikvisionIsapiScanner::new(config.clone())),
        Arc::new(OnvifScanner::new(config.clone())),
    ]
}
