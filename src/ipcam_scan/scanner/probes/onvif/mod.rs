//! ONVIF identification: WS-Discovery lookup, then GetDeviceInformation

mod auth;
mod types;

use async_trait::async_trait;

use super::http::HttpSession;
use super::{ProbeConfig, ProtocolScanner, ScanContext};
use crate::error::Result;
use crate::ipcam_scan::types::{PlainCredential, ProtocolAuthResult, ScanHostResult};

pub use auth::{get_device_information_envelope, password_digest};
pub use types::OnvifDeviceInfo;

pub const ONVIF: &str = "Onvif";
pub const ONVIF_DEVICE: &str = "OnvifDevice";
pub const ONVIF_DISCOVERY: &str = "OnvifDiscovery";
pub const ONVIF_DISCOVERY_PORT: u16 = 3702;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Normalise an XAddr to its device service endpoint
pub fn device_service_url(xaddr: &str) -> String {
    let trimmed = xaddr.trim().trim_end_matches('/');
    let lower = trimmed.to_ascii_lowercase();

    if lower.contains("device_service") {
        trimmed.to_string()
    } else if lower.ends_with("/onvif") {
        format!("{}/device_service", trimmed)
    } else {
        format!("{}/onvif/device_service", trimmed)
    }
}

pub struct OnvifScanner {
    config: ProbeConfig,
}

impl OnvifScanner {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn device_information(
        &self,
        url: &str,
        credential: &PlainCredential,
        ctx: &ScanContext,
    ) -> Result<Option<OnvifDeviceInfo>> {
        let Ok(mut session) = HttpSession::new(self.config.onvif_timeout, None) else {
            return Ok(None);
        };
        let envelope = get_device_information_envelope(&credential.username, &credential.password);

        Ok(match ctx.guard(session.post(url, SOAP_CONTENT_TYPE, envelope)).await? {
            Ok(reply) if reply.is_success() => OnvifDeviceInfo::parse(&reply.text()),
            Ok(reply) => {
                tracing::trace!(url = %url, status = %reply.status, "GetDeviceInformation rejected");
                None
            }
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "GetDeviceInformation failed");
                None
            }
        })
    }
}

#[async_trait]
impl ProtocolScanner for OnvifScanner {
    fn name(&self) -> &'static str {
        ONVIF
    }

    /// WS-Discovery runs over UDP, so TCP port state does not matter
    fn can_try(&self, _host: &ScanHostResult) -> bool {
        true
    }

    async fn try_identify(
        &self,
        host: &ScanHostResult,
        credentials: &[PlainCredential],
        ctx: &ScanContext,
    ) -> Result<Option<ProtocolAuthResult>> {
        let devices = ctx.onvif_devices().await?;
        let Some(xaddrs) = devices.get(&host.ip).filter(|x| !x.is_empty()) else {
            return Ok(None);
        };

        for xaddr in xaddrs {
            let url = device_service_url(xaddr);

            for credential in credentials {
                let Some(info) = self.device_information(&url, credential, ctx).await? else {
                    continue;
                };

                return Ok(Some(
                    ProtocolAuthResult {
                        success: true,
                        protocol: ONVIF_DEVICE.to_string(),
                        manufacturer: info.manufacturer.or_else(|| Some("ONVIF".to_string())),
                        model: info.model,
                        firmware: info.firmware_version,
                        serial_number: info.serial_number,
                        web_port: host.web_port,
                        sdk_port: Some(ONVIF_DISCOVERY_PORT),
                        ..Default::default()
                    }
                    .with_credential(Some(credential)),
                ));
            }
        }

        Ok(Some(ProtocolAuthResult {
            success: true,
            protocol: ONVIF_DISCOVERY.to_string(),
            manufacturer: Some("ONVIF".to_string()),
            web_port: host.web_port,
            sdk_port: Some(ONVIF_DISCOVERY_PORT),
            ..Default::default()
        }))
    }
}
