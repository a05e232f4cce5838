//! Hikvision ISAPI identification

use async_trait::async_trait;

use super::http::{with_suffix, HttpSession};
use super::{ProbeConfig, ProtocolScanner, ScanContext};
use crate::error::Result;
use crate::ipcam_scan::scanner::xml::{first_element_text, looks_like_xml};
use crate::ipcam_scan::types::{PlainCredential, ProtocolAuthResult, ScanHostResult};

pub const HIKVISION_ISAPI: &str = "HikvisionIsapi";
pub const HIKVISION_SDK_PORT: u16 = 8000;

const DEVICE_INFO_PATH: &str = "/ISAPI/System/deviceInfo";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HikvisionDeviceInfo {
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub firmware: Option<String>,
}

/// `<DeviceInfo>` document; `None` when none of the fields are present
pub fn parse_device_info(body: &str) -> Option<HikvisionDeviceInfo> {
    if !looks_like_xml(body) {
        return None;
    }

    let info = HikvisionDeviceInfo {
        model: first_element_text(body, "model"),
        serial_number: first_element_text(body, "serialNumber")
            .or_else(|| first_element_text(body, "deviceID")),
        firmware: with_suffix(
            first_element_text(body, "firmwareVersion"),
            first_element_text(body, "firmwareReleasedDate"),
        ),
    };

    if info.model.is_none() && info.serial_number.is_none() && info.firmware.is_none() {
        None
    } else {
        Some(info)
    }
}

pub struct HikvisionIsapiScanner {
    config: ProbeConfig,
}

impl HikvisionIsapiScanner {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProtocolScanner for HikvisionIsapiScanner {
    fn name(&self) -> &'static str {
        HIKVISION_ISAPI
    }

    fn can_try(&self, host: &ScanHostResult) -> bool {
        self.config.has_web_port(host)
    }

    async fn try_identify(
        &self,
        host: &ScanHostResult,
        credentials: &[PlainCredential],
        ctx: &ScanContext,
    ) -> Result<Option<ProtocolAuthResult>> {
        let attempts: Vec<Option<&PlainCredential>> = if credentials.is_empty() {
            vec![None]
        } else {
            credentials.iter().map(Some).collect()
        };

        for (port, https) in self.config.web_endpoints(host, true) {
            let scheme = if https { "https" } else { "http" };
            let url = format!("{}://{}:{}{}", scheme, host.ip, port, DEVICE_INFO_PATH);

            for credential in &attempts {
                let Ok(mut session) = HttpSession::new(self.config.hikvision_timeout, *credential) else {
                    continue;
                };

                let reply = match ctx.guard(session.get(&url)).await? {
                    Ok(reply) if reply.is_success() => reply,
                    Ok(reply) => {
                        tracing::trace!(url = %url, status = %reply.status, "ISAPI deviceInfo rejected");
                        continue;
                    }
                    Err(e) => {
                        tracing::trace!(url = %url, error = %e, "ISAPI deviceInfo failed");
                        continue;
                    }
                };

                let Some(info) = parse_device_info(&reply.text()) else {
                    continue;
                };

                return Ok(Some(
                    ProtocolAuthResult {
                        success: true,
                        protocol: HIKVISION_ISAPI.to_string(),
                        manufacturer: Some("Hikvision".to_string()),
                        model: info.model,
                        firmware: info.firmware,
                        serial_number: info.serial_number,
                        web_port: Some(port),
                        sdk_port: host.has_port(HIKVISION_SDK_PORT).then_some(HIKVISION_SDK_PORT),
                        ..Default::default()
                    }
                    .with_credential(*credential),
                ));
            }
        }

        Ok(None)
    }
}
