//! Dahua CGI identification (`magicBox.cgi`)

use async_trait::async_trait;

use super::http::{non_blank, parse_key_values, with_suffix, HttpSession};
use super::{ProbeConfig, ProtocolScanner, ScanContext};
use crate::error::Result;
use crate::ipcam_scan::types::{PlainCredential, ProtocolAuthResult, ScanHostResult};

pub const DAHUA_CGI: &str = "DahuaCgi";
pub const DAHUA_SDK_PORT: u16 = 37777;

const SYSTEM_INFO_PATH: &str = "/cgi-bin/magicBox.cgi?action=getSystemInfo";
const SOFTWARE_VERSION_PATH: &str = "/cgi-bin/magicBox.cgi?action=getSoftwareVersion";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DahuaSystemInfo {
    pub device_type: Option<String>,
    pub serial_number: Option<String>,
}

/// `getSystemInfo` body; `None` unless it names a device type or serial
pub fn parse_system_info(body: &str) -> Option<DahuaSystemInfo> {
    let values = parse_key_values(body);
    let info = DahuaSystemInfo {
        device_type: non_blank(values.get("devicetype")),
        serial_number: non_blank(values.get("serialnumber")),
    };

    if info.device_type.is_none() && info.serial_number.is_none() {
        None
    } else {
        Some(info)
    }
}

/// `getSoftwareVersion` body as `version (build date)`
pub fn parse_software_version(body: &str) -> Option<String> {
    let values = parse_key_values(body);
    let version = non_blank(values.get("version")).or_else(|| non_blank(values.get("softwareversion")));
    let build = non_blank(values.get("builddate"));
    with_suffix(version, build)
}

pub struct DahuaCgiScanner {
    config: ProbeConfig,
}

impl DahuaCgiScanner {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Best-effort firmware lookup in an already authenticated session
    async fn firmware(&self, session: &mut HttpSession<'_>, base: &str, ctx: &ScanContext) -> Result<Option<String>> {
        let url = format!("{}{}", base, SOFTWARE_VERSION_PATH);
        Ok(match ctx.guard(session.get(&url)).await? {
            Ok(reply) if reply.is_success() => parse_software_version(&reply.text()),
            _ => None,
        })
    }

    fn result(
        &self,
        host: &ScanHostResult,
        port: u16,
        info: DahuaSystemInfo,
        firmware: Option<String>,
        credential: Option<&PlainCredential>,
    ) -> ProtocolAuthResult {
        ProtocolAuthResult {
            success: true,
            protocol: DAHUA_CGI.to_string(),
            manufacturer: Some("Dahua".to_string()),
            model: info.device_type,
            firmware,
            serial_number: info.serial_number,
            web_port: Some(port),
            sdk_port: host.has_port(DAHUA_SDK_PORT).then_some(DAHUA_SDK_PORT),
            ..Default::default()
        }
        .with_credential(credential)
    }
}

#[async_trait]
impl ProtocolScanner for DahuaCgiScanner {
    fn name(&self) -> &'static str {
        DAHUA_CGI
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
        for (port, https) in self.config.web_endpoints(host, false) {
            let scheme = if https { "https" } else { "http" };
            let base = format!("{}://{}:{}", scheme, host.ip, port);
            let url = format!("{}{}", base, SYSTEM_INFO_PATH);

            let Ok(mut anonymous) = HttpSession::new(self.config.dahua_timeout, None) else {
                continue;
            };
            let reply = match ctx.guard(anonymous.get(&url)).await? {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::trace!(url = %url, error = %e, "Dahua getSystemInfo failed");
                    continue;
                }
            };

            if reply.is_success() {
                let Some(info) = parse_system_info(&reply.text()) else {
                    continue;
                };
                let firmware = self.firmware(&mut anonymous, &base, ctx).await?;
                return Ok(Some(self.result(host, port, info, firmware, None)));
            }

            if !reply.is_auth_failure() {
                continue;
            }

            for credential in credentials {
                let Ok(mut session) = HttpSession::new(self.config.dahua_timeout, Some(credential)) else {
                    continue;
                };
                let reply = match ctx.guard(session.get(&url)).await? {
                    Ok(reply) if reply.is_success() => reply,
                    Ok(_) | Err(_) => continue,
                };
                let Some(info) = parse_system_info(&reply.text()) else {
                    continue;
                };

                let firmware = self.firmware(&mut session, &base, ctx).await?;
                return Ok(Some(self.result(host, port, info, firmware, Some(credential))));
            }
        }

        Ok(None)
    }
}
