//! Axis VAPIX identification

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::{non_blank, parse_key_values, with_suffix, HttpSession};
use super::{ProbeConfig, ProtocolScanner, ScanContext};
use crate::error::Result;
use crate::ipcam_scan::types::{PlainCredential, ProtocolAuthResult, ScanHostResult};

pub const AXIS_VAPIX: &str = "AxisVapix";

const BASIC_DEVICE_INFO_PATH: &str = "/axis-cgi/basicdeviceinfo.cgi";
const PARAM_LIST_PATH: &str = "/axis-cgi/param.cgi?action=list&group=root.Brand,root.Properties";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisDeviceInfo {
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub serial_number: Option<String>,
}

impl AxisDeviceInfo {
    fn into_option(self) -> Option<Self> {
        if self.model.is_none() && self.firmware.is_none() && self.serial_number.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

/// `basicdeviceinfo.cgi` getAllProperties response
pub fn parse_basic_device_info(body: &str) -> Option<AxisDeviceInfo> {
    let value: Value = serde_json::from_str(body).ok()?;
    if value.get("error").is_some() {
        return None;
    }
    let properties = value.pointer("/data/propertyList")?;
    let field = |key: &str| {
        properties
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    AxisDeviceInfo {
        model: field("ProdNbr")
            .or_else(|| field("ProdShortName"))
            .or_else(|| field("ProdFullName")),
        firmware: with_suffix(field("Version"), field("BuildDate")),
        serial_number: field("SerialNumber"),
    }
    .into_option()
}

/// Legacy `param.cgi` listing (`root.Brand.ProdNbr=...`)
pub fn parse_param_list(body: &str) -> Option<AxisDeviceInfo> {
    let params = parse_key_values(body);
    let first = |keys: &[&str]| {
        keys.iter().find_map(|key| {
            non_blank(
                params
                    .get(&format!("root.{}", key))
                    .or_else(|| params.get(*key)),
            )
        })
    };

    AxisDeviceInfo {
        model: first(&[
            "brand.prodnbr",
            "properties.system.productnumber",
            "brand.prodshortname",
            "properties.system.productname",
        ]),
        firmware: with_suffix(
            first(&["properties.firmware.version", "properties.system.firmware.version"]),
            first(&["properties.firmware.builddate"]),
        ),
        serial_number: first(&["properties.system.serialnumber"]),
    }
    .into_option()
}

pub struct AxisVapixScanner {
    config: ProbeConfig,
}

impl AxisVapixScanner {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    async fn identify(
        &self,
        base: &str,
        credential: Option<&PlainCredential>,
        ctx: &ScanContext,
    ) -> Result<Option<AxisDeviceInfo>> {
        let mut session = match HttpSession::new(self.config.axis_timeout, credential) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "Axis client build failed");
                return Ok(None);
            }
        };

        let rpc = json!({ "apiVersion": "1.0", "method": "getAllProperties" }).to_string();
        let url = format!("{}{}", base, BASIC_DEVICE_INFO_PATH);
        match ctx.guard(session.post(&url, "application/json", rpc)).await? {
            Ok(reply) if reply.is_success() => {
                if let Some(info) = parse_basic_device_info(&reply.text()) {
                    return Ok(Some(info));
                }
            }
            Ok(reply) => {
                tracing::trace!(url = %url, status = %reply.status, "Axis JSON device info rejected");
            }
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "Axis JSON device info failed");
            }
        }

        let url = format!("{}{}", base, PARAM_LIST_PATH);
        match ctx.guard(session.get(&url)).await? {
            Ok(reply) if reply.is_success() => Ok(parse_param_list(&reply.text())),
            Ok(reply) => {
                tracing::trace!(url = %url, status = %reply.status, "Axis param.cgi rejected");
                Ok(None)
            }
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "Axis param.cgi failed");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ProtocolScanner for AxisVapixScanner {
    fn name(&self) -> &'static str {
        AXIS_VAPIX
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
            let base = format!("{}://{}:{}", scheme, host.ip, port);

            for credential in &attempts {
                let Some(info) = self.identify(&base, *credential, ctx).await? else {
                    continue;
                };

                return Ok(Some(
                    ProtocolAuthResult {
                        success: true,
                        protocol: AXIS_VAPIX.to_string(),
                        manufacturer: Some("Axis".to_string()),
                        model: info.model,
                        firmware: info.firmware,
                        serial_number: info.serial_number,
                        web_port: Some(port),
                        sdk_port: None,
                        ..Default::default()
                    }
                    .with_credential(*credential),
                ));
            }
        }

        Ok(None)
    }
}
