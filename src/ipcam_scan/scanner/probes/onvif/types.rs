use crate::ipcam_scan::scanner::xml::{first_element_text, looks_like_xml};

/// ONVIF device information retrieved via GetDeviceInformation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnvifDeviceInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
}

impl OnvifDeviceInfo {
    /// Parse a GetDeviceInformationResponse; `None` if it carries no fields
    pub fn parse(body: &str) -> Option<Self> {
        if !looks_like_xml(body) {
            return None;
        }

        let info = Self {
            manufacturer: first_element_text(body, "Manufacturer"),
            model: first_element_text(body, "Model"),
            firmware_version: first_element_text(body, "FirmwareVersion"),
            serial_number: first_element_text(body, "SerialNumber"),
        };

        if info == Self::default() {
            None
        } else {
            Some(info)
        }
    }
}
