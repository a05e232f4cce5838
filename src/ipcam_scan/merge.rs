//! Merge policy: reconcile one scan's host findings with the stored asset

use chrono::{DateTime, Utc};

use super::repository::StoredAsset;
use super::types::{HostStatus, MergeMode, ScanHostResult};

pub const UNKNOWN_CATEGORY: &str = "Unknown";

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

/// Overwrite only with a non-blank incoming value
fn keep_if_blank(current: &mut Option<String>, incoming: &Option<String>) {
    if !is_blank(incoming) {
        *current = incoming.clone();
    }
}

/// Never replace a known category with "Unknown" or a blank
fn keep_if_unknown(current: &mut String, incoming: &Option<String>) {
    if let Some(value) = incoming.as_deref().map(str::trim) {
        if value.is_empty() {
            return;
        }
        if value.eq_ignore_ascii_case(UNKNOWN_CATEGORY) && !current.trim().is_empty() {
            return;
        }
        *current = value.to_string();
    }
}

/// Rank of a stored status string; unrecognised text ranks as unset
pub fn stored_rank(status: Option<&str>) -> u8 {
    status
        .and_then(|s| s.parse::<HostStatus>().ok())
        .map_or(0, |s| s.rank())
}

/// Replace the status unless the stored one outranks it. Ties keep the incoming value.
fn keep_best_status(current: &mut Option<String>, incoming: HostStatus) {
    if incoming.rank() >= stored_rank(current.as_deref()) {
        *current = Some(incoming.to_string());
    }
}

fn new_asset(installation_id: i64, host: &ScanHostResult, now: DateTime<Utc>) -> StoredAsset {
    StoredAsset {
        id: 0,
        installation_id,
        ip_address: host.ip.to_string(),
        category: UNKNOWN_CATEGORY.to_string(),
        manufacturer: None,
        model: None,
        firmware: None,
        serial_number: None,
        open_ports_json: "[]".to_string(),
        web_port: None,
        sdk_port: None,
        protocol: None,
        status: None,
        preferred_credential_id: None,
        last_seen_at: now,
        created_at: now,
    }
}

/// Apply `host` on top of `existing` (or a fresh asset) according to `mode`
pub fn merge_asset(
    existing: Option<StoredAsset>,
    installation_id: i64,
    host: &ScanHostResult,
    mode: MergeMode,
    now: DateTime<Utc>,
) -> StoredAsset {
    let mut asset = existing.unwrap_or_else(|| new_asset(installation_id, host, now));

    // Refreshed in every mode
    asset.last_seen_at = now;
    asset.open_ports_json =
        serde_json::to_string(&host.open_ports).unwrap_or_else(|_| "[]".to_string());
    asset.web_port = host.web_port.map(i64::from).or(asset.web_port);
    asset.sdk_port = host.sdk_port.map(i64::from).or(asset.sdk_port);

    match mode {
        MergeMode::LastWins => {
            if !is_blank(&host.category) {
                asset.category = host.category.clone().unwrap_or_default();
            }
            asset.manufacturer = host.manufacturer.clone();
            asset.model = host.model.clone();
            asset.firmware = host.firmware.clone();
            asset.serial_number = host.serial_number.clone();
            asset.protocol = host.protocol.clone();
            asset.status = Some(host.status.to_string());
        }
        MergeMode::NoDegrade | MergeMode::Review => {
            keep_if_unknown(&mut asset.category, &host.category);
            keep_if_blank(&mut asset.manufacturer, &host.manufacturer);
            keep_if_blank(&mut asset.model, &host.model);
            keep_if_blank(&mut asset.firmware, &host.firmware);
            keep_if_blank(&mut asset.serial_number, &host.serial_number);
            keep_if_blank(&mut asset.protocol, &host.protocol);
            keep_best_status(&mut asset.status, host.status);
        }
    }

    if host.status == HostStatus::Authenticated {
        if let Some(id) = host.credential_id {
            asset.preferred_credential_id = Some(id);
        }
    }

    asset
}
