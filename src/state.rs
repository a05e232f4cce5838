//! Application state
//!
//! Holds all shared components and state

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::ipcam_scan::scanner::ProbeConfig;
use crate::ipcam_scan::IpcamScan;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Port the vendor scanners treat as plain HTTP
    pub scan_http_port: u16,
    /// Port the vendor scanners treat as HTTPS
    pub scan_https_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://nvr_inventory.db?mode=rwc".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            scan_http_port: std::env::var("SCAN_HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(80),
            scan_https_port: std::env::var("SCAN_HTTPS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(443),
        }
    }
}

impl AppConfig {
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            http_port: self.scan_http_port,
            https_port: self.scan_https_port,
            ..ProbeConfig::default()
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Application config
    pub config: AppConfig,
    /// IpcamScan (discovery + inventory)
    pub ipcam_scan: Arc<IpcamScan>,
}
