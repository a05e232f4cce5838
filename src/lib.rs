//! NVR inventory library
//!
//! Discovers cameras and recorders on an IPv4 network and reconciles what
//! it finds into a per-installation asset inventory.
//!
//! ## Components
//!
//! 1. IpcamScan - discovery, vendor identification, merge into the store
//! 2. WebAPI - REST API endpoints
//! 3. Secrets - credential protect/unprotect seam
//!
//! A scan request runs discovery (TCP probe + SSDP, WS-Discovery on demand),
//! tries the vendor scanners per host in order, and merges each finding
//! under the requested merge mode.

pub mod db;
pub mod error;
pub mod ipcam_scan;
pub mod models;
pub mod secrets;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
