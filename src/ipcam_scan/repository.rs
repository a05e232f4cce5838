//! Persistence for installations, credentials and stored assets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::merge::merge_asset;
use super::types::{MergeMode, ScanHostResult};
use crate::error::{Error, Result};
use crate::secrets::SecretProtector;

// ========================================
// Rows
// ========================================

/// Installation (site) row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Installation {
    pub id: i64,
    pub code: String,
    pub name: Option<String>,
}

/// Active credential binding joined with its credential
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialBinding {
    pub credential_id: i64,
    pub username: String,
    pub password_protected: String,
    pub priority: i64,
}

/// Asset row, one per (installation, IP)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredAsset {
    pub id: i64,
    pub installation_id: i64,
    pub ip_address: String,
    pub category: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub serial_number: Option<String>,
    pub open_ports_json: String,
    pub web_port: Option<i64>,
    pub sdk_port: Option<i64>,
    pub protocol: Option<String>,
    pub status: Option<String>,
    pub preferred_credential_id: Option<i64>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StoredAsset {
    /// Decoded open ports; unparsable JSON reads as empty
    pub fn open_ports(&self) -> Vec<u16> {
        serde_json::from_str(&self.open_ports_json).unwrap_or_default()
    }
}

const ASSET_COLUMNS: &str = "id, installation_id, ip_address, category, manufacturer, model, \
     firmware, serial_number, open_ports_json, web_port, sdk_port, protocol, status, \
     preferred_credential_id, last_seen_at, created_at";

// ========================================
// Installations
// ========================================

#[derive(Clone)]
pub struct InstallationRepository {
    pool: SqlitePool,
}

impl InstallationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<Installation>> {
        let installation = sqlx::query_as::<_, Installation>(
            "SELECT id, code, name FROM installations WHERE code = ?",
        )
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(installation)
    }

    /// Create an installation; duplicate codes are a `Conflict`
    pub async fn create(&self, code: &str, name: Option<&str>) -> Result<Installation> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::Validation("installation code is required".to_string()));
        }

        let result = sqlx::query("INSERT INTO installations (code, name) VALUES (?, ?)")
            .bind(code)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(Error::from_db)?;

        Ok(Installation {
            id: result.last_insert_rowid(),
            code: code.to_string(),
            name: name.map(str::to_string),
        })
    }
}

// ========================================
// Credentials
// ========================================

#[derive(Clone)]
pub struct CredentialRepository {
    pool: SqlitePool,
}

impl CredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a credential, protecting the password first
    pub async fn create(
        &self,
        protector: &dyn SecretProtector,
        username: &str,
        password: &str,
        label: Option<&str>,
    ) -> Result<i64> {
        let protected = protector.protect(password)?;

        let result = sqlx::query(
            "INSERT INTO credentials (username, password_protected, label, is_active) VALUES (?, ?, ?, 1)",
        )
        .bind(username)
        .bind(protected)
        .bind(label)
        .execute(&self.pool)
        .await
        .map_err(Error::from_db)?;

        Ok(result.last_insert_rowid())
    }

    /// Bind a credential to an installation with a priority (1..=999)
    pub async fn bind(
        &self,
        installation_id: i64,
        credential_id: i64,
        priority: i64,
        active: bool,
    ) -> Result<()> {
        if !(1..=999).contains(&priority) {
            return Err(Error::Validation(format!(
                "priority must be within 1..=999, got {}",
                priority
            )));
        }

        sqlx::query(
            "INSERT INTO installation_credentials (installation_id, credential_id, priority, is_active) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(installation_id)
        .bind(credential_id)
        .bind(priority)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(Error::from_db)?;

        Ok(())
    }

    pub async fn set_active(&self, credential_id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE credentials SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(credential_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bindings where both the binding and the credential are active, by priority
    pub async fn active_bindings(&self, installation_id: i64) -> Result<Vec<CredentialBinding>> {
        let rows = sqlx::query_as::<_, CredentialBinding>(
            "SELECT c.id AS credential_id, c.username, c.password_protected, ic.priority \
             FROM installation_credentials ic \
             JOIN credentials c ON c.id = ic.credential_id \
             WHERE ic.installation_id = ? AND ic.is_active = 1 AND c.is_active = 1 \
             ORDER BY ic.priority ASC, c.id ASC",
        )
        .bind(installation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// ========================================
// Assets
// ========================================

#[derive(Clone)]
pub struct AssetRepository {
    pool: SqlitePool,
}

impl AssetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, installation_id: i64, ip: &str) -> Result<Option<StoredAsset>> {
        let sql = format!(
            "SELECT {} FROM system_assets WHERE installation_id = ? AND ip_address = ?",
            ASSET_COLUMNS
        );
        let asset = sqlx::query_as::<_, StoredAsset>(&sql)
            .bind(installation_id)
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;

        Ok(asset)
    }

    /// Assets of an installation in numeric IP order
    pub async fn list(&self, installation_id: i64) -> Result<Vec<StoredAsset>> {
        let sql = format!(
            "SELECT {} FROM system_assets WHERE installation_id = ?",
            ASSET_COLUMNS
        );
        let mut assets = sqlx::query_as::<_, StoredAsset>(&sql)
            .bind(installation_id)
            .fetch_all(&self.pool)
            .await?;

        assets.sort_by_key(|a| {
            a.ip_address
                .parse::<std::net::Ipv4Addr>()
                .map(u32::from)
                .unwrap_or(u32::MAX)
        });
        Ok(assets)
    }

    /// Read-modify-write of one (installation, IP) asset inside a transaction
    pub async fn merge_host(
        &self,
        installation_id: i64,
        host: &ScanHostResult,
        mode: MergeMode,
        now: DateTime<Utc>,
    ) -> Result<StoredAsset> {
        let ip = host.ip.to_string();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM system_assets WHERE installation_id = ? AND ip_address = ?",
            ASSET_COLUMNS
        );
        let existing = sqlx::query_as::<_, StoredAsset>(&sql)
            .bind(installation_id)
            .bind(&ip)
            .fetch_optional(&mut *tx)
            .await?;

        let merged = merge_asset(existing, installation_id, host, mode, now);

        let result = sqlx::query(
            r#"
            INSERT INTO system_assets (
                installation_id, ip_address, category, manufacturer, model, firmware,
                serial_number, open_ports_json, web_port, sdk_port, protocol, status,
                preferred_credential_id, last_seen_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(installation_id, ip_address) DO UPDATE SET
                category = excluded.category,
                manufacturer = excluded.manufacturer,
                model = excluded.model,
                firmware = excluded.firmware,
                serial_number = excluded.serial_number,
                open_ports_json = excluded.open_ports_json,
                web_port = excluded.web_port,
                sdk_port = excluded.sdk_port,
                protocol = excluded.protocol,
                status = excluded.status,
                preferred_credential_id = excluded.preferred_credential_id,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(merged.installation_id)
        .bind(&merged.ip_address)
        .bind(&merged.category)
        .bind(&merged.manufacturer)
        .bind(&merged.model)
        .bind(&merged.firmware)
        .bind(&merged.serial_number)
        .bind(&merged.open_ports_json)
        .bind(merged.web_port)
        .bind(merged.sdk_port)
        .bind(&merged.protocol)
        .bind(&merged.status)
        .bind(merged.preferred_credential_id)
        .bind(merged.last_seen_at)
        .bind(merged.created_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::from_db)?;

        tx.commit().await?;

        let id = if merged.id == 0 {
            result.last_insert_rowid()
        } else {
            merged.id
        };

        tracing::debug!(
            installation_id = installation_id,
            ip = %ip,
            mode = ?mode,
            status = ?merged.status,
            "Asset merged"
        );

        Ok(StoredAsset { id, ..merged })
    }
}
