//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use nvr_inventory::db;
use nvr_inventory::ipcam_scan::scanner::ProbeConfig;
use nvr_inventory::ipcam_scan::{CredentialRepository, Installation, InstallationRepository};
use nvr_inventory::secrets::PlaintextProtector;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::net::{TcpListener, UdpSocket};
use wiremock::{Request, Respond, ResponseTemplate};

pub const HIK_DEVICE_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DeviceInfo version="2.0" xmlns="http://www.hikvision.com/ver20/XMLSchema">
<deviceName>Lobby</deviceName>
<model>DS-2CD2143G0-I</model>
<serialNumber>DS-2CD2143G0-I20190101AAWRC12345678</serialNumber>
<firmwareVersion>V5.6.3</firmwareVersion>
<firmwareReleasedDate>build 190923</firmwareReleasedDate>
</DeviceInfo>"#;

/// Single-connection in-memory database with the schema applied
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::migrate(&pool).await.unwrap();
    pool
}

/// Installation with `(username, password, priority)` bindings; returns credential ids in order
pub async fn seed_installation(
    pool: &SqlitePool,
    code: &str,
    credentials: &[(&str, &str, i64)],
) -> (Installation, Vec<i64>) {
    let installation = InstallationRepository::new(pool.clone())
        .create(code, Some("Test site"))
        .await
        .unwrap();

    let repo = CredentialRepository::new(pool.clone());
    let mut ids = Vec::new();
    for (username, password, priority) in credentials {
        let id = repo
            .create(&PlaintextProtector, username, password, None)
            .await
            .unwrap();
        repo.bind(installation.id, id, *priority, true).await.unwrap();
        ids.push(id);
    }
    (installation, ids)
}

/// A loopback port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Probe config pointing the web ports at a mock server
pub fn probe_config(http_port: u16, https_port: u16) -> ProbeConfig {
    ProbeConfig {
        http_port,
        https_port,
        axis_timeout: Duration::from_millis(1500),
        dahua_timeout: Duration::from_millis(1500),
        hikvision_timeout: Duration::from_millis(1500),
        onvif_timeout: Duration::from_millis(1500),
    }
}

/// Answer the first datagram with each of `replies`
pub async fn udp_responder(replies: Vec<String>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        if let Ok((_, from)) = socket.recv_from(&mut buf).await {
            for reply in replies {
                let _ = socket.send_to(reply.as_bytes(), from).await;
            }
        }
    });
    addr
}

pub fn probe_match(xaddrs: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery">
<SOAP-ENV:Body><d:ProbeMatches><d:ProbeMatch><d:XAddrs>{}</d:XAddrs></d:ProbeMatch></d:ProbeMatches></SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#,
        xaddrs
    )
}

/// Device guarded by HTTP Digest (qop=auth) that serves `body` once the
/// response hash checks out.
pub struct DigestEcho {
    pub username: &'static str,
    pub password: &'static str,
    pub body: &'static str,
}

const REALM: &str = "IP Camera(C1234)";
const NONCE: &str = "4e5468694e7a6b354d5441364d5459324e4463335a6a55344f673d3d";

impl DigestEcho {
    fn challenge() -> ResponseTemplate {
        ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(r#"Digest qop="auth", realm="{}", nonce="{}", stale="FALSE""#, REALM, NONCE),
        )
    }

    fn verify(&self, header: &str, method: &str) -> bool {
        let Some(params) = header.strip_prefix("Digest ") else {
            return false;
        };
        let params: HashMap<&str, &str> = params
            .split(", ")
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
            .collect();

        let field = |k: &str| params.get(k).copied().unwrap_or_default();
        if field("username") != self.username || field("nonce") != NONCE {
            return false;
        }

        let md5_hex = |s: String| format!("{:x}", md5::compute(s.as_bytes()));
        let ha1 = md5_hex(format!("{}:{}:{}", self.username, REALM, self.password));
        let ha2 = md5_hex(format!("{}:{}", method, field("uri")));
        let expected = md5_hex(format!(
            "{}:{}:{}:{}:auth:{}",
            ha1,
            NONCE,
            field("nc"),
            field("cnonce"),
            ha2
        ));
        field("response") == expected
    }
}

impl Respond for DigestEcho {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let authorized = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |h| self.verify(h, request.method.as_str()));

        if authorized {
            ResponseTemplate::new(200).set_body_raw(self.body, "application/xml")
        } else {
            Self::challenge()
        }
    }
}
