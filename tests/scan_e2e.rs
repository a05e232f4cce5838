//! End-to-end scans over loopback against simulated devices

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use nvr_inventory::ipcam_scan::{
    AssetRepository, HostStatus, IpcamScan, InstallationRepository, MergeMode, ScanRequest,
};
use nvr_inventory::secrets::PlaintextProtector;
use nvr_inventory::Error;
use sqlx::SqlitePool;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{closed_port, memory_pool, probe_config, seed_installation, DigestEcho, HIK_DEVICE_INFO};

const SITE: &str = "SITE-A";

async fn hikvision_device() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/System/deviceInfo"))
        .respond_with(DigestEcho {
            username: "admin",
            password: "hunter2",
            body: HIK_DEVICE_INFO,
        })
        .mount(&server)
        .await;
    server
}

async fn service(pool: &SqlitePool, http_port: u16) -> IpcamScan {
    IpcamScan::new(
        pool.clone(),
        Arc::new(PlaintextProtector),
        probe_config(http_port, closed_port().await),
    )
}

fn loopback_request(port: u16, mode: MergeMode) -> ScanRequest {
    ScanRequest {
        ports: Some(vec![u32::from(port)]),
        protocols: Some(vec!["HikvisionIsapi".to_string()]),
        connect_timeout_ms: Some(300),
        use_ssdp: Some(false),
        apply_mode: Some(mode),
        ..ScanRequest::new(SITE, "127.0.0.0/30")
    }
}

#[tokio::test]
async fn test_digest_protected_device_is_authenticated_and_persisted() {
    let pool = memory_pool().await;
    let (installation, ids) =
        seed_installation(&pool, SITE, &[("viewer", "wrong", 1), ("admin", "hunter2", 2)]).await;
    let server = hikvision_device().await;
    let port = server.address().port();

    let scan = service(&pool, port).await;
    let response = scan
        .run_scan(loopback_request(port, MergeMode::NoDegrade))
        .await
        .unwrap();

    assert_eq!(response.summary.total_hosts, 2);
    assert_eq!(response.summary.hosts_with_ports, 1);
    assert_eq!(response.summary.authenticated, 1);
    assert_eq!(response.summary.persisted, 1);

    let device = &response.hosts[0];
    assert_eq!(device.ip, Ipv4Addr::new(127, 0, 0, 1));
    assert_eq!(device.status, HostStatus::Authenticated);
    assert_eq!(device.protocol.as_deref(), Some("HikvisionIsapi"));
    assert_eq!(device.manufacturer.as_deref(), Some("Hikvision"));
    assert_eq!(device.model.as_deref(), Some("DS-2CD2143G0-I"));
    assert_eq!(device.firmware.as_deref(), Some("V5.6.3 (build 190923)"));
    assert_eq!(device.credential_id, Some(ids[1]));
    assert_eq!(device.credential_username.as_deref(), Some("admin"));
    assert_eq!(device.category.as_deref(), Some("Camera"));

    assert_eq!(response.hosts[1].ip, Ipv4Addr::new(127, 0, 0, 2));
    assert_eq!(response.hosts[1].status, HostStatus::NoPorts);

    let assets = AssetRepository::new(pool.clone());
    let stored = assets
        .find(installation.id, "127.0.0.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status.as_deref(), Some("Authenticated"));
    assert_eq!(stored.serial_number.as_deref(), Some("DS-2CD2143G0-I20190101AAWRC12345678"));
    assert_eq!(stored.preferred_credential_id, Some(ids[1]));
    assert_eq!(stored.open_ports(), vec![port]);
    assert_eq!(stored.web_port, Some(i64::from(port)));

    // NoPorts hosts never reach the store
    assert!(assets.find(installation.id, "127.0.0.2").await.unwrap().is_none());
    assert_eq!(scan.list_assets(SITE).await.unwrap().len(), 1);
    assert!(scan.running_scans().is_empty());
}

#[tokio::test]
async fn test_rescan_without_auth_keeps_best_data() {
    let pool = memory_pool().await;
    let (installation, _) = seed_installation(&pool, SITE, &[("admin", "hunter2", 1)]).await;
    let server = hikvision_device().await;
    let port = server.address().port();
    let scan = service(&pool, port).await;

    scan.run_scan(loopback_request(port, MergeMode::NoDegrade))
        .await
        .unwrap();
    let first = AssetRepository::new(pool.clone())
        .find(installation.id, "127.0.0.1")
        .await
        .unwrap()
        .unwrap();

    // Device now refuses everyone
    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let response = scan
        .run_scan(loopback_request(port, MergeMode::NoDegrade))
        .await
        .unwrap();
    assert_eq!(response.hosts[0].status, HostStatus::Found);

    let second = AssetRepository::new(pool.clone())
        .find(installation.id, "127.0.0.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.status.as_deref(), Some("Authenticated"));
    assert_eq!(second.model, first.model);
    assert_eq!(second.firmware, first.firmware);
    assert_eq!(second.manufacturer, first.manufacturer);
    assert_eq!(second.category, "Camera");
    assert_eq!(second.preferred_credential_id, first.preferred_credential_id);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.last_seen_at >= first.last_seen_at);
}

#[tokio::test]
async fn test_last_wins_overwrites_with_weaker_finding() {
    let pool = memory_pool().await;
    let (installation, _) = seed_installation(&pool, SITE, &[("admin", "hunter2", 1)]).await;
    let server = hikvision_device().await;
    let port = server.address().port();
    let scan = service(&pool, port).await;

    scan.run_scan(loopback_request(port, MergeMode::LastWins))
        .await
        .unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    scan.run_scan(loopback_request(port, MergeMode::LastWins))
        .await
        .unwrap();

    let stored = AssetRepository::new(pool.clone())
        .find(installation.id, "127.0.0.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status.as_deref(), Some("Found"));
    assert_eq!(stored.model, None);
    // "Unknown" category is still written; only blank categories are skipped
    assert_eq!(stored.category, "Unknown");
}

#[tokio::test]
async fn test_request_validation_happens_before_network() {
    let pool = memory_pool().await;
    seed_installation(&pool, SITE, &[]).await;
    let scan = service(&pool, 80).await;

    let mut request = ScanRequest::new(SITE, "10.0.0.0/33");
    assert!(matches!(scan.run_scan(request.clone()).await, Err(Error::Validation(_))));

    request.network_cidr = "10.0.0.0/8".to_string();
    assert!(matches!(scan.run_scan(request.clone()).await, Err(Error::Validation(_))));

    request.network_cidr = "10.0.0.0/15".to_string();
    assert!(matches!(scan.run_scan(request.clone()).await, Err(Error::Validation(_))));

    request.network_cidr = "10.0.0.0/24".to_string();
    request.ports = Some(vec![80, 65536]);
    assert!(matches!(scan.run_scan(request.clone()).await, Err(Error::Validation(_))));

    request.ports = None;
    request.connect_timeout_ms = Some(0);
    assert!(matches!(scan.run_scan(request.clone()).await, Err(Error::Validation(_))));

    let blank = ScanRequest::new("  ", "10.0.0.0/24");
    assert!(matches!(scan.run_scan(blank).await, Err(Error::Validation(_))));

    let unknown = ScanRequest::new("NOPE", "10.0.0.0/24");
    assert!(matches!(scan.run_scan(unknown).await, Err(Error::NotFound(_))));
    assert!(matches!(scan.list_assets("NOPE").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_duplicate_installation_is_conflict() {
    let pool = memory_pool().await;
    seed_installation(&pool, SITE, &[]).await;

    let result = InstallationRepository::new(pool.clone())
        .create(SITE, None)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_abort_cancels_running_scan() {
    let pool = memory_pool().await;
    seed_installation(&pool, SITE, &[("admin", "hunter2", 1)]).await;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;
    let port = server.address().port();

    let mut config = probe_config(port, closed_port().await);
    config.hikvision_timeout = Duration::from_secs(60);
    let scan = Arc::new(IpcamScan::new(pool.clone(), Arc::new(PlaintextProtector), config));

    let runner = scan.clone();
    let handle = tokio::spawn(async move {
        runner
            .run_scan(loopback_request(port, MergeMode::NoDegrade))
            .await
    });

    let scan_id = loop {
        if let Some(id) = scan.running_scans().first().copied() {
            break id;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    // Let identification reach the stalled request
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(scan.abort_scan(&scan_id));

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(scan.running_scans().is_empty());
    assert!(!scan.abort_scan(&scan_id));
}
