use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use super::{
    cidr_host_range, discover_hosts, expand_cidr, parse_ssdp_response, parse_xaddrs, scan_ports,
    DiscoveryOptions, SsdpListener, WsDiscoveryListener,
};
use crate::error::Error;
use crate::ipcam_scan::types::HostStatus;

#[test]
fn test_expand_cidr_24() {
    let hosts = expand_cidr("192.168.1.0/24").unwrap();
    assert_eq!(hosts.len(), 254);
    assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
    assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
}

#[test]
fn test_expand_cidr_31_and_32() {
    assert_eq!(
        expand_cidr("10.0.0.0/31").unwrap(),
        vec![Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 1)]
    );
    assert_eq!(expand_cidr("10.0.0.7/32").unwrap(), vec![Ipv4Addr::new(10, 0, 0, 7)]);
}

#[test]
fn test_expand_cidr_non_aligned_base() {
    let hosts = expand_cidr("192.168.1.77/30").unwrap();
    assert_eq!(hosts, vec![Ipv4Addr::new(192, 168, 1, 77), Ipv4Addr::new(192, 168, 1, 78)]);
}

#[test]
fn test_cidr_excludes_network_and_broadcast() {
    for prefix in 0..=30u32 {
        let range = cidr_host_range(&format!("172.16.5.9/{}", prefix)).unwrap();
        let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        let network = u32::from(Ipv4Addr::new(172, 16, 5, 9)) & mask;
        let broadcast = network | !mask;
        assert_eq!(*range.start(), network + 1, "prefix {}", prefix);
        assert_eq!(*range.end(), broadcast - 1, "prefix {}", prefix);
    }
}

#[test]
fn test_expand_cidr_invalid() {
    for bad in ["192.168.1.0", "192.168.1.0/33", "192.168.1/24", "::1/64", "a.b.c.d/8", "1.2.3.4/24/1", "10.0.0.0/-1"] {
        assert!(
            matches!(expand_cidr(bad), Err(Error::Validation(_))),
            "{} should be rejected",
            bad
        );
    }
}

/// A port with nothing listening on loopback
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_scan_ports_sorted_unique() {
    let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let pa = a.local_addr().unwrap().port();
    let pb = b.local_addr().unwrap().port();
    let closed = closed_port().await;

    let open = scan_ports(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        &[pb, closed, pa, pb, pa],
        Duration::from_millis(500),
        2,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let mut expected = vec![pa, pb];
    expected.sort_unstable();
    assert_eq!(open, expected);
}

#[tokio::test]
async fn test_scan_ports_unreachable_is_closed() {
    // TEST-NET-1 is never routed; connect either times out or fails fast
    let open = scan_ports(
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        &[80, 443],
        Duration::from_millis(50),
        20,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(open.is_empty());
}

#[tokio::test]
async fn test_scan_ports_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = scan_ports(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        &[1, 2, 3],
        Duration::from_millis(200),
        1,
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn test_parse_ssdp_response() {
    let text = "HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1800\r\n\
                Location: http://192.168.1.64:49152/rootDesc.xml\r\n\
                server: Linux/3.10 UPnP/1.0 IPC/1.0\r\n\
                ST: upnp:rootdevice\r\nUSN: uuid:abcd::upnp:rootdevice\r\n\r\n";
    let info = parse_ssdp_response(text);
    assert_eq!(info.location.as_deref(), Some("http://192.168.1.64:49152/rootDesc.xml"));
    assert_eq!(info.server.as_deref(), Some("Linux/3.10 UPnP/1.0 IPC/1.0"));
    assert_eq!(info.st.as_deref(), Some("upnp:rootdevice"));
    assert_eq!(info.usn.as_deref(), Some("uuid:abcd::upnp:rootdevice"));
}

#[test]
fn test_parse_xaddrs() {
    let payload = r#"<?xml version="1.0"?><SOAP-ENV:Envelope><SOAP-ENV:Body><d:ProbeMatches><d:ProbeMatch>
<d:XAddrs>http://192.168.1.64/onvif/device_service http://[fe80::1]/onvif/device_service</d:XAddrs>
</d:ProbeMatch></d:ProbeMatches></SOAP-ENV:Body></SOAP-ENV:Envelope>"#;
    assert_eq!(
        parse_xaddrs(payload),
        vec![
            "http://192.168.1.64/onvif/device_service",
            "http://[fe80::1]/onvif/device_service"
        ]
    );
    assert!(parse_xaddrs("garbage \u{0}\u{1}").is_empty());
}

/// Reply to the first datagram with each of `replies`
async fn udp_responder(replies: Vec<String>) -> SocketAddr {
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

#[tokio::test]
async fn test_ssdp_listener_last_response_wins() {
    let target = udp_responder(vec![
        "HTTP/1.1 200 OK\r\nSERVER: first\r\n\r\n".to_string(),
        "HTTP/1.1 200 OK\r\nSERVER: second\r\nST: ssdp:all\r\n\r\n".to_string(),
    ])
    .await;

    let found = SsdpListener::new(Duration::from_millis(300))
        .with_target(target)
        .discover(&CancellationToken::new())
        .await
        .unwrap();

    let info = found.get(&Ipv4Addr::LOCALHOST).unwrap();
    assert_eq!(info.server.as_deref(), Some("second"));
    assert_eq!(info.st.as_deref(), Some("ssdp:all"));
}

#[tokio::test]
async fn test_ws_discovery_listener_dedups_and_ignores_noise() {
    let matchxml = |addr: &str| {
        format!(
            "<e:Envelope><e:Body><d:ProbeMatches><d:ProbeMatch><d:XAddrs>{}</d:XAddrs></d:ProbeMatch></d:ProbeMatches></e:Body></e:Envelope>",
            addr
        )
    };
    let target = udp_responder(vec![
        "not xml at all".to_string(),
        matchxml("http://127.0.0.1/onvif/device_service"),
        matchxml("HTTP://127.0.0.1/onvif/device_service http://127.0.0.1:8080/onvif/device_service"),
    ])
    .await;

    let found = WsDiscoveryListener::new(Duration::from_millis(300))
        .with_target(target)
        .discover(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        found.get(&Ipv4Addr::LOCALHOST).unwrap(),
        &vec![
            "http://127.0.0.1/onvif/device_service".to_string(),
            "http://127.0.0.1:8080/onvif/device_service".to_string()
        ]
    );
}

#[tokio::test]
async fn test_listener_observes_cancellation() {
    let cancel = CancellationToken::new();
    let listener = SsdpListener::new(Duration::from_secs(30))
        .with_target("127.0.0.1:9".parse().unwrap());

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let result = listener.discover(&cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_discover_hosts_statuses_and_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let ssdp_target = udp_responder(vec!["HTTP/1.1 200 OK\r\nSERVER: upnp-cam\r\n\r\n".to_string()]).await;

    // 127.0.0.2 only answers if something binds it; nothing does here
    let hosts = vec![
        Ipv4Addr::new(127, 0, 0, 2),
        Ipv4Addr::new(127, 0, 0, 1),
    ];
    let options = DiscoveryOptions {
        ports: vec![port],
        connect_timeout: Duration::from_millis(300),
        max_concurrency: 0,
        ssdp: Some(SsdpListener::new(Duration::from_millis(200)).with_target(ssdp_target)),
    };

    let results = discover_hosts(&hosts, &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].ip, Ipv4Addr::new(127, 0, 0, 1));
    assert_eq!(results[0].status, HostStatus::Found);
    assert_eq!(results[0].open_ports, vec![port]);
    // SSDP came from 127.0.0.1, which already has ports
    assert!(results[0].ssdp.is_some());
    assert_eq!(results[1].status, HostStatus::NoPorts);
}

#[tokio::test]
async fn test_discover_hosts_ssdp_only() {
    let ssdp_target = udp_responder(vec!["HTTP/1.1 200 OK\r\nSERVER: upnp-cam\r\n\r\n".to_string()]).await;
    let closed = closed_port().await;

    let options = DiscoveryOptions {
        ports: vec![closed],
        connect_timeout: Duration::from_millis(200),
        max_concurrency: 4,
        ssdp: Some(SsdpListener::new(Duration::from_millis(200)).with_target(ssdp_target)),
    };

    let results = discover_hosts(&[Ipv4Addr::LOCALHOST], &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results[0].status, HostStatus::SsdpOnly);
    assert_eq!(
        results[0].ssdp.as_ref().and_then(|s| s.server.as_deref()),
        Some("upnp-cam")
    );
}
