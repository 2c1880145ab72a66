
use std::sync::atomic::Ordering;
use std::time::Duration;

use harness::{client_hello, read_until_closed, ProxyHandle, Socks5Server, TcpEchoBackend};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn roundtrip(proxy: &ProxyHandle, sni: &str, payload: &[u8]) -> Vec<u8> {
    let mut sent = client_hello(Some(sni));
    sent.extend_from_slice(payload);

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    client.write_all(&sent).await.unwrap();

    let mut echoed = vec![0u8; sent.len()];
    timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
        .await
        .expect("echo should arrive through the tunnel")
        .unwrap();
    assert_eq!(echoed, sent);
    sent
}

#[tokio::test]
async fn passthrough_route_tunnels_to_sni_host_port_443() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let socks = Socks5Server::spawn(backend.addr).await.unwrap();
    let routes = vec![format!("secure.test@{}", socks.addr)];
    let proxy = ProxyHandle::spawn(&routes).await.unwrap();

    let sent = roundtrip(&proxy, "secure.test", b"hello through socks").await;

    assert_eq!(socks.requests().await, ["secure.test:443"]);
    assert_eq!(backend.received().await, sent);
}

#[tokio::test]
async fn routed_route_tunnels_to_configured_target() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let socks = Socks5Server::spawn(backend.addr).await.unwrap();
    let routes = vec![format!("app.test=backend.internal:8443@{}", socks.addr)];
    let proxy = ProxyHandle::spawn(&routes).await.unwrap();

    roundtrip(&proxy, "app.test", b"").await;

    assert_eq!(socks.requests().await, ["backend.internal:8443"]);
    assert_eq!(backend.connection_count(), 1);
}

#[tokio::test]
async fn ip_target_is_requested_as_address() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let socks = Socks5Server::spawn(backend.addr).await.unwrap();
    let routes = vec![format!("ip.test=10.0.0.5:8443@{}", socks.addr)];
    let proxy = ProxyHandle::spawn(&routes).await.unwrap();

    roundtrip(&proxy, "ip.test", b"payload").await;

    assert_eq!(socks.requests().await, ["10.0.0.5:8443"]);
}

#[tokio::test]
async fn routes_without_proxy_bypass_socks() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let socks = Socks5Server::spawn(backend.addr).await.unwrap();
    let routes = vec![
        format!("direct.test={}", backend.addr),
        format!("tunneled.test=backend.internal:8443@{}", socks.addr),
    ];
    let proxy = ProxyHandle::spawn(&routes).await.unwrap();

    roundtrip(&proxy, "direct.test", b"direct").await;
    assert!(socks.requests().await.is_empty());

    roundtrip(&proxy, "tunneled.test", b"tunneled").await;
    assert_eq!(socks.requests().await, ["backend.internal:8443"]);
    assert_eq!(backend.connection_count(), 2);
}

#[tokio::test]
async fn unreachable_proxy_closes_client() {
    let temp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_proxy = temp_listener.local_addr().unwrap();
    drop(temp_listener);

    let routes = vec![format!("secure.test@{}", dead_proxy)];
    let proxy = ProxyHandle::spawn_with(&routes, |config| {
        config.dial_timeout = Duration::from_secs(2);
    })
    .await
    .unwrap();

    let mut client = TcpStream::connect(proxy.listen_addr).await.unwrap();
    client
        .write_all(&client_hello(Some("secure.test")))
        .await
        .unwrap();

    let response = read_until_closed(&mut client, Duration::from_secs(3))
        .await
        .expect("connection should close when the proxy is unreachable");
    assert!(response.is_empty());

    assert!(proxy.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(proxy.stats().backend_failed.load(Ordering::Relaxed), 1);
}
