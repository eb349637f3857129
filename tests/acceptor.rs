//! Connection acceptor queueing, backpressure and shutdown

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use peer_link::config::AcceptorConfig;
use peer_link::{Acceptor, ChannelState, ProtocolError};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

const WATCHDOG: Duration = Duration::from_secs(4);

async fn bind(limit: usize) -> Acceptor {
    let config = AcceptorConfig {
        address: "127.0.0.1:0".to_string(),
        backpressure_limit: limit,
        pending_wait: Duration::from_millis(500),
    };
    Acceptor::bind(&config).await.unwrap()
}

/// Wait until the acceptor holds `count` connections
async fn wait_for_count(acceptor: &Acceptor, count: usize) {
    timeout(WATCHDOG, async {
        while acceptor.pending_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connections were not queued in time");
}

#[tokio::test]
async fn test_connections_are_claimed_in_arrival_order() {
    let acceptor = bind(8).await;
    let mut clients = Vec::new();
    for i in 0..3 {
        clients.push(TcpStream::connect(acceptor.local_addr()).await.unwrap());
        wait_for_count(&acceptor, i + 1).await;
    }

    for client in &clients {
        let connection = acceptor.take_pending().unwrap();
        assert_eq!(connection.peer_addr(), client.local_addr().unwrap());
        assert_eq!(connection.state(), ChannelState::Idle);
        assert!(!connection.is_encrypted());
    }
    assert!(!acceptor.has_pending());
    assert!(matches!(
        acceptor.take_pending(),
        Err(ProtocolError::NoPendingConnection)
    ));
}

#[tokio::test]
async fn test_wait_pending_times_out() {
    let acceptor = bind(8).await;
    let result = acceptor.wait_pending(Duration::from_millis(50)).await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
    assert!(matches!(
        acceptor.next_pending().await,
        Err(ProtocolError::Timeout)
    ));
}

#[tokio::test]
async fn test_wait_pending_wakes_on_enqueue() {
    let acceptor = bind(8).await;
    let addr = acceptor.local_addr();

    let connector = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        TcpStream::connect(addr).await.unwrap()
    });

    acceptor.wait_pending(WATCHDOG).await.unwrap();
    let _client = connector.await.unwrap();
    assert!(acceptor.take_pending().is_ok());
}

#[tokio::test]
async fn test_backpressure_limit_drops_excess() {
    let acceptor = bind(2).await;
    let _first = TcpStream::connect(acceptor.local_addr()).await.unwrap();
    wait_for_count(&acceptor, 1).await;
    let _second = TcpStream::connect(acceptor.local_addr()).await.unwrap();
    wait_for_count(&acceptor, 2).await;

    let mut third = TcpStream::connect(acceptor.local_addr()).await.unwrap();
    let mut buf = [0u8; 1];
    let read = timeout(WATCHDOG, third.read(&mut buf)).await.unwrap();
    // Dropped by the acceptor: either a clean EOF or a reset
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(acceptor.pending_count(), 2);
}

#[tokio::test]
async fn test_shutdown_keeps_queued_connections() {
    let mut acceptor = bind(8).await;
    let addr = acceptor.local_addr();
    let _client = TcpStream::connect(addr).await.unwrap();
    wait_for_count(&acceptor, 1).await;

    acceptor.shutdown().await;
    assert!(TcpStream::connect(addr).await.is_err());

    let connection = acceptor.take_pending().unwrap();
    assert!(connection.is_open());

    // A second shutdown is a no-op
    acceptor.shutdown().await;
}
