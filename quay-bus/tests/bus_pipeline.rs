//! Pipeline behavior that does not need a live database.

use std::sync::Arc;
use std::time::Duration;

use sqlx::mysql::MySqlConnectOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use quay_bus::{handle_connection, BusState};
use quay_core::db::{MySqlDriver, Pool, PoolConfig};

/// A pool pointed at a port nothing listens on: every dial fails.
fn unreachable_pool() -> Arc<Pool<MySqlDriver>> {
    let options = MySqlConnectOptions::new()
        .host("127.0.0.1")
        .port(9) // discard port, nothing listens
        .username("nobody")
        .password("nothing")
        .database("missing");
    Arc::new(Pool::new(MySqlDriver::new(options), PoolConfig::default()))
}

async fn serve_one_connection(state: Arc<BusState>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        handle_connection(stream, state).await;
    });
    addr
}

#[tokio::test]
async fn pool_exhaustion_yields_internal_error_body() {
    let state = Arc::new(BusState {
        pool: unreachable_pool(),
        keepalive: false,
    });
    let addr = serve_one_connection(state).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /?username=u&passwd=p&intername=i HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/html;charset=utf-8"));
    assert!(response.contains("<retcode>-1</retcode><message>internal error</message>"));
}

#[tokio::test]
async fn non_get_input_is_closed_without_a_response() {
    let state = Arc::new(BusState {
        pool: unreachable_pool(),
        keepalive: false,
    });
    let addr = serve_one_connection(state).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"DELETE / HTTP/1.1\r\n\r\n").await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn silent_client_is_dropped_on_read_timeout() {
    let state = Arc::new(BusState {
        pool: unreachable_pool(),
        keepalive: false,
    });
    let addr = serve_one_connection(state).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    // Say nothing; the 3-second request deadline must close us.
    let mut response = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(6), client.read_to_end(&mut response)).await;
    assert!(read.is_ok(), "server should close the silent connection");
    assert!(response.is_empty());
}
