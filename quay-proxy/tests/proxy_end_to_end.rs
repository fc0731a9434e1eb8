//! Relay + dialer end-to-end over localhost.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use quay_core::heartbeat::Heartbeat;
use quay_proxy::{Dialer, Relay, Route};

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

/// A client connects through the relay, its bytes arrive at the inner
/// destination verbatim, and closing the client clears both halves of the
/// pair maps on both sides.
#[tokio::test]
async fn bytes_cross_the_zones_and_pairs_clean_up() {
    // Inner destination: swallow everything, report the byte count.
    let dst_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dst_addr = dst_listener.local_addr().unwrap();
    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_sink = received.clone();
    tokio::spawn(async move {
        let (mut stream, _) = dst_listener.accept().await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        *received_sink.lock().unwrap() = buf;
    });

    // Relay with one route toward the inner destination.
    let cmd_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cmd_addr = cmd_listener.local_addr().unwrap();
    let route_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let route_addr = route_listener.local_addr().unwrap();
    let route = Route {
        listen_port: route_addr.port(),
        dst_ip: dst_addr.ip().to_string(),
        dst_port: dst_addr.port(),
    };

    let cancel = CancellationToken::new();
    let relay = std::sync::Arc::new(Relay::new());
    let relay_pairs = relay.pairs();
    {
        let relay = relay.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = relay
                .run(cmd_listener, vec![(route_listener, route)], &Heartbeat::disabled(), cancel)
                .await;
        });
    }

    // Dialer pre-dials the control channel.
    let dialer = std::sync::Arc::new(Dialer::new(cmd_addr));
    let dialer_pairs = dialer.pairs();
    {
        let dialer = dialer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = dialer.run(&Heartbeat::disabled(), cancel).await;
        });
    }

    // Give the control channel a moment to come up.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // External client pushes 64 KiB through the relay.
    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 249) as u8).collect();
    let mut client = TcpStream::connect(route_addr).await.unwrap();
    client.write_all(&payload).await.unwrap();
    client.shutdown().await.unwrap();

    wait_until("payload to arrive at the destination", || {
        received.lock().unwrap().len() == payload.len()
    })
    .await;
    assert_eq!(*received.lock().unwrap(), payload);

    drop(client);
    wait_until("pair maps to clear", || {
        relay_pairs.is_empty() && dialer_pairs.is_empty()
    })
    .await;
}

/// A destination the dialer cannot reach costs only the external client
/// its connection; the control channel survives and a later, reachable
/// route still works.
#[tokio::test]
async fn unreachable_destination_leaves_control_channel_up() {
    // A destination that is immediately closed: bind, take the port, drop.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let live_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_addr = live_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = live_listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(&buf).await.unwrap();
    });

    let cmd_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cmd_addr = cmd_listener.local_addr().unwrap();
    let dead_route_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_route_addr = dead_route_listener.local_addr().unwrap();
    let live_route_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_route_addr = live_route_listener.local_addr().unwrap();

    let routes = vec![
        (
            dead_route_listener,
            Route {
                listen_port: dead_route_addr.port(),
                dst_ip: dead_addr.ip().to_string(),
                dst_port: dead_addr.port(),
            },
        ),
        (
            live_route_listener,
            Route {
                listen_port: live_route_addr.port(),
                dst_ip: live_addr.ip().to_string(),
                dst_port: live_addr.port(),
            },
        ),
    ];

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let relay = Relay::new();
            let _ = relay
                .run(cmd_listener, routes, &Heartbeat::disabled(), cancel)
                .await;
        });
    }
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let dialer = Dialer::new(cmd_addr);
            let _ = dialer.run(&Heartbeat::disabled(), cancel).await;
        });
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The doomed connection just dies.
    let mut doomed = TcpStream::connect(dead_route_addr).await.unwrap();
    let mut scratch = [0u8; 1];
    let _ = tokio::time::timeout(Duration::from_secs(5), doomed.read(&mut scratch)).await;

    // The live route still round-trips.
    let mut ok = TcpStream::connect(live_route_addr).await.unwrap();
    ok.write_all(b"hello").await.unwrap();
    let mut echo = [0u8; 5];
    tokio::time::timeout(Duration::from_secs(5), ok.read_exact(&mut echo))
        .await
        .expect("live route should answer")
        .unwrap();
    assert_eq!(&echo, b"hello");

    cancel.cancel();
}
