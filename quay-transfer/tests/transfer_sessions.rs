//! End-to-end transfer sessions over localhost TCP.

use std::path::Path;
use std::time::Duration;

use chrono::{Local, TimeZone};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use quay_core::heartbeat::Heartbeat;
use quay_proto::{
    is_activetest, FileAck, FileAnnounce, FramedStream, LoginRequest, PostTransferPolicy,
    RecvTimeout, SessionKind, ACTIVETEST_REPLY,
};
use quay_transfer::{run_pull_client, run_push_client, ClientConfig, ServerConfig, TransferServer};

const TEST_MTIME: (i32, u32, u32, u32, u32, u32) = (2024, 1, 2, 3, 4, 5);

fn test_mtime_epoch() -> i64 {
    let (y, mo, d, h, mi, s) = TEST_MTIME;
    Local
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .single()
        .expect("valid test mtime")
        .timestamp()
}

fn write_with_mtime(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(test_mtime_epoch(), 0))
        .unwrap();
}

fn file_mtime_epoch(path: &Path) -> i64 {
    let modified = std::fs::metadata(path).unwrap().modified().unwrap();
    filetime::FileTime::from_system_time(modified).unix_seconds()
}

async fn start_server() -> (std::net::SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        let server = TransferServer::new(ServerConfig {
            port: addr.port(),
            hb_sock: None,
        });
        let _ = server.run(listener, server_cancel).await;
    });
    (addr, cancel)
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

fn client_config(
    addr: std::net::SocketAddr,
    kind: SessionKind,
    policy: PostTransferPolicy,
    client_path: &Path,
    srv_path: &Path,
) -> ClientConfig {
    ClientConfig {
        server_ip: addr.ip().to_string(),
        server_port: addr.port(),
        kind,
        policy,
        client_path: client_path.to_string_lossy().into_owned(),
        client_path_bak: None,
        srv_path: srv_path.to_string_lossy().into_owned(),
        srv_path_bak: None,
        and_child: true,
        match_name: "*".into(),
        timetvl: 1,
        timeout: 50,
        pname: "test_session".into(),
        hb_sock: None,
    }
}

/// Push one 12345-byte file; bytes and mtime survive, the outbox empties,
/// and no `.tmp` sibling is left behind.
#[tokio::test]
async fn push_one_file_preserves_bytes_and_mtime() {
    let outbox = tempfile::tempdir().unwrap();
    let inbox = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..12345u32).map(|i| (i % 251) as u8).collect();
    write_with_mtime(&outbox.path().join("x.dat"), &payload);

    let (addr, cancel) = start_server().await;
    let mut config = client_config(
        addr,
        SessionKind::Push,
        PostTransferPolicy::Delete,
        outbox.path(),
        inbox.path(),
    );
    config.match_name = "*.dat".into();

    let client = tokio::spawn(async move {
        let _ = run_push_client(&config, &Heartbeat::disabled()).await;
    });

    let dst = inbox.path().join("x.dat");
    let outbox_src = outbox.path().join("x.dat");
    wait_until("push to complete", || {
        dst.is_file() && !outbox_src.exists()
    })
    .await;

    assert_eq!(std::fs::read(&dst).unwrap(), payload);
    assert_eq!(file_mtime_epoch(&dst), test_mtime_epoch());
    assert!(
        !inbox.path().join("x.dat.tmp").exists(),
        "no .tmp sibling may remain"
    );

    client.abort();
    cancel.cancel();
}

/// Pull with the move-to-backup policy: the client lands both files, the
/// server inbox empties, and the backup root mirrors the files.
#[tokio::test]
async fn pull_with_backup_policy() {
    let srv_in = tempfile::tempdir().unwrap();
    let srv_bak = tempfile::tempdir().unwrap();
    let client_in = tempfile::tempdir().unwrap();
    write_with_mtime(&srv_in.path().join("a.xml"), b"<a/>");
    write_with_mtime(&srv_in.path().join("b.xml"), b"<b/>");

    let (addr, cancel) = start_server().await;
    let mut config = client_config(
        addr,
        SessionKind::Pull,
        PostTransferPolicy::MoveToBackup,
        client_in.path(),
        srv_in.path(),
    );
    config.srv_path_bak = Some(srv_bak.path().to_string_lossy().into_owned());
    config.match_name = "*.xml".into();

    let client = tokio::spawn(async move {
        let _ = run_pull_client(&config, &Heartbeat::disabled()).await;
    });

    wait_until("pull to complete", || {
        client_in.path().join("a.xml").is_file()
            && client_in.path().join("b.xml").is_file()
            && srv_bak.path().join("a.xml").is_file()
            && srv_bak.path().join("b.xml").is_file()
    })
    .await;

    assert_eq!(std::fs::read(client_in.path().join("a.xml")).unwrap(), b"<a/>");
    assert!(!srv_in.path().join("a.xml").exists());
    assert!(!srv_in.path().join("b.xml").exists());

    client.abort();
    cancel.cancel();
}

/// An idle pull session exchanges heartbeats instead of closing.
#[tokio::test]
async fn idle_pull_session_heartbeats() {
    let srv_in = tempfile::tempdir().unwrap();
    let (addr, cancel) = start_server().await;

    // Hand-rolled puller so the heartbeats are observable.
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = FramedStream::new(stream);
    let login = LoginRequest {
        kind: SessionKind::Pull,
        policy: PostTransferPolicy::Delete,
        client_path: "/tmp/client".into(),
        client_path_bak: None,
        srv_path: srv_in.path().to_string_lossy().into_owned(),
        srv_path_bak: None,
        and_child: false,
        match_name: "*".into(),
        timetvl: 1,
        timeout: 50,
        pname: "idle_pull".into(),
    };
    framed.send_str(&login.encode()).await.unwrap();
    assert_eq!(framed.recv_str(RecvTimeout::Secs(5)).await.unwrap(), "ok");

    let mut heartbeats = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline && heartbeats < 2 {
        match framed.recv_str(RecvTimeout::Secs(3)).await {
            Ok(payload) if is_activetest(&payload) => {
                heartbeats += 1;
                framed.send_str(ACTIVETEST_REPLY).await.unwrap();
            }
            Ok(other) => panic!("unexpected message on idle session: {other:?}"),
            Err(e) => panic!("idle session broke: {e}"),
        }
    }
    assert!(heartbeats >= 2, "expected at least one heartbeat per cycle");

    cancel.cancel();
}

/// A local landing failure fails that file's ack but leaves the protocol
/// in sync: the session keeps serving.
#[tokio::test]
async fn failed_landing_acks_failed_and_session_survives() {
    let inbox = tempfile::tempdir().unwrap();
    // Occupy the target directory name with a plain file so the landing
    // side cannot create parents.
    std::fs::write(inbox.path().join("blocked"), b"not a dir").unwrap();

    let (addr, cancel) = start_server().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = FramedStream::new(stream);
    let login = LoginRequest {
        kind: SessionKind::Push,
        policy: PostTransferPolicy::Delete,
        client_path: "/tmp/out".into(),
        client_path_bak: None,
        srv_path: inbox.path().to_string_lossy().into_owned(),
        srv_path_bak: None,
        and_child: true,
        match_name: "*".into(),
        timetvl: 5,
        timeout: 50,
        pname: "bad_push".into(),
    };
    framed.send_str(&login.encode()).await.unwrap();
    assert_eq!(framed.recv_str(RecvTimeout::Secs(5)).await.unwrap(), "ok");

    // Announce a file whose target parent is the plain file above.
    let announce = FileAnnounce {
        filename: "/tmp/out/blocked/deep.dat".into(),
        mtime: Local::now().naive_local(),
        size: 4,
    };
    framed.send_str(&announce.encode()).await.unwrap();
    use tokio::io::AsyncWriteExt;
    framed.get_mut().write_all(b"data").await.unwrap();
    framed.get_mut().flush().await.unwrap();

    let ack = FileAck::decode(&framed.recv_str(RecvTimeout::Secs(5)).await.unwrap()).unwrap();
    assert!(!ack.ok);
    assert_eq!(ack.filename, "/tmp/out/blocked/deep.dat");

    // The body was fully consumed: a heartbeat still works.
    framed.heartbeat(5).await.unwrap();

    cancel.cancel();
}
