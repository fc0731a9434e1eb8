//! The two session loops shared by client and server.
//!
//! A session has exactly one moving side. [`run_sender`] scans a root every
//! `timetvl` seconds, announces and streams each match, drains acks, and
//! applies the post-transfer policy; [`run_receiver`] answers heartbeats and
//! lands announced files. Announces and acks are strictly FIFO, but the
//! sender may run ahead: acks are drained opportunistically between files
//! and with a 10-second deadline after the scan.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, TimeZone};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use quay_core::heartbeat::Heartbeat;
use quay_proto::{
    is_activetest, FileAck, FileAnnounce, FramedStream, PostTransferPolicy, ProtoError,
    RecvTimeout, ACTIVETEST_REPLY,
};

use crate::error::{Result, TransferError};
use crate::walker::{scan, FileEntry, MatchRules};

/// Reply window for idle-cycle heartbeats.
const HEARTBEAT_REPLY_SECS: u64 = 20;

/// Deadline for the post-scan ack drain.
const ACK_DRAIN_SECS: u64 = 10;

/// Chunk size for raw file bodies.
const BODY_CHUNK: usize = 8 * 1024;

/// What a sending loop needs to know.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Root the scan walks; announced filenames live under it.
    pub root: PathBuf,
    /// Backup root for [`PostTransferPolicy::MoveToBackup`].
    pub backup_root: Option<PathBuf>,
    pub policy: PostTransferPolicy,
    pub rules: MatchRules,
    pub recursive: bool,
    pub timetvl: u64,
}

/// What a receiving loop needs to know.
#[derive(Debug, Clone)]
pub struct RecvOptions {
    /// Announced filenames start with this prefix…
    pub from_prefix: String,
    /// …and are landed under this one.
    pub to_prefix: String,
    pub timetvl: u64,
}

/// Translate the sender's root prefix into the receiver's.
///
/// Announced names always start with the session's agreed root; a name that
/// does not is left alone and will land wherever it says, which the caller
/// logs.
pub fn translate_prefix(path: &str, from: &str, to: &str) -> String {
    match path.strip_prefix(from) {
        Some(rest) => format!("{to}{rest}"),
        None => path.to_string(),
    }
}

/// Run the moving side of a session until the peer goes away.
pub async fn run_sender<S>(
    framed: &mut FramedStream<S>,
    opts: &SendOptions,
    heartbeat: &Heartbeat,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let moved = send_cycle(framed, opts, heartbeat).await?;
        heartbeat.beat().await;

        if !moved {
            tokio::time::sleep(Duration::from_secs(opts.timetvl)).await;
            framed.heartbeat(HEARTBEAT_REPLY_SECS).await?;
        }
    }
}

/// One scan-and-send pass. Returns whether any file moved.
pub async fn send_cycle<S>(
    framed: &mut FramedStream<S>,
    opts: &SendOptions,
    heartbeat: &Heartbeat,
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let files = scan(&opts.root, &opts.rules, opts.recursive).await?;
    let mut delayed: u32 = 0;
    let mut moved = false;

    for entry in files {
        announce_and_stream(framed, &entry).await?;
        moved = true;
        delayed += 1;
        heartbeat.beat().await;

        // Drain whatever acks have already arrived without stalling the
        // pipeline.
        while delayed > 0 {
            match framed.recv_str(RecvTimeout::PollOnce).await {
                Ok(payload) => {
                    delayed -= 1;
                    handle_ack(&payload, opts).await?;
                }
                Err(ProtoError::Timeout) => break,
                Err(e) => return Err(e.into()),
            }
        }
    }

    // The receiver owes one ack per announce; give the tail a deadline.
    while delayed > 0 {
        match framed.recv_str(RecvTimeout::Secs(ACK_DRAIN_SECS)).await {
            Ok(payload) => {
                delayed -= 1;
                handle_ack(&payload, opts).await?;
            }
            Err(ProtoError::Timeout) => {
                warn!("{delayed} acks still outstanding after drain deadline");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(moved)
}

async fn announce_and_stream<S>(framed: &mut FramedStream<S>, entry: &FileEntry) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let announce = FileAnnounce {
        filename: entry.path.to_string_lossy().into_owned(),
        mtime: entry.mtime,
        size: entry.size,
    };
    framed.send_str(&announce.encode()).await?;

    info!("send {}({})", announce.filename, announce.size);
    send_body(framed.get_mut(), &entry.path, entry.size).await
}

/// Stream exactly `size` bytes of `path` onto the wire.
async fn send_body<S>(stream: &mut S, path: &Path, size: u64) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(path).await?;
    let mut remaining = size;
    let mut buf = vec![0u8; BODY_CHUNK];

    while remaining > 0 {
        let want = remaining.min(BODY_CHUNK as u64) as usize;
        let got = file.read(&mut buf[..want]).await?;
        if got == 0 {
            // The file shrank under us after the announce; the receiver is
            // now owed bytes we cannot produce, so the session is broken.
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} truncated during send", path.display()),
            )));
        }
        stream.write_all(&buf[..got]).await?;
        remaining -= got as u64;
    }
    stream.flush().await?;
    Ok(())
}

async fn handle_ack(payload: &str, opts: &SendOptions) -> Result<()> {
    let ack = FileAck::decode(payload)?;
    if !ack.ok {
        warn!("receiver failed on {}, leaving it in place", ack.filename);
        return Ok(());
    }

    match opts.policy {
        PostTransferPolicy::Delete => {
            if let Err(e) = tokio::fs::remove_file(&ack.filename).await {
                warn!("remove {} failed: {e}", ack.filename);
            }
        }
        PostTransferPolicy::MoveToBackup => {
            let Some(backup_root) = &opts.backup_root else {
                warn!("no backup root configured, leaving {} in place", ack.filename);
                return Ok(());
            };
            let target = translate_prefix(
                &ack.filename,
                &opts.root.to_string_lossy(),
                &backup_root.to_string_lossy(),
            );
            if let Some(parent) = Path::new(&target).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if let Err(e) = tokio::fs::rename(&ack.filename, &target).await {
                warn!("backup {} -> {target} failed: {e}", ack.filename);
            }
        }
    }
    Ok(())
}

/// Run the landing side of a session until the peer goes away.
///
/// A peer close is the normal end of the session; everything else
/// propagates.
pub async fn run_receiver<S>(
    framed: &mut FramedStream<S>,
    opts: &RecvOptions,
    heartbeat: &Heartbeat,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        heartbeat.beat().await;

        let payload = match framed.recv_str(RecvTimeout::Secs(opts.timetvl + 10)).await {
            Ok(payload) => payload,
            Err(ProtoError::PeerClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if is_activetest(&payload) {
            framed.send_str(ACTIVETEST_REPLY).await?;
            continue;
        }

        if !FileAnnounce::is_announce(&payload) {
            warn!("unexpected message on transfer session: {payload:?}");
            continue;
        }

        let announce = FileAnnounce::decode(&payload)?;
        let target = translate_prefix(&announce.filename, &opts.from_prefix, &opts.to_prefix);

        info!("recv {}({})", target, announce.size);
        // Wire errors end the session through `?`; local filesystem errors
        // only fail this file's ack.
        let ok = match receive_file(framed.get_mut(), Path::new(&target), &announce).await? {
            Ok(()) => true,
            Err(e) => {
                warn!("recv {target} failed: {e}");
                false
            }
        };

        let ack = FileAck {
            filename: announce.filename,
            ok,
        };
        framed.send_str(&ack.encode()).await?;
    }
}

/// Land one announced body: stream into a `.tmp` sibling, restore the
/// announced mtime, rename into place.
///
/// Local filesystem trouble must not desynchronize the protocol, so the
/// announced byte count is always consumed from the wire. The outer error
/// is the wire failing (fatal to the session); the inner result says
/// whether the file landed.
async fn receive_file<S>(
    stream: &mut S,
    target: &Path,
    announce: &FileAnnounce,
) -> Result<std::io::Result<()>>
where
    S: AsyncRead + Unpin,
{
    let tmp_path = tmp_sibling(target);

    let mut file = match prepare_tmp(target).await {
        Ok(file) => file,
        Err(open_err) => {
            // Could not even open the temp file: swallow the body so the
            // next frame starts on a message boundary, then report failure.
            discard_body(stream, announce.size).await?;
            return Ok(Err(open_err));
        }
    };

    match copy_body(stream, &mut file, announce.size).await {
        Err(wire) => {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(wire)
        }
        Ok(Err(local)) => {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Ok(Err(local))
        }
        Ok(Ok(())) => {
            drop(file);
            match finalize_file(&tmp_path, target, announce).await {
                Ok(()) => Ok(Ok(())),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    Ok(Err(e))
                }
            }
        }
    }
}

/// Restore the announced mtime and rename the temp into place.
async fn finalize_file(
    tmp_path: &Path,
    target: &Path,
    announce: &FileAnnounce,
) -> std::io::Result<()> {
    set_mtime(tmp_path, announce.mtime).await?;
    tokio::fs::rename(tmp_path, target).await
}

fn tmp_sibling(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn prepare_tmp(target: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::File::create(tmp_sibling(target)).await
}

/// Copy exactly `size` bytes from the wire into the file.
///
/// The outer error is the wire failing (fatal to the session); the inner
/// error is the local write failing (the remaining body is still drained).
async fn copy_body<S>(
    stream: &mut S,
    file: &mut tokio::fs::File,
    size: u64,
) -> Result<std::io::Result<()>>
where
    S: AsyncRead + Unpin,
{
    let mut remaining = size;
    let mut buf = vec![0u8; BODY_CHUNK];
    let mut write_error: Option<std::io::Error> = None;

    while remaining > 0 {
        let want = remaining.min(BODY_CHUNK as u64) as usize;
        stream.read_exact(&mut buf[..want]).await.map_err(|e| {
            TransferError::Proto(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtoError::Malformed("peer closed inside a file body".into())
            } else {
                ProtoError::Io(e)
            })
        })?;
        remaining -= want as u64;

        if write_error.is_none() {
            if let Err(e) = file.write_all(&buf[..want]).await {
                write_error = Some(e);
            }
        }
    }

    if write_error.is_none() {
        if let Err(e) = file.flush().await {
            write_error = Some(e);
        }
    }

    Ok(match write_error {
        None => Ok(()),
        Some(e) => Err(e),
    })
}

async fn discard_body<S>(stream: &mut S, size: u64) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut remaining = size;
    let mut buf = vec![0u8; BODY_CHUNK];
    while remaining > 0 {
        let want = remaining.min(BODY_CHUNK as u64) as usize;
        stream.read_exact(&mut buf[..want]).await?;
        remaining -= want as u64;
    }
    Ok(())
}

async fn set_mtime(path: &Path, mtime: chrono::NaiveDateTime) -> std::io::Result<()> {
    let Some(local) = Local.from_local_datetime(&mtime).earliest() else {
        warn!("unrepresentable mtime on {}, keeping write time", path.display());
        return Ok(());
    };
    let path = path.to_path_buf();
    let stamp = filetime::FileTime::from_unix_time(local.timestamp(), 0);
    tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, stamp))
        .await
        .map_err(std::io::Error::other)?
}
