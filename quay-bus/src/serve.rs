//! The per-connection request pipeline.

use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use quay_core::db::{column_text, driver_error_parts, DbError, MySqlDriver, Pool};

use crate::http::{
    auth_failed_body, internal_error_body, permission_denied_body, row_line, status_line,
    Request, RESPONSE_HEAD,
};
use crate::registry;

/// Request read deadline for one-shot connections.
const READ_SECS: u64 = 3;

/// Request read deadline between requests on a keepalive connection.
const KEEPALIVE_READ_SECS: u64 = 20;

/// Request buffer; the GET line fits comfortably.
const MAX_REQUEST: usize = 1024;

#[derive(Debug)]
pub struct BusState {
    pub pool: Arc<Pool<MySqlDriver>>,
    pub keepalive: bool,
}

/// Whether the connection survives the request it just served.
enum Outcome {
    Keep,
    Close,
}

/// Serve one accepted socket to completion.
pub async fn handle_connection(mut stream: TcpStream, state: Arc<BusState>) {
    if state.keepalive {
        loop {
            match serve_one(&mut stream, &state, KEEPALIVE_READ_SECS).await {
                Outcome::Keep => continue,
                Outcome::Close => break,
            }
        }
    } else {
        let _ = serve_one(&mut stream, &state, READ_SECS).await;
    }
    // Dropping the stream closes it.
}

async fn serve_one(stream: &mut TcpStream, state: &BusState, read_secs: u64) -> Outcome {
    // 1. One request, one read.
    let mut buf = vec![0u8; MAX_REQUEST];
    let read = tokio::time::timeout(Duration::from_secs(read_secs), stream.read(&mut buf)).await;
    let len = match read {
        Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return Outcome::Close,
        Ok(Ok(len)) => len,
    };
    let raw = String::from_utf8_lossy(&buf[..len]);

    // 2. Only GET is served; anything else closes even under keepalive.
    let Some(request) = Request::parse(&raw) else {
        return Outcome::Close;
    };

    // 3. A database handle, or a canned internal error.
    let mut conn = match state.pool.get().await {
        Ok(conn) => conn,
        Err(DbError::Exhausted) => {
            respond(stream, &internal_error_body()).await;
            return Outcome::Close;
        }
        Err(e) => {
            warn!("pool get failed: {e}");
            respond(stream, &internal_error_body()).await;
            return Outcome::Close;
        }
    };

    // 4. Credentials.
    let username = request.get("username");
    match registry::check_login(&mut conn, username, request.get("passwd")).await {
        Ok(true) => {}
        Ok(false) => {
            respond(stream, &auth_failed_body()).await;
            return Outcome::Close;
        }
        Err(e) => {
            warn!("credential check failed: {e}");
            respond(stream, &internal_error_body()).await;
            return Outcome::Close;
        }
    }

    // 5. Authorization for the named interface.
    let intername = request.get("intername");
    match registry::check_permission(&mut conn, username, intername).await {
        Ok(true) => {}
        Ok(false) => {
            respond(stream, &permission_denied_body()).await;
            return Outcome::Close;
        }
        Err(e) => {
            warn!("authorization check failed: {e}");
            respond(stream, &internal_error_body()).await;
            return Outcome::Close;
        }
    }

    // 6. The interface definition. Authorization just saw it enabled, so a
    // miss here is registry inconsistency.
    let def = match registry::load_interface(&mut conn, intername).await {
        Ok(Some(def)) => def,
        Ok(None) => {
            warn!("interface {intername} authorized but not configured");
            respond(stream, &internal_error_body()).await;
            return Outcome::Close;
        }
        Err(e) => {
            warn!("interface load failed: {e}");
            respond(stream, &internal_error_body()).await;
            return Outcome::Close;
        }
    };

    // 7.-11. Execute and stream. The connection drops back to the pool at
    // scope end either way.
    match execute_interface(stream, &mut conn, &request, intername, &def).await {
        Ok(()) => {
            if state.keepalive {
                Outcome::Keep
            } else {
                Outcome::Close
            }
        }
        Err(()) => Outcome::Close,
    }
}

/// Steps 7-11: bind, execute, stream rows. `Err(())` means the socket is
/// no longer usable.
async fn execute_interface(
    stream: &mut TcpStream,
    conn: &mut sqlx::MySqlConnection,
    request: &Request,
    intername: &str,
    def: &registry::InterfaceDef,
) -> Result<(), ()> {
    // Positional binds, in the order the definition names them. A missing
    // query-string parameter binds the empty string.
    let mut query = sqlx::query(&def.select_sql);
    for name in &def.in_params {
        query = query.bind(request.get(name).to_string());
    }

    // Headers go out before the verdict, as the protocol demands: the
    // status line is part of the body.
    write_all(stream, RESPONSE_HEAD.as_bytes()).await?;

    let mut rows = query.fetch(conn);
    let first = rows.try_next().await;

    let mut row_count: u64 = 0;
    match first {
        Err(e) => {
            let (code, message) = driver_error_parts(&e);
            warn!("interface {intername} failed: {message}");
            write_all(stream, status_line(code, &message).as_bytes()).await?;
            return Ok(());
        }
        Ok(mut row) => {
            write_all(stream, status_line(0, "ok").as_bytes()).await?;
            write_all(stream, b"<data>\n").await?;

            while let Some(current) = row {
                let values: Vec<String> = (0..def.out_cols.len())
                    .map(|idx| {
                        column_text(&current, idx).unwrap_or_else(|e| {
                            warn!("interface {intername} column {idx}: {e}");
                            String::new()
                        })
                    })
                    .collect();
                write_all(stream, row_line(&def.out_cols, &values).as_bytes()).await?;
                row_count += 1;

                row = match rows.try_next().await {
                    Ok(next) => next,
                    Err(e) => {
                        // Mid-stream failure: the body is already partial,
                        // closing is all that is left.
                        warn!("interface {intername} row fetch failed: {e}");
                        return Err(());
                    }
                };
            }
            write_all(stream, b"</data>\n").await?;
        }
    }

    info!("intername={intername},count={row_count}");
    Ok(())
}

async fn respond(stream: &mut TcpStream, body: &str) {
    let _ = write_all(stream, RESPONSE_HEAD.as_bytes()).await;
    let _ = write_all(stream, body.as_bytes()).await;
}

async fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), ()> {
    stream.write_all(bytes).await.map_err(|_| ())
}
