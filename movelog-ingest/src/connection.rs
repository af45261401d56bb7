use crate::handler::{self, Reply};
use crate::server::stopped;
use crate::wire::{self, MAX_HEAD_BYTES, RequestHead};
use bytes::{Buf, BytesMut};
use movelog_core::error::MovelogError;
use movelog_observability::AccessLogEntry;
use movelog_store::LogFile;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Per-server settings shared by every connection task.
pub struct ConnContext {
    pub log: Arc<LogFile>,
    pub max_body_bytes: usize,
    pub read_timeout: Option<Duration>,
    pub access_log: bool,
}

/// Upper bound on request bytes discarded after an error response.
const LINGER_DRAIN_BYTES: usize = 256 * 1024;
/// How long a rejected client gets to stop sending before the socket drops.
const LINGER_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of waiting for more bytes from the client.
enum ReadOutcome {
    Data,
    Eof,
    TimedOut,
    Shutdown,
}

/// Handle a single client connection (HTTP/1.1 with keepalive).
///
/// Requests are served one after another. Shutdown is only observed while
/// the connection is idle between requests; a request whose head has started
/// arriving is read, written to the log and answered before the task exits.
pub async fn handle_connection(
    mut client: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<ConnContext>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client_ip = peer_addr.ip().to_string();

    // ── Buffers allocated ONCE, reused across keepalive requests ──
    let mut read_buf = BytesMut::with_capacity(8192);
    let mut resp_buf = Vec::with_capacity(512);

    loop {
        // ── Read request head ──
        let (head, body_offset) = loop {
            if !read_buf.is_empty() {
                match wire::parse_head(&read_buf) {
                    Ok(Some(parsed)) => break parsed,
                    Ok(None) if read_buf.len() > MAX_HEAD_BYTES => {
                        write_reply(&mut client, &mut resp_buf, &Reply::status_only(431), false)
                            .await?;
                        linger_close(&mut client, &mut read_buf).await;
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(peer = %peer_addr, error = %e, "HTTP parse error");
                        write_reply(&mut client, &mut resp_buf, &Reply::status_only(400), false)
                            .await?;
                        linger_close(&mut client, &mut read_buf).await;
                        return Ok(());
                    }
                }
            }

            let idle = read_buf.is_empty();
            match read_more(&mut client, &mut read_buf, ctx.read_timeout, idle, &mut shutdown)
                .await?
            {
                ReadOutcome::Data => {}
                ReadOutcome::Eof | ReadOutcome::Shutdown => return Ok(()),
                ReadOutcome::TimedOut => {
                    tracing::debug!(peer = %peer_addr, "Read timed out, closing connection");
                    return Ok(());
                }
            }
        };
        let started = Instant::now();
        read_buf.advance(body_offset);

        // ── Frame the body ──
        let body_len = match frame_body(&head, ctx.max_body_bytes) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(peer = %peer_addr, error = %e, "Rejected request framing");
                let reply = Reply::from_error(&e);
                write_reply(&mut client, &mut resp_buf, &reply, false).await?;
                log_access(&ctx, &client_ip, &head, &reply, started);
                linger_close(&mut client, &mut read_buf).await;
                return Ok(());
            }
        };

        while read_buf.len() < body_len {
            match read_more(&mut client, &mut read_buf, ctx.read_timeout, false, &mut shutdown)
                .await?
            {
                ReadOutcome::Data => {}
                ReadOutcome::Eof => {
                    tracing::debug!(
                        peer = %peer_addr,
                        expected = body_len,
                        received = read_buf.len(),
                        "Client closed before sending the full body"
                    );
                    return Ok(());
                }
                ReadOutcome::TimedOut | ReadOutcome::Shutdown => {
                    tracing::debug!(peer = %peer_addr, "Timed out reading body");
                    return Ok(());
                }
            }
        }
        let body = read_buf.split_to(body_len);

        // ── Process request ──
        let reply = handler::dispatch(&head.method, &body, &ctx.log);

        let keep_alive = head.keep_alive && !*shutdown.borrow();
        write_reply(&mut client, &mut resp_buf, &reply, keep_alive).await?;
        log_access(&ctx, &client_ip, &head, &reply, started);

        if !keep_alive {
            return Ok(());
        }
    }
}

/// Decide how many body bytes follow the head.
///
/// POST must declare a `Content-Length`. Other methods default to an empty
/// body, but a declared body is still consumed so the next request on the
/// connection lines up.
fn frame_body(head: &RequestHead, max_body_bytes: usize) -> Result<usize, MovelogError> {
    let declared = head.body_length()?;
    let len = match (head.method.as_str(), declared) {
        ("POST", None) => return Err(MovelogError::MissingContentLength),
        (_, Some(n)) => n,
        (_, None) => 0,
    };
    if len > max_body_bytes {
        return Err(MovelogError::PayloadTooLarge { limit: max_body_bytes });
    }
    Ok(len)
}

async fn read_more(
    client: &mut TcpStream,
    buf: &mut BytesMut,
    timeout: Option<Duration>,
    idle: bool,
    shutdown: &mut watch::Receiver<bool>,
) -> std::io::Result<ReadOutcome> {
    let read = async {
        let res = match timeout {
            Some(t) => match tokio::time::timeout(t, client.read_buf(buf)).await {
                Ok(res) => res,
                Err(_) => return Ok(ReadOutcome::TimedOut),
            },
            None => client.read_buf(buf).await,
        };
        match res {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(_) => Ok(ReadOutcome::Data),
            Err(e) => Err(e),
        }
    };

    if !idle {
        return read.await;
    }

    tokio::select! {
        biased;
        _ = stopped(shutdown) => Ok(ReadOutcome::Shutdown),
        res = read => res,
    }
}

async fn write_reply(
    client: &mut TcpStream,
    resp_buf: &mut Vec<u8>,
    reply: &Reply,
    keep_alive: bool,
) -> std::io::Result<()> {
    wire::build_response(resp_buf, reply.status, reply.body.as_bytes(), keep_alive);
    client.write_all(resp_buf).await?;
    client.flush().await
}

/// Half-close after an error response and discard whatever the client is
/// still sending. Dropping a socket with unread input resets the connection,
/// which can destroy the response before the client has read it.
async fn linger_close(client: &mut TcpStream, buf: &mut BytesMut) {
    if client.shutdown().await.is_err() {
        return;
    }
    let drain = async {
        let mut drained = 0;
        while drained < LINGER_DRAIN_BYTES {
            buf.clear();
            match client.read_buf(buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    };
    let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
}

fn log_access(ctx: &ConnContext, client_ip: &str, head: &RequestHead, reply: &Reply, started: Instant) {
    if !ctx.access_log {
        return;
    }
    AccessLogEntry::new(
        client_ip,
        &head.method,
        &head.path,
        reply.status,
        reply.rows_written,
        started.elapsed().as_secs_f64() * 1000.0,
    )
    .emit();
}
