//! Listener lifecycle: bind, accept, drain, close.
//!
//! The server owns no global state. Whoever needs to stop it (a signal task,
//! a test) holds a [`ShutdownHandle`] obtained before `run` is called.

use crate::connection::{ConnContext, handle_connection};
use movelog_core::config::MovelogConfig;
use movelog_store::LogFile;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Back-off after an accept error (e.g. EMFILE) so the loop does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Requests shutdown of a running [`IngestServer`]. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct IngestServer {
    listener: TcpListener,
    ctx: Arc<ConnContext>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    grace: Duration,
}

impl IngestServer {
    /// Bind the listener. The log file must already be open.
    pub async fn bind(config: &MovelogConfig, log: Arc<LogFile>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.server.addr).await?;
        let (shutdown_tx, _) = watch::channel(false);

        info!(addr = %listener.local_addr()?, log = %log.path().display(), "Listening");

        Ok(Self {
            listener,
            ctx: Arc::new(ConnContext {
                log,
                max_body_bytes: config.server.max_body_bytes,
                read_timeout: config.read_timeout(),
                access_log: config.observability.access_log,
            }),
            shutdown_tx: Arc::new(shutdown_tx),
            grace: config.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: Arc::clone(&self.shutdown_tx) }
    }

    /// Run the server on a background task.
    pub fn spawn(self) -> std::io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let shutdown = self.shutdown_handle();
        let join = tokio::spawn(self.run());
        Ok(ServerHandle { addr, shutdown, join })
    }

    /// Accept connections until shutdown is triggered, then drain.
    ///
    /// After the trigger the listener is dropped, so new connections are
    /// refused. Requests already being read finish their write and response;
    /// idle keep-alive connections close. Connections still running after the
    /// grace period are aborted. The log file is closed last.
    pub async fn run(self) -> anyhow::Result<()> {
        let IngestServer { listener, ctx, shutdown_tx, grace } = self;
        let mut stop_rx = shutdown_tx.subscribe();
        let mut conns: JoinSet<anyhow::Result<()>> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut stop_rx) => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        // TCP_NODELAY: responses are tiny
                        let _ = stream.set_nodelay(true);
                        conns.spawn(handle_connection(
                            stream,
                            peer_addr,
                            Arc::clone(&ctx),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },

                Some(joined) = conns.join_next(), if !conns.is_empty() => reap(joined),
            }
        }

        drop(listener);
        info!(in_flight = conns.len(), "Shutdown requested, draining connections");

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = conns.join_next().await {
                reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = conns.len(),
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed, aborting remaining connections"
            );
            conns.abort_all();
            while conns.join_next().await.is_some() {}
        }

        ctx.log.close()?;
        info!("Ingest server stopped");
        Ok(())
    }
}

/// Resolves once shutdown has been triggered (or the sender is gone).
pub(crate) async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopping| *stopping).await;
}

fn reap(joined: Result<anyhow::Result<()>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Connection closed"),
        Err(e) if e.is_panic() => error!(error = %e, "Connection task panicked"),
        Err(_) => {}
    }
}

/// A server running on a background task.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    join: JoinHandle<anyhow::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Trigger shutdown and wait for the drain to finish.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.trigger();
        self.join.await?
    }
}
