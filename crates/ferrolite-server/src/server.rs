//! TCP server that wraps a Ferrolite [`Engine`] handle.
//!
//! Each connected client sends JSON-line requests and receives JSON-line
//! responses in order. Engine calls may block on per-key sections, so they
//! run on tokio's blocking pool; concurrency control is internal to the
//! engine.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info, warn};

use ferrolite_core::api::{Engine, OperationRequest};

use crate::protocol::{Response, SERIALIZATION_ERROR};

/// A Ferrolite server bound to a TCP address.
pub struct FerroliteServer {
    engine: Engine,
    listener: TcpListener,
}

impl FerroliteServer {
    /// Bind `addr`. Fails if the address is in use.
    pub async fn bind(engine: Engine, addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { engine, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the server until SIGINT or SIGTERM.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Accept connections until `shutdown` completes, then shut the engine
    /// down: in-flight operations finish, state is flushed, and the storage
    /// root is released.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "server listening");

        let accept_loop = async {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        let engine = self.engine.clone();
                        tokio::spawn(async move {
                            debug!(%peer, "client connected");
                            if let Err(e) = handle_connection(engine, stream).await {
                                warn!(%peer, error = %e, "connection handler error");
                            }
                            debug!(%peer, "client disconnected");
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        // Wait for either the accept loop (runs forever) or a shutdown signal.
        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown => {
                info!("shutdown signal received");
            }
        }
        drop(self.listener);

        let engine = self.engine;
        match tokio::task::spawn_blocking(move || engine.shutdown()).await {
            Ok(Ok(())) => info!("engine stopped"),
            Ok(Err(e)) => error!(error = %e, "engine shutdown failed"),
            Err(e) => error!(error = %e, "engine shutdown task failed"),
        }
        Ok(())
    }
}

async fn handle_connection(engine: Engine, stream: TcpStream) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            // Client disconnected.
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<OperationRequest>(trimmed) {
            Ok(req) => execute(&engine, req).await,
            Err(e) => Response::error(SERIALIZATION_ERROR, e.to_string()),
        };

        let mut resp_bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode response");
                serde_json::to_vec(&Response::error("InternalServerError", e.to_string()))?
            }
        };
        resp_bytes.push(b'\n');

        writer.write_all(&resp_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn execute(engine: &Engine, req: OperationRequest) -> Response {
    let engine = engine.clone();
    match tokio::task::spawn_blocking(move || engine.dispatch(req)).await {
        Ok(Ok(output)) => Response::ok(output),
        Ok(Err(e)) => Response::from(&e),
        Err(e) => {
            error!(error = %e, "request task failed");
            Response::error("InternalServerError", e.to_string())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
