//! Session server
//!
//! Binds once at startup (unix socket where available, loopback TCP
//! otherwise), publishes the endpoint record, and spawns one task per
//! accepted connection.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{error, info, warn};

use crate::config::TransportKind;
use crate::context::DaemonContext;
use crate::endpoint::{self, Endpoint, EndpointRecord};
use crate::error::{RelayError, Result};
use crate::session::handle_session;

enum Listener {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

pub struct SessionServer {
    ctx: Arc<DaemonContext>,
    listener: Listener,
    endpoint: Endpoint,
    record_path: PathBuf,
}

impl SessionServer {
    /// Bind the configured transport and write the endpoint record
    pub async fn bind(ctx: Arc<DaemonContext>) -> Result<Self> {
        let daemon = &ctx.config.daemon;
        let runtime_dir = daemon.runtime_dir();
        let serial_port = ctx.config.serial.port.clone();
        std::fs::create_dir_all(&runtime_dir)?;

        let use_unix = match daemon.transport {
            TransportKind::Unix => true,
            TransportKind::Tcp => false,
            TransportKind::Auto => cfg!(unix),
        };

        let (listener, endpoint) = if use_unix {
            bind_unix(endpoint::socket_path(&runtime_dir, &serial_port)).await?
        } else {
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, daemon.tcp_port));
            let listener = TcpListener::bind(addr).await?;
            let address = listener.local_addr()?;
            (Listener::Tcp(listener), Endpoint::Tcp { address })
        };

        let record_path = endpoint::record_path(&runtime_dir, &serial_port);
        EndpointRecord::new(endpoint.clone(), &serial_port).write(&record_path)?;
        info!("Sessions on {} (record {})", endpoint, record_path.display());

        Ok(Self {
            ctx,
            listener,
            endpoint,
            record_path,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Accept until shutdown, then remove the socket and record files
    pub async fn run(self) -> Result<()> {
        let shutdown = self.ctx.shutdown.clone();
        let mut next_id: u64 = 0;

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.accept(next_id) => accepted,
            };
            next_id += 1;

            if let Err(e) = accepted {
                // EMFILE and friends: back off, keep serving
                warn!("Accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }

        self.cleanup();
        Ok(())
    }

    async fn accept(&self, id: u64) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        match &self.listener {
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                tokio::spawn(handle_session(stream, ctx, format!("unix#{}", id)));
            },
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("TCP_NODELAY on {}: {}", peer, e);
                }
                tokio::spawn(handle_session(stream, ctx, format!("tcp#{}@{}", id, peer)));
            },
        }
        Ok(())
    }

    fn cleanup(&self) {
        endpoint::remove_quietly(&self.record_path);
        if let Endpoint::Unix { path } = &self.endpoint {
            endpoint::remove_quietly(path);
        }
        info!("Session server stopped");
    }
}

#[cfg(unix)]
async fn bind_unix(path: PathBuf) -> Result<(Listener, Endpoint)> {
    if path.exists() {
        if tokio::net::UnixStream::connect(&path).await.is_ok() {
            return Err(RelayError::unavailable(format!(
                "another daemon is serving {}",
                path.display()
            )));
        }
        warn!("Removing stale socket {}", path.display());
        std::fs::remove_file(&path)?;
    }
    let listener = UnixListener::bind(&path).map_err(|e| {
        error!("Bind {}: {}", path.display(), e);
        RelayError::Io(e)
    })?;
    Ok((Listener::Unix(listener), Endpoint::Unix { path }))
}

#[cfg(not(unix))]
async fn bind_unix(_path: PathBuf) -> Result<(Listener, Endpoint)> {
    Err(RelayError::config("unix sockets are not available on this platform"))
}
