//! Session client
//!
//! Finds a running daemon through its endpoint record and talks the
//! line protocol to it. Used by the integration tests and by anything
//! scripting the daemon from Rust.

use std::path::Path;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::endpoint::{self, Endpoint, EndpointRecord};
use crate::error::{RelayError, Result};
use crate::protocol::{SessionRequest, SessionResponse};

/// Default per-call deadline
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl DaemonClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    /// Locate the daemon that owns `serial_port`
    pub fn discover(runtime_dir: &Path, serial_port: &str) -> Result<Self> {
        let record = EndpointRecord::read(&endpoint::record_path(runtime_dir, serial_port))?;
        debug!("Daemon pid {} on {}", record.pid, record.endpoint);
        Ok(Self::new(record.endpoint))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn connect(&self) -> Result<ClientSession> {
        let stream: Box<dyn Stream> = match &self.endpoint {
            #[cfg(unix)]
            Endpoint::Unix { path } => Box::new(
                tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| connect_failed(&self.endpoint, e))?,
            ),
            #[cfg(not(unix))]
            Endpoint::Unix { .. } => {
                return Err(RelayError::unavailable("unix sockets are not available"));
            },
            Endpoint::Tcp { address } => Box::new(
                TcpStream::connect(address)
                    .await
                    .map_err(|e| connect_failed(&self.endpoint, e))?,
            ),
        };
        Ok(ClientSession {
            framed: Framed::new(stream, LinesCodec::new()),
            timeout: self.timeout,
        })
    }

    /// One-shot: connect, send, read the reply, hang up
    pub async fn request(&self, request: &SessionRequest) -> Result<SessionResponse> {
        self.connect().await?.call(request).await
    }
}

fn connect_failed(endpoint: &Endpoint, e: std::io::Error) -> RelayError {
    RelayError::unavailable(format!("cannot connect to {}: {}", endpoint, e))
}

/// An open connection; requests on it are answered in order
pub struct ClientSession {
    framed: Framed<Box<dyn Stream>, LinesCodec>,
    timeout: Duration,
}

impl ClientSession {
    pub async fn call(&mut self, request: &SessionRequest) -> Result<SessionResponse> {
        let line = serde_json::to_string(request)
            .map_err(|e| RelayError::Internal(format!("encode request: {}", e)))?;
        self.call_raw(line).await
    }

    /// Send a line as-is; lets callers exercise malformed input
    pub async fn call_raw(&mut self, line: String) -> Result<SessionResponse> {
        let timeout = self.timeout;
        let exchange = async {
            self.framed.send(line).await.map_err(codec_error)?;
            match self.framed.next().await {
                Some(Ok(reply)) => serde_json::from_str(&reply)
                    .map_err(|e| RelayError::Internal(format!("decode response: {}", e))),
                Some(Err(e)) => Err(codec_error(e)),
                None => Err(RelayError::unavailable("daemon closed the session")),
            }
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| RelayError::WaitTimeout(format!("no reply within {}ms", timeout.as_millis())))?
    }
}

fn codec_error(e: LinesCodecError) -> RelayError {
    match e {
        LinesCodecError::Io(io) => RelayError::unavailable(format!("session I/O: {}", io)),
        LinesCodecError::MaxLineLengthExceeded => RelayError::Internal("reply line too long".to_string()),
    }
}
