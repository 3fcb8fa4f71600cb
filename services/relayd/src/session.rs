//! Per-connection request loop and request dispatch
//!
//! A session owns its own framing state and shares nothing with other
//! sessions except the serializer and the cache.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::context::DaemonContext;
use crate::error::{RelayError, Result};
use crate::protocol::{parse_request, ResponseData, SessionRequest, SessionResponse, StatusData};
use crate::serializer::{Operation, Outcome};

/// Serve one connection until the peer hangs up or the daemon shuts down.
///
/// A request already handed to the serializer keeps running if the peer
/// disconnects; only the reply is lost.
pub async fn handle_session<S>(stream: S, ctx: Arc<DaemonContext>, peer: String)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let codec = LinesCodec::new_with_max_length(ctx.config.daemon.max_line_bytes);
    let mut framed = Framed::new(stream, codec);
    let mut served: u64 = 0;
    debug!("Session open: {}", peer);

    loop {
        let line = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            line = framed.next() => line,
        };

        let response = match line {
            None => break,
            Some(Ok(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                served += 1;
                match parse_request(line) {
                    Ok(request) => respond(&ctx, request).await,
                    Err(e) => {
                        debug!("Session {}: {}", peer, e);
                        SessionResponse::failure(&e)
                    },
                }
            },
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("Session {}: line over {}B, closing", peer, ctx.config.daemon.max_line_bytes);
                let err = RelayError::bad_request("request line too long");
                let _ = send(&mut framed, &SessionResponse::failure(&err)).await;
                break;
            },
            Some(Err(LinesCodecError::Io(e))) => {
                debug!("Session {} read: {}", peer, e);
                break;
            },
        };

        if let Err(e) = send(&mut framed, &response).await {
            debug!("Session {} write: {}", peer, e);
            break;
        }
    }

    debug!("Session closed: {} ({} requests)", peer, served);
}

async fn send<S>(framed: &mut Framed<S, LinesCodec>, response: &SessionResponse) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = serde_json::to_string(response)
        .map_err(|e| RelayError::Internal(format!("encode response: {}", e)))?;
    framed.send(line).await.map_err(|e| match e {
        LinesCodecError::Io(io) => RelayError::Io(io),
        LinesCodecError::MaxLineLengthExceeded => {
            RelayError::Internal("response line too long".to_string())
        },
    })
}

/// Run one request and wrap the result for the wire
pub async fn respond(ctx: &DaemonContext, request: SessionRequest) -> SessionResponse {
    let name = request.name();
    match dispatch(ctx, request).await {
        Ok(data) => SessionResponse::ok(data),
        Err(e) => {
            debug!("Request {} failed: {}", name, e);
            SessionResponse::failure(&e)
        },
    }
}

/// Map a request onto cache reads or serializer operations
pub async fn dispatch(ctx: &DaemonContext, request: SessionRequest) -> Result<ResponseData> {
    let wait = ctx.command_wait();
    match request {
        SessionRequest::Ping => Ok(ResponseData::Pong {
            pong: true,
            pid: std::process::id(),
        }),
        SessionRequest::Status => Ok(status(ctx)),
        SessionRequest::ReadRelays { relay_id } => {
            let op = match relay_id {
                Some(relay_id) => Operation::ReadRelay { relay_id },
                None => Operation::ReadRelays,
            };
            relays(ctx.serializer.submit(op, wait).await?)
        },
        SessionRequest::ReadInputs { input_id } => {
            let op = match input_id {
                Some(input_id) => Operation::ReadInput { input_id },
                None => Operation::ReadInputs,
            };
            inputs(ctx.serializer.submit(op, wait).await?)
        },
        SessionRequest::SetRelay {
            relay_id,
            state: Some(on),
        } => relays(
            ctx.serializer
                .submit(Operation::WriteRelay { relay_id, on }, wait)
                .await?,
        ),
        SessionRequest::SetRelay {
            relay_id,
            state: None,
        }
        | SessionRequest::ToggleRelay { relay_id } => relays(
            ctx.serializer
                .submit(Operation::ToggleRelay { relay_id }, wait)
                .await?,
        ),
        SessionRequest::SetAllRelays { state } => relays(
            ctx.serializer
                .submit(Operation::SetAllRelays { on: state }, wait)
                .await?,
        ),
        SessionRequest::BatchSetRelays { start_id, states } => relays(
            ctx.serializer
                .submit(Operation::WriteRelays { start_id, states }, wait)
                .await?,
        ),
        SessionRequest::PulseRelay {
            relay_id,
            duration_ms,
        } => pulse(ctx, relay_id, duration_ms).await,
    }
}

fn status(ctx: &DaemonContext) -> ResponseData {
    let snapshot = ctx.cache.snapshot();
    let last_command_ms = ctx
        .cache
        .last_command()
        .map(|at| Instant::now().saturating_duration_since(at).as_millis() as u64);
    ResponseData::Status(StatusData {
        relays: snapshot.relays.clone(),
        inputs: snapshot.inputs.clone(),
        last_update: snapshot.updated_at,
        last_command_ms,
    })
}

/// On, sleep outside the serializer so others can use the line, off.
async fn pulse(ctx: &DaemonContext, relay_id: u16, duration_ms: Option<u64>) -> Result<ResponseData> {
    let daemon = &ctx.config.daemon;
    let duration_ms = duration_ms.unwrap_or(daemon.default_pulse_ms);
    if duration_ms == 0 || duration_ms > daemon.max_pulse_ms {
        return Err(RelayError::invalid_argument(format!(
            "pulse duration {}ms outside 1..={}",
            duration_ms, daemon.max_pulse_ms
        )));
    }
    ctx.layout.relay_address(relay_id)?;

    let wait = ctx.command_wait();
    ctx.serializer
        .submit(Operation::WriteRelay { relay_id, on: true }, wait)
        .await?;
    tokio::time::sleep(Duration::from_millis(duration_ms)).await;

    match ctx
        .serializer
        .submit(
            Operation::WriteRelay {
                relay_id,
                on: false,
            },
            wait,
        )
        .await
    {
        Ok(outcome) => {
            info!("Pulse: relay {} for {}ms", relay_id, duration_ms);
            relays(outcome)
        },
        Err(e) => {
            error!("Pulse: relay {} may still be on: {}", relay_id, e);
            Err(e)
        },
    }
}

fn relays(outcome: Outcome) -> Result<ResponseData> {
    match outcome {
        Outcome::Relays(relays) => Ok(ResponseData::Relays { relays }),
        other => Err(unexpected(&other)),
    }
}

fn inputs(outcome: Outcome) -> Result<ResponseData> {
    match outcome {
        Outcome::Inputs(inputs) => Ok(ResponseData::Inputs { inputs }),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(outcome: &Outcome) -> RelayError {
    RelayError::Internal(format!("unexpected outcome {:?}", outcome))
}
