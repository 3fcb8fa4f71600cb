//! One request/response exchange over a byte channel
//!
//! The engine owns the channel but not the schedule: it assumes whoever
//! calls [`TransactionEngine::execute`] has exclusive use of the line.

use std::time::Duration;

use common::hex::encode_frame;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::constants::{EXCEPTION_FLAG, EXCEPTION_FRAME_LEN, MAX_RTU_FRAME_LEN};
use crate::error::{ModbusError, Result};
use crate::frame::{Request, Response};

/// Phase of the current (or last) transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Sending,
    AwaitingResponse,
    Validating,
    Complete,
    Failed,
}

/// Drives transactions over `T`, one at a time, with no retry
pub struct TransactionEngine<T> {
    channel: T,
    response_timeout: Duration,
    state: TransactionState,
}

impl<T> TransactionEngine<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(channel: T, response_timeout: Duration) -> Self {
        Self {
            channel,
            response_timeout,
            state: TransactionState::Idle,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Release the channel
    pub fn into_inner(self) -> T {
        self.channel
    }

    /// Run `request` to a terminal state.
    ///
    /// A silent peer fails with `Timeout` once `response_timeout` has elapsed
    /// since the request was flushed. A garbled answer fails with `Frame`.
    pub async fn execute(&mut self, request: &Request) -> Result<Response> {
        self.state = TransactionState::Idle;
        let outcome = self.exchange(request).await;
        self.state = match outcome {
            Ok(_) => TransactionState::Complete,
            Err(_) => TransactionState::Failed,
        };
        outcome
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response> {
        self.discard_stale().await?;

        let frame = request.encode();
        self.state = TransactionState::Sending;
        debug!("RTU TX: {}", encode_frame(&frame));
        self.channel.write_all(&frame).await?;
        self.channel.flush().await?;

        self.state = TransactionState::AwaitingResponse;
        let response = self.receive(request.expected_response_len()).await?;

        self.state = TransactionState::Validating;
        debug!("RTU RX: {}", encode_frame(&response));
        request.decode_response(&response)
    }

    /// Read until `expected` bytes, or the exception length once the
    /// exception flag shows up in the function byte.
    async fn receive(&mut self, expected: usize) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(expected);
        let channel = &mut self.channel;
        let buf = &mut buffer;

        let read_frame = async move {
            let mut chunk = [0u8; MAX_RTU_FRAME_LEN];
            let mut target = expected;
            while buf.len() < target {
                let want = (target - buf.len()).min(chunk.len());
                let n = channel.read(&mut chunk[..want]).await?;
                if n == 0 {
                    return Err(ModbusError::transport_unavailable("serial channel closed"));
                }
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() >= 2 && buf[1] & EXCEPTION_FLAG != 0 {
                    target = EXCEPTION_FRAME_LEN;
                }
            }
            buf.truncate(target);
            Ok(())
        };

        let result = timeout(self.response_timeout, read_frame).await;
        match result {
            Ok(Ok(())) => Ok(buffer),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if buffer.is_empty() {
                    debug!("RTU timeout: no response");
                } else {
                    warn!(
                        "RTU timeout: partial {}B [{}]",
                        buffer.len(),
                        encode_frame(&buffer)
                    );
                }
                Err(ModbusError::Timeout {
                    after: self.response_timeout,
                    received: buffer.len(),
                })
            },
        }
    }

    /// Drop bytes already waiting on the line, typically a late answer to a
    /// transaction that timed out.
    async fn discard_stale(&mut self) -> Result<usize> {
        let mut scratch = [0u8; 64];
        let mut dropped = 0;
        loop {
            match timeout(Duration::ZERO, self.channel.read(&mut scratch)).await {
                Ok(Ok(0)) => {
                    return Err(ModbusError::transport_unavailable("serial channel closed"));
                },
                Ok(Ok(n)) => dropped += n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
        if dropped > 0 {
            warn!("RTU stale: {}B discarded", dropped);
        }
        Ok(dropped)
    }
}
