//! Transport serializer
//!
//! The only owner of the serial channel. Callers submit an [`Operation`]
//! through a bounded FIFO queue; a single worker runs each one to completion
//! before taking the next, so no two transactions ever share the wire.
//!
//! Cache updates happen here, inside the worker, before the result is
//! posted back to the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use relay_modbus::{DeviceLayout, InputState, RelayState, Request, Response, TransactionEngine};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{DeviceSnapshot, StateCache};
use crate::error::{ErrorKind, RelayError, Result};

/// Units of work the worker knows how to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ReadRelays,
    ReadInputs,
    /// One coil, merged into the cache
    ReadRelay { relay_id: u16 },
    ReadInput { input_id: u16 },
    WriteRelay { relay_id: u16, on: bool },
    /// Consecutive relays from `start_id`, one FC15 frame
    WriteRelays { start_id: u16, states: Vec<bool> },
    /// Read then write, with nothing in between
    ToggleRelay { relay_id: u16 },
    SetAllRelays { on: bool },
    /// Read relays then inputs and replace the whole cache
    Snapshot,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadRelays => "read_relays",
            Self::ReadInputs => "read_inputs",
            Self::ReadRelay { .. } => "read_relay",
            Self::ReadInput { .. } => "read_input",
            Self::WriteRelay { .. } => "write_relay",
            Self::WriteRelays { .. } => "write_relays",
            Self::ToggleRelay { .. } => "toggle_relay",
            Self::SetAllRelays { .. } => "set_all_relays",
            Self::Snapshot => "snapshot",
        }
    }

    /// Commands change outputs and open the polling avoidance window
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Self::WriteRelay { .. }
                | Self::WriteRelays { .. }
                | Self::ToggleRelay { .. }
                | Self::SetAllRelays { .. }
        )
    }
}

/// Result of a completed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Relays(Vec<RelayState>),
    Inputs(Vec<InputState>),
    Snapshot(Arc<DeviceSnapshot>),
}

struct Job {
    op: Operation,
    reply: oneshot::Sender<Result<Outcome>>,
    queued_at: Instant,
}

/// Cloneable submission side of the serializer
#[derive(Debug, Clone)]
pub struct SerializerHandle {
    tx: mpsc::Sender<Job>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("op", &self.op).finish()
    }
}

impl SerializerHandle {
    /// Queue `op` and wait up to `wait` for its result.
    ///
    /// Giving up does not cancel the operation: once queued it runs to its
    /// own completion or timeout, and its result is discarded.
    pub async fn submit(&self, op: Operation, wait: Duration) -> Result<Outcome> {
        let deadline = Instant::now() + wait;
        let name = op.name();
        let (reply, rx) = oneshot::channel();
        let job = Job {
            op,
            reply,
            queued_at: Instant::now(),
        };

        match timeout_at(deadline, self.tx.send(job)).await {
            Ok(Ok(())) => {},
            Ok(Err(_)) => return Err(RelayError::unavailable("serializer stopped")),
            Err(_) => {
                return Err(RelayError::WaitTimeout(format!(
                    "{} not queued within {}ms (queue full)",
                    name,
                    wait.as_millis()
                )))
            },
        }

        match timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::unavailable("serializer dropped request")),
            Err(_) => Err(RelayError::WaitTimeout(format!(
                "{} not answered within {}ms",
                name,
                wait.as_millis()
            ))),
        }
    }

    /// False once the worker has exited
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Start the worker. It owns `engine` (and the channel inside it) until
/// `shutdown` fires, then fails whatever is still queued and drops the channel.
pub fn spawn<T>(
    engine: TransactionEngine<T>,
    layout: DeviceLayout,
    cache: Arc<StateCache>,
    capacity: usize,
    shutdown: CancellationToken,
) -> (SerializerHandle, JoinHandle<()>)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let worker = Worker {
        engine,
        layout,
        cache,
        rx,
        shutdown,
    };
    let handle = tokio::spawn(worker.run());
    (SerializerHandle { tx }, handle)
}

struct Worker<T> {
    engine: TransactionEngine<T>,
    layout: DeviceLayout,
    cache: Arc<StateCache>,
    rx: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
}

impl<T> Worker<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn run(mut self) {
        debug!("Serializer started");
        let mut processed: u64 = 0;

        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
            processed += 1;
        }

        self.rx.close();
        let mut cancelled = 0usize;
        while let Ok(job) = self.rx.try_recv() {
            let _ = job
                .reply
                .send(Err(RelayError::unavailable("shutting down")));
            cancelled += 1;
        }
        info!(
            "Serializer stopped: {} done, {} cancelled",
            processed, cancelled
        );
        // dropping self closes the channel
    }

    async fn process(&mut self, job: Job) {
        let Job {
            op,
            reply,
            queued_at,
        } = job;
        let started = Instant::now();
        if reply.is_closed() {
            debug!("Serializer: {} caller gone, running anyway", op.name());
        }

        let result = match AssertUnwindSafe(self.execute(&op)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!("Serializer: {} panicked: {}", op.name(), msg);
                Err(RelayError::Internal(format!("{} panicked: {}", op.name(), msg)))
            },
        };

        // Any command that may have reached the device opens the window,
        // stamped before the caller can observe the result
        if op.is_command() {
            let rejected_early = matches!(&result, Err(e) if e.kind() == ErrorKind::InvalidArgument);
            if !rejected_early {
                self.cache.mark_command(Instant::now());
            }
        }

        match &result {
            Ok(_) => debug!(
                "Serializer: {} ok in {}ms (queued {}ms)",
                op.name(),
                started.elapsed().as_millis(),
                started.duration_since(queued_at).as_millis()
            ),
            Err(e) => warn!("Serializer: {} failed ({}): {}", op.name(), e.kind(), e),
        }

        let _ = reply.send(result);
    }

    async fn execute(&mut self, op: &Operation) -> Result<Outcome> {
        match op {
            Operation::ReadRelays => {
                let relays = self.read_relays().await?;
                self.cache.replace_relays(relays.clone());
                Ok(Outcome::Relays(relays))
            },
            Operation::ReadInputs => {
                let inputs = self.read_inputs().await?;
                self.cache.replace_inputs(inputs.clone());
                Ok(Outcome::Inputs(inputs))
            },
            Operation::ReadRelay { relay_id } => {
                let address = self.layout.relay_address(*relay_id)?;
                let request = Request::read_coils(self.layout.slave().get(), address, 1)?;
                let on = self.read_bit(request).await?;
                let state = self.layout.relay_state(*relay_id, on)?;
                self.cache.merge_relays(&[state]);
                Ok(Outcome::Relays(vec![state]))
            },
            Operation::ReadInput { input_id } => {
                let address = self.layout.input_address(*input_id)?;
                let request =
                    Request::read_discrete_inputs(self.layout.slave().get(), address, 1)?;
                let on = self.read_bit(request).await?;
                let state = self.layout.input_state(*input_id, on)?;
                self.cache.merge_inputs(&[state]);
                Ok(Outcome::Inputs(vec![state]))
            },
            Operation::WriteRelay { relay_id, on } => {
                let state = self.write_relay(*relay_id, *on).await?;
                Ok(Outcome::Relays(vec![state]))
            },
            Operation::WriteRelays { start_id, states } => {
                let written = self.write_relays(*start_id, states).await?;
                Ok(Outcome::Relays(written))
            },
            Operation::ToggleRelay { relay_id } => {
                let address = self.layout.relay_address(*relay_id)?;
                let request = Request::read_coils(self.layout.slave().get(), address, 1)?;
                let current = self.read_bit(request).await?;
                let state = self.write_relay(*relay_id, !current).await?;
                Ok(Outcome::Relays(vec![state]))
            },
            Operation::SetAllRelays { on } => {
                let states = vec![*on; usize::from(self.layout.relay_count())];
                let written = self.write_relays(1, &states).await?;
                Ok(Outcome::Relays(written))
            },
            Operation::Snapshot => {
                let relays = self.read_relays().await?;
                let inputs = self.read_inputs().await?;
                self.cache.replace(relays, inputs);
                Ok(Outcome::Snapshot(self.cache.snapshot()))
            },
        }
    }

    async fn transact(&mut self, request: &Request) -> Result<Response> {
        Ok(self.engine.execute(request).await?)
    }

    async fn read_bits(&mut self, request: Request) -> Result<Vec<bool>> {
        self.transact(&request)
            .await?
            .into_bits()
            .ok_or_else(|| RelayError::Internal("read returned no bits".to_string()))
    }

    async fn read_bit(&mut self, request: Request) -> Result<bool> {
        self.read_bits(request)
            .await?
            .first()
            .copied()
            .ok_or_else(|| RelayError::Internal("empty bit read".to_string()))
    }

    async fn read_relays(&mut self) -> Result<Vec<RelayState>> {
        let layout = self.layout;
        let request = Request::read_coils(
            layout.slave().get(),
            layout.relay_start_address(),
            layout.relay_count(),
        )?;
        let bits = self.read_bits(request).await?;
        Ok(layout.relay_states(&bits))
    }

    async fn read_inputs(&mut self) -> Result<Vec<InputState>> {
        let layout = self.layout;
        let request = Request::read_discrete_inputs(
            layout.slave().get(),
            layout.input_start_address(),
            layout.input_count(),
        )?;
        let bits = self.read_bits(request).await?;
        Ok(layout.input_states(&bits))
    }

    async fn write_relay(&mut self, relay_id: u16, on: bool) -> Result<RelayState> {
        let state = self.layout.relay_state(relay_id, on)?;
        let request = Request::write_single_coil(self.layout.slave().get(), state.address(), on)?;
        self.transact(&request).await?;
        self.cache.merge_relays(&[state]);
        Ok(state)
    }

    async fn write_relays(&mut self, start_id: u16, states: &[bool]) -> Result<Vec<RelayState>> {
        let count = u16::try_from(states.len())
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                RelayError::invalid_argument(format!("batch of {} relays", states.len()))
            })?;
        let last_id = start_id.checked_add(count - 1).ok_or_else(|| {
            RelayError::invalid_argument(format!("relay ids from {} overflow", start_id))
        })?;
        let start_address = self.layout.relay_address(start_id)?;
        self.layout.relay_address(last_id)?;

        let request = Request::write_multiple_coils(
            self.layout.slave().get(),
            start_address,
            count,
            states,
        )?;
        self.transact(&request).await?;

        let written = states
            .iter()
            .zip(start_id..=last_id)
            .map(|(&on, id)| self.layout.relay_state(id, on))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.cache.merge_relays(&written);
        Ok(written)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
