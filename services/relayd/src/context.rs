//! Daemon context
//!
//! Everything the components share, created once at startup and handed to
//! each of them explicitly.

use std::sync::Arc;
use std::time::Duration;

use relay_modbus::{DeviceLayout, TransactionEngine};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::StateCache;
use crate::config::RelaydConfig;
use crate::error::Result;
use crate::poller::{PollTiming, StatePoller};
use crate::serializer::{self, SerializerHandle};

pub struct DaemonContext {
    pub config: RelaydConfig,
    pub layout: DeviceLayout,
    pub cache: Arc<StateCache>,
    pub serializer: SerializerHandle,
    pub shutdown: CancellationToken,
}

impl DaemonContext {
    /// Take ownership of `channel` and start the serializer worker on it.
    ///
    /// The returned handle resolves once the worker has drained and the
    /// channel is closed.
    pub fn start<T>(config: RelaydConfig, channel: T) -> Result<(Arc<Self>, JoinHandle<()>)>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let layout = config.device.layout()?;
        let cache = Arc::new(StateCache::new());
        let shutdown = CancellationToken::new();
        let engine = TransactionEngine::new(channel, config.daemon.transaction_timeout());
        let (serializer, worker) = serializer::spawn(
            engine,
            layout,
            Arc::clone(&cache),
            config.daemon.queue_capacity,
            shutdown.clone(),
        );

        let ctx = Arc::new(Self {
            config,
            layout,
            cache,
            serializer,
            shutdown,
        });
        Ok((ctx, worker))
    }

    /// How long sessions wait on the serializer
    pub fn command_wait(&self) -> Duration {
        self.config.daemon.command_wait()
    }

    pub fn poller(&self) -> StatePoller {
        StatePoller::new(
            self.serializer.clone(),
            Arc::clone(&self.cache),
            PollTiming::from(&self.config.daemon),
        )
    }
}
