//! relayd - USB relay module daemon
//!
//! Owns one serial line, serializes every Modbus transaction on it, keeps a
//! polled snapshot of relay and input state, and serves local sessions.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use relayd::bootstrap::{self, Args};
use relayd::config::RelaydConfig;
use relayd::context::DaemonContext;
use relayd::error::RelayError;
use relayd::poller::run_until_fatal;
use relayd::server::SessionServer;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<RelayError>()
                .map_or(1, |err| err.kind().code());
            // Logging may not be up yet
            eprintln!("relayd: {:#}", e);
            error!("Exiting with code {}: {:#}", code, e);
            ExitCode::from(code)
        },
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RelaydConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let _log_guard = bootstrap::initialize_logging(&args, &config)?;
    config.validate()?;

    if args.validate {
        let dump = serde_yaml::to_string(&config).context("render configuration")?;
        println!("{}", dump);
        info!("Validation completed successfully");
        return Ok(());
    }

    info!(
        "relayd {} on {} (slave {}, {} relays, {} inputs)",
        env!("CARGO_PKG_VERSION"),
        config.serial.port,
        config.device.slave_id,
        config.device.relay_count,
        config.device.input_count
    );

    let port = relay_modbus::open_serial(&config.serial).map_err(RelayError::from)?;
    let (ctx, worker) = DaemonContext::start(config, port)?;
    let signals = common::cancel_on_signal(ctx.shutdown.clone());

    let server = match SessionServer::bind(Arc::clone(&ctx)).await {
        Ok(server) => server,
        Err(e) => {
            ctx.shutdown.cancel();
            let _ = worker.await;
            return Err(e.into());
        },
    };
    let server_task = tokio::spawn(server.run());

    let polled = run_until_fatal(ctx.poller(), ctx.shutdown.clone()).await;

    ctx.shutdown.cancel();
    match server_task.await {
        Ok(Err(e)) => warn!("Session server: {}", e),
        Err(e) => warn!("Session server task: {}", e),
        Ok(Ok(())) => {},
    }
    if let Err(e) = worker.await {
        warn!("Serializer task: {}", e);
    }
    signals.abort();

    info!("relayd stopped");
    polled.map_err(Into::into)
}
