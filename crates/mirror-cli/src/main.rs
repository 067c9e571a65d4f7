//! console-mirror: mirror live console streams.
//!
//! Connects every console listed in the config, writes their streams to
//! capture files, serves them to spectators and drives OBS scene switches.
//! Files ready for playback are printed to stdout as JSON lines; everything
//! else goes to the log.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{expand_tilde_str, Config};
use mirror_worker::{DefaultFactory, EventStreams, MirrorHandle, MirrorWorker};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// console-mirror: capture, relay and auto-switch console streams
#[derive(Parser, Debug)]
#[command(name = "console-mirror", version, about = "Mirror live console streams")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.console-mirror/config.toml")]
    config: String,

    /// Directory for consoles without their own capture folder
    #[arg(long)]
    capture_root: Option<String>,

    /// First relay port; a console's relay listens on this plus its id
    #[arg(long)]
    relay_base_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting console-mirror");

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        eprintln!("console-mirror: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&expand_tilde_str(&cli.config))?;
    let capture_root =
        expand_tilde_str(cli.capture_root.as_deref().unwrap_or(&config.capture.root));
    let relay_bind: IpAddr = config
        .relay
        .bind
        .parse()
        .with_context(|| format!("invalid relay bind address {:?}", config.relay.bind))?;

    let factory = DefaultFactory {
        relay_bind,
        relay_base_port: cli.relay_base_port.unwrap_or(config.relay.base_port),
    };
    let (handle, streams) =
        MirrorWorker::spawn(Arc::new(factory)).context("failed to start mirror worker")?;
    let pump = tokio::spawn(pump_events(streams));

    if config.consoles.is_empty() {
        warn!("no consoles configured; add [[console]] entries to the config file");
    }
    for console in &config.consoles {
        let session = console.session_config(&capture_root);
        info!(address = %console.address, folder = %session.folder.display(), "connecting console");
        if let Err(e) = handle.connect(session).await {
            // Already reported on the error stream.
            warn!(address = %console.address, error = %e, "console skipped");
            continue;
        }
        if console.mirror {
            handle.start_mirroring(&console.address).await?;
        }
    }

    shutdown_signal().await;
    info!("received shutdown signal");

    log_sessions(&handle).await?;
    handle.shutdown().await?;
    drop(handle);

    // The streams close once the worker has stopped.
    let _ = pump.await;
    info!("console-mirror stopped");
    Ok(())
}

async fn log_sessions(handle: &MirrorHandle) -> Result<()> {
    for session in handle.list_sessions().await? {
        info!(
            address = %session.address,
            id = %session.id,
            nickname = session.nickname.as_deref().unwrap_or("-"),
            status = %session.status,
            mirroring = session.mirroring,
            uptime_secs = session.uptime_secs,
            "closing session"
        );
    }
    Ok(())
}

/// Forward the worker's event streams until all of them close.
async fn pump_events(mut streams: EventStreams) {
    loop {
        tokio::select! {
            Some(message) = streams.log.recv() => info!("{message}"),
            Some(err) = streams.errors.recv() => error!("{err}"),
            Some(ready) = streams.file_ready.recv() => match serde_json::to_string(&ready) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "cannot encode file-ready event"),
            },
            Some(change) = streams.status.recv() => {
                let info = &change.info;
                info!(
                    address = %change.address,
                    status = ?info.status,
                    file = ?info.file_name,
                    nickname = ?info.nickname,
                    "console status"
                );
            }
            else => break,
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
                warn!(error = %e, "cannot listen for SIGTERM, waiting for Ctrl-C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
