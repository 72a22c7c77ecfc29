//! netmuxd - interface multiplexing daemon
//!
//! Entry point for the netmuxd daemon.

use anyhow::Context;
use clap::Parser;
use netmux_core::{MuxConfig, DEFAULT_CONFIG_PATH};
use netmuxd::{Daemon, TomlFileSource};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "netmuxd", version, about = "Multiplexes virtual interfaces over loopback adapters")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace) or a full filter directive
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level).with_context(|| format!("invalid log level {level}"))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("netmuxd: {e:#}");
        return ExitCode::FAILURE;
    }

    if args.check {
        return match MuxConfig::load(&args.config) {
            Ok(config) => {
                info!(bindings = config.bindings.len(), "configuration is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "configuration is invalid");
                ExitCode::FAILURE
            }
        };
    }

    info!("--- Starting netmuxd ---");
    match run_daemon(args).await {
        Ok(()) => {
            info!("netmuxd: Daemon exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "netmuxd: Daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

async fn run_daemon(args: Args) -> anyhow::Result<()> {
    let (shutdown, reload) = setup_signal_handlers();

    let source = Arc::new(TomlFileSource::new(&args.config));
    let daemon = Daemon::start(source)
        .await
        .with_context(|| format!("failed to start from {}", args.config.display()))?;

    daemon.run(shutdown, reload).await?;

    let report = daemon.shutdown().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Ctrl-C raises the shutdown flag; SIGHUP raises the reload flag.
fn setup_signal_handlers() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("netmuxd: Received SIGINT");
            flag.store(true, Ordering::Relaxed);
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let flag = Arc::clone(&reload);
        tokio::spawn(async move {
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "SIGHUP reload unavailable");
                    return;
                }
            };
            while hangup.recv().await.is_some() {
                info!("netmuxd: Received SIGHUP, reloading");
                flag.store(true, Ordering::Relaxed);
            }
        });
    }

    (shutdown, reload)
}
