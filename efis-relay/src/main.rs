//! EFIS relay daemon
//!
//! - **UDP 7777**: analog signal packets to every configured display
//! - **UDP 5860**: sensor frames to every configured display
//!
//! Runs until the source ends or SIGINT/SIGTERM arrives, then exits with the
//! source's status.

use clap::Parser;
use efis_relay::codec::SensorIdTable;
use efis_relay::config::{AppConfig, SourceKind};
use efis_relay::error::{Error, Result};
use efis_relay::sources::create_source;
use efis_relay::{Dispatcher, SignalRegistry};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Parser, Debug)]
#[command(name = "efis-relay", version, about = "Relay flight telemetry to EFIS displays")]
struct Args {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Telemetry source
    #[arg(short, long, value_enum)]
    source: Option<SourceKind>,

    /// Display host; repeat for several (replaces network.hosts)
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Signal list file
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Log filter, e.g. `info` or `efis_relay=debug`
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    if let Some(kind) = args.source {
        config.source.kind = kind;
    }
    if !args.hosts.is_empty() {
        config.network.hosts = args.hosts.clone();
    }
    if let Some(schema) = &args.schema {
        config.schema.path = schema.display().to_string();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Clear `running` on SIGINT or SIGTERM
fn install_signal_handler(running: Arc<AtomicBool>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                log::info!("Received signal {}, shutting down", sig);
                running.store(false, Ordering::Relaxed);
            }
        })
        .map_err(|e| Error::Spawn(format!("signal handler: {}", e)))?;
    Ok(())
}

fn run(config: &AppConfig) -> Result<i32> {
    let registry = SignalRegistry::from_file(&config.schema.path)?;

    let id_table = Arc::new(SensorIdTable::new());
    for (name, id) in id_table.snapshot() {
        log::info!("Sensor id {}: {}", id, name);
    }

    let mut dispatcher = Dispatcher::new(config, &registry, Arc::clone(&id_table))?;
    let mut source = create_source(config, &registry)?;

    let running = Arc::new(AtomicBool::new(true));
    install_signal_handler(Arc::clone(&running))?;

    Ok(dispatcher.run(source.as_mut(), &running))
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("efis-relay: {}", e);
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("EFIS relay v{} starting", env!("CARGO_PKG_VERSION"));

    match run(&config) {
        Ok(status) => {
            log::info!("Finished with code {}", status);
            std::process::exit(status);
        }
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}
