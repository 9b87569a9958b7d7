//! honeypot-lab - supervisor and worker entry point
//!
//! Without a subcommand this is the supervisor: it reads the settings,
//! spawns one worker per enabled protocol and shows their status. The
//! hidden `worker` subcommand runs a single decoy service.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use honeypot_lab::{
    build_service, get_logger, run_worker, BindAddr, LogSettings, Protocol, ServiceDescriptor,
    Settings, Supervisor, SupervisorOptions, WorkerSpec, DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Multi-protocol honeypot lab
#[derive(Parser, Debug)]
#[command(name = "honeypot-lab")]
#[command(about = "Decoy SSH, FTP and HTTP services under a process supervisor", long_about = None)]
struct Args {
    /// Settings file (or set HONEYPOT_CONFIG env var)
    #[arg(short, long, env = "HONEYPOT_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Log level for diagnostics on stderr
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run a single decoy service
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(clap::Args, Debug)]
struct WorkerArgs {
    #[arg(value_enum)]
    protocol: Protocol,

    #[arg(long)]
    host: String,

    #[arg(long)]
    port: u16,

    /// FTP trap root
    #[arg(long, default_value = "ftp_trap_dir")]
    ftp_root: PathBuf,

    #[arg(long, default_value_t = 60000)]
    passive_first: u16,

    #[arg(long, default_value_t = 60009)]
    passive_last: u16,

    /// SSH host key (OpenSSH private key)
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Allow a per-process SSH host key
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    ephemeral_host_key: bool,
}

impl WorkerArgs {
    fn into_spec(self) -> WorkerSpec {
        WorkerSpec {
            protocol: self.protocol,
            bind: BindAddr::new(self.host, self.port),
            ftp_root: self.ftp_root,
            passive_ports: (self.passive_first, self.passive_last),
            host_key: self.host_key,
            ephemeral_host_key: self.ephemeral_host_key,
        }
    }
}

async fn supervise(config: PathBuf) -> Result<()> {
    let settings = Settings::load(&config)?;
    let exe = std::env::current_exe().context("Failed to locate the current executable")?;

    let services = ServiceDescriptor::from_settings(&settings, &exe, &config);
    Supervisor::new(services, SupervisorOptions::default()).run().await
}

async fn work(config: PathBuf, args: WorkerArgs) -> Result<()> {
    let spec = args.into_spec();
    let log_settings = LogSettings::load_or_default(&config);
    let logger = get_logger(spec.protocol.module(), &log_settings);

    let service = build_service(&spec, logger.clone())?;
    run_worker(service, logger).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        None => {
            info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "honeypot-lab starting");
            supervise(args.config).await
        }
        Some(Mode::Worker(worker)) => work(args.config, worker).await,
    };

    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "Fatal error");
    }
    result
}
