//! vshell agent
//!
//! Serves interactive shells to the host over vsock.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use vshell_agent::config::{default_config_path, AgentConfig, Config};
use vshell_agent::{Acceptor, Listener, Transport};

/// vshell agent - interactive shells for the host over vsock.
#[derive(Parser, Debug)]
#[command(name = "vshell-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the agent.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Listen for connections and serve shells
    Serve(ServeArgs),

    /// Print the effective configuration as TOML
    PrintConfig,

    /// Write the effective configuration to a file
    WriteConfig {
        /// Destination (defaults to --config, then the per-user config path)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

/// Listener overrides for `serve`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Transport to listen on (vsock, unix, tcp)
    #[arg(long)]
    pub transport: Option<Transport>,

    /// vsock port
    #[arg(long)]
    pub port: Option<u32>,

    /// Socket path for the unix transport
    #[arg(long, value_name = "PATH")]
    pub unix_path: Option<PathBuf>,

    /// Address for the tcp transport
    #[arg(long, value_name = "HOST:PORT")]
    pub tcp_address: Option<String>,
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(transport) = self.transport {
            config.listener.transport = transport;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(path) = &self.unix_path {
            config.listener.unix_path = path.clone();
        }
        if let Some(address) = &self.tcp_address {
            config.listener.tcp_address = address.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .clone()
        .unwrap_or_else(|| Commands::Serve(ServeArgs::default()));

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides, then command line overrides
    config.apply_env_overrides();
    if let Commands::Serve(args) = &command {
        args.apply(&mut config);
    }

    match command {
        Commands::PrintConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::WriteConfig { path } => {
            let path = write_config(&config, path.as_deref(), cli.config.as_deref())?;
            println!("Configuration written to {}", path.display());
            Ok(())
        }
        Commands::Serve(_) => {
            let _guard = init_logging(&config.agent, cli.verbose)?;
            config.validate()?;
            if let Some(path) = &cli.config {
                tracing::info!(path = %path.display(), "Using config file");
            }
            serve(config).await
        }
    }
}

/// Saves `config` to `path`, falling back to the file it was loaded from and
/// then to the default location. Returns where it was written.
fn write_config(
    config: &Config,
    path: Option<&Path>,
    loaded_from: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let path = path
        .or(loaded_from)
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    config.save(&path)?;
    Ok(path)
}

/// Initializes tracing.
///
/// `RUST_LOG` takes precedence, then `--verbose`, then the configured level.
/// The returned guard must live as long as logging is needed.
fn init_logging(agent: &AgentConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new(&agent.log_level),
    };

    match &agent.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let listener = Listener::bind(&config.listener)
        .await
        .with_context(|| format!("Failed to bind {} listener", config.listener.transport))?;
    let address = listener
        .local_addr()
        .unwrap_or_else(|_| config.listener.transport.to_string());

    println!(
        "vshell-agent v{} - listening on {}",
        env!("CARGO_PKG_VERSION"),
        address
    );
    tracing::info!(
        transport = %config.listener.transport,
        address = %address,
        shells = ?config.session.shells,
        "Agent started"
    );

    let acceptor = Acceptor::new(listener, config.session);
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => signal_token.cancel(),
            Err(e) => tracing::error!(error = %e, "Failed to register signal handlers"),
        }
    });

    acceptor.serve(shutdown).await?;
    tracing::info!("Agent stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }

    Ok(())
}
