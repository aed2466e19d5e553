//! dimd: peer daemon binary.
//!
//! Binds the listen URL, prints `READY <url>` on stdout once it accepts
//! connections, then serves until interrupted or asked to shut down by a
//! peer. Logs go to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use dim_transport::daemon::process::READY_PREFIX;
use dim_transport::utils::logging::init_logging;
use dim_transport::{DimConfig, DimError, PeerDaemon, PeerUrl, Result};

#[derive(Parser, Debug)]
#[command(name = "dimd", about = "Direct interconnect peer daemon")]
struct Cli {
    /// Peer URL to bind, e.g. tcp://10.0.0.5:6367. Port 0 picks a free port.
    #[arg(long)]
    listen: String,

    /// TOML configuration file; the flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bytes moved per bulk round trip.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Largest object accepted by `set`, in bytes.
    #[arg(long)]
    max_object_size: Option<u64>,

    /// Maximum concurrent client connections.
    #[arg(long)]
    max_connections: Option<usize>,

    /// How long to wait for connections to drain on shutdown.
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,

    /// Deadline on each bulk round trip with a client.
    #[arg(long)]
    bulk_timeout_ms: Option<u64>,

    /// trace, debug, info, warn or error.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    /// Suppress all log output.
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn into_config(self) -> Result<(PeerUrl, DimConfig)> {
        let mut config = match &self.config {
            Some(path) => DimConfig::from_file(path)?,
            None => DimConfig::default(),
        };

        if let Some(size) = self.chunk_size {
            config.transport.bulk_chunk_size = size;
        }
        if let Some(size) = self.max_object_size {
            config.transport.max_object_size = size;
        }
        if let Some(max) = self.max_connections {
            config.daemon.max_connections = max;
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.daemon.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.bulk_timeout_ms {
            config.transport.bulk_timeout = Duration::from_millis(ms);
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level = level
                .parse()
                .map_err(|_| DimError::ConfigError(format!("Invalid log level: {level}")))?;
        }
        config.logging.json_format |= self.json_logs;
        if self.quiet {
            config.logging.log_to_console = false;
        }
        config.logging.app_name = String::from("dimd");

        config.validate_strict()?;
        Ok((self.listen.parse()?, config))
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (url, config) = cli.into_config()?;
    init_logging(&config.logging);

    let daemon = PeerDaemon::bind(&url, &config).await?;
    {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{READY_PREFIX}{}", daemon.url())?;
        stdout.flush()?;
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(()).await;
    });

    daemon.run(shutdown_rx).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon failed");
            eprintln!("dimd: {e}");
            ExitCode::FAILURE
        }
    }
}
