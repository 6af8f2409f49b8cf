//! logship - ships appended log file bytes to a central collector.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use logship::client::StreamManager;
use logship::config::{ConfigLoader, Mode};
use logship::metrics::{AtomicMetrics, Metrics, MetricsServer, NoopMetrics};
use logship::server::Server;

#[derive(Parser)]
#[command(
    name = "logship",
    about = "Ships appended log file bytes to a central collector",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file path. Defaults to the standard search locations.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept streams and write them to sink files.
    Serve {
        /// Listen address, overriding the config.
        #[arg(long)]
        listen: Option<String>,
        /// Sink base directory, overriding the config.
        #[arg(long)]
        base_directory: Option<PathBuf>,
    },
    /// Tail the configured inputs and ship them.
    Ship {
        /// Collector address, overriding the config.
        #[arg(long)]
        server: Option<String>,
        /// Hostname to announce, overriding the config.
        #[arg(long)]
        hostname: Option<String>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::warn!(error = %e, "Unable to listen for shutdown signal"),
        }
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = match cli.config.clone() {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            return ExitCode::FAILURE;
        }
    };

    let mode = match &cli.command {
        Some(Commands::Serve {
            listen,
            base_directory,
        }) => {
            if let Some(listen) = listen {
                config.server.listen_address.clone_from(listen);
            }
            if let Some(dir) = base_directory {
                config.server.base_directory.clone_from(dir);
            }
            Mode::Server
        }
        Some(Commands::Ship { server, hostname }) => {
            if let Some(server) = server {
                config.target.server.clone_from(server);
            }
            if let Some(hostname) = hostname {
                config.target.hostname = Some(hostname.clone());
            }
            Mode::Client
        }
        None => config.effective_mode(),
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let metrics: Arc<dyn Metrics> = if config.metrics.enabled {
        let counters = Arc::new(AtomicMetrics::new());
        let endpoint = MetricsServer::new(
            config.metrics.listen.clone(),
            Arc::clone(&counters),
            cancel.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = endpoint.run().await {
                tracing::error!(error = %e, "Metrics endpoint failed");
            }
        });
        counters
    } else {
        Arc::new(NoopMetrics)
    };

    let result = match mode {
        Mode::Server => {
            let server = Server::new(
                config.server.listen_address.clone(),
                config.server.base_directory.clone(),
                metrics,
            );
            server
                .run(cancel.clone())
                .await
                .map_err(|e| e.to_string())
        }
        Mode::Client => {
            if config.target.server.is_empty() {
                tracing::error!("No target server configured");
                return ExitCode::FAILURE;
            }
            if config.inputs.is_empty() {
                tracing::warn!("No inputs configured, nothing to ship");
            }
            StreamManager::from_config(&config, cancel.clone())
                .run()
                .await
                .map_err(|e| e.to_string())
        }
    };

    cancel.cancel();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
