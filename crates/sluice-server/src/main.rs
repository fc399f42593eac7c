//! Sluice Server
//!
//! Standalone sluice execution server binary.

use clap::Parser;
use sluice_core::{init_telemetry, SluiceConfig, TelemetryConfig};
use sluice_runtime::Orchestrator;
use sluice_sandbox::{ProcessBackend, ProcessBackendConfig};
use sluice_server::{HttpTransport, ReqwestFetcher};
use std::sync::Arc;
use tracing::info;

/// Sluice server CLI
///
/// Flags override the `SLUICE_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "sluice-server")]
#[command(about = "Serialized sandbox execution server")]
#[command(version)]
struct Cli {
    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Admission queue capacity
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// URL of the initialization recipe
    #[arg(long)]
    recipe_url: Option<String>,

    /// Skip real initialization (testing only)
    #[arg(long)]
    dummy_initialization: bool,

    /// Directory the backend bundle is installed into
    #[arg(long)]
    workdir: Option<String>,

    /// Command that runs one execution, whitespace separated
    #[arg(long)]
    entrypoint: Option<String>,

    /// Per-execution timeout in milliseconds
    #[arg(long)]
    exec_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut SluiceConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue.capacity = capacity;
        }
        if let Some(url) = &self.recipe_url {
            config.initialization.recipe_url = Some(url.clone());
        }
        if self.dummy_initialization {
            config.initialization.dummy = true;
        }
        if let Some(workdir) = &self.workdir {
            config.backend.workdir = workdir.clone();
        }
        if let Some(entrypoint) = &self.entrypoint {
            config.backend.entrypoint =
                Some(entrypoint.split_whitespace().map(str::to_string).collect());
        }
        if let Some(timeout_ms) = self.exec_timeout_ms {
            config.backend.exec_timeout_ms = timeout_ms;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _telemetry =
        init_telemetry(TelemetryConfig::new("sluice-server").with_verbosity(cli.verbose))?;

    let mut config = SluiceConfig::from_env();
    cli.apply(&mut config);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind_address,
        pid = std::process::id(),
        "Starting sluice server"
    );

    let backend = ProcessBackend::new(ProcessBackendConfig::from(&config.backend));
    let fetcher = Arc::new(ReqwestFetcher::new()?);
    let transport = HttpTransport::new(config.server.bind_address.clone());

    let mut orchestrator =
        Orchestrator::new(config, Box::new(backend), fetcher)?.with_transport(transport);

    if let Err(e) = orchestrator.start().await {
        orchestrator.stop().await;
        return Err(e.into());
    }

    shutdown_signal().await;
    orchestrator.stop().await;

    Ok(())
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "sluice-server",
            "--bind",
            "127.0.0.1:9100",
            "--queue-capacity",
            "5",
            "--entrypoint",
            "python3 backend/main.py",
            "-vv",
        ]);
        let mut config = SluiceConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.server.bind_address, "127.0.0.1:9100");
        assert_eq!(config.queue.capacity, 5);
        assert_eq!(
            config.backend.entrypoint,
            Some(vec!["python3".to_string(), "backend/main.py".to_string()])
        );
        assert_eq!(cli.verbose, 2);
        assert!(!config.initialization.dummy);
    }
}
