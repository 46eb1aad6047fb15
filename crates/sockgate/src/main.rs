//! # sockgate
//!
//! Gateway binary: loads settings, starts the WebSocket gateway and serves
//! until Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sockgate_core::logging::{LogFormat, init_subscriber};
use sockgate_server::{GatewayContext, GatewayServer, ServerConfig, StaticTokenAuth};
use sockgate_settings::SockgateSettings;

/// Local WebSocket gateway emulator.
#[derive(Parser, Debug)]
#[command(name = "sockgate", about = "Local WebSocket gateway emulator", version)]
struct Cli {
    /// Settings file (defaults to `~/.sockgate/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Do not install the built-in actions.
    #[arg(long)]
    no_builtin: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<SockgateSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(sockgate_settings::settings_path);
        let mut settings = sockgate_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }

    fn log_format(&self) -> LogFormat {
        if self.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        args.log_format()
    };
    init_subscriber(settings.log_level(), format);

    let metrics = match sockgate_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let context = GatewayContext::from_settings(&settings.gateway)
        .await
        .context("Failed to initialise gateway")?;

    let mut builder = GatewayServer::builder()
        .config(ServerConfig::from(&settings.server))
        .context(context)
        .connect_handler(StaticTokenAuth::from_settings(&settings.auth));
    if !args.no_builtin {
        builder = builder.builtin_handlers();
    }
    if let Some(handle) = metrics {
        builder = builder.metrics(handle);
    }
    let server = builder.build();

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "sockgate listening on ws://{addr}{} (stage {})",
        server.config().websocket_path,
        settings.gateway.stage
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown_gracefully(handle, Some(SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
