//! `golive serve` command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use golive_config::{CliSettings, Config};
use golive_server::{LiveServer, server_config_from_golive_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// File to open once the server is up (HTML files under the root).
    resource: Option<PathBuf>,

    /// Path to configuration file (default: auto-discover golive.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to serve (overrides config).
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Preferred port (overrides config).
    #[arg(short, long, env = "GOLIVE_PORT")]
    port: Option<u16>,

    /// Serve over HTTPS using the configured certificate pair.
    #[arg(long)]
    https: bool,

    /// Do not send CORS headers.
    #[arg(long)]
    no_cors: bool,

    /// Glob pattern to exclude from watching; replaces the configured list.
    #[arg(long = "ignore", value_name = "PATTERN")]
    ignore: Vec<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// Runs until Ctrl-C or SIGTERM, then stops the server once.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Arc::new(Output::new());

        let config = Config::load(self.config.as_deref(), Some(&self.cli_settings()))?;
        if let Some(path) = &config.config_path {
            output.info(&format!("Config: {}", path.display()));
        }
        output.info(&format!("Root directory: {}", config.root_dir.display()));
        for (prefix, target) in &config.proxy {
            output.info(&format!("Proxy: {prefix} -> {target}"));
        }

        let server = LiveServer::new(server_config_from_golive_config(&config));

        let status = Arc::clone(&output);
        server.on_state_change(move |state| status.server_state(state));
        let errors = Arc::clone(&output);
        server.on_error(move |error| errors.hint(error));

        let outcome = server.start(self.resource.as_deref()).await?;
        output.open_url(&outcome.open_url);
        if let Some(browser) = &server.config().browser {
            output.info(&format!("Browser: {browser}"));
        }

        shutdown_signal().await;
        server.stop().await?;

        Ok(())
    }

    /// Build config overrides from the command line.
    fn cli_settings(&self) -> CliSettings {
        CliSettings {
            root: self.root.clone(),
            host: self.host.clone(),
            port: self.port,
            https: self.https.then_some(true),
            cors: self.no_cors.then_some(false),
            ignore: (!self.ignore.is_empty()).then(|| self.ignore.clone()),
        }
    }
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
