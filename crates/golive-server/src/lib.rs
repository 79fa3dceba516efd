//! Live-reloading static file server.
//!
//! Serves a directory over HTTP(S), injects a small reload client into HTML
//! pages, and tells connected browsers to reload whenever a file under the
//! root changes. Configured path prefixes can be forwarded to upstream
//! servers.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use golive_server::{LiveServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = LiveServer::new(ServerConfig {
//!         root_dir: PathBuf::from("site"),
//!         ..ServerConfig::default()
//!     });
//!
//!     let outcome = server.start(None).await.unwrap();
//!     println!("Serving at {}", outcome.info.url);
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.stop().await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum router (one port)
//!                        │
//!                        ├─► WebSocket upgrade ──► ReloadChannel ◄── ChangeWatcher (notify)
//!                        │
//!                        ├─► HTML + Accept: text/html ──► reload snippet injection
//!                        │
//!                        ├─► existing file ──► ServeDir
//!                        │
//!                        └─► proxy prefix ──► reqwest ──► upstream
//! ```

mod app;
mod content;
mod error;
mod inject;
mod lifecycle;
mod port;
mod proxy;
mod reload;
mod state;
mod tls;
mod watcher;

use std::path::PathBuf;
use std::time::Duration;

pub use error::ServerError;
pub use inject::{RELOAD_SNIPPET, inject_reload_snippet};
pub use lifecycle::{LiveServer, ServerInfo, ServerState, StartOutcome};
pub use port::bind_with_retry;
pub use proxy::{ProxyRule, ProxyRules};
pub use reload::{ClientConnection, ClientSignal, RELOAD_MESSAGE, ReloadChannel};
pub use tls::TlsPaths;
pub use watcher::{ChangeEvent, ChangeKind, ChangeWatcher};

/// Server configuration. Immutable for the lifetime of a run.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port tried first.
    pub preferred_port: u16,
    /// Consecutive ports to try when the preferred one is taken.
    pub max_port_attempts: u16,
    /// Directory to serve and watch.
    pub root_dir: PathBuf,
    /// Browser override, passed through to the host.
    pub browser: Option<String>,
    /// Serve over HTTPS.
    pub use_https: bool,
    /// Certificate pair, required when `use_https` is set.
    pub tls: Option<TlsPaths>,
    /// Send permissive CORS headers.
    pub cors_enabled: bool,
    /// Reverse proxy rules in routing order.
    pub proxy_rules: ProxyRules,
    /// Glob patterns excluded from watching.
    pub ignore_patterns: Vec<String>,
    /// Quiet period before a change triggers a reload.
    pub debounce: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            preferred_port: 5500,
            max_port_attempts: 10,
            root_dir: PathBuf::from("."),
            browser: None,
            use_https: false,
            tls: None,
            cors_enabled: true,
            proxy_rules: ProxyRules::new(),
            ignore_patterns: vec![
                ".git".to_owned(),
                ".vscode".to_owned(),
                "node_modules".to_owned(),
            ],
            debounce: Duration::from_millis(100),
        }
    }
}

/// Create server configuration from a loaded golive config.
#[must_use]
pub fn server_config_from_golive_config(config: &golive_config::Config) -> ServerConfig {
    ServerConfig {
        host: config.server.host.clone(),
        preferred_port: config.server.port,
        max_port_attempts: config.server.max_port_attempts,
        root_dir: config.root_dir.clone(),
        browser: config.server.browser().map(str::to_owned),
        use_https: config.server.https,
        tls: Some(TlsPaths {
            cert: config.tls_resolved.cert.clone(),
            key: config.tls_resolved.key.clone(),
        }),
        cors_enabled: config.server.cors,
        proxy_rules: config
            .proxy
            .iter()
            .map(|(prefix, target)| (prefix.clone(), target.clone()))
            .collect(),
        ignore_patterns: config.watch.ignore.clone(),
        debounce: Duration::from_millis(config.watch.debounce_ms),
    }
}
