//! Server lifecycle.
//!
//! [`LiveServer`] owns at most one running server. Every transition holds the
//! same async mutex, so concurrent `start` and `stop` calls are serialized and
//! a half-started server is never visible.

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::ServerConfig;
use crate::app;
use crate::error::ServerError;
use crate::port;
use crate::proxy::ProxyRouter;
use crate::reload::ReloadChannel;
use crate::state::AppState;
use crate::tls;
use crate::watcher::{ChangeWatcher, IgnoreSet};

/// How long `stop` waits for open connections before aborting the serve task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Characters escaped in URL path segments.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Snapshot of a running server, reported to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    /// Base URL without trailing slash.
    pub url: String,
    /// Port actually bound.
    pub port: u16,
    /// Canonical root directory being served.
    pub root_dir: PathBuf,
    /// Whether the server speaks HTTPS.
    pub https: bool,
}

impl ServerInfo {
    /// URL of `resource` if it lies under the served root.
    pub fn url_for(&self, resource: &Path) -> Option<String> {
        let resource = resource.canonicalize().ok()?;
        let relative = resource.strip_prefix(&self.root_dir).ok()?;

        let mut url = self.url.clone();
        url.push('/');
        let segments: Vec<String> = relative
            .iter()
            .map(|segment| utf8_percent_encode(&segment.to_string_lossy(), PATH_SEGMENT).to_string())
            .collect();
        url.push_str(&segments.join("/"));
        Some(url)
    }

    /// URL to open after a fresh start: the resource's own for HTML files
    /// under the root, the base URL otherwise.
    fn launch_url(&self, resource: Option<&Path>) -> String {
        self.resource_url(resource.filter(|path| is_html(path)))
    }

    /// URL of any resource under the root, falling back to the base URL.
    fn resource_url(&self, resource: Option<&Path>) -> String {
        resource
            .and_then(|path| self.url_for(path))
            .unwrap_or_else(|| self.url.clone())
    }
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
}

/// Lifecycle state reported to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running(ServerInfo),
    Stopping,
}

/// Result of [`LiveServer::start`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartOutcome {
    /// The running server.
    pub info: ServerInfo,
    /// URL the host should open.
    pub open_url: String,
    /// The server was already running; nothing was started.
    pub already_running: bool,
}

type StateObserver = Box<dyn Fn(&ServerState) + Send + Sync>;
type ErrorObserver = Box<dyn Fn(&ServerError) + Send + Sync>;

/// Handles of a running server. All present together or not at all.
struct RunningServer {
    info: ServerInfo,
    cancel: CancellationToken,
    reload: Arc<ReloadChannel>,
    watcher: ChangeWatcher,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl RunningServer {
    /// Stop every component, reporting the first failure.
    async fn shutdown(&mut self) -> Result<(), ServerError> {
        self.cancel.cancel();
        self.reload.close_all();
        self.watcher.stop();

        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let abort = task.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ServerError::Shutdown(e.to_string())),
            Ok(Err(e)) => Err(ServerError::Shutdown(e.to_string())),
            Err(_) => {
                tracing::warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "Connections still open after grace period, aborting"
                );
                abort.abort();
                Ok(())
            }
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.reload.close_all();
    }
}

enum Lifecycle {
    Stopped,
    Running(RunningServer),
}

/// Live-reloading static file server.
pub struct LiveServer {
    config: ServerConfig,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    status: RwLock<ServerState>,
    state_observers: Mutex<Vec<StateObserver>>,
    error_observers: Mutex<Vec<ErrorObserver>>,
}

impl LiveServer {
    /// Create a stopped server for `config`.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Stopped),
            status: RwLock::new(ServerState::Stopped),
            state_observers: Mutex::new(Vec::new()),
            error_observers: Mutex::new(Vec::new()),
        }
    }

    /// Configuration the server starts with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a callback for every state transition.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(&ServerState) + Send + Sync + 'static,
    {
        self.state_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Register a callback for start and stop failures.
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.error_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Base URL while running.
    pub fn url(&self) -> Option<String> {
        match self.state() {
            ServerState::Running(info) => Some(info.url),
            _ => None,
        }
    }

    /// Number of connected reload clients; zero when stopped.
    pub async fn client_count(&self) -> usize {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(running) => running.reload.client_count(),
            Lifecycle::Stopped => 0,
        }
    }

    /// Start serving, or report the running server if already started.
    ///
    /// `resource` is a file the host wants to open. On a fresh start its URL
    /// is returned in [`StartOutcome::open_url`] when it is an HTML file under
    /// the root. While already running any file under the root is reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is missing, TLS material cannot be
    /// loaded, no port is available or the watcher cannot start. Everything
    /// created up to the failure is torn down first.
    pub async fn start(&self, resource: Option<&Path>) -> Result<StartOutcome, ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Lifecycle::Running(running) = &*lifecycle {
            let info = running.info.clone();
            let open_url = info.resource_url(resource);
            tracing::info!(url = %info.url, "Server already running");
            return Ok(StartOutcome {
                info,
                open_url,
                already_running: true,
            });
        }

        self.set_state(ServerState::Starting);
        match self.launch().await {
            Ok(running) => {
                let info = running.info.clone();
                *lifecycle = Lifecycle::Running(running);
                self.set_state(ServerState::Running(info.clone()));
                tracing::info!(url = %info.url, root = %info.root_dir.display(), "Server started");

                let open_url = info.launch_url(resource);
                Ok(StartOutcome {
                    info,
                    open_url,
                    already_running: false,
                })
            }
            Err(e) => {
                self.set_state(ServerState::Stopped);
                self.emit_error(&e);
                Err(e)
            }
        }
    }

    /// Stop the server. Stopping a stopped server is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first failure while shutting down; every component is
    /// stopped regardless.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running(mut running) = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        else {
            return Ok(());
        };

        self.set_state(ServerState::Stopping);
        let result = running.shutdown().await;
        drop(running);
        self.set_state(ServerState::Stopped);

        match &result {
            Ok(()) => tracing::info!("Server stopped"),
            Err(e) => self.emit_error(e),
        }
        result
    }

    /// Build and start every component. Everything that can be rejected
    /// without a socket is checked before binding; handles created before a
    /// later failure are dropped on the way out, which closes them.
    async fn launch(&self) -> Result<RunningServer, ServerError> {
        let config = &self.config;

        let root_dir = tokio::fs::canonicalize(&config.root_dir)
            .await
            .map_err(|_| ServerError::RootNotFound(config.root_dir.clone()))?;
        if !tokio::fs::metadata(&root_dir)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(ServerError::RootNotFound(config.root_dir.clone()));
        }

        let acceptor = if config.use_https {
            let paths = config.tls.as_ref().ok_or_else(|| {
                ServerError::tls(PathBuf::new(), "HTTPS requires a certificate and key")
            })?;
            Some(TlsAcceptor::from(tls::load_server_config(paths)?))
        } else {
            None
        };

        let ignore = IgnoreSet::new(&config.ignore_patterns)?;

        let cancel = CancellationToken::new();
        let reload = Arc::new(ReloadChannel::new());
        let proxy = ProxyRouter::new(config.proxy_rules.clone(), cancel.child_token())?;
        let state = Arc::new(AppState::new(root_dir.clone(), Arc::clone(&reload), proxy));
        let router = app::create_router(state, config.cors_enabled);

        let (listener, port) =
            port::bind_with_retry(&config.host, config.preferred_port, config.max_port_attempts)
                .await?;

        let broadcast_to = Arc::clone(&reload);
        let watcher = ChangeWatcher::with_ignore(
            &root_dir,
            ignore,
            config.debounce,
            move |event| {
                let clients = broadcast_to.broadcast();
                tracing::info!(path = %event.path.display(), kind = ?event.kind, clients, "Reloading clients");
            },
        )?;

        let token = cancel.clone();
        let task = match acceptor {
            None => tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(token.cancelled_owned())
                    .await
            }),
            Some(acceptor) => tokio::spawn(async move {
                tls::serve_tls(listener, acceptor, router, token).await;
                Ok::<_, io::Error>(())
            }),
        };

        let info = ServerInfo {
            url: base_url(&config.host, port, config.use_https),
            port,
            root_dir,
            https: config.use_https,
        };

        Ok(RunningServer {
            info,
            cancel,
            reload,
            watcher,
            task: Some(task),
        })
    }

    fn set_state(&self, state: ServerState) {
        tracing::debug!(state = ?state, "Server state changed");
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = state.clone();
        for observer in self
            .state_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            observer(&state);
        }
    }

    fn emit_error(&self, error: &ServerError) {
        tracing::error!(error = %error, "Server error");
        for observer in self
            .error_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            observer(error);
        }
    }
}

/// Base URL for a bound address. Wildcard hosts are shown as `localhost`.
fn base_url(host: &str, port: u16, https: bool) -> String {
    let scheme = if https { "https" } else { "http" };
    let host = match host.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => "localhost".to_owned(),
        Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
        _ => host.to_owned(),
    };
    format!("{scheme}://{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(root: &Path) -> ServerInfo {
        ServerInfo {
            url: "http://127.0.0.1:5500".to_owned(),
            port: 5500,
            root_dir: root.canonicalize().unwrap(),
            https: false,
        }
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("127.0.0.1", 5500, false), "http://127.0.0.1:5500");
        assert_eq!(base_url("0.0.0.0", 5500, true), "https://localhost:5500");
        assert_eq!(base_url("::1", 8080, false), "http://[::1]:8080");
        assert_eq!(base_url("localhost", 8080, false), "http://localhost:8080");
    }

    #[test]
    fn test_url_for_nested_resource() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("my docs")).unwrap();
        let page = dir.path().join("my docs/page.html");
        std::fs::write(&page, "").unwrap();

        assert_eq!(
            info(dir.path()).url_for(&page).as_deref(),
            Some("http://127.0.0.1:5500/my%20docs/page.html")
        );
    }

    #[test]
    fn test_url_for_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let page = other.path().join("page.html");
        std::fs::write(&page, "").unwrap();

        assert_eq!(info(root.path()).url_for(&page), None);
    }

    #[test]
    fn test_launch_url_only_follows_html() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("about.HTM");
        let script = dir.path().join("app.js");
        std::fs::write(&page, "").unwrap();
        std::fs::write(&script, "").unwrap();
        let info = info(dir.path());

        assert_eq!(info.launch_url(Some(&page)), "http://127.0.0.1:5500/about.HTM");
        assert_eq!(info.launch_url(Some(&script)), "http://127.0.0.1:5500");
        assert_eq!(info.launch_url(None), "http://127.0.0.1:5500");
    }

    #[test]
    fn test_resource_url_follows_any_file_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let script = dir.path().join("app.js");
        let outside = other.path().join("page.html");
        std::fs::write(&script, "").unwrap();
        std::fs::write(&outside, "").unwrap();
        let info = info(dir.path());

        assert_eq!(info.resource_url(Some(&script)), "http://127.0.0.1:5500/app.js");
        assert_eq!(info.resource_url(Some(&outside)), "http://127.0.0.1:5500");
        assert_eq!(info.resource_url(None), "http://127.0.0.1:5500");
    }

    #[tokio::test]
    async fn test_missing_root_fails_before_binding() {
        let server = LiveServer::new(ServerConfig {
            root_dir: PathBuf::from("/nonexistent/golive/site"),
            preferred_port: 0,
            ..ServerConfig::default()
        });
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        server.on_error(move |e| seen.lock().unwrap().push(e.to_string()));

        let err = server.start(None).await.unwrap_err();

        assert!(matches!(err, ServerError::RootNotFound(_)));
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_transitions_are_observed() {
        let dir = tempfile::tempdir().unwrap();
        let server = LiveServer::new(ServerConfig {
            root_dir: dir.path().to_path_buf(),
            preferred_port: 0,
            ..ServerConfig::default()
        });
        let states = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&states);
        server.on_state_change(move |state| {
            let name = match state {
                ServerState::Stopped => "stopped",
                ServerState::Starting => "starting",
                ServerState::Running(_) => "running",
                ServerState::Stopping => "stopping",
            };
            seen.lock().unwrap().push(name);
        });

        server.start(None).await.unwrap();
        server.stop().await.unwrap();

        assert_eq!(
            *states.lock().unwrap(),
            vec!["starting", "running", "stopping", "stopped"]
        );
    }
}
