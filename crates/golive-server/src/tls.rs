//! HTTPS support.
//!
//! Loads an existing PEM certificate pair and serves the router over a rustls
//! accept loop. Certificates are never generated here.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;

/// Pause after an accept error that is not tied to a single connection.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Certificate and private key locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsPaths {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

/// Load the certificate pair into a rustls server config.
pub(crate) fn load_server_config(paths: &TlsPaths) -> Result<Arc<rustls::ServerConfig>, ServerError> {
    let certs = load_certs(&paths.cert)?;
    let key = load_key(&paths.key)?;

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ServerError::tls(&paths.cert, e))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ServerError::tls(&paths.cert, e))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::debug!(cert = %paths.cert.display(), key = %paths.key.display(), "Loaded TLS certificate");
    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    require_file(path)?;
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| ServerError::tls(path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::tls(path, e))?;
    if certs.is_empty() {
        return Err(ServerError::tls(path, "no certificates found"));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    require_file(path)?;
    PrivateKeyDer::from_pem_file(path).map_err(|e| ServerError::tls(path, e))
}

fn require_file(path: &Path) -> Result<(), ServerError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ServerError::tls(path, "file not found"))
    }
}

/// Accept TLS connections until `shutdown` fires, then drain open ones.
pub(crate) async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    if let Some(delay) = accept_backoff(&e) {
                        tokio::select! {
                            () = shutdown.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls), service);
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(%peer, error = %e, "Connection closed with error");
                    }
                }
                () = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.await;
                }
            }
        });

        // Reap finished connections
        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

/// Delay before accepting again. Errors about one peer are retried at once;
/// listener-wide ones such as running out of file descriptors back off.
fn accept_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}
