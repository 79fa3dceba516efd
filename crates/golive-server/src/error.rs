//! Error types for the server lifecycle.
//!
//! Only failures that stop a server from starting or stopping cleanly are
//! errors. Per-request failures (unreachable proxy upstream, unreadable HTML)
//! are turned into responses where they happen.

use std::io;
use std::path::PathBuf;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configured root directory does not exist or is not a directory.
    #[error("Root directory not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// Every port in the retry range was already in use.
    #[error("No available port found starting at {first} ({attempts} attempts)")]
    PortExhausted {
        /// Preferred port the search started from.
        first: u16,
        /// Number of ports tried.
        attempts: u16,
    },

    /// Bind failed for a reason other than the port being in use.
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        /// Port that was being bound.
        port: u16,
        /// Underlying socket error.
        source: io::Error,
    },

    /// Certificate or private key could not be loaded.
    #[error("TLS error ({}): {message}", .path.display())]
    Tls {
        /// File the error relates to.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Ignore pattern is not a valid glob.
    #[error("Invalid ignore pattern {pattern:?}: {source}")]
    IgnorePattern {
        /// Offending pattern.
        pattern: String,
        /// Glob parse error.
        source: glob::PatternError,
    },

    /// File watcher could not be created.
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// HTTP client for proxy rules could not be created.
    #[error("Failed to create proxy client: {0}")]
    ProxyClient(#[from] reqwest::Error),

    /// Serve task failed while shutting down.
    #[error("Server shutdown failed: {0}")]
    Shutdown(String),
}

impl ServerError {
    /// Create a TLS error for `path`.
    pub(crate) fn tls(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Tls {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this is a bind failure caused by missing permissions.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Bind { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }
}
