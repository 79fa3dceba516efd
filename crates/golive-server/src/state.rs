//! Application state.
//!
//! Shared by the content handler and the reload upgrade middleware.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderValue;
use tower::Layer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeader;

use crate::content;
use crate::proxy::ProxyRouter;
use crate::reload::ReloadChannel;

/// Static file responder with the no-cache header applied.
pub(crate) type StaticFiles = SetResponseHeader<ServeDir, HeaderValue>;

/// State shared across all requests of one running server.
pub(crate) struct AppState {
    /// Directory being served.
    pub(crate) root_dir: PathBuf,
    /// Connected reload clients.
    pub(crate) reload: Arc<ReloadChannel>,
    /// Configured proxy rules.
    pub(crate) proxy: ProxyRouter,
    /// Fallback for everything that is not an injected HTML page.
    pub(crate) static_files: StaticFiles,
}

impl AppState {
    pub(crate) fn new(root_dir: PathBuf, reload: Arc<ReloadChannel>, proxy: ProxyRouter) -> Self {
        let static_files = content::no_cache_layer().layer(ServeDir::new(&root_dir));
        Self {
            root_dir,
            reload,
            proxy,
            static_files,
        }
    }
}
