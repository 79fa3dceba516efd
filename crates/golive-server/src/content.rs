//! Content serving.
//!
//! Routes every non-upgrade request: HTML pages requested by a browser get the
//! reload snippet injected, existing files are served as-is, configured proxy
//! prefixes are forwarded, and everything else is a 404 from [`ServeDir`].
//!
//! [`ServeDir`]: tower_http::services::ServeDir

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tower::ServiceExt;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::inject::inject_reload_snippet;
use crate::state::AppState;

const NO_CACHE: &str = "no-cache";

/// Create layer that marks responses as not cacheable unless already set.
pub(crate) fn no_cache_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE))
}

/// Serve a request that was not a WebSocket upgrade.
pub(crate) async fn serve(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let path = request.uri().path().to_owned();

    if accepts_html(request.headers())
        && let Some(file) = html_target(&state.root_dir, &path).await
    {
        match tokio::fs::read_to_string(&file).await {
            Ok(html) => return html_response(&html),
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "Failed to read HTML for injection, serving as static file");
            }
        }
    }

    if !static_exists(&state.root_dir, &path).await
        && let Some((rule, rest)) = state.proxy.route(&path)
    {
        tracing::debug!(path = %path, prefix = %rule.prefix, "Forwarding to proxy");
        return state.proxy.forward(rule, rest, request).await;
    }

    serve_static(&state, request).await
}

fn html_response(html: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8")),
            (header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE)),
        ],
        inject_reload_snippet(html),
    )
        .into_response()
}

async fn serve_static(state: &AppState, request: Request) -> Response {
    match state.static_files.clone().oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}

/// Whether any `Accept` header lists `text/html`.
fn accepts_html(headers: &HeaderMap) -> bool {
    headers.get_all(header::ACCEPT).iter().any(|value| {
        value
            .to_str()
            .is_ok_and(|v| v.to_ascii_lowercase().contains("text/html"))
    })
}

/// Resolve the HTML file a browser request refers to.
///
/// Paths ending in `/` resolve to the directory's `index.html`.
async fn html_target(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut file = safe_join(root, request_path)?;
    if request_path.ends_with('/') {
        file.push("index.html");
    }
    if !has_html_extension(&file) {
        return None;
    }
    let metadata = tokio::fs::metadata(&file).await.ok()?;
    metadata.is_file().then_some(file)
}

/// Whether the path is a file, or a directory with an index page, under root.
async fn static_exists(root: &Path, request_path: &str) -> bool {
    let Some(path) = safe_join(root, request_path) else {
        return false;
    };
    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => true,
        Ok(metadata) if metadata.is_dir() => tokio::fs::metadata(path.join("index.html"))
            .await
            .is_ok_and(|m| m.is_file()),
        _ => false,
    }
}

fn has_html_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
}

/// Join a percent-encoded URL path onto `root`.
///
/// Returns `None` for paths that would leave the root or cannot be decoded.
fn safe_join(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(request_path).decode_utf8().ok()?;
    let mut path = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains(['\\', '\0']) => return None,
            s => path.push(s),
        }
    }
    Some(path)
}
