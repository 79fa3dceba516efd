//! Router construction.
//!
//! One fallback handler serves every path; WebSocket upgrades are taken over
//! by middleware before they reach it.

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::content;
use crate::reload;
use crate::state::AppState;

/// Create the application router.
pub(crate) fn create_router(state: Arc<AppState>, cors_enabled: bool) -> Router {
    let mut router = Router::new()
        .fallback(content::serve)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            reload::upgrade,
        ));

    if cors_enabled {
        router = router.layer(cors_layer());
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Create layer that allows any origin, method and header.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
