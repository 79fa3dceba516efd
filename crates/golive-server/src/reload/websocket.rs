//! WebSocket endpoint for live reload.
//!
//! Upgrade requests are accepted on any path of the server port, so the
//! injected client can simply connect to `location.host`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::channel::{ClientSignal, RELOAD_MESSAGE, ReloadChannel};
use crate::state::AppState;

/// Middleware that takes over WebSocket upgrade requests.
///
/// Everything else continues to the content handlers.
pub(crate) async fn upgrade(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let (mut parts, _body) = request.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => {
            let channel = Arc::clone(&state.reload);
            ws.on_upgrade(move |socket| handle_socket(socket, channel))
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected WebSocket upgrade");
            rejection.into_response()
        }
    }
}

/// Check for `Connection: upgrade` together with `Upgrade: websocket`.
fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let header_has = |name: header::HeaderName, token: &str| {
        headers.get_all(name).iter().any(|value| {
            value.to_str().is_ok_and(|v| {
                v.split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
        })
    };
    header_has(header::UPGRADE, "websocket") && header_has(header::CONNECTION, "upgrade")
}

/// Handle an established WebSocket connection.
async fn handle_socket(mut socket: WebSocket, channel: Arc<ReloadChannel>) {
    let Some(mut client) = channel.add_client() else {
        // Server is shutting down
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let id = client.id();
    tracing::info!(client = id, "Client connected");

    loop {
        tokio::select! {
            signal = client.recv() => match signal {
                Some(ClientSignal::Reload) => {
                    if socket.send(Message::Text(RELOAD_MESSAGE.into())).await.is_err() {
                        break;
                    }
                }
                Some(ClientSignal::Close) | None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(message)) => {
                    tracing::trace!(client = id, ?message, "Ignoring client message");
                }
            },
        }
    }

    tracing::info!(client = id, "Client disconnected");
}
