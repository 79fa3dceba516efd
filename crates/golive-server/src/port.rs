//! Listening socket acquisition with sequential port retry.

use std::io;

use tokio::net::TcpListener;

use crate::error::ServerError;

/// Bind `host` starting at `preferred_port`, moving to the next port while
/// the current one is in use.
///
/// At most `max_attempts` ports are tried. Any bind failure other than
/// "address in use" is returned immediately. Each failed attempt owns its
/// socket, so nothing from a previous attempt is still open when the next
/// one starts.
///
/// Returns the listener together with the port it is actually bound to.
pub async fn bind_with_retry(
    host: &str,
    preferred_port: u16,
    max_attempts: u16,
) -> Result<(TcpListener, u16), ServerError> {
    let mut attempts = 0;

    for offset in 0..max_attempts {
        let Some(port) = preferred_port.checked_add(offset) else {
            break;
        };
        attempts += 1;

        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                let bound = listener
                    .local_addr()
                    .map_err(|source| ServerError::Bind { port, source })?
                    .port();
                if bound != preferred_port {
                    tracing::info!(
                        preferred_port,
                        port = bound,
                        "Preferred port busy, using next free port"
                    );
                }
                return Ok((listener, bound));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port in use");
            }
            Err(source) => return Err(ServerError::Bind { port, source }),
        }
    }

    Err(ServerError::PortExhausted {
        first: preferred_port,
        attempts,
    })
}
