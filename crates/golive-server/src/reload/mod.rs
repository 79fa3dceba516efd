//! Live reload push channel.
//!
//! Keeps the set of connected browsers and delivers the `reload` payload to
//! them over WebSocket when the watched tree changes.

mod channel;
mod websocket;

pub use channel::{ClientConnection, ClientSignal, RELOAD_MESSAGE, ReloadChannel};
pub(crate) use websocket::upgrade;
