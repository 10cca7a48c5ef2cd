//! Built-in [`Transport`](crate::transport::Transport) implementations.
//!
//! Currently provides a WebSocket transport behind the default
//! `transport-websocket` feature. Custom transports (length-prefixed TCP,
//! QUIC, in-process channels for tests) implement the trait directly.

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
