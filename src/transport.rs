//! Transport abstraction for the Eras live query protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and backend. The protocol uses JSON text messages, so
//! every transport implementation must handle message framing internally
//! (e.g., WebSocket frames, length-prefixed TCP, QUIC streams).
//!
//! # Connection Setup & Reconnection
//!
//! Connection setup is NOT part of [`Transport`] — different transports have
//! fundamentally different connection parameters. Instead, the cache takes a
//! [`Connector`]: a factory that produces a fresh connected transport. The
//! background transport loop calls it once at start and again (with backoff)
//! after every disconnect, then resubscribes all registered keys.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use eras_client::error::ErasError;
//! use eras_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ErasError> {
//!         // Send the JSON text message over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ErasError>> {
//!         // Receive the next JSON text message
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ErasError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ErasError;

/// A bidirectional text message transport for the Eras live query protocol.
///
/// Implementors shuttle serialized JSON strings between the client and
/// backend. Each call to [`send`](Transport::send) transmits one complete
/// JSON message; each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it
/// is used inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data. Channel-based
/// implementations (e.g., wrapping `mpsc::Receiver`) are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ErasError::TransportSend`] if the message could not be sent
    /// (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), ErasError>;

    /// Receive the next JSON text message from the backend.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the backend
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, ErasError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), ErasError>;
}

/// A factory that produces connected [`Transport`]s.
///
/// Called once when the cache starts and again after every disconnect (with
/// exponential backoff between attempts). A returned error counts as a
/// failed attempt; the loop backs off and retries.
#[async_trait]
pub trait Connector: Send + 'static {
    /// The transport type this connector produces.
    type Output: Transport;

    /// Establish a fresh connection to the backend.
    async fn connect(&mut self) -> Result<Self::Output, ErasError>;
}
