//! # Eras Client
//!
//! Transport-agnostic Rust client for the Eras live query protocol: a
//! reactive query cache with push-based subscriptions for the Eras
//! multiplayer timeline game.
//!
//! The backend is the sole source of truth. The client subscribes canonical
//! cache keys; the backend answers each subscription with the current value
//! and a version, then pushes every subsequent change. Entries are *never
//! stale* — there is no polling and no TTL refetch — and versions are
//! monotonic per key, so duplicated or reordered pushes are discarded.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any
//!   backend; a [`Connector`](transport::Connector) factory drives
//!   automatic reconnect with backoff and full resubscribe
//! - **Request coalescing** — concurrent subscribers of one key share a
//!   single fetch-or-subscribe
//! - **Grace-period eviction** — unobserved entries survive briefly so
//!   rapid remounts never refetch
//! - **Hydration** — a server-rendering pass can export `Ready` entries for
//!   the first page payload, and the client pre-populates them before
//!   connecting
//! - **Pure phase derivation** — [`GameView::derive`] maps a snapshot to a
//!   closed view-selection enum with exhaustive matching
//! - **WebSocket built-in** — the default `transport-websocket` feature
//!   provides `WebSocketConnector`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eras_client::cache::{QueryCache, QueryCacheConfig};
//! use eras_client::key::QueryDescriptor;
//! use eras_client::transports::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new("wss://live.eras.example/ws");
//! let (cache, mut events) = QueryCache::start(connector, QueryCacheConfig::new(token));
//!
//! let query = QueryDescriptor::new("games.byJoinCode", &serde_json::json!({
//!     "joinCode": "BRONZE-AGE",
//! }))?;
//! let mut sub = cache.subscribe(&query)?;
//! let (value, version) = sub.wait_ready().await?;
//! ```

pub mod cache;
pub mod error;
pub mod event;
pub mod key;
pub mod phase;
pub mod protocol;
pub mod snapshot;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use cache::{HydratedQuery, QueryCache, QueryCacheConfig, QueryState, Subscription};
pub use error::ErasError;
pub use event::CacheEvent;
pub use key::{CacheKey, QueryDescriptor};
pub use phase::GameView;
pub use protocol::{ClientMessage, FetchErrorCode, ServerMessage};
pub use snapshot::{GamePhase, GameSnapshot};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
