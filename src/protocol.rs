//! Wire-compatible protocol types for the Eras live query protocol.
//!
//! Every type in this module produces identical JSON to the backend's
//! protocol module. Messages are JSON text frames tagged with `type` and
//! carrying their payload under `data`.
//!
//! The protocol is deliberately small: the client authenticates once, then
//! subscribes cache keys. A `Subscribe` is a *fetch-or-subscribe* — the
//! backend answers with an [`Update`](ServerMessage::Update) carrying the
//! current value and version, then keeps pushing newer versions until the
//! key is unsubscribed.

use serde::{Deserialize, Serialize};

use crate::key::{CacheKey, QueryDescriptor};

/// Message types sent from client to backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Authenticate with an opaque credential (MUST be first message).
    ///
    /// The credential is issued by the identity provider; the client treats
    /// it as an opaque string.
    Authenticate {
        /// Opaque credential from the identity provider.
        credential: String,
        /// SDK version for debugging and analytics.
        #[serde(skip_serializing_if = "Option::is_none")]
        sdk_version: Option<String>,
        /// Platform identifier (e.g. `"rust"`, `"web"`).
        #[serde(skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },
    /// Fetch the current value for a query and subscribe to future pushes.
    Subscribe {
        /// Canonical key the client derived for the descriptor.
        key: CacheKey,
        /// The descriptor itself, so the backend can resolve the query.
        query: QueryDescriptor,
    },
    /// Stop receiving pushes for a key.
    Unsubscribe { key: CacheKey },
    /// Heartbeat to maintain connection.
    Ping,
}

/// Message types sent from backend to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Authentication successful.
    Authenticated {
        /// Backend-side identifier of the authenticated user, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<uuid::Uuid>,
    },
    /// Authentication failed.
    AuthenticationError {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<FetchErrorCode>,
    },
    /// A new value for a subscribed key.
    ///
    /// Sent both as the initial fetch response and for every subsequent
    /// backend-side change. `version` is non-decreasing per key.
    Update {
        key: CacheKey,
        value: serde_json::Value,
        version: u64,
    },
    /// The backend rejected or errored a query.
    QueryError {
        key: CacheKey,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<FetchErrorCode>,
    },
    /// Pong response to ping.
    Pong,
    /// Connection-level error not tied to a specific key.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<FetchErrorCode>,
    },
}

/// Structured error codes returned by the Eras backend.
///
/// Sent as `"SCREAMING_SNAKE_CASE"` strings (e.g. `"QUERY_NOT_FOUND"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchErrorCode {
    Unauthorized,
    InvalidCredential,
    QueryNotFound,
    InvalidArguments,
    GameNotFound,
    RateLimitExceeded,
    InternalError,
}

impl FetchErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Access denied. The credential is missing or lacks permission.",
            Self::InvalidCredential => {
                "The credential is invalid or has expired. Obtain a new one from the identity provider."
            }
            Self::QueryNotFound => "The named query does not exist on this backend.",
            Self::InvalidArguments => "The query arguments failed backend validation.",
            Self::GameNotFound => "No game matches the given identifier or join code.",
            Self::RateLimitExceeded => "Too many requests in a short time. Slow down and retry later.",
            Self::InternalError => "An internal backend error occurred. Try again later.",
        }
    }
}

impl std::fmt::Display for FetchErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
