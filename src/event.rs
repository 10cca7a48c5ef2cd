//! Observability events emitted by the query cache.

use crate::key::CacheKey;

/// Lifecycle events emitted on the bounded channel returned from
/// [`QueryCache::start`](crate::cache::QueryCache::start).
///
/// These exist for observability (connection banners, diagnostics); cache
/// values themselves flow through [`Subscription`](crate::cache::Subscription)
/// handles, never through this channel.
///
/// When the consumer cannot keep up, events are dropped with a warning —
/// except [`Disconnected`](CacheEvent::Disconnected), which is always
/// delivered as the last event before the loop exits or reconnects.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// The transport connected and authentication was sent.
    Connected,
    /// The backend confirmed authentication.
    Authenticated,
    /// The transport disconnected. The loop will reconnect with backoff
    /// unless the cache is shutting down.
    Disconnected { reason: Option<String> },
    /// After a reconnect, this many keys were resubscribed for resync.
    Resubscribed { keys: usize },
    /// An unobserved entry outlived the grace period and was evicted.
    Evicted { key: CacheKey },
}
