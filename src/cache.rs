//! Reactive query cache and subscription layer.
//!
//! [`QueryCache`] is the single mutable shared resource of the crate: one
//! entry per canonical cache key, holding the latest pushed value, its
//! version, and the attached observers. A background transport loop owns the
//! connection to the backend; a background sweeper reclaims entries nobody
//! has observed for longer than the grace period.
//!
//! Entries are *never stale*: once a key is subscribed, the only path to a
//! new value is an accepted push (or the initial fetch response). There is
//! no timer-based refetch.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = QueryCacheConfig::new(credential);
//! let (cache, mut events) = QueryCache::start(connector, config);
//!
//! let game = QueryDescriptor::new("games.byJoinCode", &json!({ "joinCode": code }))?;
//! let mut sub = cache.subscribe(&game)?;
//!
//! loop {
//!     if let QueryState::Ready { value, .. } = sub.current() {
//!         let snapshot: Option<GameSnapshot> = serde_json::from_value((*value).clone()).ok();
//!         render(GameView::derive(snapshot.as_ref()));
//!     }
//!     sub.changed().await?;
//! }
//! ```

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::{ErasError, Result};
use crate::event::CacheEvent;
use crate::key::{CacheKey, QueryDescriptor};
use crate::protocol::{ClientMessage, FetchErrorCode, ServerMessage};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default retention for entries with zero subscribers.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Default interval between eviction sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default initial reconnect backoff (doubles up to the max).
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default reconnect backoff ceiling.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`QueryCache`].
///
/// The only required field is the opaque `credential` from the identity
/// provider; all others have sensible defaults.
///
/// # Example
///
/// ```
/// use eras_client::cache::QueryCacheConfig;
/// use std::time::Duration;
///
/// let config = QueryCacheConfig::new("session-token-abc123")
///     .with_grace_period(Duration::from_secs(120))
///     .with_event_channel_capacity(512);
/// assert_eq!(config.grace_period, Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Opaque credential attached at connect time.
    pub credential: String,
    /// SDK version string sent during authentication.
    /// Defaults to the crate version at compile time.
    pub sdk_version: Option<String>,
    /// Platform identifier (e.g. `"rust"`, `"web"`).
    pub platform: Option<String>,
    /// How long a zero-subscriber entry is retained before eviction.
    ///
    /// Defaults to **5 minutes**, absorbing rapid remounts without refetch.
    pub grace_period: Duration,
    /// Interval between eviction sweeps. Defaults to **30 seconds**.
    pub sweep_interval: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the transport loop. `Disconnected` is
    /// always delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown. Defaults to **1 second**; a zero
    /// timeout aborts the transport loop immediately.
    pub shutdown_timeout: Duration,
    /// Initial reconnect backoff; doubles after each failed attempt.
    pub initial_backoff: Duration,
    /// Reconnect backoff ceiling.
    pub max_backoff: Duration,
    /// Entries to pre-populate before the transport connects, typically
    /// decoded from the first page payload of a server-rendering pass.
    pub hydration: Vec<HydratedQuery>,
}

impl QueryCacheConfig {
    /// Create a new configuration with the given credential and defaults.
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            sdk_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            platform: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            hydration: Vec::new(),
        }
    }

    /// Set the zero-subscriber retention period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the interval between eviction sweeps.
    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the reconnect backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Set the platform identifier sent during authentication.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Pre-populate entries before the transport connects.
    #[must_use]
    pub fn with_hydration(mut self, hydration: Vec<HydratedQuery>) -> Self {
        self.hydration = hydration;
        self
    }
}

/// One pre-resolved query for cache hydration.
///
/// Produced by [`QueryCache::hydration_payload`] during a server-rendering
/// pass and consumed by [`QueryCacheConfig::with_hydration`] on the client,
/// so the first render observes `Ready` entries without a duplicate fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedQuery {
    pub query: QueryDescriptor,
    pub value: serde_json::Value,
    pub version: u64,
}

// ── Query state ─────────────────────────────────────────────────────

/// Snapshot of a cache entry's state as seen by observers.
///
/// Observers only ever receive these cloned snapshots — never references
/// into the entry itself — so a push can atomically replace the entry while
/// earlier snapshots stay valid.
#[derive(Debug, Clone)]
pub enum QueryState {
    /// The initial fetch has not resolved yet.
    Pending,
    /// The latest accepted value and its version.
    Ready {
        value: Arc<serde_json::Value>,
        version: u64,
    },
    /// The backend rejected or errored the query.
    Errored {
        message: String,
        code: Option<FetchErrorCode>,
    },
}

impl QueryState {
    /// The value, if this state is `Ready`.
    pub fn value(&self) -> Option<&Arc<serde_json::Value>> {
        match self {
            Self::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The version, if this state is `Ready`.
    pub fn version(&self) -> Option<u64> {
        match self {
            Self::Ready { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// `true` if a value is available.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

// ── Internal entry & shared state ───────────────────────────────────

/// A cache entry, owned exclusively by the entries map.
struct CacheEntry {
    query: QueryDescriptor,
    /// Fan-out channel: observers hold `watch::Receiver`s. Watch semantics
    /// give per-key ordering with latest-value coalescing.
    tx: watch::Sender<QueryState>,
    /// Highest accepted version; `None` until the first accepted update.
    version: Option<u64>,
    subscribers: usize,
    /// When the subscriber count last reached zero.
    last_zero: Option<Instant>,
    /// Whether a fetch-or-subscribe control message has been issued.
    registered: bool,
}

impl CacheEntry {
    fn state(&self) -> QueryState {
        self.tx.borrow().clone()
    }
}

/// State shared between the cache handle, subscriptions, and both
/// background tasks. All entry mutation goes through `entries`.
struct Shared {
    entries: StdMutex<HashMap<CacheKey, CacheEntry>>,
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    connected: AtomicBool,
    authenticated: AtomicBool,
}

impl Shared {
    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Subscription handle ─────────────────────────────────────────────

/// RAII handle attaching one observer to a cache key.
///
/// Dropping the handle detaches the observer; when the last observer of a
/// key detaches, the entry becomes an eviction candidate after the grace
/// period while remaining servable to new subscribers.
pub struct Subscription {
    key: CacheKey,
    rx: watch::Receiver<QueryState>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// The canonical key this subscription observes.
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// The latest known state, available synchronously.
    ///
    /// A key whose entry was already `Ready` at subscribe time yields that
    /// value here immediately, before any future push.
    pub fn current(&self) -> QueryState {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change and return the new state.
    ///
    /// Intermediate values that arrive faster than the observer consumes
    /// them are coalesced — only the latest accepted value is surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`ErasError::ShutDown`] if the cache was dropped.
    pub async fn changed(&mut self) -> Result<QueryState> {
        self.rx.changed().await.map_err(|_| ErasError::ShutDown)?;
        Ok(self.rx.borrow().clone())
    }

    /// Suspend until a value is `Ready`, returning it with its version.
    ///
    /// # Errors
    ///
    /// Returns [`ErasError::Fetch`] if the entry is `Errored`, or
    /// [`ErasError::ShutDown`] if the cache was dropped.
    pub async fn wait_ready(&mut self) -> Result<(Arc<serde_json::Value>, u64)> {
        loop {
            match self.current() {
                QueryState::Ready { value, version } => return Ok((value, version)),
                QueryState::Errored { message, code } => {
                    return Err(ErasError::Fetch { message, code });
                }
                QueryState::Pending => {
                    self.rx.changed().await.map_err(|_| ErasError::ShutDown)?;
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut entries = self.shared.lock_entries();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.last_zero = Some(Instant::now());
                trace!(key = %self.key, "last observer detached, entry enters grace period");
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("state", &self.current())
            .finish()
    }
}

// ── Cache handle ────────────────────────────────────────────────────

/// Reactive query cache with push-based subscriptions.
///
/// Created via [`QueryCache::start`], which spawns the background transport
/// loop and eviction sweeper and returns this handle together with an event
/// receiver. Constructed once at process start and passed explicitly to
/// whatever needs it — there is no global singleton.
pub struct QueryCache {
    shared: Arc<Shared>,
    loop_task: Option<tokio::task::JoinHandle<()>>,
    sweep_task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    sweep_cancel: CancellationToken,
    shutdown_timeout: Duration,
}

impl QueryCache {
    /// Start the cache: spawn the transport loop and eviction sweeper.
    ///
    /// Hydration entries from the config are installed as `Ready` before
    /// the transport connects, so early subscribers observe them with no
    /// network activity.
    ///
    /// # Returns
    ///
    /// The cache handle plus a bounded receiver of [`CacheEvent`]s.
    #[must_use = "the event receiver must be used to observe connection state"]
    pub fn start<C: Connector>(
        connector: C,
        config: QueryCacheConfig,
    ) -> (Self, mpsc::Receiver<CacheEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<CacheEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let sweep_cancel = CancellationToken::new();

        let mut entries = HashMap::new();
        let now = Instant::now();
        for hydrated in config.hydration {
            let key = hydrated.query.cache_key();
            let state = QueryState::Ready {
                value: Arc::new(hydrated.value),
                version: hydrated.version,
            };
            let (tx, _rx) = watch::channel(state);
            debug!(key = %key, version = hydrated.version, "hydrated cache entry");
            entries.insert(
                key,
                CacheEntry {
                    query: hydrated.query,
                    tx,
                    version: Some(hydrated.version),
                    subscribers: 0,
                    last_zero: Some(now),
                    registered: false,
                },
            );
        }

        let shared = Arc::new(Shared {
            entries: StdMutex::new(entries),
            cmd_tx,
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
        });

        let opts = LoopOptions {
            credential: config.credential,
            sdk_version: config.sdk_version,
            platform: config.platform,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        };

        let loop_task = tokio::spawn(transport_loop(
            connector,
            cmd_rx,
            event_tx.clone(),
            Arc::clone(&shared),
            shutdown_rx,
            opts,
        ));
        let sweep_task = tokio::spawn(eviction_loop(
            Arc::clone(&shared),
            event_tx,
            config.grace_period,
            config.sweep_interval,
            sweep_cancel.clone(),
        ));

        let cache = Self {
            shared,
            loop_task: Some(loop_task),
            sweep_task: Some(sweep_task),
            shutdown_tx: Some(shutdown_tx),
            sweep_cancel,
            shutdown_timeout: config.shutdown_timeout,
        };

        (cache, event_rx)
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Attach an observer to a query, creating the entry on first use.
    ///
    /// Exactly one fetch-or-subscribe control message is issued per key no
    /// matter how many callers subscribe concurrently — later subscribers
    /// attach to the existing entry. Returns immediately; use
    /// [`Subscription::wait_ready`] for the blocking mode.
    ///
    /// # Errors
    ///
    /// Returns [`ErasError::ShutDown`] if the cache has shut down and no
    /// value is cached for the key.
    pub fn subscribe(&self, query: &QueryDescriptor) -> Result<Subscription> {
        let key = query.cache_key();
        let shared = &self.shared;
        let mut entries = shared.lock_entries();
        match entries.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.subscribers += 1;
                // Re-subscribe within the grace period cancels any pending
                // eviction; the held entries lock closes the race with the
                // sweeper.
                entry.last_zero = None;
                if !entry.registered {
                    // Hydrated entry: attach the live push subscription now.
                    // The value stays Ready; no refetch is observed.
                    let msg = ClientMessage::Subscribe {
                        key,
                        query: entry.query.clone(),
                    };
                    if shared.cmd_tx.send(msg).is_ok() {
                        entry.registered = true;
                    } else if !entry.state().is_ready() {
                        entry.subscribers -= 1;
                        return Err(ErasError::ShutDown);
                    }
                }
                let rx = entry.tx.subscribe();
                trace!(key = %key, subscribers = entry.subscribers, "observer attached");
                Ok(Subscription {
                    key,
                    rx,
                    shared: Arc::clone(shared),
                })
            }
            MapEntry::Vacant(vacant) => {
                let msg = ClientMessage::Subscribe {
                    key,
                    query: query.clone(),
                };
                if shared.cmd_tx.send(msg).is_err() {
                    return Err(ErasError::ShutDown);
                }
                let (tx, rx) = watch::channel(QueryState::Pending);
                vacant.insert(CacheEntry {
                    query: query.clone(),
                    tx,
                    version: None,
                    subscribers: 1,
                    last_zero: None,
                    registered: true,
                });
                debug!(key = %key, name = query.name(), "entry created, fetch-or-subscribe issued");
                Ok(Subscription {
                    key,
                    rx,
                    shared: Arc::clone(shared),
                })
            }
        }
    }

    /// Guarantee a value is present for a query before first render.
    ///
    /// Subscribes and suspends until the entry is `Ready`, then returns the
    /// value. Used by route loaders, in both a pre-render pass and during
    /// client navigation — a hydrated `Ready` entry resolves with no fetch.
    ///
    /// Cancelling `cancel` detaches this caller and resolves to
    /// [`ErasError::Cancelled`] without retrying; the shared entry (and any
    /// other observers) are unaffected and the in-flight fetch may still
    /// complete for them.
    ///
    /// # Errors
    ///
    /// [`ErasError::Fetch`] if the backend errored the query,
    /// [`ErasError::Cancelled`] on cancellation, [`ErasError::ShutDown`] if
    /// the cache has shut down.
    pub async fn ensure_query_data(
        &self,
        query: &QueryDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Arc<serde_json::Value>> {
        let mut sub = self.subscribe(query)?;
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(key = %sub.key(), "prefetch cancelled, detaching caller");
                Err(ErasError::Cancelled)
            }
            resolved = sub.wait_ready() => resolved.map(|(value, _)| value),
        }
    }

    /// The latest state for a query, without attaching an observer.
    pub fn peek(&self, query: &QueryDescriptor) -> Option<QueryState> {
        let entries = self.shared.lock_entries();
        entries.get(&query.cache_key()).map(CacheEntry::state)
    }

    /// Export all `Ready` entries for embedding in a first page payload.
    pub fn hydration_payload(&self) -> Vec<HydratedQuery> {
        let entries = self.shared.lock_entries();
        entries
            .values()
            .filter_map(|entry| match entry.state() {
                QueryState::Ready { value, version } => Some(HydratedQuery {
                    query: entry.query.clone(),
                    value: (*value).clone(),
                    version,
                }),
                _ => None,
            })
            .collect()
    }

    // ── State accessors ─────────────────────────────────────────────

    /// `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// `true` if the backend has confirmed authentication.
    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::Acquire)
    }

    /// Number of live cache entries (observed or in their grace period).
    pub fn entry_count(&self) -> usize {
        self.shared.lock_entries().len()
    }

    /// Send a heartbeat ping to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ErasError::ShutDown`] if the cache has shut down.
    pub fn ping(&self) -> Result<()> {
        self.shared
            .cmd_tx
            .send(ClientMessage::Ping)
            .map_err(|_| ErasError::ShutDown)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Shut down the cache: close the transport and stop both background
    /// tasks.
    ///
    /// The transport loop is given the configured shutdown timeout to close
    /// gracefully and emit a final `Disconnected` event; on expiry it is
    /// aborted.
    pub async fn shutdown(&mut self) {
        debug!("QueryCache: shutdown requested");

        self.sweep_cancel.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.loop_task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }
        if let Some(task) = self.sweep_task.take() {
            if let Err(join_err) = task.await {
                debug!("eviction sweeper exited: {join_err}");
            }
        }

        self.shared.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .field("entries", &self.entry_count())
            .finish()
    }
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown; the
        // only safe action is to abort the spawned tasks.
        self.sweep_cancel.cancel();
        if let Some(task) = self.loop_task.take() {
            task.abort();
        }
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

struct LoopOptions {
    credential: String,
    sdk_version: Option<String>,
    platform: Option<String>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

/// Background transport loop: connect, authenticate, resync, then multiplex
/// outgoing control messages against inbound pushes via `tokio::select!`.
///
/// On disconnect the loop reconnects with exponential backoff and
/// resubscribes every registered key (full resubscribe-and-resync; values
/// delivered during resync pass the ordinary version-monotonic acceptance
/// rule). Exits when the shutdown signal fires or the command channel
/// closes.
async fn transport_loop<C: Connector>(
    mut connector: C,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: mpsc::Sender<CacheEvent>,
    shared: Arc<Shared>,
    mut shutdown_rx: oneshot::Receiver<()>,
    opts: LoopOptions,
) {
    debug!("transport loop started");
    let mut backoff = opts.initial_backoff;
    let mut first_connect = true;

    'reconnect: loop {
        // Connect, staying responsive to shutdown during backoff.
        let mut transport = loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received while disconnected");
                    break 'reconnect;
                }
                connected = connector.connect() => match connected {
                    Ok(transport) => break transport,
                    Err(e) => {
                        warn!("connect failed: {e}; retrying in {backoff:?}");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(opts.max_backoff);
                    }
                }
            }
        };
        backoff = opts.initial_backoff;
        shared.connected.store(true, Ordering::Release);
        emit_event(&event_tx, CacheEvent::Connected).await;

        // Authenticate first, then resubscribe registered keys for resync.
        let auth = ClientMessage::Authenticate {
            credential: opts.credential.clone(),
            sdk_version: opts.sdk_version.clone(),
            platform: opts.platform.clone(),
        };
        if let Err(e) = send_message(&mut transport, &auth).await {
            error!("authenticate send error: {e}");
            emit_disconnected(&event_tx, &shared, Some(format!("transport send error: {e}"))).await;
            continue 'reconnect;
        }

        if !first_connect {
            let resubscribes: Vec<ClientMessage> = {
                let entries = shared.lock_entries();
                entries
                    .iter()
                    .filter(|(_, entry)| entry.registered)
                    .map(|(key, entry)| ClientMessage::Subscribe {
                        key: *key,
                        query: entry.query.clone(),
                    })
                    .collect()
            };
            let count = resubscribes.len();
            for msg in resubscribes {
                if let Err(e) = send_message(&mut transport, &msg).await {
                    error!("resubscribe send error: {e}");
                    emit_disconnected(
                        &event_tx,
                        &shared,
                        Some(format!("transport send error: {e}")),
                    )
                    .await;
                    continue 'reconnect;
                }
            }
            debug!(keys = count, "resubscribed after reconnect");
            emit_event(&event_tx, CacheEvent::Resubscribed { keys: count }).await;
        }
        first_connect = false;

        loop {
            tokio::select! {
                // Branch 1: outgoing control message from the cache
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(msg) => {
                            trace!("sending client message: {:?}", std::mem::discriminant(&msg));
                            if let Err(e) = send_message(&mut transport, &msg).await {
                                error!("transport send error: {e}");
                                emit_disconnected(
                                    &event_tx,
                                    &shared,
                                    Some(format!("transport send error: {e}")),
                                ).await;
                                continue 'reconnect;
                            }
                        }
                        // Command channel closed — cache and all handles dropped.
                        None => {
                            debug!("command channel closed, shutting down transport loop");
                            let _ = transport.close().await;
                            emit_disconnected(&event_tx, &shared, Some("cache shut down".into())).await;
                            break 'reconnect;
                        }
                    }
                }

                // Branch 2: shutdown signal
                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    let _ = transport.close().await;
                    emit_disconnected(&event_tx, &shared, Some("cache shut down".into())).await;
                    break 'reconnect;
                }

                // Branch 3: inbound message from the backend
                incoming = transport.recv() => {
                    match incoming {
                        Some(Ok(text)) => {
                            handle_server_message(&shared, &event_tx, &text).await;
                        }
                        Some(Err(e)) => {
                            error!("transport receive error: {e}");
                            emit_disconnected(
                                &event_tx,
                                &shared,
                                Some(format!("transport receive error: {e}")),
                            ).await;
                            continue 'reconnect;
                        }
                        // Transport closed cleanly; entries keep their last
                        // values and are not evicted for being disconnected.
                        None => {
                            debug!("transport closed by backend, reconnecting");
                            emit_disconnected(&event_tx, &shared, None).await;
                            continue 'reconnect;
                        }
                    }
                }
            }
        }
    }

    debug!("transport loop exited");
}

async fn send_message(transport: &mut impl Transport, msg: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    transport.send(json).await
}

/// Dispatch one inbound backend message.
async fn handle_server_message(shared: &Shared, event_tx: &mpsc::Sender<CacheEvent>, text: &str) {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("failed to deserialize server message: {e} — raw: {text}");
            return;
        }
    };
    match msg {
        ServerMessage::Authenticated { user_id } => {
            shared.authenticated.store(true, Ordering::Release);
            debug!(?user_id, "authenticated");
            emit_event(event_tx, CacheEvent::Authenticated).await;
        }
        ServerMessage::AuthenticationError { error, error_code } => {
            error!(?error_code, "authentication failed: {error}");
        }
        ServerMessage::Update {
            key,
            value,
            version,
        } => apply_update(shared, key, value, version),
        ServerMessage::QueryError {
            key,
            message,
            error_code,
        } => apply_query_error(shared, key, message, error_code),
        ServerMessage::Pong => trace!("pong"),
        ServerMessage::Error {
            message,
            error_code,
        } => warn!(?error_code, "backend error: {message}"),
    }
}

/// Apply a versioned push to its entry.
///
/// The whole value is installed under the entries lock before fan-out, so
/// observers never see a torn entry. Stale versions are discarded without
/// notification; a failure here touches only this key.
fn apply_update(shared: &Shared, key: CacheKey, value: serde_json::Value, version: u64) {
    let mut entries = shared.lock_entries();
    let Some(entry) = entries.get_mut(&key) else {
        trace!(key = %key, "update for unknown key, dropping");
        return;
    };
    if entry.version.is_some_and(|current| version <= current) {
        trace!(
            key = %key,
            version,
            current = ?entry.version,
            "stale update discarded"
        );
        return;
    }
    entry.version = Some(version);
    entry.tx.send_replace(QueryState::Ready {
        value: Arc::new(value),
        version,
    });
    trace!(key = %key, version, "update accepted");
}

fn apply_query_error(
    shared: &Shared,
    key: CacheKey,
    message: String,
    code: Option<FetchErrorCode>,
) {
    let mut entries = shared.lock_entries();
    let Some(entry) = entries.get_mut(&key) else {
        trace!(key = %key, "query error for unknown key, dropping");
        return;
    };
    warn!(key = %key, ?code, "query errored: {message}");
    // The version is untouched: a later accepted push repairs the entry.
    entry.tx.send_replace(QueryState::Errored { message, code });
}

// ── Eviction sweeper ────────────────────────────────────────────────

/// Background sweep over zero-subscriber entries.
///
/// Runs independently of the read/write path. The subscriber count and
/// grace expiry are re-checked under the entries lock at removal time, so a
/// concurrent re-subscribe can never lose an entry it just attached to.
async fn eviction_loop(
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<CacheEvent>,
    grace_period: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let evicted: Vec<CacheKey> = {
            let mut entries = shared.lock_entries();
            let now = Instant::now();
            let expired: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, entry)| {
                    entry.subscribers == 0
                        && entry
                            .last_zero
                            .is_some_and(|at| now.duration_since(at) >= grace_period)
                })
                .map(|(key, _)| *key)
                .collect();
            for key in &expired {
                if let Some(entry) = entries.remove(key) {
                    if entry.registered {
                        // Deregister from the transport; ignore send failure
                        // during shutdown.
                        let _ = shared.cmd_tx.send(ClientMessage::Unsubscribe { key: *key });
                    }
                }
            }
            expired
        };
        for key in evicted {
            debug!(key = %key, "evicted entry after grace period");
            emit_event(&event_tx, CacheEvent::Evicted { key }).await;
        }
    }
    debug!("eviction sweeper exited");
}

// ── Event emission ──────────────────────────────────────────────────

/// Emit an event to the event channel. If the channel is full, log a
/// warning and drop the event to avoid blocking the emitting task.
async fn emit_event(event_tx: &mpsc::Sender<CacheEvent>, event: CacheEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit a [`Disconnected`](CacheEvent::Disconnected) event and update state.
///
/// Uses `send().await` (blocking) instead of `try_send` because
/// `Disconnected` must never be silently dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<CacheEvent>,
    shared: &Shared,
    reason: Option<String>,
) {
    shared.connected.store(false, Ordering::Release);
    shared.authenticated.store(false, Ordering::Release);
    if event_tx
        .send(CacheEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    // ── Mock transport & connector ──────────────────────────────────

    /// A channel-backed transport: the test pushes scripted backend
    /// messages through a [`ServerHandle`] and inspects what the cache sent.
    struct MockTransport {
        rx: mpsc::UnboundedReceiver<Option<Result<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    /// Test-side handle to one mock transport.
    struct ServerHandle {
        tx: mpsc::UnboundedSender<Option<Result<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl ServerHandle {
        fn push(&self, msg: &ServerMessage) {
            let json = serde_json::to_string(msg).unwrap();
            let _ = self.tx.send(Some(Ok(json)));
        }

        fn push_update(&self, key: CacheKey, value: serde_json::Value, version: u64) {
            self.push(&ServerMessage::Update {
                key,
                value,
                version,
            });
        }

        /// Signal a clean transport close.
        fn close(&self) {
            let _ = self.tx.send(None);
        }

        fn sent_messages(&self) -> Vec<ClientMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|raw| serde_json::from_str(raw).unwrap())
                .collect()
        }

        fn subscribe_count_for(&self, key: CacheKey) -> usize {
            self.sent_messages()
                .iter()
                .filter(|msg| matches!(msg, ClientMessage::Subscribe { key: k, .. } if *k == key))
                .count()
        }
    }

    fn mock_pair() -> (MockTransport, ServerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = MockTransport {
            rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, ServerHandle { tx, sent, closed })
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.rx.recv().await {
                Some(item) => item,
                // Test handle dropped — stay silent so the loop lives on.
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out pre-built transports in order; hangs once exhausted.
    struct MockConnector {
        transports: VecDeque<MockTransport>,
        connects: Arc<AtomicUsize>,
    }

    impl MockConnector {
        fn new(transports: Vec<MockTransport>) -> (Self, Arc<AtomicUsize>) {
            let connects = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    transports: VecDeque::from(transports),
                    connects: Arc::clone(&connects),
                },
                connects,
            )
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Output = MockTransport;

        async fn connect(&mut self) -> Result<MockTransport> {
            match self.transports.pop_front() {
                Some(transport) => {
                    self.connects.fetch_add(1, Ordering::Relaxed);
                    Ok(transport)
                }
                None => std::future::pending().await,
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn test_config() -> QueryCacheConfig {
        QueryCacheConfig::new("test-credential")
            .with_shutdown_timeout(Duration::from_millis(100))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(10))
    }

    fn start_single(
        config: QueryCacheConfig,
    ) -> (QueryCache, mpsc::Receiver<CacheEvent>, ServerHandle) {
        let (transport, server) = mock_pair();
        let (connector, _connects) = MockConnector::new(vec![transport]);
        let (cache, events) = QueryCache::start(connector, config);
        (cache, events, server)
    }

    fn game_query(id: &str) -> QueryDescriptor {
        QueryDescriptor::new("games.get", &json!({ "id": id })).unwrap()
    }

    /// Poll `cond` until it holds or a generous deadline passes.
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    // ── Subscribe / coalescing ──────────────────────────────────────

    #[tokio::test]
    async fn authenticate_is_first_outbound_message() {
        let (mut cache, mut events, server) = start_single(test_config());

        let event = events.recv().await.unwrap();
        assert_eq!(event, CacheEvent::Connected);

        wait_until(|| !server.sent_messages().is_empty()).await;
        let first = server.sent_messages().remove(0);
        match first {
            ClientMessage::Authenticate { credential, .. } => {
                assert_eq!(credential, "test-credential");
            }
            other => panic!("expected Authenticate first, got {other:?}"),
        }

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_subscribers_share_one_fetch() {
        let (mut cache, _events, server) = start_single(test_config());
        let query = game_query("g1");
        let key = query.cache_key();

        let sub_a = cache.subscribe(&query).unwrap();
        let sub_b = cache.subscribe(&query).unwrap();
        assert!(matches!(sub_a.current(), QueryState::Pending));
        assert!(matches!(sub_b.current(), QueryState::Pending));

        wait_until(|| server.subscribe_count_for(key) >= 1).await;
        assert_eq!(server.subscribe_count_for(key), 1);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn ready_entry_serves_late_subscriber_synchronously() {
        let (mut cache, _events, server) = start_single(test_config());
        let query = game_query("g1");
        let key = query.cache_key();

        let mut sub_a = cache.subscribe(&query).unwrap();
        server.push_update(key, json!({ "phase": "lobby" }), 1);
        let (value, version) = sub_a.wait_ready().await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(value["phase"], "lobby");

        // The late subscriber sees the value with no await and no new fetch.
        let sub_b = cache.subscribe(&query).unwrap();
        assert_eq!(sub_b.current().version(), Some(1));
        assert_eq!(server.subscribe_count_for(key), 1);

        cache.shutdown().await;
    }

    // ── Version monotonicity ────────────────────────────────────────

    #[tokio::test]
    async fn stale_and_duplicate_versions_are_discarded() {
        let (mut cache, _events, server) = start_single(test_config());
        let query = game_query("g1");
        let key = query.cache_key();

        let mut sub = cache.subscribe(&query).unwrap();
        server.push_update(key, json!({ "n": 2 }), 2);
        assert_eq!(sub.wait_ready().await.unwrap().1, 2);

        // Duplicate and out-of-order pushes must not surface.
        server.push_update(key, json!({ "n": 2 }), 2);
        server.push_update(key, json!({ "n": 1 }), 1);
        server.push_update(key, json!({ "n": 3 }), 3);

        let state = sub.changed().await.unwrap();
        assert_eq!(state.version(), Some(3));
        assert_eq!(cache.peek(&query).unwrap().version(), Some(3));

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn cross_key_interleaving_keeps_each_key_consistent() {
        let (mut cache, _events, server) = start_single(test_config());
        let query_a = game_query("a");
        let query_b = game_query("b");
        let (key_a, key_b) = (query_a.cache_key(), query_b.cache_key());

        let mut sub_a = cache.subscribe(&query_a).unwrap();
        let mut sub_b = cache.subscribe(&query_b).unwrap();

        // Interleave and reorder across keys.
        server.push_update(key_a, json!({ "k": "a", "n": 1 }), 1);
        server.push_update(key_b, json!({ "k": "b", "n": 5 }), 5);
        server.push_update(key_a, json!({ "k": "a", "n": 2 }), 2);
        server.push_update(key_b, json!({ "k": "b", "n": 4 }), 4);

        wait_until(|| cache.peek(&query_a).unwrap().version() == Some(2)).await;
        let (value_a, version_a) = sub_a.wait_ready().await.unwrap();
        assert_eq!((value_a["k"].as_str(), version_a), (Some("a"), 2));
        let (value_b, version_b) = sub_b.wait_ready().await.unwrap();
        assert_eq!((value_b["k"].as_str(), version_b), (Some("b"), 5));

        cache.shutdown().await;
    }

    // ── Errors ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn query_error_surfaces_and_is_isolated() {
        let (mut cache, _events, server) = start_single(test_config());
        let query_bad = game_query("bad");
        let query_ok = game_query("ok");

        let mut sub_bad = cache.subscribe(&query_bad).unwrap();
        let mut sub_ok = cache.subscribe(&query_ok).unwrap();

        server.push(&ServerMessage::QueryError {
            key: query_bad.cache_key(),
            message: "no such game".into(),
            error_code: Some(FetchErrorCode::GameNotFound),
        });
        server.push_update(query_ok.cache_key(), json!({ "n": 1 }), 1);

        let err = sub_bad.wait_ready().await.unwrap_err();
        assert!(matches!(
            err,
            ErasError::Fetch {
                code: Some(FetchErrorCode::GameNotFound),
                ..
            }
        ));
        // The failure must not leak into the other key.
        assert_eq!(sub_ok.wait_ready().await.unwrap().1, 1);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn accepted_push_repairs_an_errored_entry() {
        let (mut cache, _events, server) = start_single(test_config());
        let query = game_query("g1");
        let key = query.cache_key();

        let mut sub = cache.subscribe(&query).unwrap();
        server.push(&ServerMessage::QueryError {
            key,
            message: "transient".into(),
            error_code: Some(FetchErrorCode::InternalError),
        });
        assert!(sub.wait_ready().await.is_err());

        // The entry stays Errored until the push lands, so wait for the
        // state change rather than re-reading the error.
        server.push_update(key, json!({ "n": 1 }), 1);
        loop {
            let state = sub.changed().await.unwrap();
            if let QueryState::Ready { version, .. } = state {
                assert_eq!(version, 1);
                break;
            }
        }

        cache.shutdown().await;
    }

    // ── Grace period & eviction ─────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn resubscribe_within_grace_reuses_value_without_refetch() {
        let config = test_config()
            .with_grace_period(Duration::from_secs(300))
            .with_sweep_interval(Duration::from_secs(1));
        let (mut cache, _events, server) = start_single(config);
        let query = game_query("g1");
        let key = query.cache_key();

        let mut sub = cache.subscribe(&query).unwrap();
        server.push_update(key, json!({ "n": 1 }), 1);
        sub.wait_ready().await.unwrap();
        drop(sub);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cache.entry_count(), 1, "entry must survive the grace period");

        let sub = cache.subscribe(&query).unwrap();
        assert_eq!(sub.current().version(), Some(1));
        assert_eq!(server.subscribe_count_for(key), 1, "no refetch on re-subscribe");

        cache.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_subscriber_entry_is_evicted_after_grace() {
        let config = test_config()
            .with_grace_period(Duration::from_secs(10))
            .with_sweep_interval(Duration::from_secs(1));
        let (mut cache, mut events, server) = start_single(config);
        let query = game_query("g1");
        let key = query.cache_key();

        let mut sub = cache.subscribe(&query).unwrap();
        server.push_update(key, json!({ "n": 1 }), 1);
        sub.wait_ready().await.unwrap();
        drop(sub);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(cache.entry_count(), 0);

        // The key is deregistered from the transport exactly once.
        wait_until(|| {
            server
                .sent_messages()
                .iter()
                .any(|msg| matches!(msg, ClientMessage::Unsubscribe { key: k } if *k == key))
        })
        .await;
        let unsubscribes = server
            .sent_messages()
            .iter()
            .filter(|msg| matches!(msg, ClientMessage::Unsubscribe { key: k } if *k == key))
            .count();
        assert_eq!(unsubscribes, 1);

        // And an Evicted event was emitted.
        let mut saw_evicted = false;
        while let Ok(event) = events.try_recv() {
            if event == (CacheEvent::Evicted { key }) {
                saw_evicted = true;
            }
        }
        assert!(saw_evicted);

        cache.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_cancels_pending_eviction() {
        let config = test_config()
            .with_grace_period(Duration::from_secs(10))
            .with_sweep_interval(Duration::from_secs(1));
        let (mut cache, _events, server) = start_single(config);
        let query = game_query("g1");
        let key = query.cache_key();

        let mut sub = cache.subscribe(&query).unwrap();
        server.push_update(key, json!({ "n": 1 }), 1);
        sub.wait_ready().await.unwrap();
        drop(sub);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let sub = cache.subscribe(&query).unwrap();
        assert!(sub.current().is_ready());

        // Well past the original deadline: the re-subscribe cancelled it.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(server.subscribe_count_for(key), 1);

        cache.shutdown().await;
    }

    // ── Loader / prefetcher ─────────────────────────────────────────

    #[tokio::test]
    async fn ensure_query_data_resolves_when_value_arrives() {
        let (mut cache, _events, server) = start_single(test_config());
        let query = game_query("g1");

        let cancel = CancellationToken::new();
        // Inner scope: the pinned future borrows the cache and must be done
        // before shutdown takes it mutably.
        let value = {
            let ensure = cache.ensure_query_data(&query, &cancel);
            tokio::pin!(ensure);

            // Give the subscribe a moment, then deliver.
            tokio::select! {
                _ = &mut ensure => panic!("must not resolve before a value exists"),
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            server.push_update(query.cache_key(), json!({ "n": 7 }), 1);
            ensure.await.unwrap()
        };
        assert_eq!(value["n"], 7);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_prefetch_detaches_without_killing_the_entry() {
        let (mut cache, _events, server) = start_single(test_config());
        let query = game_query("g1");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cache.ensure_query_data(&query, &cancel).await.unwrap_err();
        assert!(matches!(err, ErasError::Cancelled));

        // The shared entry is still live and completes for other observers.
        assert_eq!(cache.entry_count(), 1);
        let mut sub = cache.subscribe(&query).unwrap();
        server.push_update(query.cache_key(), json!({ "n": 1 }), 1);
        assert_eq!(sub.wait_ready().await.unwrap().1, 1);

        cache.shutdown().await;
    }

    // ── Hydration ───────────────────────────────────────────────────

    #[tokio::test]
    async fn hydrated_entry_is_ready_with_no_fetch() {
        let query = game_query("g1");
        let config = test_config().with_hydration(vec![HydratedQuery {
            query: query.clone(),
            value: json!({ "phase": "lobby" }),
            version: 4,
        }]);
        let (mut cache, _events, _server) = start_single(config);

        // Ready synchronously, before any transport round trip.
        let cancel = CancellationToken::new();
        let value = cache.ensure_query_data(&query, &cancel).await.unwrap();
        assert_eq!(value["phase"], "lobby");
        assert_eq!(cache.peek(&query).unwrap().version(), Some(4));

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn hydrated_entry_still_accepts_newer_pushes() {
        let query = game_query("g1");
        let key = query.cache_key();
        let config = test_config().with_hydration(vec![HydratedQuery {
            query: query.clone(),
            value: json!({ "n": 1 }),
            version: 4,
        }]);
        let (mut cache, _events, server) = start_single(config);

        let mut sub = cache.subscribe(&query).unwrap();
        // Redundant resync at or below the hydrated version is discarded.
        server.push_update(key, json!({ "n": 1 }), 4);
        server.push_update(key, json!({ "n": 2 }), 5);
        let state = sub.changed().await.unwrap();
        assert_eq!(state.version(), Some(5));

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn hydration_payload_round_trips() {
        let (mut cache, _events, server) = start_single(test_config());
        let query = game_query("g1");

        let mut sub = cache.subscribe(&query).unwrap();
        server.push_update(query.cache_key(), json!({ "n": 1 }), 3);
        sub.wait_ready().await.unwrap();

        let payload = cache.hydration_payload();
        assert_eq!(payload.len(), 1);
        assert_eq!(payload[0].version, 3);
        assert_eq!(payload[0].query, query);

        // The payload is embeddable in a page: serde round trip.
        let json = serde_json::to_string(&payload).unwrap();
        let back: Vec<HydratedQuery> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);

        cache.shutdown().await;
    }

    // ── Reconnect ───────────────────────────────────────────────────

    #[tokio::test]
    async fn reconnect_resubscribes_registered_keys() {
        let (transport_a, server_a) = mock_pair();
        let (transport_b, server_b) = mock_pair();
        let (connector, connects) = MockConnector::new(vec![transport_a, transport_b]);
        let (mut cache, mut events) = QueryCache::start(connector, test_config());
        let query = game_query("g1");
        let key = query.cache_key();

        let mut sub = cache.subscribe(&query).unwrap();
        server_a.push_update(key, json!({ "n": 1 }), 1);
        assert_eq!(sub.wait_ready().await.unwrap().1, 1);

        // Backend closes; the loop reconnects and resubscribes.
        server_a.close();
        wait_until(|| connects.load(Ordering::Relaxed) == 2).await;
        wait_until(|| server_b.subscribe_count_for(key) == 1).await;

        // Last value survived the disconnect.
        assert_eq!(cache.peek(&query).unwrap().version(), Some(1));

        // Resync follows the ordinary version rule.
        server_b.push_update(key, json!({ "n": 1 }), 1);
        server_b.push_update(key, json!({ "n": 2 }), 2);
        let state = sub.changed().await.unwrap();
        assert_eq!(state.version(), Some(2));

        // Event order: Connected, Disconnected, Connected, Resubscribed.
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen[0], CacheEvent::Connected);
        assert!(seen.contains(&CacheEvent::Disconnected { reason: None }));
        assert!(seen.contains(&CacheEvent::Resubscribed { keys: 1 }));

        cache.shutdown().await;
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[tokio::test]
    async fn shutdown_closes_transport_and_emits_disconnected() {
        let (mut cache, mut events, server) = start_single(test_config());

        let first = events.recv().await.unwrap();
        assert_eq!(first, CacheEvent::Connected);

        cache.shutdown().await;
        assert!(!cache.is_connected());
        assert!(server.closed.load(Ordering::Relaxed));

        let mut saw_disconnected = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CacheEvent::Disconnected { .. }) {
                saw_disconnected = true;
            }
        }
        assert!(saw_disconnected);
    }

    #[tokio::test]
    async fn ping_reaches_the_transport() {
        let (mut cache, _events, server) = start_single(test_config());

        cache.ping().unwrap();
        wait_until(|| {
            server
                .sent_messages()
                .iter()
                .any(|msg| matches!(msg, ClientMessage::Ping))
        })
        .await;

        // The pong is consumed without touching any entry.
        server.push(&ServerMessage::Pong);
        assert_eq!(cache.entry_count(), 0);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn subscribe_after_shutdown_fails() {
        let (mut cache, _events, _server) = start_single(test_config());
        cache.shutdown().await;

        let err = cache.subscribe(&game_query("g1")).unwrap_err();
        assert!(matches!(err, ErasError::ShutDown));
        assert!(matches!(cache.ping().unwrap_err(), ErasError::ShutDown));
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (mut cache, _events, _server) = start_single(test_config());
        cache.shutdown().await;
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown_aborts_tasks() {
        let (cache, mut events, _server) = start_single(test_config());
        let _ = events.recv().await; // Connected

        drop(cache);

        // The event channel closes once the tasks are gone; we only verify
        // we neither hang nor panic.
        while let Some(_event) = events.recv().await {}
    }

    // ── Configuration ───────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = QueryCacheConfig::new("cred");
        assert_eq!(config.credential, "cred");
        assert!(config.sdk_version.is_some());
        assert_eq!(config.grace_period, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.hydration.is_empty());
    }

    #[test]
    fn config_builder_methods() {
        let config = QueryCacheConfig::new("cred")
            .with_grace_period(Duration::from_secs(60))
            .with_sweep_interval(Duration::from_secs(5))
            .with_event_channel_capacity(0)
            .with_platform("web");
        assert_eq!(config.grace_period, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        // Capacity is clamped to at least 1.
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.platform.as_deref(), Some("web"));
    }
}
