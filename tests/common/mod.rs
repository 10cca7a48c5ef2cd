#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Eras client integration tests.
//!
//! Provides a channel-based [`MockTransport`] with a test-side
//! [`ServerHandle`], a [`MockConnector`] that hands out transports in order,
//! and helpers for building game snapshot JSON fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use eras_client::protocol::{ClientMessage, ServerMessage};
use eras_client::{CacheKey, Connector, ErasError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport for integration testing.
///
/// The test pushes backend messages through the paired [`ServerHandle`];
/// everything the cache sends is recorded there.
pub struct MockTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<Option<Result<String, ErasError>>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle to one [`MockTransport`].
pub struct ServerHandle {
    tx: tokio::sync::mpsc::UnboundedSender<Option<Result<String, ErasError>>>,
    /// Raw JSON messages the cache sent.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` was called on the transport.
    pub closed: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Deliver a backend message to the cache.
    pub fn push(&self, msg: &ServerMessage) {
        let json = serde_json::to_string(msg).unwrap();
        let _ = self.tx.send(Some(Ok(json)));
    }

    /// Deliver a versioned update for a key.
    pub fn push_update(&self, key: CacheKey, value: serde_json::Value, version: u64) {
        self.push(&ServerMessage::Update {
            key,
            value,
            version,
        });
    }

    /// Deliver a raw (possibly malformed) text frame.
    pub fn push_raw(&self, raw: impl Into<String>) {
        let _ = self.tx.send(Some(Ok(raw.into())));
    }

    /// Signal a clean transport close.
    pub fn close(&self) {
        let _ = self.tx.send(None);
    }

    /// Deliver a transport-level receive error.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self
            .tx
            .send(Some(Err(ErasError::TransportReceive(message.into()))));
    }

    /// Everything the cache sent, parsed.
    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    /// Number of `Subscribe` messages sent for `key`.
    pub fn subscribe_count_for(&self, key: CacheKey) -> usize {
        self.sent_messages()
            .iter()
            .filter(|msg| matches!(msg, ClientMessage::Subscribe { key: k, .. } if *k == key))
            .count()
    }
}

/// Create a connected transport/handle pair.
pub fn mock_pair() -> (MockTransport, ServerHandle) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
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
    async fn send(&mut self, message: String) -> Result<(), ErasError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ErasError>> {
        match self.rx.recv().await {
            Some(item) => item,
            // Handle dropped — stay silent so the loop lives on until
            // shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ErasError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out pre-built transports in order; hangs once exhausted so the
/// reconnect loop stays parked until shutdown.
pub struct MockConnector {
    transports: VecDeque<MockTransport>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(transports: Vec<MockTransport>) -> (Self, Arc<AtomicUsize>) {
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

    async fn connect(&mut self) -> Result<MockTransport, ErasError> {
        match self.transports.pop_front() {
            Some(transport) => {
                self.connects.fetch_add(1, Ordering::Relaxed);
                Ok(transport)
            }
            None => std::future::pending().await,
        }
    }
}

// ── Snapshot fixtures ───────────────────────────────────────────────

/// Game id used by the fixtures below.
pub fn game_id() -> Uuid {
    Uuid::from_u128(1)
}

/// A lobby-phase snapshot as the backend would serialize it.
pub fn lobby_snapshot_json() -> serde_json::Value {
    json!({
        "id": Uuid::from_u128(1),
        "joinCode": "BRONZE-AGE",
        "phase": "lobby",
        "players": [
            { "id": Uuid::from_u128(10), "name": "Alice", "score": 0, "connected": true },
            { "id": Uuid::from_u128(11), "name": "Bob", "score": 0, "connected": true },
        ],
    })
}

/// An active-phase snapshot carrying round `number`.
pub fn active_snapshot_json(number: u32) -> serde_json::Value {
    json!({
        "id": Uuid::from_u128(1),
        "joinCode": "BRONZE-AGE",
        "phase": "guessing",
        "players": [
            { "id": Uuid::from_u128(10), "name": "Alice", "score": 1, "connected": true },
            { "id": Uuid::from_u128(11), "name": "Bob", "score": 0, "connected": true },
        ],
        "currentRound": {
            "number": number,
            "card": { "id": Uuid::from_u128(20), "title": "Moon landing", "year": 1969 },
        },
        "perPlayerTimeline": [],
    })
}

/// A finished-phase snapshot with resolved timelines.
pub fn finished_snapshot_json() -> serde_json::Value {
    json!({
        "id": Uuid::from_u128(1),
        "joinCode": "BRONZE-AGE",
        "phase": "finished",
        "players": [
            { "id": Uuid::from_u128(10), "name": "Alice", "score": 5, "connected": true },
            { "id": Uuid::from_u128(11), "name": "Bob", "score": 3, "connected": false },
        ],
        "perPlayerTimeline": [
            {
                "playerId": Uuid::from_u128(10),
                "cards": [
                    {
                        "card": { "id": Uuid::from_u128(20), "title": "Moon landing", "year": 1969 },
                        "correct": true,
                    },
                ],
            },
        ],
    })
}
