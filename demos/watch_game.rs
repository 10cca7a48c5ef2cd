//! # Game Watcher Example
//!
//! Demonstrates a complete Eras client lifecycle:
//!
//! 1. Connect to the live query backend via WebSocket
//! 2. Subscribe to a game by join code
//! 3. Derive a view from every accepted snapshot (lobby, rounds, finished)
//! 4. Shut down gracefully on game end or Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start an Eras backend on localhost:4000, then:
//! cargo run --example watch_game
//!
//! # Override the backend URL or join code:
//! ERAS_URL=ws://my-server:4000/live ERAS_JOIN_CODE=IRON-AGE cargo run --example watch_game
//! ```

use eras_client::{
    CacheEvent, GameSnapshot, GameView, QueryCache, QueryCacheConfig, QueryDescriptor, QueryState,
    WebSocketConnector,
};

/// Default backend URL when `ERAS_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4000/live";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("ERAS_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let join_code = std::env::var("ERAS_JOIN_CODE").unwrap_or_else(|_| "BRONZE-AGE".to_string());
    let credential =
        std::env::var("ERAS_CREDENTIAL").unwrap_or_else(|_| "dev-credential".to_string());
    tracing::info!("Connecting to {url}, watching game {join_code}");

    // ── Start ───────────────────────────────────────────────────────
    // The connector is called on every (re)connect; the cache spawns a
    // background loop that drives the transport and emits events.
    let connector = WebSocketConnector::new(&url);
    let config = QueryCacheConfig::new(credential).with_platform("rust");
    let (mut cache, mut events) = QueryCache::start(connector, config);

    let query = QueryDescriptor::new(
        "games.byJoinCode",
        &serde_json::json!({ "joinCode": join_code }),
    )?;
    let mut sub = cache.subscribe(&query)?;

    // ── Watch loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            // Branch 1: a new accepted snapshot for the game.
            changed = sub.changed() => {
                match changed? {
                    QueryState::Ready { value, version } => {
                        let snapshot: Option<GameSnapshot> =
                            serde_json::from_value((*value).clone()).ok();
                        match GameView::derive(snapshot.as_ref()) {
                            GameView::Lobby { snapshot } => {
                                tracing::info!(
                                    "[v{version}] Lobby {}: {} player(s) gathered",
                                    snapshot.join_code,
                                    snapshot.players.len()
                                );
                            }
                            GameView::Active { round, .. } => match round {
                                Some(round) => tracing::info!(
                                    "[v{version}] Round {}: place \"{}\"",
                                    round.number,
                                    round.card.title
                                ),
                                None => tracing::info!("[v{version}] Between rounds…"),
                            },
                            GameView::Finished { snapshot } => {
                                tracing::info!("[v{version}] Game over. Final scores:");
                                for player in &snapshot.players {
                                    tracing::info!("  {} — {} point(s)", player.name, player.score);
                                }
                                break;
                            }
                            GameView::NotFound => {
                                tracing::warn!("No game matches join code {join_code}");
                            }
                        }
                    }
                    QueryState::Errored { message, code } => {
                        tracing::error!("Query failed [{code:?}]: {message}");
                        break;
                    }
                    QueryState::Pending => {}
                }
            }

            // Branch 2: connection lifecycle events.
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };
                match event {
                    CacheEvent::Disconnected { reason } => {
                        tracing::warn!(
                            "Disconnected: {} (reconnecting…)",
                            reason.as_deref().unwrap_or("unknown")
                        );
                    }
                    other => tracing::debug!("Event: {other:?}"),
                }
            }

            // Branch 3: Ctrl+C — shut down gracefully.
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    cache.shutdown().await;
    tracing::info!("Cache shut down. Goodbye!");
    Ok(())
}
