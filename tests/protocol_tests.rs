#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Protocol serialization tests for the Eras client.
//!
//! Verifies round-trip serialization of every protocol type, including all
//! `ClientMessage` and `ServerMessage` variants, `FetchErrorCode`
//! SCREAMING_SNAKE_CASE encoding, and JSON fixtures that match real backend
//! output.

use serde_json::json;

use eras_client::key::{CacheKey, QueryDescriptor};
use eras_client::protocol::{ClientMessage, FetchErrorCode, ServerMessage};
use eras_client::snapshot::{GamePhase, GameSnapshot};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

/// Serialize `val` to JSON, then deserialize back to `T` and return it.
fn round_trip<T: serde::Serialize + serde::de::DeserializeOwned>(val: &T) -> T {
    let json = serde_json::to_string(val).expect("serialize");
    serde_json::from_str(&json).expect("deserialize")
}

fn game_key() -> CacheKey {
    QueryDescriptor::new("games.byJoinCode", &json!({ "joinCode": "BRONZE-AGE" }))
        .expect("descriptor")
        .cache_key()
}

// ════════════════════════════════════════════════════════════════════
// ClientMessage round-trip tests (4 variants)
// ════════════════════════════════════════════════════════════════════

#[test]
fn client_message_authenticate_round_trip() {
    let msg = ClientMessage::Authenticate {
        credential: "eras_credential_test".into(),
        sdk_version: Some("0.3.0".into()),
        platform: Some("rust".into()),
    };
    let deser = round_trip(&msg);
    if let ClientMessage::Authenticate {
        credential,
        sdk_version,
        platform,
    } = deser
    {
        assert_eq!(credential, "eras_credential_test");
        assert_eq!(sdk_version.as_deref(), Some("0.3.0"));
        assert_eq!(platform.as_deref(), Some("rust"));
    } else {
        panic!("expected Authenticate variant");
    }
}

#[test]
fn client_message_subscribe_round_trip() {
    let query =
        QueryDescriptor::new("games.byJoinCode", &json!({ "joinCode": "BRONZE-AGE" })).unwrap();
    let msg = ClientMessage::Subscribe {
        key: query.cache_key(),
        query: query.clone(),
    };
    let deser = round_trip(&msg);
    if let ClientMessage::Subscribe { key, query: q } = deser {
        assert_eq!(key, query.cache_key());
        // The key must be recomputable from the shipped descriptor.
        assert_eq!(q.cache_key(), key);
        assert_eq!(q.name(), "games.byJoinCode");
    } else {
        panic!("expected Subscribe variant");
    }
}

#[test]
fn client_message_unsubscribe_round_trip() {
    let msg = ClientMessage::Unsubscribe { key: game_key() };
    let deser = round_trip(&msg);
    if let ClientMessage::Unsubscribe { key } = deser {
        assert_eq!(key, game_key());
    } else {
        panic!("expected Unsubscribe variant");
    }
}

#[test]
fn client_message_ping_round_trip() {
    let msg = ClientMessage::Ping;
    let deser = round_trip(&msg);
    assert!(matches!(deser, ClientMessage::Ping));
}

// ════════════════════════════════════════════════════════════════════
// ServerMessage round-trip tests (6 variants)
// ════════════════════════════════════════════════════════════════════

#[test]
fn server_message_authenticated_round_trip() {
    let msg = ServerMessage::Authenticated {
        user_id: Some(uuid::Uuid::from_u128(42)),
    };
    let deser = round_trip(&msg);
    if let ServerMessage::Authenticated { user_id } = deser {
        assert_eq!(user_id, Some(uuid::Uuid::from_u128(42)));
    } else {
        panic!("expected Authenticated variant");
    }
}

#[test]
fn server_message_authentication_error_round_trip() {
    let msg = ServerMessage::AuthenticationError {
        error: "credential expired".into(),
        error_code: Some(FetchErrorCode::InvalidCredential),
    };
    let deser = round_trip(&msg);
    if let ServerMessage::AuthenticationError { error, error_code } = deser {
        assert_eq!(error, "credential expired");
        assert_eq!(error_code, Some(FetchErrorCode::InvalidCredential));
    } else {
        panic!("expected AuthenticationError variant");
    }
}

#[test]
fn server_message_update_round_trip() {
    let msg = ServerMessage::Update {
        key: game_key(),
        value: json!({ "phase": "lobby", "players": [] }),
        version: 7,
    };
    let deser = round_trip(&msg);
    if let ServerMessage::Update {
        key,
        value,
        version,
    } = deser
    {
        assert_eq!(key, game_key());
        assert_eq!(value["phase"], "lobby");
        assert_eq!(version, 7);
    } else {
        panic!("expected Update variant");
    }
}

#[test]
fn server_message_query_error_round_trip() {
    let msg = ServerMessage::QueryError {
        key: game_key(),
        message: "no such game".into(),
        error_code: Some(FetchErrorCode::GameNotFound),
    };
    let deser = round_trip(&msg);
    if let ServerMessage::QueryError {
        key,
        message,
        error_code,
    } = deser
    {
        assert_eq!(key, game_key());
        assert_eq!(message, "no such game");
        assert_eq!(error_code, Some(FetchErrorCode::GameNotFound));
    } else {
        panic!("expected QueryError variant");
    }
}

#[test]
fn server_message_pong_round_trip() {
    let deser = round_trip(&ServerMessage::Pong);
    assert!(matches!(deser, ServerMessage::Pong));
}

#[test]
fn server_message_error_round_trip() {
    let msg = ServerMessage::Error {
        message: "internal failure".into(),
        error_code: Some(FetchErrorCode::InternalError),
    };
    let deser = round_trip(&msg);
    if let ServerMessage::Error {
        message,
        error_code,
    } = deser
    {
        assert_eq!(message, "internal failure");
        assert_eq!(error_code, Some(FetchErrorCode::InternalError));
    } else {
        panic!("expected Error variant");
    }
}

// ════════════════════════════════════════════════════════════════════
// FetchErrorCode serialization (SCREAMING_SNAKE_CASE)
// ════════════════════════════════════════════════════════════════════

#[test]
fn error_code_serialize_screaming_snake_case() {
    let json = serde_json::to_string(&FetchErrorCode::GameNotFound).expect("serialize");
    assert_eq!(json, "\"GAME_NOT_FOUND\"");
}

#[test]
fn error_code_deserialize_screaming_snake_case() {
    let code: FetchErrorCode =
        serde_json::from_str("\"RATE_LIMIT_EXCEEDED\"").expect("deserialize");
    assert_eq!(code, FetchErrorCode::RateLimitExceeded);
}

#[test]
fn error_code_round_trip_all_variants() {
    let variants = [
        FetchErrorCode::Unauthorized,
        FetchErrorCode::InvalidCredential,
        FetchErrorCode::QueryNotFound,
        FetchErrorCode::InvalidArguments,
        FetchErrorCode::GameNotFound,
        FetchErrorCode::RateLimitExceeded,
        FetchErrorCode::InternalError,
    ];
    for variant in &variants {
        let json = serde_json::to_string(variant).expect("serialize");
        assert!(
            json.starts_with('"') && json.ends_with('"'),
            "expected JSON string for {variant:?}, got {json}"
        );
        let inner = &json[1..json.len() - 1];
        assert!(
            inner.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
            "expected SCREAMING_SNAKE_CASE for {variant:?}, got {inner}"
        );
        let deser: FetchErrorCode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(&deser, variant);
    }
}

#[test]
fn error_code_descriptions_are_non_empty() {
    let variants = [
        FetchErrorCode::Unauthorized,
        FetchErrorCode::InvalidCredential,
        FetchErrorCode::QueryNotFound,
        FetchErrorCode::InvalidArguments,
        FetchErrorCode::GameNotFound,
        FetchErrorCode::RateLimitExceeded,
        FetchErrorCode::InternalError,
    ];
    for variant in &variants {
        assert!(!variant.description().is_empty());
        assert_eq!(variant.to_string(), variant.description());
    }
}

// ════════════════════════════════════════════════════════════════════
// Backend JSON fixture tests (simulate real backend JSON)
// ════════════════════════════════════════════════════════════════════

#[test]
fn fixture_authenticated_from_backend() {
    let json = r#"{
        "type": "Authenticated",
        "data": {
            "user_id": "00000000-0000-0000-0000-00000000002a"
        }
    }"#;
    let msg: ServerMessage = serde_json::from_str(json).expect("deserialize");
    if let ServerMessage::Authenticated { user_id } = msg {
        assert_eq!(user_id, Some(uuid::Uuid::from_u128(42)));
    } else {
        panic!("expected Authenticated");
    }
}

#[test]
fn fixture_update_from_backend_carries_a_snapshot() {
    let key = game_key();
    let json = format!(
        r#"{{
            "type": "Update",
            "data": {{
                "key": "{key}",
                "value": {{
                    "id": "00000000-0000-0000-0000-000000000001",
                    "joinCode": "BRONZE-AGE",
                    "phase": "guessing",
                    "players": [],
                    "currentRound": {{
                        "number": 2,
                        "card": {{
                            "id": "00000000-0000-0000-0000-000000000014",
                            "title": "Moon landing",
                            "year": 1969
                        }}
                    }}
                }},
                "version": 4
            }}
        }}"#
    );
    let msg: ServerMessage = serde_json::from_str(&json).expect("deserialize");
    if let ServerMessage::Update {
        key: k,
        value,
        version,
    } = msg
    {
        assert_eq!(k, key);
        assert_eq!(version, 4);
        let snapshot: GameSnapshot = serde_json::from_value(value).expect("snapshot");
        assert_eq!(snapshot.join_code, "BRONZE-AGE");
        // Mid-round sub-phases collapse into Active on the client.
        assert_eq!(snapshot.phase, GamePhase::Active);
        assert_eq!(snapshot.current_round.map(|r| r.number), Some(2));
    } else {
        panic!("expected Update");
    }
}

#[test]
fn fixture_query_error_from_backend() {
    let key = game_key();
    let json = format!(
        r#"{{
            "type": "QueryError",
            "data": {{
                "key": "{key}",
                "message": "No game matches join code",
                "error_code": "GAME_NOT_FOUND"
            }}
        }}"#
    );
    let msg: ServerMessage = serde_json::from_str(&json).expect("deserialize");
    if let ServerMessage::QueryError {
        key: k,
        message,
        error_code,
    } = msg
    {
        assert_eq!(k, key);
        assert_eq!(message, "No game matches join code");
        assert_eq!(error_code, Some(FetchErrorCode::GameNotFound));
    } else {
        panic!("expected QueryError");
    }
}

#[test]
fn fixture_pong_from_backend() {
    let json = r#"{ "type": "Pong" }"#;
    let msg: ServerMessage = serde_json::from_str(json).expect("deserialize");
    assert!(matches!(msg, ServerMessage::Pong));
}

#[test]
fn subscribe_wire_format_tags_type_and_data() {
    let query = QueryDescriptor::no_args("games.list");
    let msg = ClientMessage::Subscribe {
        key: query.cache_key(),
        query,
    };
    let value = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(value["type"], "Subscribe");
    assert!(value["data"]["key"].is_string());
    assert_eq!(value["data"]["query"]["name"], "games.list");
}

#[test]
fn cache_key_serializes_as_hex_string() {
    let key = game_key();
    let json = serde_json::to_string(&key).expect("serialize");
    assert!(json.starts_with('"') && json.ends_with('"'));
    assert_eq!(json.len(), 66); // 64 hex chars + quotes
    let back: CacheKey = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, key);
}
