//! Fixtures shared by the integration tests: an in-memory backend seeded
//! with two users and a direct chat, and polling helpers for state that
//! background tasks update.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parley_client::{ClientConfig, ClientEvent, ParleyClient};
use parley_shared::{
    AuthService, Chat, ChatId, Message, MessageId, ProfileId, RecordStore, Table,
};
use parley_store::EmbeddedBackend;
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const PASSWORD: &str = "secret123";
pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";

pub struct Fixture {
    pub backend: Arc<EmbeddedBackend>,
    pub client: ParleyClient,
    pub alice: ProfileId,
    pub bob: ProfileId,
    /// Direct chat between alice and bob.
    pub direct: ChatId,
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        retry_base_delay: Duration::from_millis(1),
        teardown_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Backend with alice and bob registered and a direct chat between them.
/// Nobody is signed in.
pub async fn seeded_backend() -> (Arc<EmbeddedBackend>, ProfileId, ProfileId, ChatId) {
    let backend = Arc::new(EmbeddedBackend::in_memory().unwrap());
    let alice = create_user(&backend, ALICE, "alice").await;
    let bob = create_user(&backend, BOB, "bob").await;
    // Alice is listed second on purpose: the peer must not be positional.
    let direct = create_chat(&backend, "direct", None, alice, &[bob, alice], at(0));
    (backend, alice, bob, direct)
}

/// Started client over a seeded backend, signed in as alice, with the
/// directory loaded.
pub async fn signed_in_as_alice() -> Fixture {
    let (backend, alice, bob, direct) = seeded_backend().await;
    let client = ParleyClient::new(backend.clone(), test_config());
    client.start().await.unwrap();
    client.sign_in(ALICE, PASSWORD).await.unwrap();
    eventually(|| client.session().current_user().is_some()).await;
    eventually(|| !client.directory().list_conversations().is_empty()).await;
    Fixture {
        backend,
        client,
        alice,
        bob,
        direct,
    }
}

pub async fn create_user(backend: &EmbeddedBackend, email: &str, username: &str) -> ProfileId {
    let user = backend
        .sign_up(email, PASSWORD, json!({ "username": username }))
        .await
        .unwrap();
    backend
        .insert(
            Table::Profiles,
            json!({ "id": user.id, "username": username, "is_online": true }),
        )
        .await
        .unwrap();
    user.id
}

/// Insert a chat and its participants straight into the database, without
/// change events.
pub fn create_chat(
    backend: &EmbeddedBackend,
    kind: &str,
    name: Option<&str>,
    created_by: ProfileId,
    members: &[ProfileId],
    updated_at: DateTime<Utc>,
) -> ChatId {
    backend.with_database(|db| {
        let chat = db
            .insert_row(
                Table::Chats,
                &json!({
                    "type": kind,
                    "name": name,
                    "created_by": created_by,
                    "created_at": updated_at,
                    "updated_at": updated_at,
                }),
            )
            .unwrap();
        let id: ChatId = serde_json::from_value(chat["id"].clone()).unwrap();
        for member in members {
            db.insert_row(
                Table::ChatParticipants,
                &json!({ "chat_id": id, "profile_id": member }),
            )
            .unwrap();
        }
        id
    })
}

/// Insert history messages straight into the database, without change
/// events. Message `i` is created at `at(i)` with content `m{i}`.
pub fn seed_messages(
    backend: &EmbeddedBackend,
    chat: ChatId,
    sender: ProfileId,
    range: std::ops::RangeInclusive<i64>,
) -> Vec<MessageId> {
    backend.with_database(|db| {
        range
            .map(|i| {
                let row = db
                    .insert_row(
                        Table::Messages,
                        &json!({
                            "chat_id": chat,
                            "sender_id": sender,
                            "content": format!("m{i}"),
                            "created_at": at(i),
                        }),
                    )
                    .unwrap();
                serde_json::from_value(row["id"].clone()).unwrap()
            })
            .collect()
    })
}

/// A message row as the change feed would carry it.
pub fn message_row(chat: ChatId, id: MessageId, sender: ProfileId, content: &str, secs: i64) -> Value {
    json!({
        "id": id,
        "chat_id": chat,
        "sender_id": sender,
        "content": content,
        "type": "text",
        "created_at": at(secs),
        "updated_at": at(secs),
        "is_encrypted": false,
    })
}

pub fn chat_of(client: &ParleyClient, id: ChatId) -> Chat {
    client
        .directory()
        .list_conversations()
        .into_iter()
        .find(|c| c.id == id)
        .expect("chat in directory")
}

pub fn contents(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.content.clone()).collect()
}

/// Poll `condition` until it holds; fail the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next event matching `wanted`, skipping others; fail after two seconds.
pub async fn next_event(
    rx: &mut broadcast::Receiver<ClientEvent>,
    mut wanted: impl FnMut(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event not received in time")
}
