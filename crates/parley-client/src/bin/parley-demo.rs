//! # parley-demo
//!
//! Drives the client against the embedded SQLite backend: registers two
//! users, opens a direct conversation between them, sends a message and
//! prints what the chat list and conversation pane would show.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parley_client::{ClientConfig, ClientError, ConversationView, ParleyClient, RegistrationForm};
use parley_shared::{AuthUser, Chat, ChatId, ChatKind, Query, RecordStore, Table};
use parley_store::{Database, EmbeddedBackend};
use serde_json::json;
use tracing::info;

const PASSWORD: &str = "parley-demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_client::init_tracing();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let backend = match &config.db_path {
        Some(path) => EmbeddedBackend::open_at(path)
            .with_context(|| format!("opening database at {}", path.display()))?,
        None => EmbeddedBackend::new(Database::new().context("opening default database")?),
    };
    let backend = Arc::new(backend);

    let client = ParleyClient::new(backend.clone(), config);
    client.start().await?;

    let alice = ensure_account(&client, "alice@example.com", "alice").await?;
    let bob = ensure_account(&client, "bob@example.com", "bob").await?;

    client.sign_in("alice@example.com", PASSWORD).await?;
    wait_for(|| client.session().current_user().is_some()).await?;

    let chat_id = ensure_direct_chat(backend.as_ref(), alice.id, bob.id).await?;
    wait_for(|| client.directory().list_conversations().iter().any(|c| c.id == chat_id)).await?;

    let chat: Chat = client
        .directory()
        .list_conversations()
        .into_iter()
        .find(|c| c.id == chat_id)
        .context("conversation missing from directory")?;
    client.select(Some(chat)).await?;

    client.composer().set_input("Hello from the demo!");
    let sent = client.composer().submit().await?;
    wait_for(|| {
        client
            .messages()
            .messages(chat_id)
            .iter()
            .any(|m| m.id == sent)
    })
    .await?;

    for summary in client.conversations() {
        println!("{:<20} {}", summary.title, summary.updated);
    }
    if let ConversationView::Open { title, messages, .. } = client.view() {
        println!("--- {title} ---");
        for m in messages {
            let who = m.sender.as_ref().map(|p| p.username.as_str()).unwrap_or("?");
            println!("[{}] {who}: {}", m.created_at.format("%H:%M:%S"), m.content);
        }
    }

    client.sign_out().await?;
    client.shutdown().await;
    Ok(())
}

/// Register `username`, or find the account left by an earlier run.
async fn ensure_account(
    client: &ParleyClient,
    email: &str,
    username: &str,
) -> anyhow::Result<AuthUser> {
    match client
        .register(RegistrationForm::new(email, PASSWORD, username))
        .await
    {
        Ok(user) => Ok(user),
        Err(ClientError::Conflict(_)) => {
            let session = client.sign_in(email, PASSWORD).await?;
            client.sign_out().await?;
            Ok(session.user)
        }
        Err(e) => Err(e.into()),
    }
}

async fn ensure_direct_chat(
    backend: &EmbeddedBackend,
    me: parley_shared::ProfileId,
    peer: parley_shared::ProfileId,
) -> anyhow::Result<ChatId> {
    let existing: Vec<Chat> = backend
        .select(&Query::from(Table::Chats).embed(parley_shared::Embed::Participants))
        .await?
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<_, _>>()?;
    if let Some(chat) = existing
        .iter()
        .find(|c| c.kind == ChatKind::Direct && c.is_participant(peer))
    {
        return Ok(chat.id);
    }

    let chat = backend
        .insert(Table::Chats, json!({ "type": "direct", "created_by": me }))
        .await?;
    let chat_id: ChatId = serde_json::from_value(chat["id"].clone())?;
    for profile in [me, peer] {
        backend
            .insert(
                Table::ChatParticipants,
                json!({ "chat_id": chat_id, "profile_id": profile }),
            )
            .await?;
    }
    Ok(chat_id)
}

async fn wait_for(mut ready: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("timed out waiting for the client")
}
