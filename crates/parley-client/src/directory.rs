//! Conversation directory: the signed-in user's chats, newest activity
//! first, kept current from the `chats` change feed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_shared::{
    Backend, ChangeEvent, ChangeFilter, ChangeKind, Chat, ChatId, ChatKind, Direction, Embed,
    EventFilter, ProfileId, Query, Table,
};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{ClientEvent, EventBus};
use crate::retry::RetryPolicy;
use crate::rows::{decode_event, decode_rows, event_id};
use crate::state::Store;
use crate::task::BackgroundTask;

/// What the chat list shows for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: String,
    pub avatar_url: Option<String>,
    pub online: bool,
    /// Relative age of the last activity, e.g. "5 minutes ago".
    pub updated: String,
}

impl ChatSummary {
    pub fn new(chat: &Chat, self_id: ProfileId, now: DateTime<Utc>) -> Self {
        Self {
            id: chat.id,
            kind: chat.kind,
            title: chat.display_name(self_id),
            avatar_url: chat.avatar_url(self_id).map(str::to_owned),
            online: chat.peer_online(self_id),
            updated: humanize_since(chat.updated_at, now),
        }
    }
}

#[derive(Clone)]
pub struct ConversationDirectory {
    backend: Arc<dyn Backend>,
    store: Store,
    events: EventBus,
    retry: RetryPolicy,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn Backend>, store: Store, events: EventBus, retry: RetryPolicy) -> Self {
        Self {
            backend,
            store,
            events,
            retry,
        }
    }

    pub fn list_conversations(&self) -> Vec<Chat> {
        self.store.read(|s| s.conversations().to_vec())
    }

    pub fn summaries(&self, now: DateTime<Utc>) -> Vec<ChatSummary> {
        self.store.read(|s| match s.self_id() {
            Some(me) => s
                .conversations()
                .iter()
                .map(|chat| ChatSummary::new(chat, me, now))
                .collect(),
            None => Vec::new(),
        })
    }

    /// Re-read every conversation the user takes part in, with participants,
    /// in a single query, and replace the list.
    pub async fn refresh(&self) -> Result<()> {
        if self.store.read(|s| s.self_id()).is_none() {
            debug!("Not signed in, skipping conversation refresh");
            return Ok(());
        }

        let query = Query::from(Table::Chats)
            .embed(Embed::Participants)
            .order("updated_at", Direction::Descending);
        let backend = &self.backend;
        let query = &query;
        let chats = self
            .retry
            .run("refresh_conversations", || async move {
                decode_rows::<Chat>(backend.select(query).await?)
            })
            .await?;

        for chat in &chats {
            if let Err(e) = chat.validate() {
                warn!(chat = %chat.id, error = %e, "Conversation violates model invariants");
            }
        }

        let count = chats.len();
        let installed = self.store.write(|s| {
            // Signed out while the read was in flight.
            if s.self_id().is_none() {
                return false;
            }
            s.replace_conversations(chats);
            true
        });
        if installed {
            info!(count, "Conversations refreshed");
            self.events.emit(ClientEvent::ConversationsUpdated);
        }
        Ok(())
    }

    /// Fetch one conversation with its participants. `None` when it does not
    /// exist or the user cannot see it.
    pub async fn fetch_one(&self, id: ChatId) -> Result<Option<Chat>> {
        let query = Query::from(Table::Chats)
            .eq("id", id.to_string())
            .embed(Embed::Participants)
            .limit(1);
        let backend = &self.backend;
        let query = &query;
        let mut chats = self
            .retry
            .run("fetch_conversation", || async move {
                decode_rows::<Chat>(backend.select(query).await?)
            })
            .await?;
        Ok(chats.pop())
    }

    /// Patch the cached list for one change event. Events that cannot be
    /// applied incrementally fall back to a full refresh.
    pub async fn apply_change(&self, event: ChangeEvent) -> Result<()> {
        let Some(me) = self.store.read(|s| s.self_id()) else {
            return Ok(());
        };

        match (event.table, event.kind) {
            (Table::Chats, ChangeKind::Update) => match decode_event::<Chat>(&event) {
                Some(chat) => {
                    let id = chat.id;
                    if self.store.write(|s| s.patch_conversation(id, chat.into())) {
                        debug!(chat = %id, "Conversation patched");
                        self.events.emit(ClientEvent::ConversationsUpdated);
                    }
                    Ok(())
                }
                None => self.refresh_after("undecodable chat update").await,
            },
            (Table::Chats, ChangeKind::Insert) => match event_id::<ChatId>(&event) {
                Some(id) => self.insert_by_id(id).await,
                None => self.refresh_after("undecodable chat insert").await,
            },
            (Table::Chats, ChangeKind::Delete) => match event_id::<ChatId>(&event) {
                Some(id) => {
                    if self.store.write(|s| s.remove_conversation(id)) {
                        debug!(chat = %id, "Conversation removed");
                        self.events.emit(ClientEvent::ConversationsUpdated);
                    }
                    Ok(())
                }
                None => self.refresh_after("undecodable chat delete").await,
            },
            (Table::ChatParticipants, ChangeKind::Insert) => {
                let Some(row) = event.record() else {
                    return Ok(());
                };
                let chat_id = row
                    .get("chat_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| ChatId::parse(s).ok());
                let Some(chat_id) = chat_id else {
                    return self.refresh_after("undecodable membership insert").await;
                };
                // Joined a chat, or someone joined one of ours: (re)load it
                // with its participant list.
                let joined = row.get("profile_id").and_then(|v| v.as_str())
                    == Some(me.to_string().as_str());
                let listed = self.store.read(|s| s.conversation(chat_id).is_some());
                if joined || listed {
                    self.insert_by_id(chat_id).await
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Subscribe to chat and membership changes and apply them in the
    /// background until the returned task is dropped.
    pub async fn mount(&self) -> Result<BackgroundTask> {
        let mut chats = self
            .backend
            .subscribe(ChangeFilter::new("chat_updates", Table::Chats))
            .await?;
        let mut memberships = self
            .backend
            .subscribe(
                ChangeFilter::new("chat_membership", Table::ChatParticipants)
                    .events(EventFilter::Only(ChangeKind::Insert)),
            )
            .await?;

        let directory = self.clone();
        info!("Conversation directory mounted");
        Ok(BackgroundTask::spawn("conversation_directory", async move {
            loop {
                let event = tokio::select! {
                    Some(event) = chats.recv() => event,
                    Some(event) = memberships.recv() => event,
                    else => break,
                };
                if let Err(e) = directory.apply_change(event).await {
                    directory.events.failure("load_conversations", &e);
                }
            }
            warn!("Conversation change feed ended");
        }))
    }

    async fn insert_by_id(&self, id: ChatId) -> Result<()> {
        match self.fetch_one(id).await {
            Ok(Some(chat)) => {
                self.store.write(|s| s.upsert_conversation(chat));
                debug!(chat = %id, "Conversation inserted");
                self.events.emit(ClientEvent::ConversationsUpdated);
                Ok(())
            }
            Ok(None) => {
                debug!(chat = %id, "Conversation not visible, ignoring");
                Ok(())
            }
            Err(e) => {
                warn!(chat = %id, error = %e, "Single conversation fetch failed");
                self.refresh().await
            }
        }
    }

    async fn refresh_after(&self, reason: &'static str) -> Result<()> {
        warn!(reason, "Falling back to a full conversation refresh");
        self.refresh().await
    }
}

/// Coarse relative time, e.g. "about 2 hours ago".
pub fn humanize_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let minutes = (secs + 30) / 60;
    let hours = (minutes + 30) / 60;
    let days = (hours + 12) / 24;
    let months = (days + 15) / 30;

    let text = match secs {
        s if s < 30 => "less than a minute".to_string(),
        s if s < 90 => "1 minute".to_string(),
        _ if minutes < 45 => format!("{minutes} minutes"),
        _ if minutes < 90 => "about 1 hour".to_string(),
        _ if hours < 24 => format!("about {hours} hours"),
        _ if hours < 42 => "1 day".to_string(),
        _ if days < 30 => format!("{days} days"),
        _ if days < 45 => "about 1 month".to_string(),
        _ if days < 60 => "about 2 months".to_string(),
        _ if months < 12 => format!("{months} months"),
        _ => match days / 365 {
            0 | 1 => "about 1 year".to_string(),
            years => format!("about {years} years"),
        },
    };
    format!("{text} ago")
}
