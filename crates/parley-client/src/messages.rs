//! Message cache: history paging and the live message feed of a chat.

use std::sync::Arc;
use std::time::Duration;

use parley_shared::constants::CHAT_CHANNEL_PREFIX;
use parley_shared::{
    Backend, ChangeEvent, ChangeFilter, ChangeKind, ChatId, Direction, Embed, Message, MessageId,
    Query, Table,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::pagination::{LoadOutcome, Paginator};
use crate::retry::RetryPolicy;
use crate::rows::{decode_event, decode_rows, event_id};
use crate::state::Store;

pub struct MessageCache {
    backend: Arc<dyn Backend>,
    store: Store,
    events: EventBus,
    page_size: usize,
    retry: RetryPolicy,
}

impl MessageCache {
    pub fn new(backend: Arc<dyn Backend>, store: Store, events: EventBus, config: &ClientConfig) -> Self {
        Self {
            backend,
            store,
            events,
            page_size: config.page_size.max(1),
            retry: config.retry_policy(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Cached messages of `chat_id`, oldest first.
    pub fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.store.read(|s| s.messages(chat_id))
    }

    /// Fetch the next page of older history for an open conversation and
    /// merge it at the head of its log.
    pub async fn load_older(&self, chat_id: ChatId) -> Result<LoadOutcome> {
        let page = match self.store.write(|s| s.claim_page(chat_id)) {
            Ok(Some(page)) => page,
            Ok(None) => return Err(ClientError::validation("Conversation is not open")),
            Err(outcome) => {
                debug!(chat = %chat_id, outcome = ?outcome, "Skipping history load");
                return Ok(outcome);
            }
        };

        let (from, to) = Paginator::window(page, self.page_size);
        let query = Query::from(Table::Messages)
            .eq("chat_id", chat_id.to_string())
            .order("created_at", Direction::Descending)
            .range(from, to)
            .embed(Embed::Sender);

        let backend = &self.backend;
        let query = &query;
        let fetched = self
            .retry
            .run("load_messages", || async move {
                let rows = backend.select(query).await?;
                decode_rows::<Message>(rows)
            })
            .await;

        let mut messages = match fetched {
            Ok(messages) => messages,
            Err(e) => {
                self.store.write(|s| s.abort_page(chat_id, page));
                warn!(chat = %chat_id, page, error = %e, "Failed to load message history");
                return Err(e);
            }
        };

        // Rows arrive newest first.
        messages.reverse();
        let fetched = messages.len();
        let page_size = self.page_size;
        let added = self.store.write(|s| {
            let added = s.merge_history(chat_id, messages);
            s.complete_page(chat_id, page, fetched, page_size);
            added
        });

        debug!(chat = %chat_id, page, fetched, added, "Merged history page");
        if added > 0 {
            self.events.emit(ClientEvent::MessagesUpdated { chat_id });
        }
        Ok(LoadOutcome::Loaded { fetched, added })
    }

    /// Open the live feed of `chat_id`: inserts, updates and deletes scoped
    /// to that chat are applied to its log until the returned handle is
    /// released or dropped.
    pub async fn subscribe_live(&self, chat_id: ChatId) -> Result<LiveSubscription> {
        let filter = ChangeFilter::new(format!("{CHAT_CHANNEL_PREFIX}{chat_id}"), Table::Messages)
            .scope("chat_id", chat_id.to_string());
        let mut feed = self.backend.subscribe(filter).await?;

        let store = self.store.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                apply_message_event(&store, &events, chat_id, event);
            }
            debug!(chat = %chat_id, "Message feed closed");
        });

        info!(chat = %chat_id, "Live message feed opened");
        Ok(LiveSubscription {
            chat_id,
            task: Some(task),
        })
    }
}

fn apply_message_event(store: &Store, events: &EventBus, chat_id: ChatId, event: ChangeEvent) {
    let changed = match event.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(message) = decode_event::<Message>(&event) else {
                warn!(chat = %chat_id, kind = ?event.kind, "Undecodable message event");
                return;
            };
            if message.chat_id != chat_id {
                debug!(chat = %chat_id, other = %message.chat_id, "Ignoring message for another chat");
                return;
            }
            let id = message.id;
            let applied = if event.kind == ChangeKind::Insert {
                store.write(|s| s.append_live(message))
            } else {
                store.write(|s| s.update_message(message))
            };
            if !applied {
                debug!(chat = %chat_id, message = %id, kind = ?event.kind, "Live event changed nothing");
            }
            applied
        }
        ChangeKind::Delete => match event_id::<MessageId>(&event) {
            Some(id) => store.write(|s| s.remove_message(chat_id, id)),
            None => {
                warn!(chat = %chat_id, "Delete event without a message id");
                false
            }
        },
    };

    if changed {
        events.emit(ClientEvent::MessagesUpdated { chat_id });
    }
}

/// Handle to a running live message feed.
///
/// Releasing (or dropping) the handle stops the pump task, which drops the
/// backend subscription with it.
#[derive(Debug)]
pub struct LiveSubscription {
    chat_id: ChatId,
    task: Option<JoinHandle<()>>,
}

impl LiveSubscription {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the feed and wait, at most `timeout`, for the pump task to wind
    /// down.
    pub async fn release(mut self, timeout: Duration) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        match tokio::time::timeout(timeout, task).await {
            Ok(_) => info!(chat = %self.chat_id, "Live message feed closed"),
            Err(_) => warn!(
                chat = %self.chat_id,
                timeout_ms = timeout.as_millis() as u64,
                "Live message feed did not stop in time"
            ),
        }
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
