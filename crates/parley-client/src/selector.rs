//! The single active conversation and its live message feed.

use std::sync::Arc;
use std::time::Duration;

use parley_shared::{Chat, ChatId, Message};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::events::{ClientEvent, EventBus};
use crate::messages::{LiveSubscription, MessageCache};
use crate::state::Store;

/// What the conversation pane shows.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationView {
    /// Nothing selected.
    Empty,
    Open {
        chat: Chat,
        title: String,
        messages: Vec<Message>,
    },
}

pub struct ConversationSelector {
    store: Store,
    events: EventBus,
    messages: Arc<MessageCache>,
    /// The one live subscription; switching holds this lock for the whole
    /// teardown + subscribe sequence.
    live: Mutex<Option<LiveSubscription>>,
    teardown_timeout: Duration,
}

impl ConversationSelector {
    pub fn new(
        store: Store,
        events: EventBus,
        messages: Arc<MessageCache>,
        teardown_timeout: Duration,
    ) -> Self {
        Self {
            store,
            events,
            messages,
            live: Mutex::new(None),
            teardown_timeout,
        }
    }

    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.store.read(|s| s.active_chat_id())
    }

    /// Chat whose live feed is currently open, if any.
    pub async fn live_chat_id(&self) -> Option<ChatId> {
        self.live.lock().await.as_ref().map(LiveSubscription::chat_id)
    }

    /// Make `chat` the active conversation (or clear the selection with
    /// `None`). The previous live feed is always torn down first; for a new
    /// selection the feed is opened and the newest page of history loaded.
    pub async fn select(&self, chat: Option<Chat>) -> Result<()> {
        let mut live = self.live.lock().await;
        if let Some(previous) = live.take() {
            previous.release(self.teardown_timeout).await;
        }

        let Some(chat) = chat else {
            self.store.write(|s| s.deactivate());
            drop(live);
            info!("Conversation deselected");
            self.events.emit(ClientEvent::ActiveConversationChanged(None));
            return Ok(());
        };

        let chat_id = chat.id;
        self.store.write(|s| s.activate(chat));
        self.events
            .emit(ClientEvent::ActiveConversationChanged(Some(chat_id)));
        info!(chat = %chat_id, "Conversation selected");

        match self.messages.subscribe_live(chat_id).await {
            Ok(subscription) => *live = Some(subscription),
            Err(e) => {
                self.events.failure("open_conversation", &e);
                return Err(e);
            }
        }
        drop(live);

        if let Err(e) = self.messages.load_older(chat_id).await {
            self.events.failure("load_messages", &e);
            return Err(e);
        }
        Ok(())
    }

    pub fn view(&self) -> ConversationView {
        self.store.read(|s| {
            let Some(chat) = s.active_chat() else {
                return ConversationView::Empty;
            };
            let title = match s.self_id() {
                Some(me) => chat.display_name(me),
                None => chat.name.clone().unwrap_or_default(),
            };
            ConversationView::Open {
                chat: chat.clone(),
                title,
                messages: s.messages(chat.id),
            }
        })
    }
}
