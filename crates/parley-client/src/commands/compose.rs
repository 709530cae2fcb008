//! Message composer: the input buffer and message submission.

use std::sync::{Arc, Mutex, PoisonError};

use parley_shared::{Backend, Message, MessageId, MessageKind, NewMessage, Table};
use tracing::{debug, info};

use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::rows::decode_row;
use crate::state::Store;

pub struct Composer {
    backend: Arc<dyn Backend>,
    store: Store,
    events: EventBus,
    input: Mutex<String>,
}

impl Composer {
    pub fn new(backend: Arc<dyn Backend>, store: Store, events: EventBus) -> Self {
        Self {
            backend,
            store,
            events,
            input: Mutex::new(String::new()),
        }
    }

    pub fn input(&self) -> String {
        self.buffer().clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        *self.buffer() = text.into();
    }

    /// Append at the end of the input (emoji picker).
    pub fn append(&self, text: &str) {
        self.buffer().push_str(text);
    }

    /// Send the current input to the active conversation.
    ///
    /// Blank input is a silent no-op error: nothing is sent and no failure
    /// is reported. The message is not added to the cache here; it arrives
    /// through the live feed like any other. On success the input is cleared
    /// (unless it was edited meanwhile); on failure it is kept.
    pub async fn submit(&self) -> Result<MessageId> {
        let content = self.input();
        if content.trim().is_empty() {
            debug!("Ignoring blank message");
            return Err(ClientError::validation("Message is empty"));
        }

        let result = self.send(&content).await;
        match result {
            Ok((chat_id, id)) => {
                {
                    let mut input = self.buffer();
                    if *input == content {
                        input.clear();
                    }
                }
                info!(chat = %chat_id, message = %id, "Message sent");
                self.events.emit(ClientEvent::ScrollToNewest { chat_id });
                Ok(id)
            }
            Err(e) => {
                self.events.failure("send_message", &e);
                Err(e)
            }
        }
    }

    async fn send(&self, content: &str) -> Result<(parley_shared::ChatId, MessageId)> {
        let (chat_id, sender_id) = self
            .store
            .read(|s| (s.active_chat_id(), s.current_user().map(|p| p.id)));
        let chat_id = chat_id.ok_or_else(|| ClientError::validation("No conversation selected"))?;
        let sender_id = sender_id.ok_or_else(|| ClientError::validation("Not signed in"))?;

        let row = serde_json::to_value(NewMessage {
            chat_id,
            sender_id,
            content: content.to_string(),
            kind: MessageKind::Text,
        })?;
        let stored: Message = decode_row(self.backend.insert(Table::Messages, row).await?)?;
        Ok((chat_id, stored.id))
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, String> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
