//! Notifications from the client core to whatever renders it.

use parley_shared::ChatId;
use tokio::sync::broadcast;

/// Capacity of the event channel. Slow consumers past this lag and skip.
const EVENT_CAPACITY: usize = 256;

/// Screens the UI can be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Register,
    /// Chat list + conversation view. Requires a session.
    Chats,
}

impl Route {
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Chats)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The auth user or the installed profile changed.
    SessionChanged,
    Navigate(Route),
    ConversationsUpdated,
    ActiveConversationChanged(Option<ChatId>),
    MessagesUpdated { chat_id: ChatId },
    /// A message was sent; the view should follow the newest message.
    ScrollToNewest { chat_id: ChatId },
    /// A user-initiated or background action failed.
    Failure { action: &'static str, message: String },
}

/// Broadcast bus for [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event = ?e.0, "No event listeners");
        }
    }

    /// Report a failed action to the UI and the log.
    pub fn failure(&self, action: &'static str, error: &impl std::fmt::Display) {
        tracing::warn!(action, error = %error, "Action failed");
        self.emit(ClientEvent::Failure {
            action,
            message: error.to_string(),
        });
    }
}
