//! Client-side cache shared by every component.
//!
//! [`Store`] wraps a [`CacheState`] behind `Arc<Mutex<>>`. The lock is only
//! taken inside [`Store::read`] / [`Store::write`] closures, which are
//! synchronous, so it is never held across an `.await`. Each mutating method
//! on [`CacheState`] is a complete transition that leaves the cache
//! consistent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use parley_shared::{AuthUser, Chat, ChatId, ChatKind, Message, MessageId, Profile, ProfileId};

use crate::message_log::MessageLog;
use crate::pagination::{LoadOutcome, Paginator};

#[derive(Debug, Default)]
pub struct CacheState {
    /// Identity reported by the auth service.
    auth_user: Option<AuthUser>,
    /// Full profile of the signed-in user, once fetched.
    current_user: Option<Profile>,
    /// Conversations, newest activity first.
    conversations: Vec<Chat>,
    /// Snapshot of the chat as it was selected.
    active: Option<Chat>,
    logs: HashMap<ChatId, MessageLog>,
    pages: HashMap<ChatId, Paginator>,
}

/// Scalar columns of a `chats` row, as carried by an update event.
#[derive(Debug, Clone)]
pub struct ChatColumns {
    pub kind: ChatKind,
    pub name: Option<String>,
    pub created_by: ProfileId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Chat> for ChatColumns {
    fn from(chat: Chat) -> Self {
        Self {
            kind: chat.kind,
            name: chat.name,
            created_by: chat.created_by,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

impl CacheState {
    // --- identity ---------------------------------------------------------

    pub fn auth_user(&self) -> Option<&AuthUser> {
        self.auth_user.as_ref()
    }

    pub fn current_user(&self) -> Option<&Profile> {
        self.current_user.as_ref()
    }

    /// Id of the signed-in user, known as soon as the session is.
    pub fn self_id(&self) -> Option<ProfileId> {
        self.current_user
            .as_ref()
            .map(|p| p.id)
            .or_else(|| self.auth_user.as_ref().map(|u| u.id))
    }

    pub fn set_auth_user(&mut self, user: AuthUser) {
        if self.self_id().is_some_and(|id| id != user.id) {
            self.current_user = None;
        }
        self.auth_user = Some(user);
    }

    /// Install the fetched profile. Ignored if it does not belong to the
    /// session user (a late fetch after an account switch).
    pub fn set_current_user(&mut self, profile: Profile) -> bool {
        match &self.auth_user {
            Some(user) if user.id == profile.id => {
                self.current_user = Some(profile);
                true
            }
            _ => false,
        }
    }

    /// Drop everything: identity, directory, active chat and all message
    /// partitions.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // --- directory --------------------------------------------------------

    pub fn conversations(&self) -> &[Chat] {
        &self.conversations
    }

    pub fn conversation(&self, id: ChatId) -> Option<&Chat> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn replace_conversations(&mut self, chats: Vec<Chat>) {
        self.conversations = chats;
        sort_conversations(&mut self.conversations);
    }

    /// Insert or replace a conversation, keeping the list ordered.
    pub fn upsert_conversation(&mut self, chat: Chat) {
        match self.conversations.iter_mut().find(|c| c.id == chat.id) {
            Some(slot) => *slot = chat,
            None => self.conversations.push(chat),
        }
        sort_conversations(&mut self.conversations);
    }

    /// Merge new scalar columns into a cached conversation; participants are
    /// kept. Returns `false` for a conversation not in the list.
    pub fn patch_conversation(&mut self, id: ChatId, columns: ChatColumns) -> bool {
        let Some(chat) = self.conversations.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        chat.kind = columns.kind;
        chat.name = columns.name;
        chat.created_by = columns.created_by;
        chat.created_at = columns.created_at;
        chat.updated_at = columns.updated_at;
        sort_conversations(&mut self.conversations);
        true
    }

    pub fn remove_conversation(&mut self, id: ChatId) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        self.conversations.len() != before
    }

    // --- active conversation ---------------------------------------------

    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.active.as_ref().map(|c| c.id)
    }

    /// The active conversation, as currently listed in the directory when it
    /// is there, else as it was when selected.
    pub fn active_chat(&self) -> Option<&Chat> {
        let selected = self.active.as_ref()?;
        Some(self.conversation(selected.id).unwrap_or(selected))
    }

    /// Make `chat` the single active conversation. The message partition is
    /// created on first activation and paging restarts from the newest page.
    pub fn activate(&mut self, chat: Chat) {
        let id = chat.id;
        self.active = Some(chat);
        self.logs.entry(id).or_default();
        self.pages.insert(id, Paginator::new());
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    // --- messages ---------------------------------------------------------

    pub fn messages(&self, chat: ChatId) -> Vec<Message> {
        self.logs
            .get(&chat)
            .map(|log| log.messages().to_vec())
            .unwrap_or_default()
    }

    /// Merge a chronological page of history. Partitions that no longer
    /// exist (the cache was cleared meanwhile) are not recreated.
    pub fn merge_history(&mut self, chat: ChatId, page: Vec<Message>) -> usize {
        match self.logs.get_mut(&chat) {
            Some(log) => log.merge_page(page),
            None => 0,
        }
    }

    pub fn append_live(&mut self, message: Message) -> bool {
        match self.logs.get_mut(&message.chat_id) {
            Some(log) => log.append_live(message),
            None => false,
        }
    }

    pub fn update_message(&mut self, message: Message) -> bool {
        match self.logs.get_mut(&message.chat_id) {
            Some(log) => log.apply_update(message),
            None => false,
        }
    }

    pub fn remove_message(&mut self, chat: ChatId, id: MessageId) -> bool {
        self.logs
            .get_mut(&chat)
            .and_then(|log| log.remove(id))
            .is_some()
    }

    // --- paging -----------------------------------------------------------

    /// Claim the next history page of `chat`, or say why there is none.
    pub fn claim_page(&mut self, chat: ChatId) -> Result<Option<usize>, LoadOutcome> {
        let Some(pager) = self.pages.get_mut(&chat) else {
            return Ok(None);
        };
        if pager.is_exhausted() {
            return Err(LoadOutcome::Exhausted);
        }
        pager.begin().map(Some).ok_or(LoadOutcome::Busy)
    }

    pub fn complete_page(&mut self, chat: ChatId, page: usize, fetched: usize, page_size: usize) {
        if let Some(pager) = self.pages.get_mut(&chat) {
            pager.complete(page, fetched, page_size);
        }
    }

    pub fn abort_page(&mut self, chat: ChatId, page: usize) {
        if let Some(pager) = self.pages.get_mut(&chat) {
            pager.abort(page);
        }
    }
}

/// Newest activity first; ids break ties so the order is stable across
/// refreshes.
fn sort_conversations(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
}

/// Shared handle to the cache.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<CacheState>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, f: impl FnOnce(&CacheState) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parley_shared::MessageKind;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn chat(id: u128, updated: i64) -> Chat {
        Chat {
            id: ChatId(Uuid::from_u128(id)),
            kind: ChatKind::Group,
            name: Some(format!("g{id}")),
            created_by: ProfileId(Uuid::from_u128(99)),
            created_at: at(0),
            updated_at: at(updated),
            participants: Vec::new(),
        }
    }

    fn user(id: u128) -> AuthUser {
        AuthUser {
            id: ProfileId(Uuid::from_u128(id)),
            email: format!("u{id}@example.com"),
            metadata: serde_json::json!({}),
        }
    }

    fn message(chat: ChatId, id: u128, secs: i64) -> Message {
        Message {
            id: MessageId(Uuid::from_u128(id)),
            chat_id: chat,
            sender_id: ProfileId(Uuid::from_u128(1)),
            content: "hi".into(),
            kind: MessageKind::Text,
            created_at: at(secs),
            updated_at: at(secs),
            is_encrypted: false,
            sender: None,
        }
    }

    #[test]
    fn conversations_are_ordered_newest_first_with_id_tiebreak() {
        let mut state = CacheState::default();
        state.replace_conversations(vec![chat(3, 10), chat(1, 30), chat(2, 10)]);
        let order: Vec<u128> = state
            .conversations()
            .iter()
            .map(|c| c.id.0.as_u128())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn patch_keeps_participants_and_resorts() {
        let mut state = CacheState::default();
        let mut first = chat(1, 10);
        first.participants.push(parley_shared::Participant {
            profile_id: ProfileId(Uuid::from_u128(5)),
            profile: parley_shared::ParticipantProfile {
                username: "bob".into(),
                avatar_url: None,
                is_online: false,
            },
        });
        state.replace_conversations(vec![first, chat(2, 20)]);

        let mut columns = ChatColumns::from(chat(1, 50));
        columns.name = Some("renamed".into());
        assert!(state.patch_conversation(ChatId(Uuid::from_u128(1)), columns));

        let top = &state.conversations()[0];
        assert_eq!(top.id, ChatId(Uuid::from_u128(1)));
        assert_eq!(top.name.as_deref(), Some("renamed"));
        assert_eq!(top.participants.len(), 1);
        assert!(!state.patch_conversation(ChatId(Uuid::from_u128(7)), chat(7, 1).into()));
    }

    #[test]
    fn activation_creates_partition_and_resets_paging() {
        let mut state = CacheState::default();
        let id = ChatId(Uuid::from_u128(1));
        assert_eq!(state.claim_page(id), Ok(None));

        state.activate(chat(1, 1));
        assert_eq!(state.claim_page(id), Ok(Some(0)));
        state.complete_page(id, 0, 50, 50);
        assert_eq!(state.claim_page(id), Ok(Some(1)));
        assert_eq!(state.claim_page(id), Err(LoadOutcome::Busy));

        state.activate(chat(1, 1));
        assert_eq!(state.claim_page(id), Ok(Some(0)));
    }

    #[test]
    fn live_messages_need_an_existing_partition() {
        let mut state = CacheState::default();
        let id = ChatId(Uuid::from_u128(1));
        assert!(!state.append_live(message(id, 1, 1)));

        state.activate(chat(1, 1));
        assert!(state.append_live(message(id, 1, 1)));
        assert_eq!(state.messages(id).len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let mut state = CacheState::default();
        let id = ChatId(Uuid::from_u128(1));
        state.set_auth_user(user(1));
        state.replace_conversations(vec![chat(1, 1)]);
        state.activate(chat(1, 1));
        state.append_live(message(id, 1, 1));

        state.clear();
        assert!(state.self_id().is_none());
        assert!(state.conversations().is_empty());
        assert!(state.active_chat_id().is_none());
        assert!(state.messages(id).is_empty());
        assert_eq!(state.merge_history(id, vec![message(id, 2, 2)]), 0);
    }

    #[test]
    fn active_chat_prefers_the_directory_copy() {
        let mut state = CacheState::default();
        state.activate(chat(1, 1));
        assert_eq!(state.active_chat().unwrap().name.as_deref(), Some("g1"));

        let mut renamed = chat(1, 5);
        renamed.name = Some("renamed".into());
        state.replace_conversations(vec![renamed]);
        assert_eq!(state.active_chat().unwrap().name.as_deref(), Some("renamed"));
    }

    #[test]
    fn stale_profile_for_another_user_is_ignored() {
        let mut state = CacheState::default();
        state.set_auth_user(user(1));
        let profile = Profile {
            id: ProfileId(Uuid::from_u128(2)),
            username: "other".into(),
            display_name: None,
            avatar_url: None,
            status_message: String::new(),
            is_online: true,
            last_seen: at(0),
            created_at: at(0),
            updated_at: at(0),
        };
        assert!(!state.set_current_user(profile));
        assert!(state.current_user().is_none());
    }

    #[test]
    fn store_handles_share_state() {
        let store = Store::new();
        let other = store.clone();
        store.write(|s| s.set_auth_user(user(4)));
        assert_eq!(
            other.read(|s| s.self_id()),
            Some(ProfileId(Uuid::from_u128(4)))
        );
    }
}
