//! Domain records exchanged with the hosted backend.
//!
//! Field names follow the backend's column names so that a row returned by
//! [`RecordStore::select`](crate::backend::RecordStore::select) deserializes
//! straight into these structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::types::{ChatId, ChatKind, MessageId, MessageKind, ProfileId};

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Public profile of a registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: ProfileId,
    /// Unique handle chosen at registration.
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}


/// Insert payload for the `profiles` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewProfile {
    pub id: ProfileId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status_message: String,
    pub is_online: bool,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Profile snapshot embedded in a participant record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantProfile {
    pub username: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub profile_id: ProfileId,
    #[serde(rename = "profiles")]
    pub profile: ParticipantProfile,
}

/// A conversation the user belongs to, with its participants embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    /// Required for groups; direct chats derive their title from the peer.
    pub name: Option<String>,
    pub created_by: ProfileId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "chat_participants", default)]
    pub participants: Vec<Participant>,
}

impl Chat {
    /// The other side of the conversation as seen by `self_id`.
    ///
    /// Participant order is not guaranteed by the backend, so the peer is the
    /// first participant that is not `self_id` rather than a fixed index.
    pub fn peer(&self, self_id: ProfileId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.profile_id != self_id)
    }

    pub fn is_participant(&self, profile_id: ProfileId) -> bool {
        self.participants.iter().any(|p| p.profile_id == profile_id)
    }

    /// Title shown in the conversation list and header.
    pub fn display_name(&self, self_id: ProfileId) -> String {
        match self.kind {
            ChatKind::Group => self
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Unnamed group".to_string()),
            ChatKind::Direct => self
                .peer(self_id)
                .map(|p| p.profile.username.clone())
                .or_else(|| self.name.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }

    /// Avatar of the peer for direct chats. Groups have no per-chat avatar.
    pub fn avatar_url(&self, self_id: ProfileId) -> Option<&str> {
        match self.kind {
            ChatKind::Group => None,
            ChatKind::Direct => self
                .peer(self_id)
                .and_then(|p| p.profile.avatar_url.as_deref()),
        }
    }

    pub fn peer_online(&self, self_id: ProfileId) -> bool {
        self.kind == ChatKind::Direct
            && self
                .peer(self_id)
                .map(|p| p.profile.is_online)
                .unwrap_or(false)
    }

    /// Check the structural invariants of a fully embedded chat.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self.kind {
            ChatKind::Direct if self.participants.len() != 2 => {
                Err(ModelError::DirectParticipants(self.participants.len()))
            }
            ChatKind::Group if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) => {
                Err(ModelError::GroupWithoutName)
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: ProfileId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_encrypted: bool,
    /// Sender profile, present when the read embedded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Profile>,
}

/// Insert payload for the `messages` table. Ids and timestamps are assigned
/// by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: ProfileId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// The identity known to the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: ProfileId,
    pub email: String,
    /// Free-form metadata supplied at sign-up.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: AuthUser,
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn participant(id: ProfileId, username: &str) -> serde_json::Value {
        json!({
            "profile_id": id,
            "profiles": { "username": username, "avatar_url": format!("https://a/{username}"), "is_online": true }
        })
    }

    #[test]
    fn chat_row_with_embedded_participants_decodes() {
        let me = ProfileId::new();
        let bob = ProfileId::new();
        let row = json!({
            "id": ChatId::new(),
            "type": "direct",
            "name": null,
            "created_by": me,
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T11:00:00Z",
            "chat_participants": [participant(me, "me"), participant(bob, "bob")]
        });

        let chat: Chat = serde_json::from_value(row).unwrap();
        assert_eq!(chat.kind, ChatKind::Direct);
        assert_eq!(chat.participants.len(), 2);
        assert!(chat.validate().is_ok());
    }

    #[test]
    fn peer_is_found_regardless_of_participant_order() {
        let me = ProfileId::new();
        let bob = ProfileId::new();
        let row = json!({
            "id": ChatId::new(),
            "type": "direct",
            "name": null,
            "created_by": bob,
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z",
            "chat_participants": [participant(bob, "bob"), participant(me, "me")]
        });
        let chat: Chat = serde_json::from_value(row).unwrap();

        assert_eq!(chat.peer(me).unwrap().profile_id, bob);
        assert_eq!(chat.display_name(me), "bob");
        assert_eq!(chat.avatar_url(me), Some("https://a/bob"));
        assert!(chat.peer_online(me));
        assert_eq!(chat.display_name(bob), "me");
    }

    #[test]
    fn direct_chat_needs_exactly_two_participants() {
        let me = ProfileId::new();
        let chat = Chat {
            id: ChatId::new(),
            kind: ChatKind::Direct,
            name: None,
            created_by: me,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            participants: vec![],
        };
        assert!(matches!(
            chat.validate(),
            Err(ModelError::DirectParticipants(0))
        ));
    }

    #[test]
    fn group_title_falls_back_when_unnamed() {
        let me = ProfileId::new();
        let chat = Chat {
            id: ChatId::new(),
            kind: ChatKind::Group,
            name: Some("  ".into()),
            created_by: me,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            participants: vec![],
        };
        assert_eq!(chat.display_name(me), "Unnamed group");
        assert!(chat.avatar_url(me).is_none());
        assert!(matches!(chat.validate(), Err(ModelError::GroupWithoutName)));
    }

    #[test]
    fn message_row_without_sender_decodes() {
        let row = json!({
            "id": MessageId::new(),
            "chat_id": ChatId::new(),
            "sender_id": ProfileId::new(),
            "content": "hello",
            "type": "text",
            "created_at": "2024-05-01T10:00:00.000001Z",
            "updated_at": "2024-05-01T10:00:00.000001Z",
            "is_encrypted": false
        });
        let message: Message = serde_json::from_value(row).unwrap();
        assert!(message.sender.is_none());
        assert_eq!(message.kind, MessageKind::Text);
    }
}
