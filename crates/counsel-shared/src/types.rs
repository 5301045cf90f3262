use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{PREVIEW_LEN, TEMP_ID_PREFIX};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A conversation between one user and one lawyer.
    RoomId
);
string_id!(
    /// Server-issued or temporary message id.
    MessageId
);
string_id!(ParticipantId);
string_id!(
    /// The consultation a video call belongs to.
    BookingId
);
string_id!(NotificationId);

impl MessageId {
    /// Build a temporary id for an optimistic message.
    pub fn temporary(seq: u64) -> Self {
        Self(format!("{TEMP_ID_PREFIX}{seq}"))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

/// Allocator of temporary message ids. Clones share one sequence, so every
/// room of a session draws from the same counter and no two optimistic
/// messages of the session carry the same id.
#[derive(Debug, Clone, Default)]
pub struct TempIds(Arc<AtomicU64>);

impl TempIds {
    pub fn next(&self) -> MessageId {
        MessageId::temporary(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently allocated id, if any.
    pub fn latest(&self) -> Option<MessageId> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            seq => Some(MessageId::temporary(seq)),
        }
    }
}

/// Identifies one transport instance. Stamped on outgoing call signals so
/// that a relay echoing a signal back to its sender can be recognised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Lawyer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Lawyer => "lawyer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "lawyer" => Ok(Role::Lawyer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The authenticated participant a session acts as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: ParticipantId,
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<ParticipantId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn user(id: &str) -> Self {
        Self::new(id, Role::User)
    }

    pub fn lawyer(id: &str) -> Self {
        Self::new(id, Role::Lawyer)
    }

    /// Parse `user:<id>` / `lawyer:<id>`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (role, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <role>:<id>, got {s:?}"))?;
        let id = id.trim();
        if id.is_empty() {
            return Err("identity id is empty".into());
        }
        Ok(Self::new(id, role.parse()?))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Document,
    Video,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: ParticipantId,
    pub sender_role: Role,
    /// Text, or a URL for attachments.
    pub content: String,
    /// Explicit type as sent by the backend, if any.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    pub created_at: DateTime<Utc>,
    /// `None` while unread.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.sender_id == participant
    }

    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }
}

/// Denormalized summary of the latest message in a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomInfo {
    pub id: RoomId,
    pub user_id: ParticipantId,
    pub lawyer_id: ParticipantId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
}

impl ChatRoomInfo {
    /// The other participant of the room, seen from `me`.
    pub fn counterpart(&self, me: &Identity) -> &ParticipantId {
        match me.role {
            Role::User => &self.lawyer_id,
            Role::Lawyer => &self.user_id,
        }
    }

    pub fn record_message(&mut self, message: &ChatMessage) {
        if message.created_at < self.updated_at {
            return;
        }
        self.last_message = Some(LastMessage {
            content: preview(&message.content),
            created_at: message.created_at,
        });
        self.updated_at = message.created_at;
    }
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn room() -> ChatRoomInfo {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ChatRoomInfo {
            id: "room-42".into(),
            user_id: "user-7".into(),
            lawyer_id: "lawyer-1".into(),
            created_at: t,
            updated_at: t,
            last_message: None,
        }
    }

    fn message(content: &str, minute: u32) -> ChatMessage {
        ChatMessage {
            id: "m1".into(),
            room_id: "room-42".into(),
            sender_id: "user-7".into(),
            sender_role: Role::User,
            content: content.to_owned(),
            kind: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            read_at: None,
        }
    }

    #[test]
    fn test_temporary_ids() {
        let id = MessageId::temporary(3);
        assert_eq!(id.as_str(), "temp-3");
        assert!(id.is_temporary());
        assert!(!MessageId::new("m500").is_temporary());
    }

    #[test]
    fn test_temp_ids_shared_between_clones() {
        let ids = TempIds::default();
        assert_eq!(ids.latest(), None);
        let other = ids.clone();
        assert_eq!(ids.next().as_str(), "temp-1");
        assert_eq!(other.next().as_str(), "temp-2");
        assert_eq!(ids.latest().map(|id| id.0), Some("temp-2".to_owned()));
    }

    #[test]
    fn test_identity_parse() {
        let id = Identity::parse("lawyer:lawyer-1").unwrap();
        assert_eq!(id, Identity::lawyer("lawyer-1"));
        assert_eq!(id.to_string(), "lawyer:lawyer-1");
        assert!(Identity::parse("judge:x").is_err());
        assert!(Identity::parse("user:").is_err());
        assert!(Identity::parse("user-7").is_err());
    }

    #[test]
    fn test_counterpart() {
        let room = room();
        assert_eq!(room.counterpart(&Identity::lawyer("lawyer-1")).as_str(), "user-7");
        assert_eq!(room.counterpart(&Identity::user("user-7")).as_str(), "lawyer-1");
    }

    #[test]
    fn test_record_message_updates_summary() {
        let mut room = room();
        let long = "x".repeat(80);
        room.record_message(&message(&long, 5));

        let last = room.last_message.clone().unwrap();
        assert_eq!(last.content.chars().count(), PREVIEW_LEN + 3);
        assert_eq!(room.updated_at, last.created_at);

        // An older redelivery does not roll the summary back.
        room.record_message(&message("old", 1));
        assert_eq!(room.last_message.unwrap().content, last.content);
    }

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::json!({
            "id": "m500",
            "roomId": "room-42",
            "senderId": "user-7",
            "senderRole": "user",
            "content": "Hello",
            "type": "text",
            "createdAt": "2024-01-01T00:00:00Z"
        });
        let msg: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(msg.kind, Some(MessageKind::Text));
        assert!(msg.is_unread());
        assert!(msg.is_from(&"user-7".into()));
    }
}
