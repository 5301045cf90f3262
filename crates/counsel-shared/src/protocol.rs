//! Real-time wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": {...}}` with camelCase payload fields.
//! [`OutboundEvent`] covers what a client may emit, [`InboundEvent`] what the
//! relay pushes back.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{
    BookingId, ChatMessage, MessageId, MessageKind, Notification, ParticipantId, Role, RoomId,
    SessionId,
};

// ---------------------------------------------------------------------------
// Client -> relay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    JoinRoom(RoomRef),
    SendMessage(OutgoingMessage),
    MarkRead(MarkRead),
    VideoCallJoin(CallJoin),
    VideoCallSignal(CallSignal),
    VideoCallEnd(BookingRef),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinRoom(_) => "join-room",
            OutboundEvent::SendMessage(_) => "send-message",
            OutboundEvent::MarkRead(_) => "mark-read",
            OutboundEvent::VideoCallJoin(_) => "video-call-join",
            OutboundEvent::VideoCallSignal(_) => "video-call-signal",
            OutboundEvent::VideoCallEnd(_) => "video-call-end",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRef {
    pub booking_id: BookingId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub room_id: RoomId,
    pub sender_id: ParticipantId,
    pub sender_role: Role,
    pub content: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    /// Echoed back in a `chat-error` so the failure can be tied to this send.
    pub temp_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub room_id: RoomId,
    pub reader_id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallJoin {
    pub booking_id: BookingId,
    pub participant_id: ParticipantId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignal {
    pub booking_id: BookingId,
    /// Session of the emitting transport.
    #[serde(default)]
    pub from: Option<SessionId>,
    pub signal: Signal,
}

// ---------------------------------------------------------------------------
// Relay -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    NewMessage(ChatMessage),
    MessagesRead(MessagesRead),
    ChatError(ChatError),
    Notification(Notification),
    VideoCallPeerJoined(PeerJoined),
    VideoCallSignal(CallSignal),
    VideoCallEnded(BookingRef),
    LawyerNotJoined(BookingRef),
}

const INBOUND_EVENTS: &[&str] = &[
    "new-message",
    "messages-read",
    "chat-error",
    "notification",
    "video-call-peer-joined",
    "video-call-signal",
    "video-call-ended",
    "lawyer-not-joined",
];

#[derive(Deserialize)]
struct EventName {
    event: String,
}

impl InboundEvent {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str(text) {
            Ok(event) => Ok(event),
            Err(e) => {
                // Tell an unsupported event apart from a broken payload.
                if let Ok(EventName { event }) = serde_json::from_str::<EventName>(text) {
                    if !INBOUND_EVENTS.contains(&event.as_str()) {
                        return Err(ProtocolError::UnknownEvent(event));
                    }
                }
                Err(ProtocolError::Malformed(e))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::NewMessage(_) => "new-message",
            InboundEvent::MessagesRead(_) => "messages-read",
            InboundEvent::ChatError(_) => "chat-error",
            InboundEvent::Notification(_) => "notification",
            InboundEvent::VideoCallPeerJoined(_) => "video-call-peer-joined",
            InboundEvent::VideoCallSignal(_) => "video-call-signal",
            InboundEvent::VideoCallEnded(_) => "video-call-ended",
            InboundEvent::LawyerNotJoined(_) => "lawyer-not-joined",
        }
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            InboundEvent::NewMessage(m) => Some(&m.room_id),
            InboundEvent::MessagesRead(r) => Some(&r.room_id),
            InboundEvent::ChatError(e) => e.room_id.as_ref(),
            _ => None,
        }
    }

    pub fn booking_id(&self) -> Option<&BookingId> {
        match self {
            InboundEvent::VideoCallPeerJoined(p) => Some(&p.booking_id),
            InboundEvent::VideoCallSignal(s) => Some(&s.booking_id),
            InboundEvent::VideoCallEnded(b) | InboundEvent::LawyerNotJoined(b) => {
                Some(&b.booking_id)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRead {
    pub room_id: RoomId,
    /// Who read the messages. Absent on older relays.
    #[serde(default)]
    pub reader_id: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatError {
    pub message: String,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub temp_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoined {
    pub booking_id: BookingId,
    #[serde(default)]
    pub participant_id: Option<ParticipantId>,
    #[serde(default)]
    pub role: Option<Role>,
}

// ---------------------------------------------------------------------------
// WebRTC signals
// ---------------------------------------------------------------------------

/// An SDP description or an ICE candidate, in the shape browsers produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    Description(SessionDescription),
    Candidate { candidate: IceCandidate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}
