//! In-memory relay and backend shared by the crate's tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use counsel_net::{Connector, Link, SignalingTransport, TransportConfig, TransportError};
use counsel_shared::protocol::InboundEvent;
use counsel_shared::types::{
    BookingId, ChatMessage, ChatRoomInfo, Identity, Notification, NotificationId, Role, RoomId,
};

use crate::api::{ApiError, Backend, CallPermission};

pub struct MemoryConnector {
    relay_tx: mpsc::UnboundedSender<Link>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _identity: &Identity) -> Result<Link, TransportError> {
        let (ours, relay) = Link::pair();
        let _ = self.relay_tx.send(relay);
        Ok(ours)
    }
}

pub fn connector() -> (MemoryConnector, mpsc::UnboundedReceiver<Link>) {
    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    (MemoryConnector { relay_tx }, relay_rx)
}

/// A connected transport plus the relay end of its link.
pub async fn connected(identity: Identity) -> (SignalingTransport, Link) {
    let (connector, mut relays) = connector();
    let transport = SignalingTransport::connect(TransportConfig::default(), identity, connector);
    let relay = relays.recv().await.unwrap();
    transport
        .connection_state()
        .wait_for(|c| *c)
        .await
        .unwrap();
    (transport, relay)
}

/// Push an event from the relay side.
pub async fn push(relay: &Link, event: InboundEvent) {
    relay
        .tx
        .send(serde_json::to_string(&event).unwrap())
        .await
        .unwrap();
}

/// Every frame the client sent until the link goes quiet, as `(event, data)`.
pub async fn drain(relay: &mut Link) -> Vec<(String, serde_json::Value)> {
    let mut frames = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(50), relay.rx.recv()).await
    {
        let mut value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let name = value["event"].as_str().unwrap().to_owned();
        frames.push((name, value["data"].take()));
    }
    frames
}

pub fn names(frames: &[(String, serde_json::Value)]) -> Vec<&str> {
    frames.iter().map(|(name, _)| name.as_str()).collect()
}

pub fn room_info() -> ChatRoomInfo {
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

pub fn message(id: &str, sender: &Identity, content: &str, minute: u32) -> ChatMessage {
    ChatMessage {
        id: id.into(),
        room_id: "room-42".into(),
        sender_id: sender.id.clone(),
        sender_role: sender.role,
        content: content.to_owned(),
        kind: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        read_at: None,
    }
}

pub fn notification(id: &str, minute: u32, is_read: bool) -> Notification {
    Notification {
        id: id.into(),
        message: format!("notification {id}"),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        is_read,
    }
}

/// Backend with canned answers that records the acknowledgements it gets.
#[derive(Default)]
pub struct FakeBackend {
    pub history: Vec<ChatMessage>,
    pub notifications: Vec<Notification>,
    pub fail_acks: bool,
    pub deny_calls: bool,
    pub acks: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().unwrap().clone()
    }

    fn ack(&self, entry: String) -> Result<(), ApiError> {
        self.acks.lock().unwrap().push(entry);
        if self.fail_acks {
            return Err(ApiError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_room(&self, room_id: &RoomId, _role: Role) -> Result<ChatRoomInfo, ApiError> {
        Ok(ChatRoomInfo {
            id: room_id.clone(),
            ..room_info()
        })
    }

    async fn fetch_history(&self, _room_id: &RoomId) -> Result<Vec<ChatMessage>, ApiError> {
        Ok(self.history.clone())
    }

    async fn fetch_notifications(
        &self,
        _identity: &Identity,
    ) -> Result<Vec<Notification>, ApiError> {
        Ok(self.notifications.clone())
    }

    async fn mark_notification_read(
        &self,
        _identity: &Identity,
        id: &NotificationId,
    ) -> Result<(), ApiError> {
        self.ack(format!("read:{id}"))
    }

    async fn mark_all_notifications_read(&self, _identity: &Identity) -> Result<(), ApiError> {
        self.ack("read-all".into())
    }

    async fn can_join_call(
        &self,
        _booking_id: &BookingId,
        _identity: &Identity,
    ) -> Result<CallPermission, ApiError> {
        Ok(CallPermission {
            allowed: !self.deny_calls,
            reason: self.deny_calls.then(|| "Booking not confirmed".to_string()),
        })
    }

    async fn register_call_join(
        &self,
        booking_id: &BookingId,
        _identity: &Identity,
    ) -> Result<(), ApiError> {
        self.ack(format!("join:{booking_id}"))
    }
}

/// A relay that is never reachable.
pub struct Offline;

#[async_trait]
impl Connector for Offline {
    async fn connect(&self, _identity: &Identity) -> Result<Link, TransportError> {
        Err(TransportError::Connect("unreachable".into()))
    }
}
