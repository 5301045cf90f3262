//! Per-room message list reconciliation.
//!
//! [`ChatRoom`] is the pure state: optimistic inserts, confirmation by
//! server echo, read receipts and the read-emission condition.
//! [`RoomSession`] wires one room to the transport and the backend and owns
//! the send error windows.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use counsel_net::{Channel, SignalingTransport, Subscription, TransportError};
use counsel_shared::attachment::MediaHosts;
use counsel_shared::protocol::{ChatError, InboundEvent, MarkRead, OutboundEvent, OutgoingMessage};
use counsel_shared::types::{
    ChatMessage, ChatRoomInfo, Identity, MessageId, MessageKind, ParticipantId, RoomId, TempIds,
};

use crate::api::Backend;
use crate::config::ClientConfig;
use crate::error::ClientError;

/// How an incoming message was merged into the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Same server id already present.
    Duplicate,
    /// Replaced the optimistic entry `temp_id` in place.
    Confirmed { temp_id: MessageId },
    Appended,
}

#[derive(Debug)]
pub struct ChatRoom {
    info: ChatRoomInfo,
    identity: Identity,
    messages: Vec<ChatMessage>,
    draft: String,
    temp_ids: TempIds,
    // Presence is unknown until the view reports it.
    visible: bool,
    focused: bool,
}

impl ChatRoom {
    pub fn new(info: ChatRoomInfo, identity: Identity) -> Self {
        Self::with_temp_ids(info, identity, TempIds::default())
    }

    /// Draw temporary ids from `temp_ids`, normally the session's allocator.
    pub fn with_temp_ids(info: ChatRoomInfo, identity: Identity, temp_ids: TempIds) -> Self {
        Self {
            info,
            identity,
            messages: Vec::new(),
            draft: String::new(),
            temp_ids,
            visible: false,
            focused: false,
        }
    }

    pub fn load_history(&mut self, history: Vec<ChatMessage>) {
        self.messages.clear();
        for message in history {
            if self.messages.iter().any(|m| m.id == message.id) {
                continue;
            }
            self.info.record_message(&message);
            self.messages.push(message);
        }
    }

    pub fn info(&self) -> &ChatRoomInfo {
        &self.info
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn counterpart(&self) -> &ParticipantId {
        self.info.counterpart(&self.identity)
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    /// Insert an optimistic message and clear the draft. Returns the frame
    /// to emit.
    pub fn prepare_send(
        &mut self,
        content: &str,
        kind: Option<MessageKind>,
        now: DateTime<Utc>,
    ) -> Result<OutgoingMessage, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let temp_id = self.temp_ids.next();
        self.messages.push(ChatMessage {
            id: temp_id.clone(),
            room_id: self.info.id.clone(),
            sender_id: self.identity.id.clone(),
            sender_role: self.identity.role,
            content: content.to_owned(),
            kind,
            created_at: now,
            read_at: None,
        });
        self.draft.clear();

        Ok(OutgoingMessage {
            room_id: self.info.id.clone(),
            sender_id: self.identity.id.clone(),
            sender_role: self.identity.role,
            content: content.to_owned(),
            kind,
            temp_id,
        })
    }

    /// Merge a `new-message`. The duplicate check must come before the
    /// optimistic match, otherwise a redelivered confirmation could claim a
    /// later optimistic entry with the same text.
    pub fn apply_incoming(&mut self, message: ChatMessage) -> Applied {
        if self.messages.iter().any(|m| m.id == message.id) {
            return Applied::Duplicate;
        }
        self.info.record_message(&message);

        let optimistic = self.messages.iter_mut().find(|m| {
            m.id.is_temporary() && m.sender_id == message.sender_id && m.content == message.content
        });
        match optimistic {
            Some(slot) => {
                let temp = std::mem::replace(slot, message);
                Applied::Confirmed { temp_id: temp.id }
            }
            None => {
                self.messages.push(message);
                Applied::Appended
            }
        }
    }

    /// The counterpart read what we sent. Our own read echo is ignored.
    pub fn apply_read_receipt(
        &mut self,
        reader: Option<&ParticipantId>,
        now: DateTime<Utc>,
    ) -> usize {
        let me = &self.identity.id;
        if reader == Some(me) {
            return 0;
        }
        let mut stamped = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.is_from(me) && m.is_unread())
        {
            message.read_at = Some(now);
            stamped += 1;
        }
        stamped
    }

    /// Remove an optimistic entry whose send failed.
    pub fn rollback(&mut self, temp_id: &MessageId) -> Option<ChatMessage> {
        let pos = self
            .messages
            .iter()
            .position(|m| m.id.is_temporary() && &m.id == temp_id)?;
        Some(self.messages.remove(pos))
    }

    pub fn has_unread_from_counterpart(&self) -> bool {
        self.messages
            .iter()
            .any(|m| !m.is_from(&self.identity.id) && m.is_unread())
    }

    /// Visible, focused, and something from the counterpart is unread.
    pub fn should_mark_read(&self) -> bool {
        self.visible && self.focused && self.has_unread_from_counterpart()
    }

    /// Stamp the counterpart's unread messages after `mark-read` went out.
    pub fn mark_counterpart_read(&mut self, now: DateTime<Utc>) -> usize {
        let me = &self.identity.id;
        let mut stamped = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| !m.is_from(me) && m.is_unread())
        {
            message.read_at = Some(now);
            stamped += 1;
        }
        stamped
    }

    pub fn set_visibility(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_focus(&mut self, focused: bool) {
        self.focused = focused;
    }
}

#[derive(Debug)]
pub enum RoomUpdate {
    Received(MessageId),
    Confirmed { temp_id: MessageId, id: MessageId },
    /// The counterpart read `count` of our messages.
    Read { count: usize },
    /// We emitted `mark-read` for `count` messages.
    MarkedRead { count: usize },
    /// An optimistic send was rejected and removed.
    SendFailed(ClientError),
}

struct PendingSend {
    temp_id: MessageId,
    deadline: Instant,
}

/// An open room: state plus its channel subscription and send windows.
///
/// Dropping the session unsubscribes and stops the room from being
/// rejoined after reconnects.
pub struct RoomSession {
    room: ChatRoom,
    temp_ids: TempIds,
    transport: SignalingTransport,
    subscription: Subscription,
    connection: Option<watch::Receiver<bool>>,
    pending: VecDeque<PendingSend>,
    error_window: Duration,
    media_hosts: MediaHosts,
    updates: VecDeque<RoomUpdate>,
}

impl RoomSession {
    pub async fn open(
        transport: SignalingTransport,
        backend: &dyn Backend,
        room_id: RoomId,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let identity = transport.identity().clone();
        // Subscribe before fetching so nothing pushed meanwhile is lost.
        let subscription = transport.subscribe(Channel::Chat(room_id.clone()));

        let info = backend.fetch_room(&room_id, identity.role).await?;
        let history = backend.fetch_history(&room_id).await?;
        let temp_ids = transport.temp_ids();
        let mut room = ChatRoom::with_temp_ids(info, identity, temp_ids.clone());
        room.load_history(history);

        if let Err(e) = transport.join_room(room_id.clone()) {
            transport.leave_room(&room_id);
            return Err(e.into());
        }
        info!(room = %room_id, messages = room.messages().len(), "Room opened");

        let mut connection = transport.connection_state();
        connection.borrow_and_update();

        Ok(Self {
            room,
            temp_ids,
            connection: Some(connection),
            transport,
            subscription,
            pending: VecDeque::new(),
            error_window: config.send_error_window,
            media_hosts: config.media_hosts.clone(),
            updates: VecDeque::new(),
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room.info().id
    }

    pub fn info(&self) -> &ChatRoomInfo {
        self.room.info()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.room.messages()
    }

    pub fn room(&self) -> &ChatRoom {
        &self.room
    }

    /// Sends still inside their error window.
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    pub fn message_kind(&self, message: &ChatMessage) -> MessageKind {
        message.resolved_kind(&self.media_hosts)
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.room.set_draft(draft);
    }

    pub fn draft(&self) -> &str {
        self.room.draft()
    }

    /// Send text. Fire-and-forget: the returned temporary id only says the
    /// frame was handed to the transport.
    pub fn send(&mut self, content: &str) -> Result<MessageId, ClientError> {
        self.send_with_kind(content, None)
    }

    /// Send an uploaded attachment URL with its explicit type.
    pub fn send_attachment(&mut self, url: &str, kind: MessageKind) -> Result<MessageId, ClientError> {
        self.send_with_kind(url, Some(kind))
    }

    /// Send the current draft. The draft survives a failed send.
    pub fn send_draft(&mut self) -> Result<MessageId, ClientError> {
        let draft = self.room.draft().to_owned();
        let sent = self.send(&draft);
        if sent.is_err() {
            self.room.set_draft(draft);
        }
        sent
    }

    fn send_with_kind(
        &mut self,
        content: &str,
        kind: Option<MessageKind>,
    ) -> Result<MessageId, ClientError> {
        if !self.transport.is_connected() {
            return Err(TransportError::Disconnected.into());
        }
        let outgoing = self.room.prepare_send(content, kind, Utc::now())?;
        let temp_id = outgoing.temp_id.clone();

        if let Err(e) = self.transport.emit(OutboundEvent::SendMessage(outgoing)) {
            self.room.rollback(&temp_id);
            return Err(e.into());
        }

        self.pending.push_back(PendingSend {
            temp_id: temp_id.clone(),
            deadline: Instant::now() + self.error_window,
        });
        debug!(room = %self.room_id(), temp = %temp_id, "Message sent");
        Ok(temp_id)
    }

    pub fn set_visibility(&mut self, visible: bool) {
        self.room.set_visibility(visible);
        self.maybe_mark_read();
    }

    pub fn set_focus(&mut self, focused: bool) {
        self.room.set_focus(focused);
        self.maybe_mark_read();
    }

    pub fn handle_event(&mut self, event: InboundEvent) {
        self.expire_pending();

        match event {
            InboundEvent::NewMessage(message) => {
                let id = message.id.clone();
                match self.room.apply_incoming(message) {
                    Applied::Duplicate => {
                        debug!(room = %self.room_id(), id = %id, "Duplicate message ignored");
                    }
                    Applied::Confirmed { temp_id } => {
                        self.pending.retain(|p| p.temp_id != temp_id);
                        self.updates.push_back(RoomUpdate::Confirmed { temp_id, id });
                    }
                    Applied::Appended => self.updates.push_back(RoomUpdate::Received(id)),
                }
                self.maybe_mark_read();
            }
            InboundEvent::MessagesRead(read) => {
                let count = self.room.apply_read_receipt(read.reader_id.as_ref(), Utc::now());
                if count > 0 {
                    self.updates.push_back(RoomUpdate::Read { count });
                }
            }
            InboundEvent::ChatError(error) => self.on_chat_error(error),
            other => debug!(event = other.name(), "Unexpected event on chat channel"),
        }
    }

    fn on_chat_error(&mut self, error: ChatError) {
        // An error naming neither temp id nor room reaches every open room.
        // It only claims a send here if that send is the latest of the
        // whole session.
        let position = match (&error.temp_id, &error.room_id) {
            (Some(temp_id), _) => self.pending.iter().position(|p| &p.temp_id == temp_id),
            (None, Some(_)) => self.pending.len().checked_sub(1),
            (None, None) => {
                let latest = self.temp_ids.latest();
                self.pending
                    .len()
                    .checked_sub(1)
                    .filter(|&pos| Some(&self.pending[pos].temp_id) == latest.as_ref())
            }
        };
        let Some(pending) = position.and_then(|pos| self.pending.remove(pos)) else {
            warn!(
                room = %self.room_id(),
                message = %error.message,
                "Chat error outside any send window"
            );
            return;
        };

        self.room.rollback(&pending.temp_id);
        warn!(
            room = %self.room_id(),
            temp = %pending.temp_id,
            message = %error.message,
            "Message rejected"
        );
        self.updates
            .push_back(RoomUpdate::SendFailed(ClientError::SendFailed {
                temp_id: pending.temp_id,
                reason: error.message,
            }));
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.pending.front() {
            if front.deadline > now {
                break;
            }
            debug!(temp = %front.temp_id, "Send error window closed");
            self.pending.pop_front();
        }
    }

    fn maybe_mark_read(&mut self) {
        if !self.room.should_mark_read() || !self.transport.is_connected() {
            return;
        }
        let event = OutboundEvent::MarkRead(MarkRead {
            room_id: self.room.info().id.clone(),
            reader_id: self.room.identity().id.clone(),
        });
        match self.transport.emit(event) {
            Ok(()) => {
                let count = self.room.mark_counterpart_read(Utc::now());
                debug!(room = %self.room_id(), count, "Marked read");
                self.updates.push_back(RoomUpdate::MarkedRead { count });
            }
            Err(e) => debug!(room = %self.room_id(), error = %e, "mark-read deferred"),
        }
    }

    /// Wait for the next update. Returns `None` once the transport is gone.
    pub async fn next_update(&mut self) -> Option<RoomUpdate> {
        loop {
            if let Some(update) = self.updates.pop_front() {
                return Some(update);
            }

            let deadline = self.pending.front().map(|p| p.deadline);
            tokio::select! {
                event = self.subscription.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!(room = %self.room_id(), "Chat channel closed");
                        return None;
                    }
                },
                state = next_change(&mut self.connection) => match state {
                    // Re-evaluate once the rejoin went through.
                    Some(true) => self.maybe_mark_read(),
                    Some(false) => {}
                    None => self.connection = None,
                },
                _ = window_timer(deadline) => self.expire_pending(),
            }
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.transport.leave_room(&self.room.info().id);
        debug!(room = %self.room.info().id, "Room closed");
    }
}

async fn next_change(rx: &mut Option<watch::Receiver<bool>>) -> Option<bool> {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    rx.changed().await.ok()?;
    let connected = *rx.borrow_and_update();
    Some(connected)
}

async fn window_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use counsel_shared::protocol::MessagesRead;

    use crate::testing::{self, connected, drain, message, names, push, room_info, FakeBackend};

    fn lawyer() -> Identity {
        Identity::lawyer("lawyer-1")
    }

    fn user() -> Identity {
        Identity::user("user-7")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
    }

    fn room() -> ChatRoom {
        ChatRoom::new(room_info(), lawyer())
    }

    fn ids(room: &ChatRoom) -> Vec<&str> {
        room.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_confirmation_replaces_optimistic_entry() {
        let mut room = room();
        let outgoing = room.prepare_send("Hello", None, now()).unwrap();
        assert_eq!(outgoing.temp_id.as_str(), "temp-1");
        assert_eq!(ids(&room), ["temp-1"]);

        let echo = message("m500", &lawyer(), "Hello", 30);
        assert_eq!(
            room.apply_incoming(echo.clone()),
            Applied::Confirmed {
                temp_id: "temp-1".into()
            }
        );
        assert_eq!(room.apply_incoming(echo.clone()), Applied::Duplicate);
        assert_eq!(room.apply_incoming(echo), Applied::Duplicate);
        assert_eq!(ids(&room), ["m500"]);
        assert_eq!(
            room.info().last_message.as_ref().map(|m| m.content.as_str()),
            Some("Hello")
        );
    }

    #[test]
    fn test_confirmation_preserves_order() {
        let mut room = room();
        room.prepare_send("A", None, now()).unwrap();
        room.prepare_send("B", None, now()).unwrap();
        room.apply_incoming(message("m1", &user(), "interleaved", 1));

        room.apply_incoming(message("m2", &lawyer(), "A", 2));
        room.apply_incoming(message("m3", &lawyer(), "B", 3));
        assert_eq!(ids(&room), ["m2", "m3", "m1"]);
    }

    #[test]
    fn test_same_text_confirms_oldest_first() {
        let mut room = room();
        room.prepare_send("ok", None, now()).unwrap();
        room.prepare_send("ok", None, now()).unwrap();

        room.apply_incoming(message("m1", &lawyer(), "ok", 1));
        // Redelivery of m1 must not claim temp-2.
        room.apply_incoming(message("m1", &lawyer(), "ok", 1));
        assert_eq!(ids(&room), ["m1", "temp-2"]);

        room.apply_incoming(message("m2", &lawyer(), "ok", 2));
        assert_eq!(ids(&room), ["m1", "m2"]);
    }

    #[test]
    fn test_counterpart_text_is_not_an_echo() {
        let mut room = room();
        room.prepare_send("Hello", None, now()).unwrap();
        assert_eq!(
            room.apply_incoming(message("m9", &user(), "Hello", 1)),
            Applied::Appended
        );
        assert_eq!(ids(&room), ["temp-1", "m9"]);
    }

    #[test]
    fn test_read_receipt_directionality() {
        let mut room = room();
        room.load_history(vec![
            message("m1", &lawyer(), "question?", 1),
            message("m2", &user(), "answer", 2),
            message("m3", &lawyer(), "follow-up", 3),
        ]);

        let reader = ParticipantId::from("user-7");
        assert_eq!(room.apply_read_receipt(Some(&reader), now()), 2);
        let read: Vec<bool> = room.messages().iter().map(|m| m.read_at.is_some()).collect();
        assert_eq!(read, [true, false, true]);

        // Our own receipt echoed back changes nothing.
        let mut room = self::room();
        room.load_history(vec![message("m1", &lawyer(), "q", 1)]);
        let me = ParticipantId::from("lawyer-1");
        assert_eq!(room.apply_read_receipt(Some(&me), now()), 0);
        assert!(room.messages()[0].is_unread());
    }

    #[test]
    fn test_mark_read_condition() {
        let mut room = room();
        room.load_history(vec![message("m1", &user(), "hi", 1)]);
        assert!(room.has_unread_from_counterpart());
        assert!(!room.should_mark_read());

        room.set_visibility(true);
        assert!(!room.should_mark_read());
        room.set_focus(true);
        assert!(room.should_mark_read());

        assert_eq!(room.mark_counterpart_read(now()), 1);
        assert!(!room.should_mark_read());
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut room = room();
        room.set_draft("   ");
        assert!(matches!(
            room.prepare_send("   ", None, now()),
            Err(ClientError::EmptyMessage)
        ));
        assert!(room.messages().is_empty());
        assert_eq!(room.draft(), "   ");
    }

    async fn open(
        identity: Identity,
        history: Vec<ChatMessage>,
    ) -> (RoomSession, counsel_net::Link) {
        let (transport, relay) = connected(identity).await;
        let backend = FakeBackend {
            history,
            ..FakeBackend::default()
        };
        let config = ClientConfig::default();
        let session = RoomSession::open(transport, &backend, "room-42".into(), &config)
            .await
            .unwrap();
        (session, relay)
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_message_marked_read_on_focus() {
        let (mut session, mut relay) =
            open(lawyer(), vec![message("m1", &user(), "Hello lawyer", 1)]).await;

        assert_eq!(names(&drain(&mut relay).await), ["join-room"]);

        session.set_visibility(true);
        assert!(drain(&mut relay).await.is_empty());

        session.set_focus(true);
        let frames = drain(&mut relay).await;
        assert_eq!(names(&frames), ["mark-read"]);
        assert_eq!(frames[0].1["roomId"], "room-42");
        assert_eq!(frames[0].1["readerId"], "lawyer-1");

        session.set_focus(true);
        assert!(drain(&mut relay).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_while_hidden_waits_for_visibility() {
        let (mut session, mut relay) = open(lawyer(), Vec::new()).await;
        session.set_focus(true);
        drain(&mut relay).await;

        push(
            &relay,
            InboundEvent::NewMessage(message("m2", &user(), "are you there?", 2)),
        )
        .await;
        assert!(matches!(
            session.next_update().await,
            Some(RoomUpdate::Received(id)) if id.as_str() == "m2"
        ));
        assert!(drain(&mut relay).await.is_empty());

        session.set_visibility(true);
        assert!(matches!(
            session.next_update().await,
            Some(RoomUpdate::MarkedRead { count: 1 })
        ));
        assert_eq!(names(&drain(&mut relay).await), ["mark-read"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_then_echo_leaves_one_entry() {
        let (mut session, mut relay) = open(lawyer(), Vec::new()).await;
        drain(&mut relay).await;

        let temp_id = session.send("Hello").unwrap();
        assert_eq!(temp_id.as_str(), "temp-1");
        let frames = drain(&mut relay).await;
        assert_eq!(names(&frames), ["send-message"]);
        assert_eq!(frames[0].1["tempId"], "temp-1");
        assert_eq!(frames[0].1["content"], "Hello");

        for _ in 0..2 {
            push(
                &relay,
                InboundEvent::NewMessage(message("m500", &lawyer(), "Hello", 5)),
            )
            .await;
        }
        assert!(matches!(
            session.next_update().await,
            Some(RoomUpdate::Confirmed { temp_id, id })
                if temp_id.as_str() == "temp-1" && id.as_str() == "m500"
        ));
        assert_eq!(session.pending_sends(), 0);

        // Let the redelivery land.
        let _ = time::timeout(Duration::from_millis(100), session.next_update()).await;
        let ids: Vec<&str> = session.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m500"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_error_rolls_back_only_its_send() {
        let (mut session, relay) = open(lawyer(), Vec::new()).await;

        session.send("A").unwrap();
        session.send("B").unwrap();
        push(
            &relay,
            InboundEvent::ChatError(ChatError {
                message: "Room is closed".into(),
                room_id: Some("room-42".into()),
                temp_id: Some("temp-1".into()),
            }),
        )
        .await;

        match session.next_update().await {
            Some(RoomUpdate::SendFailed(ClientError::SendFailed { temp_id, reason })) => {
                assert_eq!(temp_id.as_str(), "temp-1");
                assert_eq!(reason, "Room is closed");
            }
            other => panic!("expected send failure, got {other:?}"),
        }
        let contents: Vec<&str> = session.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["B"]);
        assert_eq!(session.pending_sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untargeted_error_hits_latest_send() {
        let (mut session, relay) = open(lawyer(), Vec::new()).await;
        session.send("A").unwrap();
        session.send("B").unwrap();

        push(
            &relay,
            InboundEvent::ChatError(ChatError {
                message: "Failed to send".into(),
                room_id: None,
                temp_id: None,
            }),
        )
        .await;
        assert!(matches!(
            session.next_update().await,
            Some(RoomUpdate::SendFailed(ClientError::SendFailed { temp_id, .. }))
                if temp_id.as_str() == "temp-2"
        ));
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untargeted_error_touches_one_room_only() {
        let (transport, relay) = connected(lawyer()).await;
        let backend = FakeBackend::default();
        let config = ClientConfig::default();
        let mut first = RoomSession::open(transport.clone(), &backend, "room-42".into(), &config)
            .await
            .unwrap();
        let mut second = RoomSession::open(transport, &backend, "room-43".into(), &config)
            .await
            .unwrap();

        assert_eq!(first.send("A").unwrap().as_str(), "temp-1");
        assert_eq!(second.send("B").unwrap().as_str(), "temp-2");

        push(
            &relay,
            InboundEvent::ChatError(ChatError {
                message: "Failed to send".into(),
                room_id: None,
                temp_id: None,
            }),
        )
        .await;
        assert!(matches!(
            second.next_update().await,
            Some(RoomUpdate::SendFailed(ClientError::SendFailed { temp_id, .. }))
                if temp_id.as_str() == "temp-2"
        ));
        assert!(time::timeout(Duration::from_millis(100), first.next_update())
            .await
            .is_err());
        assert_eq!(first.messages().len(), 1);
        assert_eq!(first.pending_sends(), 1);
        assert!(second.messages().is_empty());

        push(
            &relay,
            InboundEvent::ChatError(ChatError {
                message: "Room is closed".into(),
                room_id: None,
                temp_id: Some("temp-1".into()),
            }),
        )
        .await;
        assert!(matches!(
            first.next_update().await,
            Some(RoomUpdate::SendFailed(ClientError::SendFailed { temp_id, .. }))
                if temp_id.as_str() == "temp-1"
        ));
        assert!(first.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_window_is_ignored() {
        let (mut session, relay) = open(lawyer(), Vec::new()).await;
        session.send("late").unwrap();

        time::advance(Duration::from_secs(6)).await;
        push(
            &relay,
            InboundEvent::ChatError(ChatError {
                message: "Failed to send".into(),
                room_id: Some("room-42".into()),
                temp_id: None,
            }),
        )
        .await;

        assert!(time::timeout(Duration::from_secs(1), session.next_update())
            .await
            .is_err());
        assert_eq!(session.pending_sends(), 0);
        assert_eq!(session.messages().len(), 1);
        assert!(session.messages()[0].id.is_temporary());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_receipt_from_relay() {
        let (mut session, relay) = open(
            lawyer(),
            vec![
                message("m1", &lawyer(), "mine", 1),
                message("m2", &user(), "theirs", 2),
            ],
        )
        .await;

        push(
            &relay,
            InboundEvent::MessagesRead(MessagesRead {
                room_id: "room-42".into(),
                reader_id: Some("user-7".into()),
            }),
        )
        .await;
        assert!(matches!(
            session.next_update().await,
            Some(RoomUpdate::Read { count: 1 })
        ));
        assert!(session.messages()[0].read_at.is_some());
        assert!(session.messages()[1].is_unread());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let transport = SignalingTransport::connect(
            counsel_net::TransportConfig::default(),
            lawyer(),
            testing::Offline,
        );
        let backend = FakeBackend::default();
        let mut session =
            RoomSession::open(transport, &backend, "room-42".into(), &ClientConfig::default())
                .await
                .unwrap();

        // Nothing is queued or inserted while disconnected.
        session.set_draft("queued?");
        assert!(matches!(
            session.send_draft(),
            Err(ClientError::Transport(TransportError::Disconnected))
        ));
        assert!(session.messages().is_empty());
        assert_eq!(session.draft(), "queued?");
        assert_eq!(session.transport.open_rooms(), [RoomId::from("room-42")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_rejoin() {
        let (session, _relay) = open(lawyer(), Vec::new()).await;
        let transport = session.transport.clone();
        assert_eq!(transport.open_rooms(), [RoomId::from("room-42")]);

        drop(session);
        assert!(transport.open_rooms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachment_carries_explicit_type() {
        let (mut session, mut relay) = open(user(), Vec::new()).await;
        drain(&mut relay).await;

        let url = "https://res.cloudinary.com/demo/image/upload/contract.png";
        session.send_attachment(url, MessageKind::Document).unwrap();

        let frames = drain(&mut relay).await;
        assert_eq!(frames[0].1["type"], "document");
        assert_eq!(
            session.message_kind(&session.messages()[0]),
            MessageKind::Document
        );

        let inferred = message("m1", &lawyer(), url, 1);
        assert_eq!(session.message_kind(&inferred), MessageKind::Image);
    }
}
