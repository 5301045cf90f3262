//! Named logical channels on top of the single transport connection.
//!
//! Chat rooms, calls and the notification feed each subscribe to their own
//! [`Channel`]. A [`Subscription`] owns its registration: dropping it
//! unsubscribes, so handlers never accumulate across room visits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::debug;

use counsel_shared::protocol::InboundEvent;
use counsel_shared::types::{BookingId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `chat/{roomId}`: messages, read receipts, send errors.
    Chat(RoomId),
    /// `call/{bookingId}`: call signaling.
    Call(BookingId),
    /// Out-of-band notifications for the current identity.
    Notifications,
}

impl Channel {
    /// Whether an inbound event is routed to this channel.
    ///
    /// A `chat-error` that names no room is delivered to every chat channel.
    pub fn accepts(&self, event: &InboundEvent) -> bool {
        match (self, event) {
            (Channel::Notifications, InboundEvent::Notification(_)) => true,
            (Channel::Chat(room), InboundEvent::ChatError(err)) => {
                err.room_id.as_ref().map_or(true, |r| r == room)
            }
            (Channel::Chat(room), event) => event.room_id() == Some(room),
            (Channel::Call(booking), event) => event.booking_id() == Some(booking),
            _ => false,
        }
    }

    pub fn topic(&self) -> String {
        match self {
            Channel::Chat(room) => format!("chat/{room}"),
            Channel::Call(booking) => format!("call/{booking}"),
            Channel::Notifications => "notifications".to_string(),
        }
    }
}

struct Entry {
    channel: Channel,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

/// Live subscriptions, keyed by registration id.
#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

pub(crate) type SharedRegistry = Arc<Mutex<Registry>>;

pub(crate) fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Registry {
    fn insert(&mut self, channel: Channel, tx: mpsc::UnboundedSender<InboundEvent>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, Entry { channel, tx });
        id
    }

    fn remove(&mut self, id: u64) {
        if let Some(entry) = self.entries.remove(&id) {
            debug!(topic = %entry.channel.topic(), "Unsubscribed");
        }
    }

    /// Deliver an event to every matching subscriber. Returns the number of
    /// subscribers reached.
    pub(crate) fn dispatch(&mut self, event: &InboundEvent) -> usize {
        let mut delivered = 0;
        self.entries.retain(|_, entry| {
            if !entry.channel.accepts(event) {
                return true;
            }
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    /// Drop every sender so pending `recv` calls resolve to `None`.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Receiving end of one channel registration.
pub struct Subscription {
    id: u64,
    channel: Channel,
    rx: mpsc::UnboundedReceiver<InboundEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub(crate) fn register(registry: &SharedRegistry, channel: Channel) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = lock(registry).insert(channel.clone(), tx);
        debug!(topic = %channel.topic(), "Subscribed");
        Self {
            id,
            channel,
            rx,
            registry: Arc::downgrade(registry),
        }
    }

    /// A subscription fed directly through the returned sender instead of a
    /// transport. Lets state machines be driven from a recorded event log.
    pub fn detached(channel: Channel) -> (mpsc::UnboundedSender<InboundEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Self {
            id: 0,
            channel,
            rx,
            registry: Weak::new(),
        };
        (tx, sub)
    }

    /// Next event for this channel, or `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.id);
        }
    }
}
