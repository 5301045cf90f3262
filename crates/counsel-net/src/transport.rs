//! Signaling transport with the tokio mpsc command pattern.
//!
//! The connection loop runs in a dedicated task. Handles talk to it through
//! a bounded command channel; inbound frames are decoded once and fanned out
//! to channel subscriptions. Connection state is published on a `watch`
//! channel so every consuming view can react independently.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use counsel_shared::constants::{
    DEFAULT_COMMAND_BUFFER, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS,
};
use counsel_shared::protocol::{InboundEvent, OutboundEvent, RoomRef};
use counsel_shared::types::{Identity, RoomId, SessionId, TempIds};

use crate::channels::{lock, Channel, Registry, SharedRegistry, Subscription};
use crate::connector::{Connector, Link};
use crate::error::TransportError;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Websocket endpoint of the relay.
    pub url: String,
    /// Reconnection attempts after a failure before giving up.
    pub reconnect_attempts: u32,
    /// Fixed delay between attempts.
    pub reconnect_delay: Duration,
    /// Capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/socket".to_string(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

#[derive(Debug)]
enum Command {
    Emit { name: &'static str, frame: String },
    Join(RoomId),
    Shutdown,
}

enum LinkOutcome {
    Dropped,
    Shutdown,
}

type SharedRooms = Arc<Mutex<BTreeSet<RoomId>>>;

struct Inner {
    identity: Identity,
    session_id: SessionId,
    cmd_tx: mpsc::Sender<Command>,
    connected: watch::Receiver<bool>,
    registry: SharedRegistry,
    rooms: SharedRooms,
    temp_ids: TempIds,
}

/// Handle to the session's single real-time connection. Cheap to clone;
/// the connection loop stops once every handle is dropped or
/// [`SignalingTransport::shutdown`] is called.
#[derive(Clone)]
pub struct SignalingTransport {
    inner: Arc<Inner>,
}

impl SignalingTransport {
    /// Spawn the connection loop for `identity`. Must be called from within
    /// a tokio runtime.
    pub fn connect<C: Connector>(config: TransportConfig, identity: Identity, connector: C) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (connected_tx, connected_rx) = watch::channel(false);
        let registry: SharedRegistry = Arc::new(Mutex::new(Registry::default()));
        let rooms: SharedRooms = Arc::default();
        let session_id = SessionId::new();

        info!(identity = %identity, session = %session_id, url = %config.url, "Starting transport");

        tokio::spawn(connection_loop(
            config,
            identity.clone(),
            connector,
            cmd_rx,
            connected_tx,
            registry.clone(),
            rooms.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                identity,
                session_id,
                cmd_tx,
                connected: connected_rx,
                registry,
                rooms,
                temp_ids: TempIds::default(),
            }),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    /// Temporary id allocator shared by every room on this session.
    pub fn temp_ids(&self) -> TempIds {
        self.inner.temp_ids.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Watch connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.inner.connected.clone()
    }

    /// Emit an event. Fails fast when disconnected: nothing is queued for a
    /// later connection.
    pub fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let frame = event.encode()?;
        self.enqueue(Command::Emit {
            name: event.name(),
            frame,
        })
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        Subscription::register(&self.inner.registry, channel)
    }

    /// Join a room now (when connected) and after every reconnection until
    /// [`SignalingTransport::leave_room`] is called.
    pub fn join_room(&self, room_id: RoomId) -> Result<(), TransportError> {
        let added = lock_rooms(&self.inner.rooms).insert(room_id.clone());
        if added {
            debug!(room = %room_id, "Tracking room for rejoin");
        }
        self.enqueue(Command::Join(room_id))
    }

    /// Stop replaying `join-room` for this room.
    pub fn leave_room(&self, room_id: &RoomId) {
        if lock_rooms(&self.inner.rooms).remove(room_id) {
            debug!(room = %room_id, "Room no longer tracked");
        }
    }

    pub fn open_rooms(&self) -> Vec<RoomId> {
        lock_rooms(&self.inner.rooms).iter().cloned().collect()
    }

    pub async fn shutdown(&self) {
        let _ = self.inner.cmd_tx.send(Command::Shutdown).await;
    }

    fn enqueue(&self, cmd: Command) -> Result<(), TransportError> {
        self.inner.cmd_tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Busy,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

fn lock_rooms(rooms: &Mutex<BTreeSet<RoomId>>) -> std::sync::MutexGuard<'_, BTreeSet<RoomId>> {
    match rooms.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn connection_loop<C: Connector>(
    config: TransportConfig,
    identity: Identity,
    connector: C,
    mut cmd_rx: mpsc::Receiver<Command>,
    connected_tx: watch::Sender<bool>,
    registry: SharedRegistry,
    rooms: SharedRooms,
) {
    let mut failures: u32 = 0;

    loop {
        match connector.connect(&identity).await {
            Ok(link) => {
                failures = 0;
                info!(identity = %identity, "Transport connected");
                let outcome = drive_link(link, &mut cmd_rx, &connected_tx, &registry, &rooms).await;
                connected_tx.send_replace(false);
                match outcome {
                    LinkOutcome::Shutdown => {
                        info!("Transport shutdown requested");
                        break;
                    }
                    LinkOutcome::Dropped => warn!("Transport connection lost"),
                }
            }
            Err(e) => {
                warn!(error = %e, attempt = failures + 1, "Transport connect failed");
            }
        }

        failures += 1;
        if failures > config.reconnect_attempts {
            warn!(
                attempts = config.reconnect_attempts,
                "Reconnection attempts exhausted, staying disconnected"
            );
            break;
        }

        if !wait_for_retry(config.reconnect_delay, &mut cmd_rx).await {
            info!("Transport stopped while disconnected");
            break;
        }
    }

    connected_tx.send_replace(false);
    lock(&registry).clear();
    info!("Transport loop terminated");
}

/// Sleep out the reconnect delay. Returns `false` if the transport was shut
/// down meanwhile.
async fn wait_for_retry(delay: Duration, cmd_rx: &mut mpsc::Receiver<Command>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Emit { name, .. }) => {
                    debug!(event = name, "Dropping emit queued before disconnect");
                }
                // Replayed from the tracked set once connected.
                Some(Command::Join(_)) => {}
                Some(Command::Shutdown) | None => return false,
            },
        }
    }
}

async fn drive_link(
    link: Link,
    cmd_rx: &mut mpsc::Receiver<Command>,
    connected_tx: &watch::Sender<bool>,
    registry: &SharedRegistry,
    rooms: &SharedRooms,
) -> LinkOutcome {
    let Link { tx, mut rx } = link;

    let replay: Vec<RoomId> = lock_rooms(rooms).iter().cloned().collect();
    for room_id in replay {
        debug!(room = %room_id, "Rejoining room");
        if send_join(&tx, room_id).await.is_err() {
            return LinkOutcome::Dropped;
        }
    }
    connected_tx.send_replace(true);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Emit { name, frame }) => {
                    if tx.send(frame).await.is_err() {
                        return LinkOutcome::Dropped;
                    }
                    debug!(event = name, "Emitted");
                }
                Some(Command::Join(room_id)) => {
                    if !lock_rooms(rooms).contains(&room_id) {
                        continue;
                    }
                    if send_join(&tx, room_id).await.is_err() {
                        return LinkOutcome::Dropped;
                    }
                }
                Some(Command::Shutdown) | None => return LinkOutcome::Shutdown,
            },
            incoming = rx.recv() => match incoming {
                Some(text) => dispatch(registry, &text),
                None => return LinkOutcome::Dropped,
            },
        }
    }
}

async fn send_join(tx: &mpsc::Sender<String>, room_id: RoomId) -> Result<(), TransportError> {
    let frame = OutboundEvent::JoinRoom(RoomRef { room_id }).encode()?;
    tx.send(frame).await.map_err(|_| TransportError::Closed)
}

fn dispatch(registry: &SharedRegistry, text: &str) {
    match InboundEvent::decode(text) {
        Ok(event) => {
            let delivered = lock(registry).dispatch(&event);
            if delivered == 0 {
                debug!(event = event.name(), "No subscriber for event");
            }
        }
        Err(e) => warn!(error = %e, "Dropping undecodable frame"),
    }
}
