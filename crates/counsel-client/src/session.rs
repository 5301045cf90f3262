//! Session-scoped context: one transport, one notification stream and the
//! backend, built on login and torn down on logout.

use std::sync::Arc;

use tracing::{info, warn};

use counsel_media::{
    CallCoordinator, CallError, CallUpdate, MediaDevices, PeerFactory, RtcPeerFactory,
};
use counsel_net::{Channel, Connector, SignalingTransport, Subscription};
use counsel_shared::types::{BookingId, Identity, RoomId};

use crate::api::Backend;
use crate::chat::RoomSession;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::notifications::NotificationStream;

pub struct Session {
    config: ClientConfig,
    identity: Identity,
    transport: SignalingTransport,
    backend: Arc<dyn Backend>,
    notifications: NotificationStream,
    peers: Arc<dyn PeerFactory>,
}

impl Session {
    /// Connect as `identity` and load its notifications. A failed
    /// notification fetch is logged and does not abort the login.
    pub async fn login<C: Connector>(
        config: ClientConfig,
        identity: Identity,
        connector: C,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, ClientError> {
        let transport =
            SignalingTransport::connect(config.transport(), identity.clone(), connector);
        let subscription = transport.subscribe(Channel::Notifications);
        let mut notifications =
            NotificationStream::new(identity.clone(), backend.clone(), subscription);
        if let Err(e) = notifications.load_initial().await {
            warn!(error = %e, "Could not load notifications");
        }

        info!(identity = %identity, session = %transport.session_id(), "Logged in");
        Ok(Self {
            config,
            identity,
            transport,
            backend,
            notifications,
            peers: Arc::new(RtcPeerFactory),
        })
    }

    /// Use another peer implementation for calls.
    pub fn with_peer_factory(mut self, peers: Arc<dyn PeerFactory>) -> Self {
        self.peers = peers;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn transport(&self) -> &SignalingTransport {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn open_room(&self, room_id: RoomId) -> Result<RoomSession, ClientError> {
        RoomSession::open(
            self.transport.clone(),
            self.backend.as_ref(),
            room_id,
            &self.config,
        )
        .await
    }

    /// Ask the backend for admission, register the join, then start
    /// negotiating.
    pub async fn open_call(
        &self,
        booking_id: BookingId,
        devices: &dyn MediaDevices,
    ) -> Result<CallSession, ClientError> {
        let permission = self
            .backend
            .can_join_call(&booking_id, &self.identity)
            .await?;
        if !permission.allowed {
            let reason = permission
                .reason
                .unwrap_or_else(|| "call not available".to_string());
            warn!(booking = %booking_id, reason = %reason, "Call refused");
            return Err(CallError::NotAllowed(reason).into());
        }
        self.backend
            .register_call_join(&booking_id, &self.identity)
            .await?;

        // Subscribe first so a quick peer-joined is not missed.
        let channel = self.transport.subscribe(Channel::Call(booking_id.clone()));
        let mut coordinator = CallCoordinator::new(
            booking_id,
            self.identity.clone(),
            self.transport.clone(),
            self.peers.clone(),
            self.config.call.clone(),
        );
        coordinator.start(devices).await?;
        Ok(CallSession {
            coordinator,
            channel,
        })
    }

    pub fn notifications(&self) -> &NotificationStream {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationStream {
        &mut self.notifications
    }

    /// Clear per-identity state right away, then close the connection.
    pub async fn logout(mut self) {
        self.notifications.clear();
        info!(identity = %self.identity, "Logging out");
        self.transport.shutdown().await;
    }
}

/// A running call and its channel subscription.
pub struct CallSession {
    coordinator: CallCoordinator<SignalingTransport>,
    channel: Subscription,
}

impl CallSession {
    pub async fn next_update(&mut self) -> Option<CallUpdate> {
        self.coordinator.next_update(&mut self.channel).await
    }

    pub fn coordinator(&self) -> &CallCoordinator<SignalingTransport> {
        &self.coordinator
    }

    pub fn toggle_audio(&mut self) -> Option<bool> {
        self.coordinator.toggle_audio()
    }

    pub fn toggle_video(&mut self) -> Option<bool> {
        self.coordinator.toggle_video()
    }

    pub async fn end(mut self) -> Result<(), ClientError> {
        Ok(self.coordinator.end().await?)
    }
}
