//! One-to-one call negotiation for a single booking.
//!
//! The [`CallCoordinator`] owns the local capture, exactly one peer
//! connection and the queue of early ICE candidates. It is driven by the
//! booking's call channel, by its own peer's events and by the offer timer;
//! [`CallCoordinator::next_update`] multiplexes all three.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use counsel_net::Subscription;
use counsel_shared::protocol::{CallSignal, IceCandidate, InboundEvent, PeerJoined, SessionDescription};
use counsel_shared::types::{BookingId, Identity};

use crate::capture::{LocalStream, MediaConstraints, MediaDevices, TrackKind};
use crate::config::CallConfig;
use crate::error::{CallError, MediaError};
use crate::ice::IceQueue;
use crate::peer::{PeerConnection, PeerEvent, PeerFactory, PeerState};
use crate::signaling::{self, SignalSink, SignalingAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AwaitingPeer,
    Negotiating,
    Connected,
    /// ICE failed. Reported, not retried.
    Failed,
    Disconnected,
    Ended,
}

/// What the call screen should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallUpdate {
    StateChanged(CallState),
    /// The relay reported that the lawyer has not joined yet.
    WaitingForLawyer,
    /// First successful connection of this call. Raised once.
    Connected,
    Warning(PeerState),
    RemoteStream(TrackKind),
    Ended { by_remote: bool },
}

pub struct CallCoordinator<S: SignalSink> {
    booking_id: BookingId,
    identity: Identity,
    sink: S,
    factory: Arc<dyn PeerFactory>,
    config: CallConfig,
    state: CallState,
    local: Option<LocalStream>,
    peer: Option<Box<dyn PeerConnection>>,
    peer_events: Option<mpsc::Receiver<PeerEvent>>,
    ice: IceQueue,
    has_remote: bool,
    offer_due: Option<Instant>,
    waiting_for_lawyer: bool,
    announced: bool,
    remote_tracks: Vec<TrackKind>,
    updates: VecDeque<CallUpdate>,
}

impl<S: SignalSink> CallCoordinator<S> {
    pub fn new(
        booking_id: BookingId,
        identity: Identity,
        sink: S,
        factory: Arc<dyn PeerFactory>,
        config: CallConfig,
    ) -> Self {
        Self {
            booking_id,
            identity,
            sink,
            factory,
            config,
            state: CallState::Idle,
            local: None,
            peer: None,
            peer_events: None,
            ice: IceQueue::new(),
            has_remote: false,
            offer_due: None,
            waiting_for_lawyer: false,
            announced: false,
            remote_tracks: Vec::new(),
            updates: VecDeque::new(),
        }
    }

    pub fn booking_id(&self) -> &BookingId {
        &self.booking_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_waiting_for_lawyer(&self) -> bool {
        self.waiting_for_lawyer
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local.as_ref()
    }

    pub fn remote_tracks(&self) -> &[TrackKind] {
        &self.remote_tracks
    }

    pub fn pending_candidates(&self) -> usize {
        self.ice.len()
    }

    pub fn offer_due(&self) -> Option<Instant> {
        self.offer_due
    }

    /// Updates raised since the last call, oldest first.
    pub fn take_updates(&mut self) -> Vec<CallUpdate> {
        self.updates.drain(..).collect()
    }

    /// Acquire the camera and microphone, build a fresh peer and announce
    /// ourselves on the booking.
    ///
    /// Failing to acquire capture is fatal: the call moves straight to
    /// `Ended` and nothing is emitted.
    pub async fn start(&mut self, devices: &dyn MediaDevices) -> Result<(), CallError> {
        let stream = match devices.acquire(MediaConstraints::audio_video()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(booking = %self.booking_id, error = %e, "Could not acquire local media");
                self.teardown(false).await;
                return Err(CallError::Acquisition(e));
            }
        };
        if let Some(mut previous) = self.local.replace(stream) {
            previous.stop();
        }
        self.announced = false;
        self.waiting_for_lawyer = false;

        if let Err(e) = self.reset_peer().await {
            self.teardown(false).await;
            return Err(e.into());
        }
        if let Err(e) = self.sink.emit(signaling::join(&self.booking_id, &self.identity)) {
            self.teardown(false).await;
            return Err(e.into());
        }

        info!(booking = %self.booking_id, role = %self.identity.role, "Joined call");
        self.set_state(CallState::AwaitingPeer);
        Ok(())
    }

    pub async fn handle_event(&mut self, event: InboundEvent) {
        if matches!(self.state, CallState::Idle | CallState::Ended) {
            debug!(event = event.name(), "Call not active, event ignored");
            return;
        }
        if event.booking_id() != Some(&self.booking_id) {
            return;
        }

        match event {
            InboundEvent::VideoCallPeerJoined(joined) => self.on_peer_joined(joined).await,
            InboundEvent::LawyerNotJoined(_) => {
                if !self.waiting_for_lawyer {
                    info!(booking = %self.booking_id, "Lawyer has not joined yet");
                    self.waiting_for_lawyer = true;
                    self.updates.push_back(CallUpdate::WaitingForLawyer);
                }
            }
            InboundEvent::VideoCallSignal(signal) => self.on_signal(signal).await,
            InboundEvent::VideoCallEnded(_) => {
                info!(booking = %self.booking_id, "Call ended by remote party");
                self.teardown(true).await;
            }
            other => debug!(event = other.name(), "Unexpected event on call channel"),
        }
    }

    async fn on_peer_joined(&mut self, joined: PeerJoined) {
        info!(
            booking = %self.booking_id,
            participant = ?joined.participant_id,
            "Peer joined call"
        );
        self.waiting_for_lawyer = false;

        // The peer rebuilt its connection, so ours has to start over too.
        if self.state != CallState::AwaitingPeer {
            if let Err(e) = self.reset_peer().await {
                warn!(booking = %self.booking_id, error = %e, "Could not rebuild peer");
                return;
            }
        }

        self.offer_due = Some(Instant::now() + self.config.offer_delay);
        self.set_state(CallState::Negotiating);
    }

    /// Send the offer if its delay has elapsed.
    pub async fn fire_due_offer(&mut self) {
        match self.offer_due {
            Some(due) if Instant::now() >= due => {}
            _ => return,
        }
        self.offer_due = None;
        if let Err(e) = self.send_offer().await {
            warn!(booking = %self.booking_id, error = %e, "Could not send offer");
        }
    }

    async fn send_offer(&mut self) -> Result<(), CallError> {
        let Some(peer) = self.peer.as_deref() else {
            return Ok(());
        };
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        self.sink.emit(signaling::describe(
            &self.booking_id,
            self.sink.session_id(),
            offer,
        ))?;
        debug!(booking = %self.booking_id, "SDP offer sent");
        Ok(())
    }

    async fn on_signal(&mut self, signal: CallSignal) {
        let result = match signaling::classify(&signal, self.sink.session_id()) {
            SignalingAction::IgnoreEcho => Ok(()),
            SignalingAction::AcceptOffer(offer) => self.accept_offer(offer).await,
            SignalingAction::ApplyAnswer(answer) => self.apply_answer(answer).await,
            SignalingAction::AddCandidate(candidate) => self.add_candidate(candidate).await,
        };
        if let Err(e) = result {
            warn!(booking = %self.booking_id, error = %e, "Signaling error ignored");
        }
    }

    async fn accept_offer(&mut self, offer: SessionDescription) -> Result<(), CallError> {
        let Some(peer) = self.peer.as_deref() else {
            return Ok(());
        };
        // Whoever receives an offer answers it.
        self.offer_due = None;

        peer.set_remote_description(offer).await?;
        self.has_remote = true;
        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        self.sink.emit(signaling::describe(
            &self.booking_id,
            self.sink.session_id(),
            answer,
        ))?;
        debug!(booking = %self.booking_id, "SDP answer sent");
        flush_candidates(peer, &mut self.ice).await;

        if self.state == CallState::AwaitingPeer {
            self.set_state(CallState::Negotiating);
        }
        Ok(())
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), CallError> {
        let Some(peer) = self.peer.as_deref() else {
            return Ok(());
        };
        peer.set_remote_description(answer).await?;
        self.has_remote = true;
        flush_candidates(peer, &mut self.ice).await;
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: IceCandidate) -> Result<(), CallError> {
        match self.peer.as_deref() {
            Some(peer) if self.has_remote => Ok(peer.add_ice_candidate(candidate).await?),
            _ => {
                self.ice.push(candidate);
                debug!(queued = self.ice.len(), "ICE candidate queued until remote description");
                Ok(())
            }
        }
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        if self.state == CallState::Ended {
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let frame =
                    signaling::candidate(&self.booking_id, self.sink.session_id(), candidate);
                if let Err(e) = self.sink.emit(frame) {
                    warn!(booking = %self.booking_id, error = %e, "Could not relay ICE candidate");
                }
            }
            PeerEvent::StateChanged(PeerState::Connected) => {
                self.set_state(CallState::Connected);
                if !self.announced {
                    self.announced = true;
                    info!(booking = %self.booking_id, "Call connected");
                    self.updates.push_back(CallUpdate::Connected);
                }
            }
            PeerEvent::StateChanged(state @ (PeerState::Failed | PeerState::Disconnected)) => {
                warn!(booking = %self.booking_id, state = ?state, "Peer connection degraded");
                self.set_state(if state == PeerState::Failed {
                    CallState::Failed
                } else {
                    CallState::Disconnected
                });
                self.updates.push_back(CallUpdate::Warning(state));
            }
            PeerEvent::StateChanged(state) => {
                debug!(booking = %self.booking_id, state = ?state, "Peer state");
            }
            PeerEvent::RemoteTrack(kind) => {
                if !self.remote_tracks.contains(&kind) {
                    self.remote_tracks.push(kind);
                    self.updates.push_back(CallUpdate::RemoteStream(kind));
                }
            }
        }
    }

    pub fn toggle_audio(&mut self) -> Option<bool> {
        self.local.as_mut()?.toggle(TrackKind::Audio)
    }

    pub fn toggle_video(&mut self) -> Option<bool> {
        self.local.as_mut()?.toggle(TrackKind::Video)
    }

    /// Hang up: tell the remote side, then release everything locally. The
    /// local teardown happens even if the hangup could not be sent.
    pub async fn end(&mut self) -> Result<(), CallError> {
        if self.state == CallState::Ended {
            return Ok(());
        }
        let sent = self.sink.emit(signaling::hangup(&self.booking_id));
        self.teardown(false).await;
        Ok(sent?)
    }

    /// Wait for the next update, handling channel events, peer events and
    /// the offer timer in between. Returns `None` once the call has ended
    /// and every update has been taken.
    pub async fn next_update(&mut self, channel: &mut Subscription) -> Option<CallUpdate> {
        loop {
            if let Some(update) = self.updates.pop_front() {
                return Some(update);
            }
            if self.state == CallState::Ended {
                return None;
            }

            let due = self.offer_due;
            tokio::select! {
                event = channel.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!(booking = %self.booking_id, "Call channel closed");
                        self.teardown(false).await;
                    }
                },
                event = next_peer_event(&mut self.peer_events) => match event {
                    Some(event) => self.handle_peer_event(event).await,
                    None => self.peer_events = None,
                },
                _ = offer_timer(due) => self.fire_due_offer().await,
            }
        }
    }

    async fn reset_peer(&mut self) -> Result<(), MediaError> {
        self.close_peer().await;
        let local = self
            .local
            .as_ref()
            .ok_or_else(|| MediaError::Capture("no local capture".into()))?;
        let (peer, events) = self.factory.create(&self.config, local).await?;
        self.peer = Some(peer);
        self.peer_events = Some(events);
        debug!(booking = %self.booking_id, "Peer connection created");
        Ok(())
    }

    async fn close_peer(&mut self) {
        self.peer_events = None;
        self.ice.clear();
        self.has_remote = false;
        self.offer_due = None;
        self.remote_tracks.clear();
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!(booking = %self.booking_id, error = %e, "Error closing peer connection");
            }
        }
    }

    async fn teardown(&mut self, by_remote: bool) {
        if self.state == CallState::Ended {
            return;
        }
        if let Some(mut local) = self.local.take() {
            local.stop();
        }
        self.close_peer().await;
        self.set_state(CallState::Ended);
        self.updates.push_back(CallUpdate::Ended { by_remote });
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            debug!(booking = %self.booking_id, from = ?self.state, to = ?state, "Call state");
            self.state = state;
            self.updates.push_back(CallUpdate::StateChanged(state));
        }
    }
}

impl<S: SignalSink> Drop for CallCoordinator<S> {
    fn drop(&mut self) {
        if let Some(mut local) = self.local.take() {
            local.stop();
        }
        if let Some(peer) = self.peer.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = peer.close().await;
                    });
                }
                Err(_) => debug!("No runtime left to close peer connection"),
            }
        }
    }
}

/// Apply every queued candidate in arrival order. A candidate the peer
/// rejects is logged and does not stop the rest.
async fn flush_candidates(peer: &dyn PeerConnection, queue: &mut IceQueue) {
    for candidate in queue.drain() {
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            warn!(error = %e, "Queued ICE candidate rejected");
        }
    }
}

async fn next_peer_event(events: &mut Option<mpsc::Receiver<PeerEvent>>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn offer_timer(due: Option<Instant>) {
    match due {
        Some(due) => time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
