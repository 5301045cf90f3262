use tracing::debug;

use counsel_net::{SignalingTransport, TransportError};
use counsel_shared::protocol::{
    BookingRef, CallJoin, CallSignal, IceCandidate, OutboundEvent, SdpKind, SessionDescription,
    Signal,
};
use counsel_shared::types::{BookingId, Identity, SessionId};

/// Where a call emits its signaling frames.
pub trait SignalSink: Send + Sync {
    /// Session stamped on outgoing signals, used to recognise echoes.
    fn session_id(&self) -> SessionId;
    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError>;
}

impl SignalSink for SignalingTransport {
    fn session_id(&self) -> SessionId {
        SignalingTransport::session_id(self)
    }

    fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        SignalingTransport::emit(self, event)
    }
}

/// What to do with an incoming `video-call-signal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingAction {
    AcceptOffer(SessionDescription),
    ApplyAnswer(SessionDescription),
    AddCandidate(IceCandidate),
    /// Our own signal relayed back to us.
    IgnoreEcho,
}

pub fn classify(signal: &CallSignal, local: SessionId) -> SignalingAction {
    if signal.from == Some(local) {
        debug!(booking = %signal.booking_id, "Ignoring own signal echo");
        return SignalingAction::IgnoreEcho;
    }
    match &signal.signal {
        Signal::Description(desc) => match desc.kind {
            SdpKind::Offer => {
                debug!(booking = %signal.booking_id, "Received SDP offer");
                SignalingAction::AcceptOffer(desc.clone())
            }
            SdpKind::Answer => {
                debug!(booking = %signal.booking_id, "Received SDP answer");
                SignalingAction::ApplyAnswer(desc.clone())
            }
        },
        Signal::Candidate { candidate } => {
            debug!(booking = %signal.booking_id, "Received ICE candidate");
            SignalingAction::AddCandidate(candidate.clone())
        }
    }
}

pub fn join(booking_id: &BookingId, identity: &Identity) -> OutboundEvent {
    OutboundEvent::VideoCallJoin(CallJoin {
        booking_id: booking_id.clone(),
        participant_id: identity.id.clone(),
        role: identity.role,
    })
}

pub fn describe(booking_id: &BookingId, from: SessionId, desc: SessionDescription) -> OutboundEvent {
    OutboundEvent::VideoCallSignal(CallSignal {
        booking_id: booking_id.clone(),
        from: Some(from),
        signal: Signal::Description(desc),
    })
}

pub fn candidate(booking_id: &BookingId, from: SessionId, candidate: IceCandidate) -> OutboundEvent {
    OutboundEvent::VideoCallSignal(CallSignal {
        booking_id: booking_id.clone(),
        from: Some(from),
        signal: Signal::Candidate { candidate },
    })
}

pub fn hangup(booking_id: &BookingId) -> OutboundEvent {
    OutboundEvent::VideoCallEnd(BookingRef {
        booking_id: booking_id.clone(),
    })
}
