use async_trait::async_trait;
use tokio::sync::mpsc;

use counsel_shared::protocol::{IceCandidate, SessionDescription};

use crate::capture::{LocalStream, TrackKind};
use crate::config::CallConfig;
use crate::error::MediaError;

/// Native connection state of the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events raised by the peer connection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local ICE candidate to relay to the remote side.
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
    RemoteTrack(TrackKind),
}

/// The operations the call coordinator needs from a WebRTC peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;
    async fn close(&self) -> Result<(), MediaError>;
}

pub type PeerHandle = (Box<dyn PeerConnection>, mpsc::Receiver<PeerEvent>);

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Build a fresh peer connection sending the tracks of `local`, plus
    /// the stream of its events.
    async fn create(
        &self,
        config: &CallConfig,
        local: &LocalStream,
    ) -> Result<PeerHandle, MediaError>;
}
