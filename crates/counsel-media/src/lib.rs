// One-to-one video calls: local capture, the WebRTC peer and the signaling
// state machine that negotiates it over the real-time transport.

pub mod call;
pub mod capture;
pub mod config;
pub mod error;
pub mod ice;
#[cfg(feature = "microphone")]
pub mod microphone;
pub mod pcmu;
pub mod peer;
pub mod rtc;
pub mod signaling;

pub use call::{CallCoordinator, CallState, CallUpdate};
pub use capture::{
    HeadlessDevices, LocalStream, LocalTrack, MediaConstraints, MediaDevices, MediaSample,
    TrackFeed, TrackKind,
};
pub use config::CallConfig;
pub use error::{CallError, MediaError};
#[cfg(feature = "microphone")]
pub use microphone::MicrophoneDevices;
pub use peer::{PeerConnection, PeerEvent, PeerFactory, PeerState};
pub use rtc::RtcPeerFactory;
pub use signaling::SignalSink;
