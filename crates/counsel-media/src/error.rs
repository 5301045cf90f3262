use counsel_net::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Invalid signal: {0}")]
    Signal(String),
}

#[derive(Error, Debug)]
pub enum CallError {
    /// Camera or microphone unavailable. Fatal for the call screen.
    #[error("Could not acquire camera/microphone: {0}")]
    Acquisition(MediaError),

    #[error("Call not allowed: {0}")]
    NotAllowed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}
