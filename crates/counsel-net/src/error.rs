use counsel_shared::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected")]
    Disconnected,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport task has stopped")]
    Closed,

    #[error("Command buffer full")]
    Busy,

    #[error("Encode error: {0}")]
    Encode(#[from] ProtocolError),
}
