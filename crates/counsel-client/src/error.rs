use thiserror::Error;

use counsel_media::CallError;
use counsel_net::TransportError;
use counsel_shared::types::MessageId;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("Call error: {0}")]
    Call(#[from] CallError),

    #[error("Cannot send an empty message")]
    EmptyMessage,

    /// The relay rejected an optimistic send; the local copy was removed.
    #[error("Message {temp_id} was not sent: {reason}")]
    SendFailed { temp_id: MessageId, reason: String },
}
