//! # counsel-shared
//!
//! Types shared by every layer of the consultation messaging core: the chat
//! and notification data model, the real-time wire protocol and the
//! attachment classification used when a message carries no explicit type.

pub mod attachment;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
