// Client core for counsel: session context, notifications, chat rooms and
// calls on top of the real-time transport and the REST backend.

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod notifications;
pub mod session;

#[cfg(test)]
mod testing;

pub use api::{ApiError, Backend, CallPermission, HttpBackend};
pub use chat::{ChatRoom, RoomSession, RoomUpdate};
pub use config::ClientConfig;
pub use error::ClientError;
pub use notifications::{NotificationLog, NotificationStream};
pub use session::{CallSession, Session};
