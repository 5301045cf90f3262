// Real-time signaling transport: one websocket per identity, named logical
// channels on top, bounded reconnection and room replay.

pub mod channels;
pub mod connector;
pub mod error;
pub mod transport;

pub use channels::{Channel, Subscription};
pub use connector::{Connector, Link, WsConnector};
pub use error::TransportError;
pub use transport::{SignalingTransport, TransportConfig};
