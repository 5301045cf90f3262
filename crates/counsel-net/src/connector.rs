//! How the transport obtains a live connection.
//!
//! A [`Link`] is a pair of channels carrying JSON text frames. The
//! websocket implementation pumps a `tokio-tungstenite` stream through a
//! background task; tests hand the transport in-memory links instead.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use counsel_shared::types::Identity;

use crate::error::TransportError;

const LINK_BUFFER: usize = 256;

/// One established connection. When the peer side goes away `rx` yields
/// `None`; dropping `tx` closes the connection.
pub struct Link {
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
}

impl Link {
    /// Build a connected pair: the first half for the transport, the second
    /// for whoever plays the relay.
    pub fn pair() -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::channel(LINK_BUFFER);
        let (b_tx, a_rx) = mpsc::channel(LINK_BUFFER);
        (Link { tx: a_tx, rx: a_rx }, Link { tx: b_tx, rx: b_rx })
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, identity: &Identity) -> Result<Link, TransportError>;
}

/// Websocket connector. The identity travels as query parameters.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Relay URL with the identity appended as `userId` and `role`.
    pub fn endpoint(&self, identity: &Identity) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| TransportError::Connect(format!("invalid relay url {}: {e}", self.url)))?;
        url.query_pairs_mut()
            .append_pair("userId", identity.id.as_str())
            .append_pair("role", identity.role.as_str());
        Ok(url)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, identity: &Identity) -> Result<Link, TransportError> {
        let endpoint = self.endpoint(identity)?;
        let (ws, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url = %self.url, "Websocket connected");

        let (ours, mut theirs) = Link::pair();
        let (mut ws_write, mut ws_read) = ws.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = theirs.rx.recv() => {
                        let Some(text) = outgoing else {
                            let _ = ws_write.close().await;
                            break;
                        };
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "Websocket send failed");
                            break;
                        }
                    }
                    incoming = ws_read.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if theirs.tx.send(text.as_str().to_owned()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                debug!(frame = ?frame, "Websocket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "Websocket receive failed");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!("Websocket pump stopped");
        });

        Ok(ours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_carries_identity() {
        let connector = WsConnector::new("wss://relay.example.com/socket");
        assert_eq!(
            connector.endpoint(&Identity::lawyer("lawyer 1&x")).unwrap().as_str(),
            "wss://relay.example.com/socket?userId=lawyer+1%26x&role=lawyer"
        );

        let connector = WsConnector::new("ws://localhost:5000/ws?v=2");
        assert_eq!(
            connector.endpoint(&Identity::user("user-7")).unwrap().as_str(),
            "ws://localhost:5000/ws?v=2&userId=user-7&role=user"
        );

        let bad = WsConnector::new("not a url");
        assert!(matches!(
            bad.endpoint(&Identity::user("user-7")),
            Err(TransportError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_link_pair_is_crossed() {
        let (mut a, mut b) = Link::pair();
        a.tx.send("ping".into()).await.unwrap();
        assert_eq!(b.rx.recv().await.as_deref(), Some("ping"));
        b.tx.send("pong".into()).await.unwrap();
        assert_eq!(a.rx.recv().await.as_deref(), Some("pong"));
    }
}
