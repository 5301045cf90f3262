//! REST collaborators: room metadata and history, notifications, call
//! admission.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use counsel_shared::types::{
    BookingId, ChatMessage, ChatRoomInfo, Identity, Notification, NotificationId, Role, RoomId,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend answered {status}: {message}")]
    Status { status: u16, message: String },
}

/// Answer to "may this identity join the call for this booking".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPermission {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_room(&self, room_id: &RoomId, role: Role) -> Result<ChatRoomInfo, ApiError>;
    async fn fetch_history(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, ApiError>;
    async fn fetch_notifications(&self, identity: &Identity)
        -> Result<Vec<Notification>, ApiError>;
    async fn mark_notification_read(
        &self,
        identity: &Identity,
        id: &NotificationId,
    ) -> Result<(), ApiError>;
    async fn mark_all_notifications_read(&self, identity: &Identity) -> Result<(), ApiError>;
    async fn can_join_call(
        &self,
        booking_id: &BookingId,
        identity: &Identity,
    ) -> Result<CallPermission, ApiError>;
    async fn register_call_join(
        &self,
        booking_id: &BookingId,
        identity: &Identity,
    ) -> Result<(), ApiError>;
}

/// [`Backend`] over JSON/HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let resp = check(self.client.get(&url).send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), ApiError> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        check(self.client.post(&url).json(&body).send().await?).await?;
        Ok(())
    }
}

async fn check(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

fn notifications_path(identity: &Identity) -> String {
    format!("notifications/{}/{}", identity.role, identity.id)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_room(&self, room_id: &RoomId, role: Role) -> Result<ChatRoomInfo, ApiError> {
        self.get_json(&format!("chat/rooms/{room_id}?role={role}"))
            .await
    }

    async fn fetch_history(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, ApiError> {
        self.get_json(&format!("chat/rooms/{room_id}/messages"))
            .await
    }

    async fn fetch_notifications(
        &self,
        identity: &Identity,
    ) -> Result<Vec<Notification>, ApiError> {
        self.get_json(&notifications_path(identity)).await
    }

    async fn mark_notification_read(
        &self,
        identity: &Identity,
        id: &NotificationId,
    ) -> Result<(), ApiError> {
        self.post(
            &format!("{}/{id}/read", notifications_path(identity)),
            serde_json::json!({}),
        )
        .await
    }

    async fn mark_all_notifications_read(&self, identity: &Identity) -> Result<(), ApiError> {
        self.post(
            &format!("{}/read-all", notifications_path(identity)),
            serde_json::json!({}),
        )
        .await
    }

    async fn can_join_call(
        &self,
        booking_id: &BookingId,
        identity: &Identity,
    ) -> Result<CallPermission, ApiError> {
        self.get_json(&format!(
            "video-call/{booking_id}/can-join?role={}",
            identity.role
        ))
        .await
    }

    async fn register_call_join(
        &self,
        booking_id: &BookingId,
        identity: &Identity,
    ) -> Result<(), ApiError> {
        self.post(
            &format!("video-call/{booking_id}/join"),
            serde_json::json!({
                "participantId": identity.id,
                "role": identity.role,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let backend = HttpBackend::new("https://api.example.com/api/").unwrap();
        assert_eq!(
            backend.url("/chat/rooms/room-42"),
            "https://api.example.com/api/chat/rooms/room-42"
        );
        assert_eq!(
            notifications_path(&Identity::lawyer("lawyer-1")),
            "notifications/lawyer/lawyer-1"
        );
    }

    #[test]
    fn test_call_permission_shape() {
        let denied: CallPermission =
            serde_json::from_str(r#"{"allowed":false,"reason":"Booking not confirmed"}"#).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_deref(), Some("Booking not confirmed"));

        let allowed: CallPermission = serde_json::from_str(r#"{"allowed":true}"#).unwrap();
        assert!(allowed.allowed);
    }
}
