//! Notification log and unread counter for the current identity.
//!
//! The counter is maintained incrementally and never recomputed from the log.
//! Read flips are optimistic: a failed acknowledgement leaves the local state
//! as it is, and the next [`NotificationStream::load_initial`] reconciles it
//! with the backend.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use counsel_net::Subscription;
use counsel_shared::protocol::InboundEvent;
use counsel_shared::types::{Identity, Notification, NotificationId};

use crate::api::Backend;
use crate::error::ClientError;

/// Newest-first log of notifications.
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: Vec<Notification>,
    unread: usize,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log with a fresh fetch.
    pub fn load(&mut self, mut entries: Vec<Notification>) {
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut seen = HashSet::new();
        entries.retain(|n| seen.insert(n.id.clone()));
        self.unread = entries.iter().filter(|n| !n.is_read).count();
        self.entries = entries;
    }

    /// Prepend a pushed notification. Redeliveries are ignored.
    pub fn apply_push(&mut self, notification: Notification) -> bool {
        if self.entries.iter().any(|n| n.id == notification.id) {
            debug!(id = %notification.id, "Duplicate notification ignored");
            return false;
        }
        if !notification.is_read {
            self.unread += 1;
        }
        self.entries.insert(0, notification);
        true
    }

    /// Flip one entry. Returns whether anything changed.
    pub fn mark_read(&mut self, id: &NotificationId) -> bool {
        match self.entries.iter_mut().find(|n| &n.id == id) {
            Some(entry) if !entry.is_read => {
                entry.is_read = true;
                self.unread = self.unread.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for entry in self.entries.iter_mut().filter(|n| !n.is_read) {
            entry.is_read = true;
            flipped += 1;
        }
        self.unread = 0;
        flipped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.unread = 0;
    }

    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The log wired to the backend and the notification channel.
pub struct NotificationStream {
    identity: Identity,
    log: NotificationLog,
    backend: Arc<dyn Backend>,
    subscription: Option<Subscription>,
}

impl NotificationStream {
    pub fn new(identity: Identity, backend: Arc<dyn Backend>, subscription: Subscription) -> Self {
        Self {
            identity,
            log: NotificationLog::new(),
            backend,
            subscription: Some(subscription),
        }
    }

    pub async fn load_initial(&mut self) -> Result<usize, ClientError> {
        let entries = self.backend.fetch_notifications(&self.identity).await?;
        self.log.load(entries);
        info!(
            identity = %self.identity,
            total = self.log.entries().len(),
            unread = self.log.unread_count(),
            "Notifications loaded"
        );
        Ok(self.log.entries().len())
    }

    pub fn apply_push(&mut self, notification: Notification) -> bool {
        self.log.apply_push(notification)
    }

    /// Mark one notification read, or all of them when `id` is `None`.
    ///
    /// The local flip happens first and stays even if the backend
    /// acknowledgement fails; the error is still returned for reporting.
    pub async fn mark_as_read(&mut self, id: Option<&NotificationId>) -> Result<(), ClientError> {
        let acked = match id {
            Some(id) => {
                if !self.log.mark_read(id) {
                    return Ok(());
                }
                self.backend.mark_notification_read(&self.identity, id).await
            }
            None => {
                self.log.mark_all_read();
                self.backend.mark_all_notifications_read(&self.identity).await
            }
        };
        if let Err(e) = &acked {
            warn!(error = %e, "Notification acknowledgement failed, keeping local state");
        }
        Ok(acked?)
    }

    /// Drop everything and stop listening. Synchronous, so the log is empty
    /// before any logout round-trip starts.
    pub fn clear(&mut self) {
        self.log.clear();
        self.subscription = None;
        debug!(identity = %self.identity, "Notifications cleared");
    }

    /// Wait for the next new notification. `None` once cleared or when the
    /// transport is gone.
    pub async fn next_update(&mut self) -> Option<Notification> {
        loop {
            let event = self.subscription.as_mut()?.recv().await;
            match event {
                Some(InboundEvent::Notification(notification)) => {
                    if self.log.apply_push(notification.clone()) {
                        return Some(notification);
                    }
                }
                Some(other) => debug!(event = other.name(), "Ignoring event on notification channel"),
                None => {
                    self.subscription = None;
                    return None;
                }
            }
        }
    }

    pub fn log(&self) -> &NotificationLog {
        &self.log
    }

    pub fn unread_count(&self) -> usize {
        self.log.unread_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_net::Channel;

    use crate::testing::{notification, FakeBackend};

    fn stream(backend: FakeBackend) -> (NotificationStream, Arc<FakeBackend>) {
        let backend = backend.shared();
        let (_tx, sub) = Subscription::detached(Channel::Notifications);
        let stream = NotificationStream::new(Identity::user("user-7"), backend.clone(), sub);
        (stream, backend)
    }

    #[test]
    fn test_push_prepends_and_counts() {
        let mut log = NotificationLog::new();
        log.load(vec![notification("n1", 1, true), notification("n2", 2, false)]);
        assert_eq!(log.entries()[0].id.as_str(), "n2");
        assert_eq!(log.unread_count(), 1);

        assert!(log.apply_push(notification("n3", 3, false)));
        assert!(!log.apply_push(notification("n3", 3, false)));
        assert_eq!(log.entries()[0].id.as_str(), "n3");
        assert_eq!(log.unread_count(), 2);
    }

    #[test]
    fn test_unread_counter_floor() {
        let mut log = NotificationLog::new();
        log.apply_push(notification("n1", 1, false));

        let id = NotificationId::from("n1");
        assert!(log.mark_read(&id));
        for _ in 0..5 {
            assert!(!log.mark_read(&id));
        }
        assert!(!log.mark_read(&NotificationId::from("missing")));
        assert_eq!(log.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_load_then_mark_all() {
        let (mut stream, backend) = stream(FakeBackend {
            notifications: vec![notification("n1", 1, false), notification("n2", 2, false)],
            ..FakeBackend::default()
        });
        assert_eq!(stream.load_initial().await.unwrap(), 2);
        assert_eq!(stream.unread_count(), 2);

        stream.mark_as_read(None).await.unwrap();
        assert_eq!(stream.unread_count(), 0);
        assert!(stream.log().entries().iter().all(|n| n.is_read));
        assert_eq!(backend.acks(), ["read-all"]);
    }

    #[tokio::test]
    async fn test_failed_ack_keeps_local_flip() {
        let (mut stream, backend) = stream(FakeBackend {
            notifications: vec![notification("n1", 1, false)],
            fail_acks: true,
            ..FakeBackend::default()
        });
        stream.load_initial().await.unwrap();

        let id = NotificationId::from("n1");
        let err = stream.mark_as_read(Some(&id)).await.unwrap_err();
        assert!(matches!(err, ClientError::Api(_)));
        assert_eq!(stream.unread_count(), 0);
        assert!(stream.log().entries()[0].is_read);

        // Already read locally: no second acknowledgement.
        stream.mark_as_read(Some(&id)).await.unwrap();
        assert_eq!(backend.acks(), ["read:n1"]);
    }

    #[tokio::test]
    async fn test_pushed_notifications_and_clear() {
        let backend = FakeBackend::default().shared();
        let (tx, sub) = Subscription::detached(Channel::Notifications);
        let mut stream = NotificationStream::new(Identity::user("user-7"), backend, sub);

        tx.send(InboundEvent::Notification(notification("n1", 1, false)))
            .unwrap();
        tx.send(InboundEvent::Notification(notification("n1", 1, false)))
            .unwrap();
        tx.send(InboundEvent::Notification(notification("n2", 2, false)))
            .unwrap();

        assert_eq!(stream.next_update().await.unwrap().id.as_str(), "n1");
        assert_eq!(stream.next_update().await.unwrap().id.as_str(), "n2");
        assert_eq!(stream.unread_count(), 2);

        stream.clear();
        assert!(stream.log().is_empty());
        assert_eq!(stream.unread_count(), 0);
        assert!(stream.next_update().await.is_none());
    }
}
