//! Presence announcements, heartbeat, and outbound messaging.
//!
//! The client announces its own status optimistically: a local
//! `UserStatusChange` event fires immediately, the broker round-trip
//! confirms it for everyone else. Snapshot requests (asking every peer
//! to re-announce) are debounced so focus-churn in the UI cannot flood
//! the broker; the heartbeat re-announces online on a fixed period for
//! as long as the session lives.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use taskhub_wire::topics;
use taskhub_wire::{
    AvatarContent, Envelope, Payload, PresenceStatus, StatusAction, StatusContent,
};

use crate::client::{ClientInner, ConnectionState, RealtimeClient};
use crate::errors::{RealtimeError, Result};
use crate::events::{LocalEvent, StatusSource};

impl ClientInner {
    /// Announce a status to the broker and raise the optimistic local
    /// event. A missing identity makes this a no-op.
    pub(crate) async fn send_status(&self, status: PresenceStatus) {
        let Some(identity) = self.identity.lock().clone() else {
            return;
        };
        let envelope = Envelope::new(
            Payload::UserStatus(StatusContent::Announce { status }),
            &identity.id,
            &identity.username,
        );
        let _ = self.publish(topics::destinations::USER_STATUS, &envelope).await;
        self.emit(LocalEvent::UserStatusChange {
            user_id: identity.id,
            status,
            immediate: true,
            source: None,
        });
    }

    /// Ask every peer to re-announce. Debounced unless `force`; returns
    /// whether a request actually went out.
    pub(crate) async fn request_all_statuses(&self, force: bool) -> bool {
        let now = tokio::time::Instant::now();
        {
            let mut last = self.last_status_request.lock();
            if !force {
                if let Some(prev) = *last {
                    if now.duration_since(prev) < self.config.status_debounce() {
                        debug!("status snapshot request debounced");
                        return false;
                    }
                }
            }
            *last = Some(now);
        }

        let Some(identity) = self.identity.lock().clone() else {
            return false;
        };
        let envelope = Envelope::new(
            Payload::UserStatus(StatusContent::RequestAll {
                action: StatusAction::RequestAll,
            }),
            &identity.id,
            &identity.username,
        );
        self.publish(topics::destinations::USER_STATUS, &envelope).await
    }

    /// Start (or restart) the periodic online re-announcement.
    pub(crate) fn start_heartbeat(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let prior = self.heartbeat.lock().replace(cancel.clone());
        if let Some(prior) = prior {
            prior.cancel();
        }

        let interval = self.config.heartbeat_interval();
        let inner = Arc::clone(self);
        let _beat = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        if inner.current_state() == ConnectionState::Connected {
                            inner.send_status(PresenceStatus::Online).await;
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        });
    }

    /// Stop the heartbeat. Idempotent.
    pub(crate) fn stop_heartbeat(&self) {
        if let Some(cancel) = self.heartbeat.lock().take() {
            cancel.cancel();
        }
    }
}

impl RealtimeClient {
    /// Re-assert presence after the UI regains focus: announce online,
    /// force a snapshot request past the debounce, and give the
    /// responses a settle delay to arrive.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotConnected`] without a live session.
    pub async fn sync_status(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let Some(identity) = self.identity() else {
            return Err(RealtimeError::NotConnected);
        };

        self.inner().send_status(PresenceStatus::Online).await;
        let _ = self.inner().request_all_statuses(true).await;
        self.inner().emit(LocalEvent::UserStatusChange {
            user_id: identity.id,
            status: PresenceStatus::Online,
            immediate: true,
            source: Some(StatusSource::Sync),
        });

        tokio::time::sleep(self.inner().config.settle_delay()).await;
        Ok(())
    }

    /// Send a chat message, optionally addressed to one user. Best
    /// effort; returns whether the publish went out.
    pub async fn send_chat_message(&self, text: &str, receiver: Option<&str>) -> bool {
        let Some(identity) = self.identity() else {
            return false;
        };
        let mut envelope = Envelope::new(
            Payload::ChatMessage(text.to_string()),
            &identity.id,
            &identity.username,
        );
        if let Some(receiver) = receiver {
            envelope = envelope.with_receiver(receiver);
        }
        self.inner()
            .publish(topics::destinations::CHAT_MESSAGE, &envelope)
            .await
    }

    /// Broadcast an opaque project update to the active project. Best
    /// effort; returns whether the publish went out.
    pub async fn send_project_update(&self, data: serde_json::Value) -> bool {
        let Some(identity) = self.identity() else {
            return false;
        };
        let Some(project_id) = self.active_project() else {
            debug!("project update dropped, no active project");
            return false;
        };
        let envelope = Envelope::new(
            Payload::ProjectUpdate(data),
            &identity.id,
            &identity.username,
        )
        .with_project(&project_id);
        self.inner()
            .publish(topics::destinations::PROJECT_UPDATE, &envelope)
            .await
    }

    /// Announce an avatar / display-name change. Best effort; returns
    /// whether the publish went out.
    pub async fn send_avatar_update(&self, avatar: &str, real_name: &str) -> bool {
        let Some(identity) = self.identity() else {
            return false;
        };
        let envelope = Envelope::new(
            Payload::AvatarUpdate(AvatarContent {
                avatar: avatar.to_string(),
                real_name: real_name.to_string(),
            }),
            &identity.id,
            &identity.username,
        );
        self.inner()
            .publish(topics::destinations::USER_AVATAR, &envelope)
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::client::Identity;
    use crate::config::RealtimeConfig;
    use crate::transport::{BrokerSession, Transport, TransportError};

    struct RecordingSession {
        publishes: Arc<PlMutex<Vec<(String, String)>>>,
        closed: CancellationToken,
    }

    #[async_trait]
    impl BrokerSession for RecordingSession {
        async fn subscribe(
            &self,
            _topic: &str,
        ) -> std::result::Result<mpsc::Receiver<String>, TransportError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn unsubscribe(&self, _topic: &str) {}

        async fn publish(
            &self,
            destination: &str,
            body: String,
        ) -> std::result::Result<(), TransportError> {
            self.publishes.lock().push((destination.to_string(), body));
            Ok(())
        }

        fn closed(&self) -> CancellationToken {
            self.closed.clone()
        }

        async fn close(&self) {}
    }

    struct RecordingTransport {
        publishes: Arc<PlMutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(
            &self,
            _url: &str,
        ) -> std::result::Result<Arc<dyn BrokerSession>, TransportError> {
            Ok(Arc::new(RecordingSession {
                publishes: Arc::clone(&self.publishes),
                closed: CancellationToken::new(),
            }))
        }
    }

    fn recording_client() -> (RealtimeClient, Arc<PlMutex<Vec<(String, String)>>>) {
        let publishes = Arc::new(PlMutex::new(Vec::new()));
        let client = RealtimeClient::builder(RealtimeConfig::default())
            .transport(Arc::new(RecordingTransport {
                publishes: Arc::clone(&publishes),
            }))
            .build();
        (client, publishes)
    }

    fn status_publishes(publishes: &PlMutex<Vec<(String, String)>>) -> usize {
        publishes
            .lock()
            .iter()
            .filter(|(dest, _)| dest == topics::destinations::USER_STATUS)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_announces_online() {
        let (client, publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        let recorded = publishes.lock().clone();
        let (dest, body) = recorded
            .iter()
            .find(|(dest, _)| dest == topics::destinations::USER_STATUS)
            .cloned()
            .unwrap();
        assert_eq!(dest, topics::destinations::USER_STATUS);
        let envelope = Envelope::decode(&body).unwrap();
        assert_eq!(
            envelope.payload,
            Payload::UserStatus(StatusContent::Announce {
                status: PresenceStatus::Online
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_reannounces_on_period() {
        let (client, publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        // Let the settle task fire (snapshot request + heartbeat start).
        tokio::time::sleep(Duration::from_millis(600)).await;
        let after_settle = status_publishes(&publishes);

        tokio::time::sleep(Duration::from_millis(20_100)).await;
        let after_one = status_publishes(&publishes);
        assert_eq!(after_one, after_settle + 1);

        tokio::time::sleep(Duration::from_millis(20_100)).await;
        assert_eq!(status_publishes(&publishes), after_one + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_stops_on_disconnect() {
        let (client, publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        client.disconnect().await;
        let at_disconnect = publishes.lock().len();

        tokio::time::sleep(Duration::from_millis(60_000)).await;
        assert_eq!(publishes.lock().len(), at_disconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_requests_are_debounced() {
        let (client, _publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        assert!(client.inner().request_all_statuses(false).await);
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!client.inner().request_all_statuses(false).await);

        tokio::time::advance(Duration::from_millis(3000)).await;
        assert!(client.inner().request_all_statuses(false).await);
    }

    #[tokio::test(start_paused = true)]
    async fn force_bypasses_debounce() {
        let (client, _publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        assert!(client.inner().request_all_statuses(false).await);
        assert!(client.inner().request_all_statuses(true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_status_requires_connection() {
        let (client, _publishes) = recording_client();
        let err = client.sync_status().await.unwrap_err();
        assert!(matches!(err, RealtimeError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_status_announces_and_raises_sync_event() {
        let (client, publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();
        let mut events = client.events();

        let before = status_publishes(&publishes);
        client.sync_status().await.unwrap();
        // Online announce plus the forced snapshot request.
        assert_eq!(status_publishes(&publishes), before + 2);

        let mut saw_sync = false;
        while let Ok(event) = events.try_recv() {
            if let LocalEvent::UserStatusChange { source, .. } = event {
                if source == Some(StatusSource::Sync) {
                    saw_sync = true;
                }
            }
        }
        assert!(saw_sync);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_message_carries_receiver() {
        let (client, publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        assert!(client.send_chat_message("hello", Some("u2")).await);

        let recorded = publishes.lock().clone();
        let (_, body) = recorded
            .iter()
            .find(|(dest, _)| dest == topics::destinations::CHAT_MESSAGE)
            .cloned()
            .unwrap();
        let envelope = Envelope::decode(&body).unwrap();
        assert_eq!(envelope.payload, Payload::ChatMessage("hello".into()));
        assert_eq!(envelope.receiver_id.as_deref(), Some("u2"));
    }

    #[tokio::test(start_paused = true)]
    async fn project_update_requires_active_project() {
        let (client, _publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        assert!(!client.send_project_update(serde_json::json!({"x": 1})).await);
    }

    #[tokio::test(start_paused = true)]
    async fn avatar_update_publishes() {
        let (client, publishes) = recording_client();
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        assert!(client.send_avatar_update("a.png", "Alice A").await);

        let recorded = publishes.lock().clone();
        let (_, body) = recorded
            .iter()
            .find(|(dest, _)| dest == topics::destinations::USER_AVATAR)
            .cloned()
            .unwrap();
        let envelope = Envelope::decode(&body).unwrap();
        assert_eq!(
            envelope.payload,
            Payload::AvatarUpdate(AvatarContent {
                avatar: "a.png".into(),
                real_name: "Alice A".into()
            })
        );
    }
}
