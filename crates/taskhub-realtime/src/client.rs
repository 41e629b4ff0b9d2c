//! Connection manager.
//!
//! Owns the lifecycle state machine and the single broker session.
//! Establishment is: connect the transport, rebuild subscriptions,
//! announce online, then after a short settle delay request a presence
//! snapshot and start the heartbeat. Unexpected session loss schedules
//! linear-backoff reconnects up to the configured ceiling; retry `n`
//! waits `n` times the backoff unit. A deliberate disconnect announces
//! offline and leaves the project channel before closing.
//!
//! Every spawned watcher and timer carries the session epoch it was
//! created under and exits quietly when the epoch has moved on, so a
//! stale timer can never act on a newer session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskhub_wire::{Envelope, NotificationBody, PresenceStatus};

use crate::config::RealtimeConfig;
use crate::dispatch::{HandlerKey, HandlerRegistry, HandlerResult, HandlerToken};
use crate::errors::{RealtimeError, Result};
use crate::events::LocalEvent;
use crate::notify::{NotificationGate, NotificationSink};
use crate::subscriptions::{ChannelKey, SubscriptionRegistry};
use crate::transport::{BrokerSession, Transport, WsTransport};

/// Who this client is acting as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id, used for the personal queue and echo filtering.
    pub id: String,
    /// Display name attached to outgoing envelopes.
    pub username: String,
}

impl Identity {
    /// Build an identity.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

/// Lifecycle states of the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and none wanted.
    Disconnected,
    /// First establishment in progress.
    Connecting,
    /// Live session.
    Connected,
    /// Session lost, a retry is scheduled or running.
    Reconnecting,
    /// Retry ceiling reached; a fresh `connect` call is required.
    GivenUp,
}

pub(crate) struct ClientInner {
    pub(crate) config: RealtimeConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) gate: NotificationGate,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) session: Mutex<Option<Arc<dyn BrokerSession>>>,
    pub(crate) identity: Mutex<Option<Identity>>,
    pub(crate) active_project: Mutex<Option<String>>,
    /// Project channel to re-join once a lost session is restored.
    /// `active_project` itself is cleared on loss, so a set project id
    /// always means a live project subscription.
    pub(crate) rejoin_project: Mutex<Option<String>>,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) events: broadcast::Sender<LocalEvent>,
    pub(crate) heartbeat: Mutex<Option<CancellationToken>>,
    pub(crate) reconnect_attempts: AtomicU32,
    pub(crate) last_status_request: Mutex<Option<tokio::time::Instant>>,
    /// Bumped on every establishment and deliberate teardown; stale
    /// watchers compare against it and bail.
    pub(crate) session_epoch: AtomicU64,
}

impl ClientInner {
    pub(crate) fn current_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn emit(&self, event: LocalEvent) {
        // An error only means nobody is listening right now.
        let _ = self.events.send(event);
    }

    /// Encode and publish an envelope. Best effort: a missing session,
    /// an encode failure, or a transport error logs and returns false.
    pub(crate) async fn publish(&self, destination: &str, envelope: &Envelope) -> bool {
        let session = self.session.lock().clone();
        let Some(session) = session else {
            debug!(destination, "publish dropped, not connected");
            return false;
        };
        let body = match envelope.encode() {
            Ok(body) => body,
            Err(error) => {
                warn!(destination, %error, "publish encode failed");
                return false;
            }
        };
        match session.publish(destination, body).await {
            Ok(()) => true,
            Err(error) => {
                warn!(destination, %error, "publish failed");
                false
            }
        }
    }

    /// Connect the transport and bring the session to full service.
    pub(crate) async fn establish(self: &Arc<Self>) -> Result<()> {
        let session = self.transport.connect(&self.config.broker_url).await?;
        let epoch = self.session_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.session.lock() = Some(Arc::clone(&session));
        *self.state.lock() = ConnectionState::Connected;
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let closed = session.closed();
        let watcher = Arc::clone(self);
        let _watch = tokio::spawn(async move {
            closed.cancelled().await;
            watcher.on_session_lost(epoch).await;
        });

        self.subscribe_to_topics().await;
        self.send_status(PresenceStatus::Online).await;

        let rejoin = self.rejoin_project.lock().take();
        if let Some(project_id) = rejoin {
            info!(project_id = %project_id, "re-joining project after reconnect");
            self.join_project(&project_id).await;
        }

        // Let the subscriptions land before asking everyone to
        // re-announce, then start the heartbeat.
        let settler = Arc::clone(self);
        let settle = self.config.settle_delay();
        let _settle = tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            if settler.session_epoch.load(Ordering::SeqCst) != epoch
                || settler.current_state() != ConnectionState::Connected
            {
                return;
            }
            let _ = settler.request_all_statuses(false).await;
            settler.start_heartbeat();
        });

        info!(url = %self.config.broker_url, "session established");
        Ok(())
    }

    /// React to an unexpected session loss.
    pub(crate) async fn on_session_lost(self: &Arc<Self>, epoch: u64) {
        if self.session_epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        if self.current_state() != ConnectionState::Connected {
            return;
        }
        warn!("broker session lost");

        let _ = self.session.lock().take();
        self.stop_heartbeat();
        self.subscriptions.clear();
        // The project subscription is gone with the session; remember
        // the channel for re-establishment and clear the active marker
        // so it never points at a dead subscription.
        *self.rejoin_project.lock() = self.active_project.lock().take();
        self.schedule_reconnect();
    }

    /// Schedule the next reconnect attempt, or give up at the ceiling.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>) {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.config.max_reconnect_attempts {
            warn!(attempt, "reconnect ceiling reached, giving up");
            *self.state.lock() = ConnectionState::GivenUp;
            return;
        }

        *self.state.lock() = ConnectionState::Reconnecting;
        let delay = self.config.reconnect_backoff().saturating_mul(attempt);
        info!(attempt, ?delay, "reconnect scheduled");

        let inner = Arc::clone(self);
        let _timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The timer may outlive the intent to reconnect.
            if inner.current_state() != ConnectionState::Reconnecting {
                return;
            }
            if inner.identity.lock().is_none() {
                return;
            }
            match inner.establish().await {
                Ok(()) => info!(attempt, "reconnected"),
                Err(error) => {
                    warn!(attempt, %error, "reconnect attempt failed");
                    inner.schedule_reconnect();
                }
            }
        });
    }
}

/// Handle to the realtime client. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }

    /// Start building a client.
    #[must_use]
    pub fn builder(config: RealtimeConfig) -> RealtimeClientBuilder {
        RealtimeClientBuilder::new(config)
    }

    /// Connect as `identity`. Fails with [`RealtimeError::AlreadyConnected`]
    /// when a session exists or is being established, and with the
    /// transport error when the first connection cannot be made. No
    /// retries are scheduled for a failed *initial* connect.
    pub async fn connect(&self, identity: Identity) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Disconnected | ConnectionState::GivenUp => {
                    *state = ConnectionState::Connecting;
                }
                _ => return Err(RealtimeError::AlreadyConnected),
            }
        }

        *self.inner.identity.lock() = Some(identity);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        if let Err(error) = self.inner.establish().await {
            *self.inner.state.lock() = ConnectionState::Disconnected;
            *self.inner.identity.lock() = None;
            return Err(error);
        }
        Ok(())
    }

    /// Deliberately tear the session down. Announces offline, leaves
    /// the project channel, and unsubscribes before closing. Safe to
    /// call in any state; disconnecting twice is a no-op.
    pub async fn disconnect(&self) {
        match self.inner.current_state() {
            ConnectionState::Connected => {
                // Invalidate the close watcher and settle timer first
                // so the teardown is not mistaken for a lost session.
                let _ = self.inner.session_epoch.fetch_add(1, Ordering::SeqCst);
                self.inner.stop_heartbeat();
                self.inner.send_status(PresenceStatus::Offline).await;
                self.inner.leave_project().await;
                self.inner.clear_subscriptions().await;

                let session = self.inner.session.lock().take();
                *self.inner.state.lock() = ConnectionState::Disconnected;
                if let Some(session) = session {
                    session.close().await;
                }
                *self.inner.identity.lock() = None;
                *self.inner.active_project.lock() = None;
                *self.inner.rejoin_project.lock() = None;
                info!("disconnected");
            }
            ConnectionState::Connecting
            | ConnectionState::Reconnecting
            | ConnectionState::GivenUp => {
                *self.inner.state.lock() = ConnectionState::Disconnected;
                self.inner.stop_heartbeat();
                self.inner.subscriptions.clear();
                let _ = self.inner.session.lock().take();
                *self.inner.identity.lock() = None;
                *self.inner.active_project.lock() = None;
                *self.inner.rejoin_project.lock() = None;
                info!("disconnected");
            }
            ConnectionState::Disconnected => {}
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Whether a live session exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The identity this client connected as, if any.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.lock().clone()
    }

    /// The project whose channel is currently joined, if any.
    #[must_use]
    pub fn active_project(&self) -> Option<String> {
        self.inner.active_project.lock().clone()
    }

    /// The topic currently subscribed under a channel, if any.
    #[must_use]
    pub fn subscribed_topic(&self, key: ChannelKey) -> Option<String> {
        self.inner.subscriptions.topic_of(key)
    }

    /// Subscribe to the local event bus.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<LocalEvent> {
        self.inner.events.subscribe()
    }

    /// Register a message handler. Handlers for the exact kind run
    /// before wildcard handlers, each group in registration order.
    pub fn on_message<F>(&self, key: HandlerKey, handler: F) -> HandlerToken
    where
        F: Fn(&Envelope, ChannelKey) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.handlers.register(key, Arc::new(handler))
    }

    /// Remove a handler registration. Returns `false` when the token
    /// is already gone.
    pub fn off_message(&self, token: HandlerToken) -> bool {
        self.inner.handlers.remove(token)
    }

    /// Join a project channel, leaving any previously joined project
    /// first. Idempotent for the already-joined project.
    pub async fn join_project(&self, project_id: &str) {
        self.inner.join_project(project_id).await;
    }

    /// Leave the active project channel, if any.
    pub async fn leave_project(&self) {
        self.inner.leave_project().await;
    }

    /// Surface a click on a displayed notification to the event bus.
    pub fn emit_notification_click(&self, body: NotificationBody) {
        self.inner.emit(LocalEvent::NotificationClick(body));
    }
}

/// Builder for [`RealtimeClient`].
pub struct RealtimeClientBuilder {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    shell_sink: Option<Arc<dyn NotificationSink>>,
    native_sink: Option<Arc<dyn NotificationSink>>,
}

impl RealtimeClientBuilder {
    /// Builder with the WebSocket transport and no notification sinks.
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            transport: Arc::new(WsTransport::new()),
            shell_sink: None,
            native_sink: None,
        }
    }

    /// Replace the transport. Tests inject fakes here.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Install the desktop-shell notification sink. Preferred over the
    /// native sink when both are present.
    #[must_use]
    pub fn shell_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.shell_sink = Some(sink);
        self
    }

    /// Install the native notification sink, used only when no shell
    /// sink is configured.
    #[must_use]
    pub fn native_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.native_sink = Some(sink);
        self
    }

    /// Finish building the client.
    #[must_use]
    pub fn build(self) -> RealtimeClient {
        let (events, _) = broadcast::channel(self.config.event_capacity);
        let gate = NotificationGate::new(
            self.config.dedup_window(),
            self.config.dedup_retention(),
            self.shell_sink,
            self.native_sink,
        );
        RealtimeClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                transport: self.transport,
                gate,
                state: Mutex::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                identity: Mutex::new(None),
                active_project: Mutex::new(None),
                rejoin_project: Mutex::new(None),
                subscriptions: SubscriptionRegistry::new(),
                handlers: HandlerRegistry::new(),
                events,
                heartbeat: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                last_status_request: Mutex::new(None),
                session_epoch: AtomicU64::new(0),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::transport::TransportError;
    use tokio::sync::mpsc;

    struct RefusingTransport;

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn connect(&self, _url: &str) -> std::result::Result<Arc<dyn BrokerSession>, TransportError> {
            Err(TransportError::Rejected("401 Unauthorized".into()))
        }
    }

    struct IdleSession {
        closed: CancellationToken,
    }

    #[async_trait]
    impl BrokerSession for IdleSession {
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
            _destination: &str,
            _body: String,
        ) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn closed(&self) -> CancellationToken {
            self.closed.clone()
        }

        async fn close(&self) {}
    }

    struct IdleTransport;

    #[async_trait]
    impl Transport for IdleTransport {
        async fn connect(&self, _url: &str) -> std::result::Result<Arc<dyn BrokerSession>, TransportError> {
            Ok(Arc::new(IdleSession {
                closed: CancellationToken::new(),
            }))
        }
    }

    fn client(transport: Arc<dyn Transport>) -> RealtimeClient {
        RealtimeClient::builder(RealtimeConfig::default())
            .transport(transport)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn starts_disconnected() {
        let client = client(Arc::new(IdleTransport));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.identity().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_sets_identity_and_state() {
        let client = client(Arc::new(IdleTransport));
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        assert!(client.is_connected());
        assert_eq!(client.identity().unwrap().username, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn double_connect_is_rejected() {
        let client = client(Arc::new(IdleTransport));
        client.connect(Identity::new("u1", "alice")).await.unwrap();

        let err = client.connect(Identity::new("u1", "alice")).await.unwrap_err();
        assert!(matches!(err, RealtimeError::AlreadyConnected));
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_connect_restores_disconnected() {
        let client = client(Arc::new(RefusingTransport));
        let err = client.connect(Identity::new("u1", "alice")).await.unwrap_err();

        assert!(matches!(err, RealtimeError::Transport(_)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.identity().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_everything() {
        let client = client(Arc::new(IdleTransport));
        client.connect(Identity::new("u1", "alice")).await.unwrap();
        client.disconnect().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.identity().is_none());
        assert!(client.active_project().is_none());
        assert!(client.subscribed_topic(ChannelKey::Global).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_when_disconnected_is_noop() {
        let client = client(Arc::new(IdleTransport));
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_allowed_after_given_up() {
        let client = client(Arc::new(IdleTransport));
        *client.inner.state.lock() = ConnectionState::GivenUp;

        client.connect(Identity::new("u1", "alice")).await.unwrap();
        assert!(client.is_connected());
    }
}
