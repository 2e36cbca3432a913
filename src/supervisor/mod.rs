//! # Connection Supervisor
//!
//! Owns the single broker session of the signed-in user and everything
//! attached to it: the live link, the subscription table, reconnect timing,
//! the heartbeat and the connection listeners.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──CONNACK──► Connected
//!      ▲                          │                      │
//!      │                      failure               unexpected close
//!      │                          ▼                      ▼
//!      └──── disconnect() ◄─ backoff timer ◄────────────┘
//! ```
//!
//! Only `connect()` reports an outcome to its caller. Publish, subscribe
//! and unsubscribe are fire-and-forget and log their failures.
//!
//! ## Sessions and generations
//!
//! Every teardown bumps a generation counter. Attempts and event streams
//! remember the generation they were started under and are ignored once it
//! is stale, so a late CONNACK or close from an abandoned session can never
//! touch the current one.
//!
//! ## Locking
//!
//! All mutable state sits behind one mutex that is never held across an
//! `.await`. Listeners and message handlers always run after it is released.

pub mod backoff;
pub mod heartbeat;
pub mod listeners;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mqtt::config::BrokerSettings;
use crate::mqtt::error::TransportError;
use crate::mqtt::router::{self, InboundMessage, MessageRouter};
use crate::mqtt::topics::{Channel, TopicRegistry};
use crate::mqtt::transport::{
    ConnectOptions, Connection, Connector, LastWill, Link, TransportEvent,
};
use crate::session::{Identity, SessionProvider};

use backoff::{Backoff, ReconnectPolicy};
use heartbeat::Heartbeat;
use listeners::{notify_all, Listener, ListenerHandle, ListenerRegistry, SharedRegistry};

/// Grace period after a manual disconnect during which closes are not
/// treated as unexpected.
pub const MANUAL_DISCONNECT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub broker: BrokerSettings,
    pub topics: TopicRegistry,
    pub reconnect: ReconnectPolicy,
    /// Zero disables the heartbeat
    pub heartbeat_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            topics: TopicRegistry::default(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Body of the last-will message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WillPayload<'a> {
    client_id: &'a str,
    timestamp: i64,
}

struct PendingReconnect {
    id: u64,
    cancel: CancellationToken,
}

struct SupervisorState<L> {
    connection: ConnectionState,
    identity: Option<Identity>,
    link: Option<Arc<L>>,
    generation: u64,
    in_flight: Option<watch::Receiver<Option<bool>>>,
    backoff: Backoff,
    reconnect: Option<PendingReconnect>,
    next_timer_id: u64,
    heartbeat: Option<Heartbeat>,
    session_events: Option<CancellationToken>,
    manual_disconnect: bool,
    router: MessageRouter,
}

struct Inner<C: Connector, A: SessionProvider> {
    connector: C,
    sessions: A,
    settings: SupervisorSettings,
    state: Mutex<SupervisorState<C::Link>>,
    listeners: SharedRegistry,
}

/// Cloneable handle to the connection supervisor.
///
/// Construct one per application and pass clones to whatever needs the
/// broker.
pub struct ConnectionSupervisor<C: Connector, A: SessionProvider> {
    inner: Arc<Inner<C, A>>,
}

impl<C: Connector, A: SessionProvider> Clone for ConnectionSupervisor<C, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector, A: SessionProvider> ConnectionSupervisor<C, A> {
    pub fn new(connector: C, sessions: A, settings: SupervisorSettings) -> Self {
        let state = SupervisorState {
            connection: ConnectionState::Disconnected,
            identity: None,
            link: None,
            generation: 0,
            in_flight: None,
            backoff: Backoff::new(settings.reconnect.clone()),
            reconnect: None,
            next_timer_id: 0,
            heartbeat: None,
            session_events: None,
            manual_disconnect: false,
            router: MessageRouter::new(settings.topics.clone()),
        };

        Self {
            inner: Arc::new(Inner {
                connector,
                sessions,
                settings,
                state: Mutex::new(state),
                listeners: Arc::new(Mutex::new(ListenerRegistry::default())),
            }),
        }
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.inner.settings.topics
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Identity the current (or pending) session is bound to.
    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.lock().reconnect.is_some()
    }

    /// Delay the next scheduled reconnect would wait.
    pub fn next_reconnect_delay(&self) -> Duration {
        self.lock().backoff.current_delay()
    }

    pub fn subscribed_channels(&self) -> Vec<Channel> {
        self.lock().router.channels()
    }

    /// Connects the signed-in user. Resolves `true` once the broker accepted
    /// the session.
    ///
    /// Concurrent calls while an attempt is running share that attempt's
    /// outcome. If the signed-in user differs from the one the current
    /// session belongs to, the old session is torn down first.
    pub async fn connect(&self) -> bool {
        let Some(identity) = self.inner.sessions.current_identity().await else {
            warn!("Connect requested without an authenticated session");
            return false;
        };

        let mut outcome = {
            let mut state = self.lock();

            let stale = state
                .identity
                .as_ref()
                .is_some_and(|bound| *bound != identity);
            let mut teardown = if stale {
                info!(
                    "Identity changed to {}, tearing down previous session",
                    identity
                );
                Some(self.shutdown_locked(&mut state))
            } else {
                None
            };

            let outcome = if let Some(in_flight) = &state.in_flight {
                debug!("Connection attempt already in progress, joining it");
                Some(in_flight.clone())
            } else if state.connection == ConnectionState::Connected
                && state.link.as_ref().is_some_and(|link| link.is_live())
            {
                debug!("Already connected as {}", identity);
                None
            } else {
                if self.release_session_locked(&mut state) && teardown.is_none() {
                    debug!("Previous session is no longer live, replacing it");
                    teardown = Some(self.listeners());
                }
                Some(self.begin_attempt_locked(&mut state, identity))
            };

            drop(state);
            if let Some(listeners) = teardown {
                notify_all(&listeners, false);
            }

            match outcome {
                Some(outcome) => outcome,
                None => return true,
            }
        };

        let connected = match outcome.wait_for(Option::is_some).await {
            Ok(result) => result.unwrap_or(false),
            Err(_) => {
                error!("Connection attempt ended without an outcome");
                false
            }
        };
        connected
    }

    /// Ends the session on purpose. No reconnect follows until `connect()` is
    /// called again.
    pub fn disconnect(&self) {
        let (listeners, generation) = {
            let mut state = self.lock();
            let listeners = self.shutdown_locked(&mut state);
            (listeners, state.generation)
        };
        info!("Disconnected from broker");
        notify_all(&listeners, false);

        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(MANUAL_DISCONNECT_GRACE).await;
            let mut state = supervisor.lock();
            if state.generation == generation {
                state.manual_disconnect = false;
            }
        });
    }

    /// Registers a status listener and calls it once right away with the
    /// current status.
    pub fn on_connection_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(listener.clone());
        notify_all(&[listener], self.is_connected());
        ListenerHandle::new(id, &self.inner.listeners)
    }

    /// Same as [`ListenerHandle::unsubscribe`].
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle.id())
    }

    /// Routes messages on `channel` to `handler`, replacing any previous one.
    ///
    /// The registration survives reconnects and is re-subscribed on every
    /// new session.
    pub fn subscribe<F>(&self, channel: Channel, handler: F)
    where
        F: Fn(&InboundMessage) -> color_eyre::Result<()> + Send + Sync + 'static,
    {
        let mut state = self.lock();
        if state.router.register(channel, Arc::new(handler)).is_some() {
            debug!("Replaced handler for {}", channel);
        }
        match &state.link {
            Some(link) => link.subscribe(self.topics().wire(channel)),
            None => debug!("Subscription to {} deferred until connected", channel),
        }
    }

    pub fn unsubscribe(&self, channel: Channel) {
        let mut state = self.lock();
        if state.router.remove(channel).is_none() {
            debug!("No subscription for {}", channel);
        }
        if let Some(link) = &state.link {
            link.unsubscribe(self.topics().wire(channel));
        }
    }

    /// Publishes raw bytes. `false` if there is no live session.
    pub fn publish(&self, channel: Channel, payload: Vec<u8>, retain: bool) -> bool {
        let link = self.lock().link.clone();
        let topic = self.topics().wire(channel);
        match link {
            Some(link) => link.publish(topic, payload, retain),
            None => {
                warn!("Not connected, dropping publish to {}", topic);
                false
            }
        }
    }

    pub fn publish_json<T: Serialize>(&self, channel: Channel, payload: &T, retain: bool) -> bool {
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.publish(channel, bytes, retain),
            Err(e) => {
                error!("Failed to encode payload for {}: {}", channel, e);
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorState<C::Link>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> Vec<Listener> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    fn begin_attempt_locked(
        &self,
        state: &mut SupervisorState<C::Link>,
        identity: Identity,
    ) -> watch::Receiver<Option<bool>> {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        state.manual_disconnect = false;
        state.in_flight = Some(outcome_rx.clone());
        state.connection = ConnectionState::Connecting;
        state.identity = Some(identity.clone());

        let generation = state.generation;
        let options = self.connect_options(&identity);
        let supervisor = self.clone();
        tokio::spawn(async move {
            info!("Connecting as {}", options.client_id);
            let result = supervisor.inner.connector.connect(options).await;
            let connected = supervisor.complete_attempt(generation, result);
            let _ = outcome_tx.send(Some(connected));
        });

        outcome_rx
    }

    fn connect_options(&self, identity: &Identity) -> ConnectOptions {
        let broker = &self.inner.settings.broker;
        let client_id = identity.client_id();
        let will = WillPayload {
            client_id: &client_id,
            timestamp: Utc::now().timestamp_millis(),
        };
        let last_will = match serde_json::to_vec(&will) {
            Ok(payload) => Some(LastWill {
                topic: self.topics().wire(Channel::Warning).to_string(),
                payload,
                retain: false,
            }),
            Err(e) => {
                warn!("Failed to encode last will: {}", e);
                None
            }
        };

        ConnectOptions {
            endpoint: broker.endpoint(),
            client_id,
            username: broker.username.clone(),
            password: broker.password.clone(),
            keep_alive: broker.keep_alive(),
            connect_timeout: broker.connect_timeout(),
            clean_session: broker.clean_session,
            last_will,
        }
    }

    fn complete_attempt(
        &self,
        generation: u64,
        result: Result<Connection<C::Link>, TransportError>,
    ) -> bool {
        let mut state = self.lock();

        if state.generation != generation {
            debug!("Discarding result of an abandoned connection attempt");
            if let Ok(connection) = result {
                connection.link.disconnect(true);
            }
            return false;
        }
        state.in_flight = None;

        match result {
            Ok(Connection { link, events }) => {
                let link = Arc::new(link);
                state.connection = ConnectionState::Connected;
                state.backoff.reset();
                if let Some(pending) = state.reconnect.take() {
                    pending.cancel.cancel();
                }

                for channel in state.router.channels() {
                    link.subscribe(self.topics().wire(channel));
                }

                let client_id = state
                    .identity
                    .as_ref()
                    .map(Identity::client_id)
                    .unwrap_or_default();
                state.heartbeat = Heartbeat::start(
                    link.clone(),
                    self.topics().wire(Channel::Heartbeat).to_string(),
                    client_id.clone(),
                    self.inner.settings.heartbeat_interval,
                );

                let cancel = CancellationToken::new();
                state.session_events = Some(cancel.clone());
                state.link = Some(link);
                tokio::spawn(self.clone().consume_events(generation, events, cancel));

                drop(state);
                info!("Connected to broker as {}", client_id);
                notify_all(&self.listeners(), true);
                true
            }
            Err(e) => {
                state.connection = ConnectionState::Disconnected;
                warn!("Connection attempt failed: {}", e);

                let retry = !state.manual_disconnect
                    && !matches!(e, TransportError::InvalidOptions(_));
                if retry {
                    self.schedule_reconnect_locked(&mut state);
                }

                drop(state);
                notify_all(&self.listeners(), false);
                false
            }
        }
    }

    async fn consume_events(
        self,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Message { topic, payload }) => self.route(&topic, &payload),
                Some(TransportEvent::Connected) => debug!("Transport reports session up"),
                Some(TransportEvent::Reconnecting(attempt)) => {
                    debug!("Transport reconnecting (attempt {})", attempt);
                }
                Some(TransportEvent::Error(e)) => warn!("Transport error: {}", e),
                Some(TransportEvent::Closed) | None => {
                    self.handle_close(generation);
                    break;
                }
            }
        }
    }

    fn route(&self, topic: &str, payload: &[u8]) {
        let prepared = self.lock().router.prepare(topic, payload);
        if let Some((message, handler)) = prepared {
            router::invoke(&handler, &message);
        }
    }

    fn handle_close(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!("Ignoring close of a previous session");
            return;
        }

        self.release_session_locked(&mut state);
        state.connection = ConnectionState::Disconnected;
        state.in_flight = None;

        if state.manual_disconnect {
            debug!("Connection closed during manual disconnect");
        } else {
            warn!("Connection to broker lost");
            self.schedule_reconnect_locked(&mut state);
        }

        drop(state);
        notify_all(&self.listeners(), false);
    }

    fn schedule_reconnect_locked(&self, state: &mut SupervisorState<C::Link>) {
        if state.reconnect.is_some() {
            debug!("Reconnect already scheduled");
            return;
        }

        let delay = state.backoff.next_delay();
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let cancel = CancellationToken::new();
        state.reconnect = Some(PendingReconnect {
            id,
            cancel: cancel.clone(),
        });

        info!(
            "Reconnecting in {} ms (retry {})",
            delay.as_millis(),
            state.backoff.failures()
        );

        let supervisor = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => debug!("Scheduled reconnect cancelled"),
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut state = supervisor.lock();
                        if state.reconnect.as_ref().is_some_and(|pending| pending.id == id) {
                            state.reconnect = None;
                        }
                    }
                    supervisor.connect().await;
                }
            }
        });
    }

    /// Drops the link, heartbeat and event stream of the current session and
    /// moves to a new generation so anything still queued for it is ignored.
    /// Returns whether the released session was reported as connected.
    fn release_session_locked(&self, state: &mut SupervisorState<C::Link>) -> bool {
        state.heartbeat = None;
        if let Some(cancel) = state.session_events.take() {
            cancel.cancel();
        }
        if let Some(link) = state.link.take() {
            link.disconnect(true);
        }
        state.generation += 1;
        state.connection == ConnectionState::Connected
    }

    /// Tears down everything bound to the current session and returns the
    /// listeners to notify once the lock is released.
    fn shutdown_locked(&self, state: &mut SupervisorState<C::Link>) -> Vec<Listener> {
        state.manual_disconnect = true;
        if let Some(pending) = state.reconnect.take() {
            pending.cancel.cancel();
        }
        self.release_session_locked(state);
        state.in_flight = None;
        state.identity = None;
        state.connection = ConnectionState::Disconnected;
        state.backoff.reset();
        state.router.clear();

        self.listeners()
    }
}
