// In-memory broker standing in for the rumqttc transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use fertigation_link::mqtt::error::TransportError;
use fertigation_link::mqtt::transport::{
    ConnectOptions, Connection, Connector, Link, TransportEvent, EVENT_CHANNEL_CAPACITY,
};
use fertigation_link::session::StaticSession;
use fertigation_link::supervisor::backoff::ReconnectPolicy;
use fertigation_link::supervisor::{ConnectionSupervisor, SupervisorSettings};

pub type TestSupervisor = ConnectionSupervisor<FakeConnector, Arc<StaticSession>>;

// ── Broker ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Accept,
    Refuse,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub options: ConnectOptions,
    pub at: Instant,
}

pub struct BrokerSession {
    pub options: ConnectOptions,
    live: AtomicBool,
    disconnects: AtomicUsize,
    publishes: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscriptions: Mutex<Vec<String>>,
    events: mpsc::Sender<TransportEvent>,
}

impl BrokerSession {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> Vec<Published> {
        self.publishes.lock().unwrap().clone()
    }

    pub fn publishes_to(&self, topic: &str) -> Vec<Published> {
        self.publishes()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().unwrap().clone()
    }

    /// Simulates the broker dropping the connection.
    pub fn drop_connection(&self) {
        self.live.store(false, Ordering::SeqCst);
        // The supervisor may already have stopped listening
        let _ = self.events.try_send(TransportEvent::Closed);
    }

    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.events
            .try_send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            })
            .unwrap();
    }
}

#[derive(Default)]
struct BrokerState {
    script: VecDeque<Outcome>,
    latency: Duration,
    attempts: Vec<Attempt>,
    sessions: Vec<Arc<BrokerSession>>,
}

#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every handshake takes `latency` before it resolves.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let broker = Self::default();
        broker.state.lock().unwrap().latency = latency;
        Arc::new(broker)
    }

    /// Outcomes for the next handshakes, in order. Unscripted ones succeed.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.state.lock().unwrap().script.extend(outcomes);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    pub fn session(&self, index: usize) -> Arc<BrokerSession> {
        self.state.lock().unwrap().sessions[index].clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn latest(&self) -> Arc<BrokerSession> {
        self.state.lock().unwrap().sessions.last().unwrap().clone()
    }

    async fn handshake(
        &self,
        options: ConnectOptions,
    ) -> Result<Connection<FakeLink>, TransportError> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push(Attempt {
                options: options.clone(),
                at: Instant::now(),
            });
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        match state.script.pop_front().unwrap_or(Outcome::Accept) {
            Outcome::Refuse => Err(TransportError::Refused("NotAuthorized".to_string())),
            Outcome::Invalid => Err(TransportError::InvalidOptions("bad client id".to_string())),
            Outcome::Accept => {
                let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
                let session = Arc::new(BrokerSession {
                    options,
                    live: AtomicBool::new(true),
                    disconnects: AtomicUsize::new(0),
                    publishes: Mutex::new(Vec::new()),
                    subscriptions: Mutex::new(Vec::new()),
                    unsubscriptions: Mutex::new(Vec::new()),
                    events: events_tx,
                });
                state.sessions.push(session.clone());
                Ok(Connection {
                    link: FakeLink(session),
                    events: events_rx,
                })
            }
        }
    }
}

// ── Transport seam ──────────────────────────────────────────────────

pub struct FakeLink(Arc<BrokerSession>);

impl Link for FakeLink {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        if !self.0.is_live() {
            return false;
        }
        self.0.publishes.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload,
            retain,
        });
        true
    }

    fn subscribe(&self, topic: &str) {
        self.0.subscriptions.lock().unwrap().push(topic.to_string());
    }

    fn unsubscribe(&self, topic: &str) {
        self.0.unsubscriptions.lock().unwrap().push(topic.to_string());
    }

    fn disconnect(&self, _force: bool) {
        self.0.live.store(false, Ordering::SeqCst);
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.0.is_live()
    }
}

#[derive(Clone)]
pub struct FakeConnector(pub Arc<FakeBroker>);

impl Connector for FakeConnector {
    type Link = FakeLink;

    fn connect(
        &self,
        options: ConnectOptions,
    ) -> impl Future<Output = Result<Connection<FakeLink>, TransportError>> + Send {
        let broker = self.0.clone();
        async move { broker.handshake(options).await }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

pub fn settings() -> SupervisorSettings {
    SupervisorSettings {
        reconnect: ReconnectPolicy {
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 5,
            cooldown_ms: 30_000,
        },
        heartbeat_interval: Duration::from_secs(30),
        ..SupervisorSettings::default()
    }
}

pub fn supervisor(broker: &Arc<FakeBroker>, session: &Arc<StaticSession>) -> TestSupervisor {
    ConnectionSupervisor::new(FakeConnector(broker.clone()), session.clone(), settings())
}

/// Records every status notification a listener receives.
pub fn record_status(supervisor: &TestSupervisor) -> Arc<Mutex<Vec<bool>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    supervisor.on_connection_change(move |connected: bool| {
        sink.lock().unwrap().push(connected);
    });
    seen
}

/// Lets spawned tasks run without moving the paused clock far.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
