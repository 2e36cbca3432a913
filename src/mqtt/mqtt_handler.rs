//! rumqttc-backed transport over secure WebSocket.
//!
//! Each connect builds a fresh `AsyncClient`/`EventLoop` pair and walks it
//! through a small typestate machine:
//!
//! ```text
//! MqttLink<Configured> ──handshake()──► MqttLink<Live>
//! ```
//!
//! The event loop is polled by a background task that forwards publishes to
//! the session's event channel. It stops polling on the first error or
//! DISCONNECT, which is what keeps rumqttc from reconnecting by itself:
//! retries belong to the supervisor alone.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions,
    NetworkOptions, Outgoing, QoS, Transport,
};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::TransportError;
use super::transport::{
    ConnectOptions, Connection, Connector, Link, TransportEvent, EVENT_CHANNEL_CAPACITY,
};

/// Capacity of rumqttc's outgoing request queue.
const REQUEST_CAPACITY: usize = 100;

/// Lifecycle of a single broker session
#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Configured, // Options validated, nothing on the wire yet
    Live,       // CONNACK received, event loop running
}

#[machine]
pub struct MqttLink<S: LinkState> {
    client_id: String,
    options: ConnectOptions,
    client: Option<AsyncClient>,
    cancel: CancellationToken,
    live: Arc<AtomicBool>,
}

impl<S: LinkState> MqttLink<S> {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl MqttLink<Configured> {
    pub fn create(options: ConnectOptions) -> Self {
        debug!("Configuring broker session for {}", options.client_id);
        Self::new(
            options.client_id.clone(),
            options,
            None,                              // client
            CancellationToken::new(),          // cancel
            Arc::new(AtomicBool::new(false)),  // live
        )
    }

    /// Opens the socket, sends CONNECT and waits for CONNACK.
    ///
    /// On success the event loop is handed to a background task and the
    /// receiving end of its event channel is returned with the live link.
    pub async fn handshake(
        mut self,
    ) -> Result<(MqttLink<Live>, mpsc::Receiver<TransportEvent>), TransportError> {
        let mqtt_options = build_mqtt_options(&self.options)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        eventloop.network_options = build_network_options(&self.options);

        info!(
            "Connecting to {} as {}",
            self.options.endpoint.url(),
            self.client_id
        );

        let timeout = self.options.connect_timeout;
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop, timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Handshake for {} failed: {}", self.client_id, e);
                return Err(e);
            }
            Err(_) => {
                warn!("Handshake for {} timed out", self.client_id);
                return Err(TransportError::Timeout(timeout));
            }
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.live.store(true, Ordering::SeqCst);
        self.client = Some(client);

        tokio::spawn(pump_events(
            eventloop,
            event_tx,
            self.cancel.clone(),
            self.live.clone(),
            self.client_id.clone(),
        ));

        info!("Broker session established for {}", self.client_id);
        let live: MqttLink<Live> = self.transition();
        Ok((live, event_rx))
    }
}

impl Link for MqttLink<Live> {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        let client = match &self.client {
            Some(client) if self.is_live() => client,
            _ => {
                error!("Cannot publish to {}: client not connected", topic);
                return false;
            }
        };

        match client.try_publish(topic, QoS::AtMostOnce, retain, payload) {
            Ok(()) => {
                debug!("Queued publish to {} (retain: {})", topic, retain);
                true
            }
            Err(e) => {
                error!("Failed to publish to {}: {}", topic, e);
                false
            }
        }
    }

    fn subscribe(&self, topic: &str) {
        let Some(client) = &self.client else {
            warn!("Cannot subscribe to {}: no client", topic);
            return;
        };
        match client.try_subscribe(topic, QoS::AtMostOnce) {
            Ok(()) => debug!("Subscribe request queued for {}", topic),
            Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
        }
    }

    fn unsubscribe(&self, topic: &str) {
        let Some(client) = &self.client else {
            warn!("Cannot unsubscribe from {}: no client", topic);
            return;
        };
        match client.try_unsubscribe(topic) {
            Ok(()) => debug!("Unsubscribe request queued for {}", topic),
            Err(e) => error!("Failed to unsubscribe from {}: {}", topic, e),
        }
    }

    fn disconnect(&self, force: bool) {
        info!("Ending broker session for {} (force: {})", self.client_id, force);
        self.live.store(false, Ordering::SeqCst);

        if let Some(client) = &self.client {
            if let Err(e) = client.try_disconnect() {
                debug!("DISCONNECT not queued for {}: {}", self.client_id, e);
            }
        }

        if force {
            self.cancel.cancel();
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Connector that opens one rumqttc session per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl Connector for MqttConnector {
    type Link = MqttLink<Live>;

    fn connect(
        &self,
        options: ConnectOptions,
    ) -> impl Future<Output = Result<Connection<Self::Link>, TransportError>> + Send {
        async move {
            let (link, events) = MqttLink::create(options).handshake().await?;
            Ok(Connection { link, events })
        }
    }
}

fn build_mqtt_options(options: &ConnectOptions) -> Result<MqttOptions, TransportError> {
    if options.client_id.is_empty() || options.client_id.starts_with(' ') {
        return Err(TransportError::InvalidOptions(format!(
            "client id {:?} is not usable",
            options.client_id
        )));
    }
    if !options.keep_alive.is_zero() && options.keep_alive < Duration::from_secs(1) {
        return Err(TransportError::InvalidOptions(
            "keep-alive must be zero or at least one second".to_string(),
        ));
    }

    // rumqttc takes the full URL as host when the transport is a websocket
    let mut mqtt_options = MqttOptions::new(
        options.client_id.clone(),
        options.endpoint.url(),
        options.endpoint.port,
    );
    mqtt_options
        .set_transport(Transport::wss_with_default_config())
        .set_keep_alive(options.keep_alive)
        .set_clean_session(options.clean_session);

    if !options.username.is_empty() {
        mqtt_options.set_credentials(options.username.clone(), options.password.clone());
    }

    if let Some(will) = &options.last_will {
        mqtt_options.set_last_will(rumqttc::LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            QoS::AtLeastOnce,
            will.retain,
        ));
    }

    Ok(mqtt_options)
}

/// rumqttc bounds the socket handshake in whole seconds, so the configured
/// timeout is rounded up to keep it from firing before ours.
fn build_network_options(options: &ConnectOptions) -> NetworkOptions {
    let timeout = options.connect_timeout;
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    let mut network_options = NetworkOptions::new();
    network_options.set_connection_timeout(secs.max(1));
    network_options
}

async fn wait_for_connack(
    eventloop: &mut EventLoop,
    timeout: Duration,
) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(TransportError::Refused(format!("{:?}", ack.code)));
            }
            Ok(event) => debug!("Handshake event: {:?}", event),
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(TransportError::Refused(format!("{:?}", code)));
            }
            Err(ConnectionError::RequestsDone) => return Err(TransportError::Closed),
            Err(ConnectionError::NetworkTimeout) => return Err(TransportError::Timeout(timeout)),
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        }
    }
}

/// Polls the event loop until cancelled, disconnected or errored.
async fn pump_events(
    mut eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    live: Arc<AtomicBool>,
    client_id: String,
) {
    let _ = events.send(TransportEvent::Connected).await;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Event loop for {} cancelled", client_id);
                break;
            }

            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let message = TransportEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                    if events.send(message).await.is_err() {
                        debug!("Event receiver for {} dropped", client_id);
                        break;
                    }
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    debug!("Subscription acknowledged: {:?}", ack.return_codes);
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    info!("Broker closed the session for {}", client_id);
                    break;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT sent for {}", client_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Event loop error for {}: {}", client_id, e);
                    let _ = events.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }
        }
    }

    live.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed).await;
    debug!("Event loop for {} stopped", client_id);
}
