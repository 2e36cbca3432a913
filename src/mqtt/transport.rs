//! Transport seam between the supervisor and a concrete broker client.
//!
//! A [`Connector`] performs exactly one handshake per call and hands back a
//! live [`Link`] together with the receiving end of its event stream. Links
//! never reconnect on their own: once the stream yields [`TransportEvent::Closed`]
//! the link is dead and retry timing is the supervisor's business.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use super::error::TransportError;

/// Capacity of the per-session event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Raw lifecycle and data events emitted by a live link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Error(String),
    Closed,
    /// Only emitted by transports that retry internally; informational.
    Reconnecting(u32),
    Message { topic: String, payload: Vec<u8> },
}

/// Message the broker publishes on our behalf if we vanish without a clean close.
///
/// Always delivered at QoS 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Where to connect: `wss://<host>:<port><path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("wss://{}:{}{}", self.host, self.port, path)
    }
}

/// Everything a single handshake needs.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub endpoint: Endpoint,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub clean_session: bool,
    pub last_will: Option<LastWill>,
}

/// A freshly established session.
pub struct Connection<L> {
    pub link: L,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Establishes sessions against the broker.
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    /// Resolves once the broker acknowledged the session, or fails.
    fn connect(
        &self,
        options: ConnectOptions,
    ) -> impl Future<Output = Result<Connection<Self::Link>, TransportError>> + Send;
}

/// Handle to one live broker session.
///
/// All operations return immediately. Delivery failures are logged by the
/// implementation and never raised to the caller.
pub trait Link: Send + Sync + 'static {
    /// Enqueues a payload; `false` if the session is no longer live.
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool;

    fn subscribe(&self, topic: &str);

    fn unsubscribe(&self, topic: &str);

    /// Ends the session. `force` skips waiting for in-flight traffic.
    fn disconnect(&self, force: bool);

    fn is_live(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_uses_secure_websocket() {
        let endpoint = Endpoint {
            host: "broker.local".to_string(),
            port: 8884,
            path: "mqtt".to_string(),
        };
        assert_eq!(endpoint.url(), "wss://broker.local:8884/mqtt");

        let endpoint = Endpoint {
            path: "/mqtt".to_string(),
            ..endpoint
        };
        assert_eq!(endpoint.url(), "wss://broker.local:8884/mqtt");
    }
}
