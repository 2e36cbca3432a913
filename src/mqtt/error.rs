//! Error definitions for the broker transport

use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a connection attempt.
///
/// Everything after the handshake (publish, subscribe, unsubscribe) is
/// fire-and-forget and only logged, so this enum only describes why a
/// session could not be established.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker answered the CONNECT with a refusal code
    #[error("Connection refused by broker: {0}")]
    Refused(String),

    /// No CONNACK within the configured connect timeout
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// DNS, TLS, WebSocket upgrade or socket failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The options could not be turned into a broker request
    #[error("Invalid connect options: {0}")]
    InvalidOptions(String),

    /// The event loop ended before the handshake completed
    #[error("Event loop closed during handshake")]
    Closed,
}
