//! # MQTT Integration Module
//!
//! Everything between the supervisor and the broker.
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Broker and topic settings
//! ├── error.rs         - Transport error type
//! ├── mqtt_handler.rs  - rumqttc link, typestate from configured to live
//! ├── router.rs        - Inbound payload parsing and handler dispatch
//! ├── topics.rs        - Channel to wire-topic table
//! └── transport.rs     - Connector/Link seam the supervisor is generic over
//! ```
//!
//! The supervisor never touches rumqttc directly. It talks to a
//! [`transport::Connector`], so tests can swap in an in-memory broker.

pub mod config;
pub mod error;
pub mod mqtt_handler;
pub mod router;
pub mod topics;
pub mod transport;
