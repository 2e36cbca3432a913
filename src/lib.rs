//! Device link of the fertigation dashboard.
//!
//! A [`supervisor::ConnectionSupervisor`] keeps one authenticated MQTT
//! session alive over secure WebSocket, re-subscribes after drops, and
//! reports connection status. [`commands::CommandPublisher`] sends relay
//! switches and irrigation plans to the field controller.

pub mod commands;
pub mod config;
pub mod irrigation;
pub mod mqtt;
pub mod persistence;
pub mod session;
pub mod supervisor;
