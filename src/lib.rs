//! Hono Device - Rust Implementation
//!
//! A device-side client for the MQTT protocol adapter of Eclipse Hono.
//!
//! # Overview
//!
//! This crate provides:
//! - Command topic parsing, including property bags and the authenticated and
//!   unauthenticated topic forms
//! - Response topic encoding for request/response commands
//! - A device session with automatic reconnect and an ordered command queue
//! - Telemetry, event and command response publishing over MQTT v5
//!
//! # Quick Start
//!
//! ```rust
//! use hono_device::protocol::{encode_response_topic, parse_command_topic};
//!
//! let command = parse_command_topic("command///q/1010f8ab0b53-bd96-4d99-9d9c-1234/setBrightness?unit=pct");
//! assert_eq!(command.name(), "setBrightness");
//! assert_eq!(command.request_id.as_deref(), Some("1010f8ab0b53-bd96-4d99-9d9c-1234"));
//! assert_eq!(command.property("unit"), Some("pct"));
//!
//! let topic = encode_response_topic("DEFAULT_TENANT", "4711", "1010f8ab0b53-bd96-4d99-9d9c-1234", 200, true);
//! assert_eq!(topic, "command///res/1010f8ab0b53-bd96-4d99-9d9c-1234/200");
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DeviceConfig};
pub use error::{DeviceError, DeviceResult};
pub use protocol::*;
pub use session::{ConnectionState, DeviceSession, SessionError, SessionSettings};
pub use transport::mqtt::MqttTransport;
pub use transport::{Transport, TransportError};
