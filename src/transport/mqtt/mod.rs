//! MQTT transport for the Hono MQTT protocol adapter
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Broker address parsing, credentials and MQTT options
//! - [`message_handler`] - Pure event routing and publish property shaping
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use hono_device::config::DeviceConfig;
//! use hono_device::transport::mqtt::MqttTransport;
//! use hono_device::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::parse(r#"
//! [device]
//! tenant_id = "DEFAULT_TENANT"
//! device_id = "4711"
//!
//! [mqtt]
//! broker_url = "mqtt://localhost:1883"
//! "#)?;
//!
//! let transport = MqttTransport::from_config(&config)?;
//! transport.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, parse_broker_address, BrokerAddress, LinkState};
pub use message_handler::{EventRoute, MessageHandler};
