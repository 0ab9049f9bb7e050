//! Pure connection configuration for the MQTT transport
//!
//! This module contains pure functions for broker address parsing, device
//! credentials and MQTT options, plus the link state the poll task reports.

use crate::config::{DeviceSection, MqttSection};
use crate::transport::TransportError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Link state reported by the poll task of the current connection
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// No connection attempt yet
    Idle,
    /// Waiting for CONNACK
    Connecting,
    /// CONNACK received
    Connected,
    /// Link ended with reason
    Closed(String),
}

/// Parsed broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Pure function to parse `mqtt://host[:port]` / `mqtts://host[:port]`
pub fn parse_broker_address(broker_url: &str) -> Result<BrokerAddress, TransportError> {
    let url = Url::parse(broker_url)
        .map_err(|_| TransportError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtts" => true,
        "mqtt" => false,
        _ => return Err(TransportError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Hono's MQTT adapter expects `<device-id>@<tenant-id>` as user name
pub fn device_username(device: &DeviceSection) -> String {
    format!("{}@{}", device.device_id, device.tenant_id)
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(
    device: &DeviceSection,
    mqtt: &MqttSection,
    password: Option<&str>,
) -> Result<MqttOptions, TransportError> {
    let address = parse_broker_address(&mqtt.broker_url)?;

    let mut mqtt_options = MqttOptions::new(&device.device_id, address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(password) = password {
        mqtt_options.set_credentials(device_username(device), password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    #[test]
    fn test_parse_plain_broker_default_port() {
        let address = parse_broker_address("mqtt://localhost").unwrap();
        assert_eq!(address.host, "localhost");
        assert_eq!(address.port, 1883);
        assert!(!address.tls);
    }

    #[test]
    fn test_parse_tls_broker_default_port() {
        let address = parse_broker_address("mqtts://hono.example.org").unwrap();
        assert_eq!(address.host, "hono.example.org");
        assert_eq!(address.port, 8883);
        assert!(address.tls);
    }

    #[test]
    fn test_parse_explicit_port() {
        let address = parse_broker_address("mqtt://10.0.0.5:31883").unwrap();
        assert_eq!(address.host, "10.0.0.5");
        assert_eq!(address.port, 31883);
    }

    #[test]
    fn test_invalid_broker_url() {
        assert!(matches!(
            parse_broker_address("invalid-url"),
            Err(TransportError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            parse_broker_address("http://localhost:1883"),
            Err(TransportError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_device_username() {
        let config = DeviceConfig::test_config();
        assert_eq!(device_username(&config.device), "4711@DEFAULT_TENANT");
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = DeviceConfig::test_config();

        let options = configure_mqtt_options(&config.device, &config.mqtt, None);
        assert!(options.is_ok());

        let options =
            configure_mqtt_options(&config.device, &config.mqtt, Some("hono-secret")).unwrap();
        assert_eq!(options.client_id(), "4711");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_configure_mqtt_options_rejects_bad_url() {
        let mut config = DeviceConfig::test_config();
        config.mqtt.broker_url = "not a url".to_string();
        assert!(configure_mqtt_options(&config.device, &config.mqtt, None).is_err());
    }
}
