use crate::config::{DeviceConfig, TOKEN_AUTH_USERNAME};
use std::time::Duration;

/// Broker connection settings derived from the device configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub tls: bool,
    pub channel_capacity: usize,
}

impl From<&DeviceConfig> for MqttConfig {
    fn from(config: &DeviceConfig) -> Self {
        MqttConfig {
            client_id: config.client_id(),
            host: config.host(),
            port: config.port(),
            username: TOKEN_AUTH_USERNAME.to_string(),
            password: config.auth_token.clone(),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            tls: config.tls,
            channel_capacity: config.channel_capacity,
        }
    }
}
