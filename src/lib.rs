//! Managed device client for the device-management protocol over MQTT.
//!
//! - [`management`] correlates device requests with controller responses and
//!   surfaces controller actions for acknowledgment
//! - [`mqtt`] connects to the broker and feeds inbound messages to the engine
//! - [`config`] loads the device identity and connection settings

pub mod config;
pub mod management;
pub mod mqtt;
