//! # MQTT Transport
//!
//! Broker connection for the managed device, built on rumqttc.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings derived from the device config
//! ├── message_manager.rs  - Inbound message and link event types
//! ├── transport.rs        - Transport trait and the rumqttc implementation
//! └── mqtt_handler.rs     - Link state machine polling the event loop
//! ```
//!
//! The link task owns the rumqttc `EventLoop`; the protocol engine only sees
//! the [`transport::Transport`] trait, which keeps it testable without a broker.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod transport;
