//! # Device Management Protocol
//!
//! Client side of the device-management exchange layered on MQTT. The device
//! publishes management requests (manage, unmanage, location, diagnostics)
//! and correlates each with an asynchronous response; at the same time the
//! controller may push action requests (reboot, factory reset, firmware) that
//! the device acknowledges later.
//!
//! ## Module Architecture
//!
//! ```text
//! management/
//! ├── envelope.rs     - reqId / d / rc wire envelope
//! ├── request.rs      - one variant per device-initiated operation
//! ├── topics.rs       - wire topics and inbound topic classification
//! ├── correlation.rs  - outbound and inbound pending tables
//! ├── engine.rs       - protocol engine tying the above together
//! ├── events.rs       - notifications delivered to the application
//! └── worker.rs       - task owning the engine, cloneable handle
//! ```
//!
//! ## Concurrency
//!
//! The engine is a plain `&mut self` state machine. The worker task owns it
//! and serializes inbound messages and application calls, so neither table
//! needs a lock.

pub mod correlation;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
pub mod request;
pub mod topics;
pub mod worker;

pub use engine::ProtocolEngine;
pub use envelope::{AckDecision, CorrelationId, ResultCode};
pub use error::ManagementError;
pub use events::DeviceEvent;
pub use request::{ManagementRequest, RequestKind};
pub use worker::{DeviceRequest, DeviceSession, ManagedDevice};
