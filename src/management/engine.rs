//! Protocol engine for the device-management exchange
//!
//! Orchestrates both request directions over one message stream:
//!
//! ```text
//! outbound   app call ──► encode ──► OutboundTable ──► publish
//!            iotdm-1/response ──► decode ──► resolve ──► DeviceEvent::Response
//!
//! inbound    iotdm-1/mgmt/initiate/.. ──► decode ──► InboundTable ──► DeviceEvent::ActionRequested
//!            respond_to_action ──► take_for_ack ──► publish ack
//! ```
//!
//! The engine is not thread-safe and does not need to be: the device worker
//! owns it and feeds it inbound messages and application calls one at a time.
//!
//! # Request lifecycle
//!
//! ```text
//! outbound: Pending ──► Resolved (200) | Resolved (other rc) ──► removed
//! inbound:  Announced ──► Acknowledged (202 | 500) ──► removed
//! ```
//!
//! Pending entries never expire unless a request timeout is configured, in
//! which case [`ProtocolEngine::expire_pending`] drops them. Nothing is ever
//! re-sent.
//!
//! Messages on `iotdm-1` topics other than the response and action shapes
//! (observe, cancel, ...) are still registered inbound but never announced.
//! Without a request timeout they stay in the inbound table until the
//! application acknowledges the id some other way; with one, the sweep drops
//! them. Announced actions never expire.

use super::correlation::{InboundActionRequest, InboundTable, OutboundRequest, OutboundTable};
use super::envelope::{self, AckDecision, CorrelationId};
use super::error::ManagementError;
use super::events::DeviceEvent;
use super::request::ManagementRequest;
use super::topics::{self, DmTopic};
use crate::mqtt::transport::Transport;
use rumqttc::QoS;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// QoS used for every management publish and the management subscription
pub const MANAGEMENT_QOS: QoS = QoS::AtLeastOnce;
pub const COMMAND_QOS: QoS = QoS::ExactlyOnce;

pub struct ProtocolEngine<T: Transport> {
    transport: T,
    outbound: OutboundTable,
    inbound: InboundTable,
    request_timeout: Option<Duration>,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            outbound: OutboundTable::new(),
            inbound: InboundTable::new(),
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn outbound(&self) -> &OutboundTable {
        &self.outbound
    }

    pub fn inbound(&self) -> &InboundTable {
        &self.inbound
    }

    /// Subscribes to the management namespace and to device commands.
    /// Called on every (re)connect.
    pub fn on_connected(&mut self) -> Result<(), ManagementError> {
        info!("Subscribing to {} and {}", topics::DM_WILDCARD_TOPIC, topics::COMMAND_WILDCARD_TOPIC);
        self.transport
            .subscribe(topics::DM_WILDCARD_TOPIC, MANAGEMENT_QOS)?;
        self.transport
            .subscribe(topics::COMMAND_WILDCARD_TOPIC, COMMAND_QOS)?;
        Ok(())
    }

    pub fn manage(
        &mut self,
        lifetime: Option<u64>,
        supports_device_actions: Option<bool>,
        supports_firmware_actions: Option<bool>,
    ) -> Result<CorrelationId, ManagementError> {
        self.ensure_connected()?;
        let request = ManagementRequest::manage(
            lifetime,
            supports_device_actions,
            supports_firmware_actions,
        )?;
        self.send(request)
    }

    pub fn unmanage(&mut self) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::Unmanage)
    }

    pub fn update_location(
        &mut self,
        longitude: f64,
        latitude: f64,
        elevation: Option<f64>,
        accuracy: Option<f64>,
    ) -> Result<CorrelationId, ManagementError> {
        self.ensure_connected()?;
        let request =
            ManagementRequest::update_location(longitude, latitude, elevation, accuracy)?;
        self.send(request)
    }

    pub fn add_error_code(&mut self, error_code: i64) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::add_error_code(error_code))
    }

    pub fn clear_error_codes(&mut self) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::ClearErrorCodes)
    }

    pub fn add_log(
        &mut self,
        message: &str,
        severity: u8,
        data: Option<String>,
    ) -> Result<CorrelationId, ManagementError> {
        self.ensure_connected()?;
        let request = ManagementRequest::add_log(message, severity, data)?;
        self.send(request)
    }

    pub fn clear_logs(&mut self) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::ClearLogs)
    }

    /// Registers and publishes an already validated request
    pub fn submit(&mut self, request: ManagementRequest) -> Result<CorrelationId, ManagementError> {
        self.ensure_connected()?;
        self.send(request)
    }

    /// Publishes the accept (202) or reject (500) acknowledgment for a
    /// pending action and forgets it
    pub fn respond_to_action(
        &mut self,
        correlation_id: &CorrelationId,
        decision: AckDecision,
    ) -> Result<(), ManagementError> {
        self.ensure_connected()?;
        let payload = envelope::encode_ack(correlation_id, decision)?;
        let request = self.inbound.take_for_ack(correlation_id)?;

        info!(
            "Publishing device action response with payload : {}",
            String::from_utf8_lossy(&payload)
        );
        if let Err(e) = self
            .transport
            .publish(topics::ACK_TOPIC, payload, MANAGEMENT_QOS)
        {
            error!("Failed to publish action response for {}: {}", correlation_id, e);
            self.inbound.register(request);
            return Err(e);
        }
        Ok(())
    }

    /// Fire-and-forget event on `iot-2/evt/<type>/fmt/<format>`
    pub fn publish_event(
        &mut self,
        event_type: &str,
        format: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), ManagementError> {
        self.ensure_connected()?;
        let topic = topics::event_topic(event_type, format);
        debug!("Publishing to topic : {} ({} bytes)", topic, payload.len());
        self.transport.publish(&topic, payload, qos)
    }

    /// Routes one inbound message. Protocol violations come back as
    /// [`DeviceEvent::ProtocolViolation`] rather than as errors.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Option<DeviceEvent> {
        match topics::classify(topic) {
            Some(DmTopic::Response) => Some(self.on_dm_response(topic, payload)),
            Some(dm_topic) => self.on_dm_request(topic, dm_topic, payload),
            None => on_command(topic, payload),
        }
    }

    /// Drops outbound entries older than the request timeout, along with
    /// inbound entries the application was never told about
    pub fn expire_pending(&mut self, now: Instant) -> Vec<DeviceEvent> {
        let Some(timeout) = self.request_timeout else {
            return Vec::new();
        };

        for request in self.inbound.expire_unannounced(now, timeout) {
            debug!(
                "Forgetting unanswered request {} on {}",
                request.correlation_id, request.topic
            );
        }

        self.outbound
            .expire(now, timeout)
            .into_iter()
            .map(|request| {
                warn!(
                    "{} request {} expired without response after {:?}",
                    request.kind, request.correlation_id, timeout
                );
                DeviceEvent::RequestExpired {
                    correlation_id: request.correlation_id,
                    kind: request.kind,
                }
            })
            .collect()
    }

    fn ensure_connected(&self) -> Result<(), ManagementError> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            error!("Client is not connected");
            Err(ManagementError::NotConnected)
        }
    }

    fn send(&mut self, request: ManagementRequest) -> Result<CorrelationId, ManagementError> {
        let kind = request.kind();
        let (correlation_id, payload) = envelope::encode_request(&request)?;
        let text = String::from_utf8_lossy(&payload).into_owned();

        self.outbound.register(OutboundRequest {
            correlation_id: correlation_id.clone(),
            kind,
            payload: text.clone(),
            registered_at: Instant::now(),
        })?;

        info!("Publishing {} request with payload : {}", kind, text);
        if let Err(e) = self.transport.publish(kind.topic(), payload, MANAGEMENT_QOS) {
            error!("Failed to publish {} request: {}", kind, e);
            let _ = self.outbound.resolve(&correlation_id);
            return Err(e);
        }

        Ok(correlation_id)
    }

    fn on_dm_response(&mut self, topic: &str, payload: &[u8]) -> DeviceEvent {
        match self.resolve_response(payload) {
            Ok(event) => event,
            Err(error) => {
                warn!("Dropping response on {}: {}", topic, error);
                DeviceEvent::ProtocolViolation {
                    topic: topic.to_string(),
                    error,
                }
            }
        }
    }

    fn resolve_response(&mut self, payload: &[u8]) -> Result<DeviceEvent, ManagementError> {
        let response = envelope::decode_response(payload)?;
        let request = self.outbound.resolve(&response.correlation_id)?;
        let rc = response.result_code;

        if rc.is_success() {
            info!("[{}] {} action completed : {}", rc, request.kind, request.payload);
        } else {
            error!("[{}] {} action failed : {}", rc, request.kind, request.payload);
        }

        Ok(DeviceEvent::Response {
            correlation_id: response.correlation_id,
            result_code: rc,
            kind: request.kind,
        })
    }

    fn on_dm_request(
        &mut self,
        topic: &str,
        dm_topic: DmTopic<'_>,
        payload: &[u8],
    ) -> Option<DeviceEvent> {
        let action = match envelope::decode_action_request(payload) {
            Ok(action) => action,
            Err(error) => {
                warn!("Dropping device management request on {}: {}", topic, error);
                return Some(DeviceEvent::ProtocolViolation {
                    topic: topic.to_string(),
                    error,
                });
            }
        };

        let correlation_id = action.correlation_id.clone();
        if let Some(previous) = self.inbound.register(InboundActionRequest {
            correlation_id: action.correlation_id,
            topic: topic.to_string(),
            body: action.body,
            announced: matches!(dm_topic, DmTopic::Action(_)),
            registered_at: Instant::now(),
        }) {
            debug!(
                "Request {} replaces unanswered request on {}",
                correlation_id, previous.topic
            );
        }

        match dm_topic {
            DmTopic::Action(action_topic) => {
                let action = action_topic.action_name();
                info!("Device action requested : {} ({})", action, correlation_id);
                Some(DeviceEvent::ActionRequested {
                    correlation_id,
                    action,
                })
            }
            _ => {
                debug!("No dispatch for device management message on {}", topic);
                None
            }
        }
    }
}

fn on_command(topic: &str, payload: &[u8]) -> Option<DeviceEvent> {
    match topics::parse_command_topic(topic) {
        Some(command) => {
            info!("Command received : {} ({})", command.command, command.format);
            Some(DeviceEvent::Command {
                command: command.command.to_string(),
                format: command.format.to_string(),
                payload: payload.to_vec(),
            })
        }
        None => {
            debug!("Ignoring message on unrelated topic {}", topic);
            None
        }
    }
}
