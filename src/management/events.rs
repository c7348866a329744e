use super::envelope::{CorrelationId, ResultCode};
use super::error::ManagementError;
use super::request::RequestKind;

/// Notifications delivered to the application
#[derive(Debug)]
pub enum DeviceEvent {
    /// The controller answered a device-initiated request
    Response {
        correlation_id: CorrelationId,
        result_code: ResultCode,
        kind: RequestKind,
    },

    /// The controller asks the device to perform an action; answer with
    /// `respond_to_action`
    ActionRequested {
        correlation_id: CorrelationId,
        action: String,
    },

    /// Plain device command on `iot-2/cmd/<command>/fmt/<format>`
    Command {
        command: String,
        format: String,
        payload: Vec<u8>,
    },

    /// A pending request outlived the configured timeout and was dropped
    RequestExpired {
        correlation_id: CorrelationId,
        kind: RequestKind,
    },

    /// An inbound message broke the protocol contract and was dropped
    ProtocolViolation {
        topic: String,
        error: ManagementError,
    },
}
