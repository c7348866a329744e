//! Wire topics and the inbound topic router
//!
//! Device-management traffic lives under two namespaces: the device publishes
//! under `iotdevice-1/` and the controller publishes under `iotdm-1/`.
//! Plain device commands arrive under `iot-2/cmd/`.
//!
//! ```text
//! iotdm-1/response                          → Response
//! iotdm-1/mgmt/initiate/<category>/<verb>   → Action
//! iotdm-1/<anything else>                   → Unrecognized
//! <outside iotdm-1>                         → not classified
//! ```

// Device → controller
pub const MANAGE_TOPIC: &str = "iotdevice-1/mgmt/manage";
pub const UNMANAGE_TOPIC: &str = "iotdevice-1/mgmt/unmanage";
pub const UPDATE_LOCATION_TOPIC: &str = "iotdevice-1/device/update/location";
pub const ADD_LOG_TOPIC: &str = "iotdevice-1/add/diag/log";
pub const CLEAR_LOGS_TOPIC: &str = "iotdevice-1/clear/diag/log";
pub const ADD_ERROR_CODE_TOPIC: &str = "iotdevice-1/add/diag/errorCodes";
pub const CLEAR_ERROR_CODES_TOPIC: &str = "iotdevice-1/clear/diag/errorCodes";
pub const ACK_TOPIC: &str = "iotdevice-1/response";

// Controller → device
pub const DM_NAMESPACE: &str = "iotdm-1";
pub const DM_WILDCARD_TOPIC: &str = "iotdm-1/#";
pub const DM_RESPONSE_TOPIC: &str = "iotdm-1/response";

pub const COMMAND_WILDCARD_TOPIC: &str = "iot-2/cmd/+/fmt/+";

const FIRMWARE_CATEGORY: &str = "firmware";

/// Category and verb of an `iotdm-1/mgmt/initiate/<category>/<verb>` topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTopic<'a> {
    pub category: &'a str,
    pub verb: &'a str,
}

impl ActionTopic<'_> {
    /// Firmware verbs are prefixed so they cannot collide with device verbs
    pub fn action_name(&self) -> String {
        if self.category == FIRMWARE_CATEGORY {
            format!("{}_{}", FIRMWARE_CATEGORY, self.verb)
        } else {
            self.verb.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmTopic<'a> {
    Response,
    Action(ActionTopic<'a>),
    Unrecognized,
}

/// Classifies a topic under the device-management namespace.
///
/// Returns `None` for topics outside `iotdm-1`.
pub fn classify(topic: &str) -> Option<DmTopic<'_>> {
    let mut segments = topic.split('/');
    if segments.next() != Some(DM_NAMESPACE) {
        return None;
    }

    if topic == DM_RESPONSE_TOPIC {
        return Some(DmTopic::Response);
    }

    let rest: Vec<&str> = segments.collect();
    match rest.as_slice() {
        ["mgmt", "initiate", category, verb] if !category.is_empty() && !verb.is_empty() => {
            Some(DmTopic::Action(ActionTopic {
                category: *category,
                verb: *verb,
            }))
        }
        _ => Some(DmTopic::Unrecognized),
    }
}

/// Command name and format of an `iot-2/cmd/<command>/fmt/<format>` topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTopic<'a> {
    pub command: &'a str,
    pub format: &'a str,
}

pub fn parse_command_topic(topic: &str) -> Option<CommandTopic<'_>> {
    let segments: Vec<&str> = topic.split('/').collect();
    match segments.as_slice() {
        ["iot-2", "cmd", command, "fmt", format] if !command.is_empty() && !format.is_empty() => {
            Some(CommandTopic {
                command: *command,
                format: *format,
            })
        }
        _ => None,
    }
}

pub fn event_topic(event_type: &str, format: &str) -> String {
    format!("iot-2/evt/{}/fmt/{}", event_type, format)
}
