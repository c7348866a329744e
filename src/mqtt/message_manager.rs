use chrono::NaiveDateTime;
use std::fmt;

/// Inbound publish as handed from the link task to the device worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = String::from_utf8_lossy(&self.payload);
        let preview: String = content.chars().take(40).collect();
        write!(f, "{} - {}: {}", self.timestamp, self.topic, preview)
    }
}

impl MqttMessage {
    pub fn from_topic(topic: String, payload: Vec<u8>) -> Self {
        MqttMessage {
            topic,
            payload,
            timestamp: chrono::Local::now().naive_local(),
        }
    }
}

/// What the link task reports to the device worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Message(MqttMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_truncates_long_payloads() {
        let message = MqttMessage::from_topic("iotdm-1/response".to_string(), vec![b'x'; 100]);
        let rendered = message.to_string();

        assert!(rendered.contains("iotdm-1/response"));
        assert!(rendered.ends_with(&"x".repeat(40)));
        assert!(!rendered.contains(&"x".repeat(41)));
    }

    #[test]
    fn test_display_short_payload() {
        let message = MqttMessage::from_topic("t".to_string(), b"{}".to_vec());
        assert!(message.to_string().ends_with("t: {}"));
    }
}
