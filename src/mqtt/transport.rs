//! Transport seam between the protocol engine and the MQTT client
//!
//! The engine only ever queues work on the transport: publishes and
//! subscriptions are fire-and-forget from its point of view, delivery
//! guarantees belong to the MQTT client.

use crate::management::ManagementError;
use rumqttc::{AsyncClient, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait Transport: Send + 'static {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ManagementError>;

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ManagementError>;

    fn is_connected(&self) -> bool;
}

/// rumqttc-backed transport. The connected flag is owned by the link task.
#[derive(Clone, Debug)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    pub fn new(client: AsyncClient, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ManagementError> {
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| ManagementError::PublishFailed(e.to_string()))
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ManagementError> {
        self.client
            .try_subscribe(filter, qos)
            .map_err(|e| ManagementError::PublishFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Published {
        pub topic: String,
        pub payload: Vec<u8>,
        pub qos: QoS,
    }

    impl Published {
        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.payload).expect("published payload is JSON")
        }
    }

    /// In-memory transport that records everything the engine queues
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        connected: Arc<AtomicBool>,
        refuse_publish: Arc<AtomicBool>,
        published: Arc<Mutex<Vec<Published>>>,
        subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    }

    impl RecordingTransport {
        pub fn connected() -> Self {
            let transport = Self::default();
            transport.set_connected(true);
            transport
        }

        pub fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::Release);
        }

        pub fn refuse_publishes(&self, refuse: bool) {
            self.refuse_publish.store(refuse, Ordering::Release);
        }

        pub fn published(&self) -> Vec<Published> {
            self.published.lock().unwrap().clone()
        }

        pub fn subscriptions(&self) -> Vec<(String, QoS)> {
            self.subscriptions.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ManagementError> {
            if self.refuse_publish.load(Ordering::Acquire) {
                return Err(ManagementError::PublishFailed("request queue full".to_string()));
            }
            self.published.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload,
                qos,
            });
            Ok(())
        }

        fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ManagementError> {
            self.subscriptions
                .lock()
                .unwrap()
                .push((filter.to_string(), qos));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Acquire)
        }
    }
}
