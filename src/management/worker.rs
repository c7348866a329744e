//! Device worker: the single task that owns the protocol engine
//!
//! Application calls reach the worker as [`DeviceRequest`]s with a oneshot
//! reply channel; link events arrive on a second channel. The worker handles
//! one item at a time, which is what keeps the correlation tables consistent
//! without locks.
//!
//! Events the application has not picked up yet wait in a backlog. The worker
//! keeps answering requests while the backlog drains, so an application may
//! call back into the handle from its event loop. Only link intake pauses
//! once the backlog reaches the event channel's capacity.
//!
//! ```text
//! ManagedDevice ─[DeviceRequest]─┐
//!                                ├─► worker (ProtocolEngine) ─[DeviceEvent]─► application
//! MqttLink ─────[LinkEvent]──────┘
//! ```

use super::engine::ProtocolEngine;
use super::envelope::{AckDecision, CorrelationId};
use super::error::ManagementError;
use super::events::DeviceEvent;
use super::request::ManagementRequest;
use crate::config::DeviceConfig;
use crate::mqtt::config::MqttConfig;
use crate::mqtt::message_manager::LinkEvent;
use crate::mqtt::mqtt_handler::{LinkStatus, MqttLink};
use crate::mqtt::transport::Transport;
use rumqttc::QoS;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

type Reply<T> = oneshot::Sender<Result<T, ManagementError>>;

#[derive(Debug)]
pub enum DeviceRequest {
    Submit {
        request: ManagementRequest,
        response_tx: Reply<CorrelationId>,
    },
    RespondToAction {
        correlation_id: CorrelationId,
        decision: AckDecision,
        response_tx: Reply<()>,
    },
    PublishEvent {
        event_type: String,
        format: String,
        payload: Vec<u8>,
        qos: QoS,
        response_tx: Reply<()>,
    },
}

/// Cloneable handle to a running device worker
#[derive(Clone, Debug)]
pub struct ManagedDevice {
    tx: mpsc::Sender<DeviceRequest>,
}

/// Everything `ManagedDevice::connect` starts
pub struct DeviceSession {
    pub device: ManagedDevice,
    pub events: mpsc::Receiver<DeviceEvent>,
    pub status: watch::Receiver<LinkStatus>,
    pub worker: JoinHandle<()>,
    pub link: JoinHandle<()>,
}

impl ManagedDevice {
    /// Builds the MQTT link and the engine from `config` and starts both tasks
    pub fn connect(config: &DeviceConfig, shutdown: CancellationToken) -> DeviceSession {
        let mqtt_config = MqttConfig::from(config);
        let capacity = config.channel_capacity;

        let (link_tx, link_rx) = mpsc::channel(capacity);
        let (event_tx, events) = mpsc::channel(capacity);

        let link = MqttLink::create(&mqtt_config, link_tx);
        let engine =
            ProtocolEngine::new(link.transport()).with_request_timeout(config.request_timeout());
        let status = link.subscribe_status();

        let link_shutdown = shutdown.clone();
        let link = link.start();
        let link = tokio::spawn(async move { link.run(link_shutdown).await });

        let (device, worker) = Self::spawn(engine, link_rx, event_tx, capacity, shutdown);

        DeviceSession {
            device,
            events,
            status,
            worker,
            link,
        }
    }

    pub fn spawn<T: Transport>(
        engine: ProtocolEngine<T>,
        link_rx: mpsc::Receiver<LinkEvent>,
        event_tx: mpsc::Sender<DeviceEvent>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run_worker(engine, link_rx, rx, event_tx, shutdown));
        (Self { tx }, handle)
    }

    pub async fn manage(
        &self,
        lifetime: Option<u64>,
        supports_device_actions: Option<bool>,
        supports_firmware_actions: Option<bool>,
    ) -> Result<CorrelationId, ManagementError> {
        let request = ManagementRequest::manage(
            lifetime,
            supports_device_actions,
            supports_firmware_actions,
        )?;
        self.submit(request).await
    }

    pub async fn unmanage(&self) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::Unmanage).await
    }

    pub async fn update_location(
        &self,
        longitude: f64,
        latitude: f64,
        elevation: Option<f64>,
        accuracy: Option<f64>,
    ) -> Result<CorrelationId, ManagementError> {
        let request =
            ManagementRequest::update_location(longitude, latitude, elevation, accuracy)?;
        self.submit(request).await
    }

    pub async fn add_error_code(&self, error_code: i64) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::add_error_code(error_code))
            .await
    }

    pub async fn clear_error_codes(&self) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::ClearErrorCodes).await
    }

    pub async fn add_log(
        &self,
        message: impl Into<String>,
        severity: u8,
        data: Option<String>,
    ) -> Result<CorrelationId, ManagementError> {
        let request = ManagementRequest::add_log(message, severity, data)?;
        self.submit(request).await
    }

    pub async fn clear_logs(&self) -> Result<CorrelationId, ManagementError> {
        self.submit(ManagementRequest::ClearLogs).await
    }

    pub async fn submit(&self, request: ManagementRequest) -> Result<CorrelationId, ManagementError> {
        self.call(|response_tx| DeviceRequest::Submit {
            request,
            response_tx,
        })
        .await
    }

    pub async fn respond_to_action(
        &self,
        correlation_id: CorrelationId,
        accept: bool,
    ) -> Result<(), ManagementError> {
        self.call(|response_tx| DeviceRequest::RespondToAction {
            correlation_id,
            decision: AckDecision::from(accept),
            response_tx,
        })
        .await
    }

    pub async fn publish_event(
        &self,
        event_type: impl Into<String>,
        format: impl Into<String>,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), ManagementError> {
        let event_type = event_type.into();
        let format = format.into();
        self.call(|response_tx| DeviceRequest::PublishEvent {
            event_type,
            format,
            payload,
            qos,
            response_tx,
        })
        .await
    }

    async fn call<R>(
        &self,
        build: impl FnOnce(Reply<R>) -> DeviceRequest,
    ) -> Result<R, ManagementError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(build(response_tx))
            .await
            .map_err(|_| ManagementError::ChannelClosed("device worker stopped".to_string()))?;
        response_rx
            .await
            .map_err(|_| ManagementError::ChannelClosed("device worker dropped reply".to_string()))?
    }
}

async fn run_worker<T: Transport>(
    mut engine: ProtocolEngine<T>,
    mut link_rx: mpsc::Receiver<LinkEvent>,
    mut request_rx: mpsc::Receiver<DeviceRequest>,
    event_tx: mpsc::Sender<DeviceEvent>,
    shutdown: CancellationToken,
) {
    let sweep_every = engine
        .request_timeout()
        .map(|timeout| (timeout / 4).max(MIN_SWEEP_INTERVAL));
    let mut sweep = tokio::time::interval(sweep_every.unwrap_or(MIN_SWEEP_INTERVAL));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let backlog_limit = event_tx.max_capacity();
    let mut backlog: VecDeque<DeviceEvent> = VecDeque::new();

    info!("Device worker started");
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Device worker shutting down");
                break;
            }
            permit = event_tx.reserve(), if !backlog.is_empty() => {
                match permit {
                    Ok(permit) => {
                        if let Some(event) = backlog.pop_front() {
                            permit.send(event);
                        }
                    }
                    Err(_) => {
                        warn!("Application stopped listening, dropping {} events", backlog.len());
                        backlog.clear();
                    }
                }
            }
            Some(link_event) = link_rx.recv(), if backlog.len() < backlog_limit => {
                on_link_event(&mut engine, link_event, &event_tx, &mut backlog);
            }
            Some(request) = request_rx.recv() => {
                on_request(&mut engine, request);
            }
            _ = sweep.tick(), if sweep_every.is_some() => {
                for event in engine.expire_pending(Instant::now()) {
                    notify(&event_tx, &mut backlog, event);
                }
            }
            else => {
                debug!("All device worker inputs closed");
                break;
            }
        }
    }

    let pending = engine.outbound().len();
    if pending > 0 {
        warn!("Device worker stopped with {} unanswered requests", pending);
    }
}

fn on_link_event<T: Transport>(
    engine: &mut ProtocolEngine<T>,
    link_event: LinkEvent,
    event_tx: &mpsc::Sender<DeviceEvent>,
    backlog: &mut VecDeque<DeviceEvent>,
) {
    match link_event {
        LinkEvent::Connected => {
            if let Err(e) = engine.on_connected() {
                error!("Failed to subscribe to management topics: {}", e);
            }
        }
        LinkEvent::Disconnected => {
            info!(
                "Link lost with {} requests and {} actions pending",
                engine.outbound().len(),
                engine.inbound().len()
            );
        }
        LinkEvent::Message(message) => {
            if let Some(event) = engine.on_message(&message.topic, &message.payload) {
                notify(event_tx, backlog, event);
            }
        }
    }
}

fn on_request<T: Transport>(engine: &mut ProtocolEngine<T>, request: DeviceRequest) {
    match request {
        DeviceRequest::Submit {
            request,
            response_tx,
        } => reply(response_tx, engine.submit(request)),
        DeviceRequest::RespondToAction {
            correlation_id,
            decision,
            response_tx,
        } => reply(
            response_tx,
            engine.respond_to_action(&correlation_id, decision),
        ),
        DeviceRequest::PublishEvent {
            event_type,
            format,
            payload,
            qos,
            response_tx,
        } => reply(
            response_tx,
            engine.publish_event(&event_type, &format, payload, qos),
        ),
    }
}

fn reply<T>(response_tx: Reply<T>, result: Result<T, ManagementError>) {
    if response_tx.send(result).is_err() {
        error!("Failed to send response");
    }
}

/// Hands the event over without waiting; keeps order behind older events
fn notify(
    event_tx: &mpsc::Sender<DeviceEvent>,
    backlog: &mut VecDeque<DeviceEvent>,
    event: DeviceEvent,
) {
    if !backlog.is_empty() {
        backlog.push_back(event);
        return;
    }
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => backlog.push_back(event),
        Err(TrySendError::Closed(event)) => {
            warn!("Application stopped listening, dropping {:?}", event)
        }
    }
}
