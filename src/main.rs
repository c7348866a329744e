use color_eyre::{eyre::eyre, Result};
use managed_device::config::DeviceConfig;
use managed_device::management::{DeviceEvent, DeviceSession, ManagedDevice};
use managed_device::mqtt::mqtt_handler::ConnectionState;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(DeviceConfig::default_path);
    let config = DeviceConfig::load(&path).await?;

    let shutdown = CancellationToken::new();
    let DeviceSession {
        device,
        mut events,
        mut status,
        worker,
        link,
    } = ManagedDevice::connect(&config, shutdown.clone());

    tokio::select! {
        connected = status.wait_for(|s| s.connection_state == ConnectionState::Connected) => {
            connected.map_err(|e| eyre!("MQTT link stopped before connecting: {}", e))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before the broker accepted the connection");
            shutdown.cancel();
            let _ = tokio::join!(worker, link);
            return Ok(());
        }
    }

    let manage_id = device
        .manage(None, Some(!config.actions.accept.is_empty()), None)
        .await
        .map_err(|e| eyre!("Failed to send manage request: {}", e))?;
    info!("Manage request {} sent", manage_id);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Device worker stopped");
                    break;
                };
                on_event(&device, &config, event).await;
            }
        }
    }

    match device.unmanage().await {
        Ok(id) => info!("Unmanage request {} sent", id),
        Err(e) => warn!("Failed to send unmanage request: {}", e),
    }

    shutdown.cancel();
    let (worker, link) = tokio::join!(worker, link);
    worker?;
    link?;
    Ok(())
}

async fn on_event(device: &ManagedDevice, config: &DeviceConfig, event: DeviceEvent) {
    match event {
        DeviceEvent::Response {
            correlation_id,
            result_code,
            kind,
        } => {
            if result_code.is_success() {
                info!("{} request {} succeeded", kind, correlation_id);
            } else {
                warn!(
                    "{} request {} failed with {}",
                    kind, correlation_id, result_code
                );
            }
        }
        DeviceEvent::ActionRequested {
            correlation_id,
            action,
        } => {
            let accept = config.actions.accepts(&action);
            info!(
                "Controller requested {} ({}), {}",
                action,
                correlation_id,
                if accept { "accepting" } else { "rejecting" }
            );
            if let Err(e) = device.respond_to_action(correlation_id, accept).await {
                error!("Failed to acknowledge {}: {}", action, e);
            }
        }
        DeviceEvent::Command {
            command,
            format,
            payload,
        } => {
            info!(
                "Command {} ({}): {}",
                command,
                format,
                String::from_utf8_lossy(&payload)
            );
        }
        DeviceEvent::RequestExpired {
            correlation_id,
            kind,
        } => {
            warn!("{} request {} expired without response", kind, correlation_id);
        }
        DeviceEvent::ProtocolViolation { topic, error } => {
            warn!("Dropped message on {}: {}", topic, error);
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
