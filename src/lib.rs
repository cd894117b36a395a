use std::env;
use std::path::PathBuf;
use futures::channel::mpsc::Receiver;
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use crate::config::io::{get_env_path, load_config};
use crate::config::types::KEY_GPS_DEVICE;
use crate::device::connection::BtleCentral;
use crate::error::AppRunError;
use crate::events::EventSink;
use crate::tracking::coordinator::TrackingCoordinator;
use crate::tracking::types::Command;

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod location;
pub mod tracking;
pub mod upload;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the default location of the `.env` file
    pub env_file: Option<PathBuf>,
    /// Overrides `GPS_DEVICE` from the config file
    pub gps_device: Option<PathBuf>,
    /// Start tracking right away instead of waiting for a command
    pub start: bool,
}

/// Loads the configuration, opens the bluetooth adapter and runs the tracking coordinator
/// until `cancel` fires or `commands` closes.
pub async fn run(
    options: RunOptions,
    sink: EventSink,
    commands: Receiver<Command>,
    cancel: CancellationToken,
) -> Result<(), AppRunError> {
    let env_path = get_env_path(options.env_file.as_deref())?;
    info!("Loading config from {}", env_path.to_string_lossy());

    let mut config = load_config(&env_path).await?;
    if let Some(gps_device) = &options.gps_device {
        config.set(KEY_GPS_DEVICE, &gps_device.to_string_lossy());
    }
    let settings = config.settings()?;
    info!(
        "Session {} uploading to {} every {:?}",
        settings.upload.session_id,
        settings.upload.space_url,
        settings.upload.interval,
    );

    let (central, mut ble_events) = BtleCentral::new(cancel.child_token()).await?;
    let mut coordinator = TrackingCoordinator::new(settings, central, sink, cancel)?;

    // the initial radio state is already queued
    while let Ok(Some(event)) = ble_events.try_next() {
        coordinator.handle_ble_event(event);
    }

    if options.start {
        if let Err(err) = coordinator.start() {
            warn!("Failed to start tracking: {}", err);
        }
    }

    coordinator.run(ble_events, commands).await;
    Ok(())
}
