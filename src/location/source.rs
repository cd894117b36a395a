use std::path::PathBuf;
use futures::channel::mpsc::Sender;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::LocationError;
use crate::events::{AppEvent, EventSink};
use crate::location::nmea::nmea_reader_task;
use crate::location::types::{AuthorizationStatus, LocationStatus, PositionFix};

/// Where positions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationProvider {
    /// Fixes are pushed in by the caller
    Manual,
    /// An NMEA 0183 stream, such as a serial GPS receiver
    Nmea(PathBuf),
}

/// Keeps the most recent position fix and whether tracking is running.
pub struct LocationSource {
    provider: LocationProvider,
    authorization: AuthorizationStatus,
    is_tracking: bool,
    latest: Option<PositionFix>,
    reader_cancel: Option<CancellationToken>,
    sink: EventSink,
}

impl LocationSource {
    pub fn new(provider: LocationProvider, sink: EventSink) -> Self {
        LocationSource {
            provider,
            authorization: AuthorizationStatus::NotDetermined,
            is_tracking: false,
            latest: None,
            reader_cancel: None,
            sink,
        }
    }

    pub fn authorization(&self) -> AuthorizationStatus {
        self.authorization
    }

    pub fn is_tracking(&self) -> bool {
        self.is_tracking
    }

    pub fn latest(&self) -> Option<&PositionFix> {
        self.latest.as_ref()
    }

    pub fn status(&self) -> LocationStatus {
        LocationStatus {
            authorization: self.authorization,
            is_tracking: self.is_tracking,
            latest: self.latest,
        }
    }

    fn publish(&mut self) {
        let status = self.status();
        self.sink.emit(AppEvent::Location(status));
    }

    /// Resolves whether positions may be read. A manual provider is always allowed, an NMEA
    /// provider is allowed when its source can be opened.
    pub fn request_permission(&mut self) -> AuthorizationStatus {
        self.authorization = match &self.provider {
            LocationProvider::Manual => AuthorizationStatus::Authorized,
            LocationProvider::Nmea(path) => match std::fs::File::open(path) {
                Ok(_) => AuthorizationStatus::Authorized,
                Err(err) => {
                    warn!("Position source {} is not readable: {}", path.to_string_lossy(), err);
                    AuthorizationStatus::Denied
                },
            },
        };

        self.publish();
        self.authorization
    }

    /// Starts delivering fixes to `fixes`. Manual providers deliver nothing by themselves.
    pub fn start_tracking(&mut self, cancel: &CancellationToken, fixes: Sender<PositionFix>) -> Result<(), LocationError> {
        if self.authorization != AuthorizationStatus::Authorized {
            return Err(LocationError::NotAuthorized);
        }

        self.stop_reader();

        if let LocationProvider::Nmea(path) = &self.provider {
            let reader_cancel = cancel.child_token();
            let handle = nmea_reader_task(reader_cancel.clone(), path.clone(), fixes);
            tokio::spawn(async move {
                match handle.await {
                    Ok(Err(err)) => warn!("Position reader stopped: {}", err),
                    Err(err) => warn!("Position reader panicked: {}", err),
                    Ok(Ok(())) => {},
                }
            });
            self.reader_cancel = Some(reader_cancel);
        }

        self.is_tracking = true;
        info!("Location tracking started");
        self.publish();
        Ok(())
    }

    fn stop_reader(&mut self) {
        if let Some(reader_cancel) = self.reader_cancel.take() {
            reader_cancel.cancel();
        }
    }

    pub fn stop_tracking(&mut self) {
        self.stop_reader();
        self.is_tracking = false;
        info!("Location tracking stopped");
        self.publish();
    }

    /// Records a new fix; only the newest one is kept.
    pub fn update(&mut self, fix: PositionFix) {
        self.latest = Some(fix);
        self.publish();
    }
}
