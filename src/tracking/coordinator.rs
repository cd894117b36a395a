use std::time::{Duration, SystemTime};
use futures::{SinkExt, StreamExt};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{info, warn};
use tokio::spawn;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

use crate::config::types::Settings;
use crate::device::central::BleCentral;
use crate::device::session::PeripheralSession;
use crate::device::types::{BleEvent, ConnectionState};
use crate::error::{LocationError, UploadError};
use crate::events::{AppEvent, EventSink};
use crate::location::source::{LocationProvider, LocationSource};
use crate::location::types::{AuthorizationStatus, PositionFix};
use crate::tracking::types::{Command, TrackingSnapshot};
use crate::upload::client::UploadClient;
use crate::upload::scheduler::{upload_timer, UploadScheduler};
use crate::upload::types::UploadOutcome;

const FIX_BUFFER: usize = 16;
const OUTCOME_BUFFER: usize = 8;

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        },
        None => std::future::pending::<()>().await,
    }
}

/// Starts and stops location tracking, uploading and the BLE session together.
///
/// All state lives in this struct and is only touched from [`TrackingCoordinator::run`], so
/// BLE events, position fixes, timer ticks and upload responses never interleave.
pub struct TrackingCoordinator<C: BleCentral> {
    session_id: String,
    interval: Duration,
    session: PeripheralSession<C>,
    location: LocationSource,
    scheduler: UploadScheduler,
    client: UploadClient,
    timer: Option<Interval>,
    sink: EventSink,
    cancel: CancellationToken,
    fix_sender: Sender<PositionFix>,
    fixes: Receiver<PositionFix>,
    outcome_sender: Sender<UploadOutcome>,
    outcomes: Receiver<UploadOutcome>,
}

impl<C: BleCentral> TrackingCoordinator<C> {
    pub fn new(settings: Settings, central: C, sink: EventSink, cancel: CancellationToken) -> Result<Self, UploadError> {
        let client = UploadClient::new(&settings.upload)?;
        Ok(Self::with_client(settings, central, client, sink, cancel))
    }

    pub fn with_client(settings: Settings, central: C, client: UploadClient, sink: EventSink, cancel: CancellationToken) -> Self {
        let provider = match &settings.gps_device {
            Some(path) => LocationProvider::Nmea(path.clone()),
            None => LocationProvider::Manual,
        };
        let (fix_sender, fixes) = channel::<PositionFix>(FIX_BUFFER);
        let (outcome_sender, outcomes) = channel::<UploadOutcome>(OUTCOME_BUFFER);

        TrackingCoordinator {
            session_id: settings.upload.session_id.clone(),
            interval: settings.upload.interval,
            session: PeripheralSession::new(central, settings.ble, sink.clone()),
            location: LocationSource::new(provider, sink.clone()),
            scheduler: UploadScheduler::new(&settings.upload),
            client,
            timer: None,
            sink,
            cancel,
            fix_sender,
            fixes,
            outcome_sender,
            outcomes,
        }
    }

    pub fn session(&self) -> &PeripheralSession<C> {
        &self.session
    }

    pub fn location(&self) -> &LocationSource {
        &self.location
    }

    pub fn scheduler(&self) -> &UploadScheduler {
        &self.scheduler
    }

    pub fn is_uploading(&self) -> bool {
        self.timer.is_some()
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            session_id: self.session_id.clone(),
            session: self.session.status(),
            location: self.location.status(),
            upload: self.scheduler.stats().clone(),
        }
    }

    fn log(&mut self, line: &str) {
        info!("{}", line);
        self.sink.log(line);
    }

    pub fn start(&mut self) -> Result<(), LocationError> {
        if self.location.authorization() == AuthorizationStatus::NotDetermined {
            self.location.request_permission();
        }

        if self.location.authorization() != AuthorizationStatus::Authorized {
            self.log("Location permission denied, not starting");
            return Err(LocationError::NotAuthorized);
        }

        self.location.start_tracking(&self.cancel, self.fix_sender.clone())?;
        self.timer = Some(upload_timer(self.interval));
        if let Err(err) = self.session.start_scan() {
            warn!("Could not start scanning: {}", err);
        }

        self.log("Started GPS tracking and BLE scanning");
        Ok(())
    }

    fn has_connection(&self) -> bool {
        matches!(self.session.connection_state(), ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// Location first, then the upload timer, the scan and finally the connection, pending or not.
    pub fn stop(&mut self) {
        self.location.stop_tracking();
        self.timer = None;
        self.session.stop_scan();
        if self.has_connection() {
            self.session.disconnect();
        }

        self.log("Stopped GPS tracking and BLE connection");
    }

    pub fn handle_ble_event(&mut self, event: BleEvent) {
        self.session.handle_event(event);
    }

    fn on_tick(&mut self) {
        let Some(record) = self.scheduler.tick(self.location.latest(), SystemTime::now()) else {
            return;
        };

        let client = self.client.clone();
        let mut outcome_sender = self.outcome_sender.clone();
        spawn(async move {
            let outcome = client.upload(&record).await;
            if outcome_sender.send(outcome).await.is_err() {
                warn!("Upload finished after tracking shut down");
            }
        });
    }

    fn on_outcome(&mut self, outcome: UploadOutcome) {
        self.scheduler.handle_outcome(&outcome, SystemTime::now());

        let stats = self.scheduler.stats().clone();
        self.sink.emit(AppEvent::Upload(stats));
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartTracking => {
                if let Err(err) = self.start() {
                    warn!("Failed to start tracking: {}", err);
                }
            },
            Command::StopTracking => self.stop(),
            Command::Scan => {
                if let Err(err) = self.session.start_scan() {
                    warn!("Could not start scanning: {}", err);
                }
            },
            Command::Disconnect => self.session.disconnect(),
            Command::Send(message) => {
                if let Err(err) = self.session.send(&message) {
                    self.log(&format!("Cannot send message: {}", err));
                }
            },
            Command::SendControl(command) => {
                if let Err(err) = self.session.send_control(&command) {
                    self.log(&format!("Cannot send control command: {}", err));
                }
            },
            Command::PushFix(fix) => self.location.update(fix),
            Command::Status => {
                let snapshot = self.snapshot();
                self.sink.emit(AppEvent::Snapshot(snapshot));
            },
            Command::Shutdown => self.cancel.cancel(),
        }
    }

    /// Processes events until cancelled or until the command channel closes, then stops.
    pub async fn run(mut self, mut ble_events: Receiver<BleEvent>, mut commands: Receiver<Command>) {
        let cancel = self.cancel.clone();

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(event) = ble_events.next() => {
                    self.session.handle_event(event);
                },
                Some(fix) = self.fixes.next() => {
                    self.location.update(fix);
                },
                _ = next_tick(&mut self.timer) => {
                    self.on_tick();
                },
                Some(outcome) = self.outcomes.next() => {
                    self.on_outcome(outcome);
                },
                command = commands.next() => match command {
                    None => break 'mainloop,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        if self.location.is_tracking() || self.has_connection() {
            self.stop();
        }
        info!("Tracking coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::time::timeout;
    use crate::config::types::Config;
    use crate::device::central::mock::{CentralCommand, RecordingCentral};
    use crate::device::types::{CharacteristicHandle, DeviceId, RadioState};
    use crate::upload::client::test_server::{no_proxy_client, UploadServer};

    fn device() -> DeviceId {
        DeviceId("dev".to_string())
    }

    fn coordinator(settings: Settings) -> (TrackingCoordinator<RecordingCentral>, RecordingCentral) {
        let central = RecordingCentral::default();
        let client = UploadClient::with_client(no_proxy_client(), &settings.upload).unwrap();
        let mut coordinator = TrackingCoordinator::with_client(
            settings,
            central.clone(),
            client,
            EventSink::new(),
            CancellationToken::new(),
        );
        coordinator.handle_ble_event(BleEvent::RadioState(RadioState::PoweredOn));
        (coordinator, central)
    }

    fn connect(coordinator: &mut TrackingCoordinator<RecordingCentral>) {
        let ble = Settings::default().ble;
        coordinator.handle_ble_event(BleEvent::Advertisement { id: device(), name: Some(ble.device_name.clone()), rssi: None });
        coordinator.handle_ble_event(BleEvent::Connected { id: device() });
        coordinator.handle_ble_event(BleEvent::ServicesDiscovered { id: device(), result: Ok(vec![ble.service_uuid]) });
        coordinator.handle_ble_event(BleEvent::CharacteristicsDiscovered {
            id: device(),
            service: ble.service_uuid,
            result: Ok(vec![CharacteristicHandle { service: ble.service_uuid, uuid: ble.control_uuid }]),
        });
    }

    #[tokio::test]
    async fn start_runs_everything_and_stop_tears_down_in_order() {
        let (mut coordinator, central) = coordinator(Settings::default());

        coordinator.start().unwrap();
        assert!(coordinator.location().is_tracking());
        assert!(coordinator.is_uploading());
        assert_eq!(coordinator.session().connection_state(), ConnectionState::Scanning);

        connect(&mut coordinator);
        assert!(coordinator.session().is_connected());
        central.take();

        coordinator.stop();

        assert!(!coordinator.location().is_tracking());
        assert!(!coordinator.is_uploading());
        assert!(!coordinator.session().is_connected());
        assert_eq!(central.take(), vec![CentralCommand::StopScan, CentralCommand::CancelConnection(device())]);
    }

    #[tokio::test]
    async fn stop_cancels_a_pending_connection() {
        let (mut coordinator, central) = coordinator(Settings::default());
        coordinator.start().unwrap();
        let name = Settings::default().ble.device_name;
        coordinator.handle_ble_event(BleEvent::Advertisement { id: device(), name: Some(name), rssi: None });
        assert_eq!(coordinator.session().connection_state(), ConnectionState::Connecting);
        central.take();

        coordinator.stop();

        assert_eq!(central.take(), vec![CentralCommand::StopScan, CentralCommand::CancelConnection(device())]);
        assert_eq!(coordinator.session().connection_state(), ConnectionState::Disconnected);

        // a connection that completes anyway is not picked up
        coordinator.handle_ble_event(BleEvent::Connected { id: device() });
        assert!(!coordinator.session().is_connected());
        assert!(central.take().is_empty());
    }

    #[tokio::test]
    async fn start_without_location_permission_does_nothing() {
        let mut settings = Settings::default();
        settings.gps_device = Some(PathBuf::from("/nonexistent/gps"));
        let (mut coordinator, central) = coordinator(settings);

        assert!(matches!(coordinator.start(), Err(LocationError::NotAuthorized)));
        assert!(!coordinator.is_uploading());
        assert!(central.take().is_empty());
    }

    #[tokio::test]
    async fn stop_still_runs_when_radio_is_off() {
        let (mut coordinator, central) = coordinator(Settings::default());
        coordinator.handle_ble_event(BleEvent::RadioState(RadioState::PoweredOff));

        coordinator.start().unwrap();
        assert!(coordinator.location().is_tracking());
        coordinator.stop();

        assert!(!coordinator.location().is_tracking());
        assert!(!coordinator.is_uploading());
        assert_eq!(central.take(), vec![CentralCommand::StopScan]);
    }

    #[tokio::test]
    async fn send_commands_reach_the_session() {
        let (mut coordinator, central) = coordinator(Settings::default());
        coordinator.start().unwrap();
        connect(&mut coordinator);
        central.take();

        coordinator.handle_command(Command::Send("hello".to_string()));
        coordinator.handle_command(Command::SendControl("sleep".to_string()));

        let ble = Settings::default().ble;
        assert_eq!(central.take(), vec![CentralCommand::Write(device(), ble.control_uuid, b"sleep".to_vec())]);
    }

    #[tokio::test]
    async fn run_uploads_pushed_fixes_and_reports_status() {
        let server = UploadServer::start(axum::http::StatusCode::OK).await;
        let mut config = Config::new();
        config.set("HF_SPACE_URL", server.url.as_str());
        config.set("UPLOAD_INTERVAL", "0.05");
        let settings = config.settings().unwrap();

        let (mut coordinator, _central) = coordinator(settings);
        let mut events = coordinator.sink.subscribe(256);
        let cancel = coordinator.cancel.clone();

        let (_ble_sender, ble_events) = channel::<BleEvent>(4);
        let (mut command_sender, commands) = channel::<Command>(4);
        let handle = spawn(coordinator.run(ble_events, commands));

        command_sender.send(Command::StartTracking).await.unwrap();
        command_sender.send(Command::PushFix(PositionFix::new(0.0, 0.0001, SystemTime::now()))).await.unwrap();

        let stats = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(AppEvent::Upload(stats)) = events.next().await {
                    return stats;
                }
            }
        }).await.unwrap();
        assert_eq!(stats.upload_count, 1);
        assert!(stats.is_connected);

        let received = server.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].record.session_id, "CAR001");
        assert_eq!(received[0].record.kind, "gps");
        assert_eq!(received[0].record.lon, 0.0001);

        command_sender.send(Command::Status).await.unwrap();
        let snapshot = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(AppEvent::Snapshot(snapshot)) = events.next().await {
                    return snapshot;
                }
            }
        }).await.unwrap();
        assert_eq!(snapshot.session_id, "CAR001");
        assert_eq!(snapshot.upload.upload_count, 1);
        assert_eq!(snapshot.location.latest.map(|fix| fix.longitude), Some(0.0001));

        cancel.cancel();
        handle.await.unwrap();
    }
}
