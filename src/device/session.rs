use std::collections::HashSet;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::types::BleSettings;
use crate::device::central::BleCentral;
use crate::device::constants::{status_connected, status_connecting, STATUS_DISCONNECTED, STATUS_RADIO_OFF, STATUS_READY, STATUS_SCANNING};
use crate::device::types::{BleEvent, CharacteristicHandle, CharacteristicRole, ConnectionState, DeviceId, DiscoveredDevice, RadioState, SessionStatus};
use crate::error::DeviceError;
use crate::events::{AppEvent, EventSink};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Scanning,
    Connecting {
        device: DeviceId,
        name: String,
    },
    ServiceDiscovery {
        device: DeviceId,
        name: String,
    },
    CharacteristicDiscovery {
        device: DeviceId,
        name: String,
    },
    Connected {
        device: DeviceId,
        name: String,
    },
}

impl Phase {
    fn target(&self) -> Option<(&DeviceId, &str)> {
        match self {
            Phase::Idle | Phase::Scanning => None,
            Phase::Connecting { device, name }
            | Phase::ServiceDiscovery { device, name }
            | Phase::CharacteristicDiscovery { device, name }
            | Phase::Connected { device, name } => Some((device, name)),
        }
    }

    fn is_established(&self) -> bool {
        matches!(
            self,
            Phase::ServiceDiscovery { .. } | Phase::CharacteristicDiscovery { .. } | Phase::Connected { .. }
        )
    }

    fn connection_state(&self) -> ConnectionState {
        match self {
            Phase::Idle => ConnectionState::Disconnected,
            Phase::Scanning => ConnectionState::Scanning,
            Phase::Connecting { .. } => ConnectionState::Connecting,
            _ => ConnectionState::Connected,
        }
    }
}

/// Drives one peripheral through scan, connect, discovery and data exchange.
///
/// The session never blocks: it issues requests through its [`BleCentral`] and advances when
/// the matching [`BleEvent`] is passed to [`PeripheralSession::handle_event`]. Platform errors
/// are logged and otherwise ignored; the next explicit `start_scan` starts over.
pub struct PeripheralSession<C: BleCentral> {
    central: C,
    settings: BleSettings,
    sink: EventSink,
    phase: Phase,
    radio_on: bool,
    status_text: String,
    devices: Vec<DiscoveredDevice>,
    seen: HashSet<DeviceId>,
    write_handle: Option<CharacteristicHandle>,
    control_handle: Option<CharacteristicHandle>,
    received_text: String,
}

impl<C: BleCentral> PeripheralSession<C> {
    pub fn new(central: C, settings: BleSettings, sink: EventSink) -> Self {
        PeripheralSession {
            central,
            settings,
            sink,
            phase: Phase::Idle,
            radio_on: false,
            status_text: STATUS_DISCONNECTED.to_string(),
            devices: Vec::new(),
            seen: HashSet::new(),
            write_handle: None,
            control_handle: None,
            received_text: String::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.phase.connection_state(),
            status_text: self.status_text.clone(),
            radio_on: self.radio_on,
            is_connected: self.is_connected(),
            received_text: self.received_text.clone(),
            devices: self.devices.clone(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.phase.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.phase.is_established()
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    pub fn received_text(&self) -> &str {
        &self.received_text
    }

    pub fn has_handle(&self, role: CharacteristicRole) -> bool {
        match role {
            CharacteristicRole::Write => self.write_handle.is_some(),
            CharacteristicRole::Control => self.control_handle.is_some(),
            CharacteristicRole::Notify => false,
        }
    }

    fn log(&mut self, line: String) {
        info!("{}", line);
        self.sink.log(line);
    }

    fn publish(&mut self) {
        let status = self.status();
        self.sink.emit(AppEvent::Session(status));
    }

    fn idle_status(&self) -> &'static str {
        if self.radio_on { STATUS_READY } else { STATUS_RADIO_OFF }
    }

    fn role_of(&self, uuid: &Uuid) -> Option<CharacteristicRole> {
        if *uuid == self.settings.write_uuid {
            Some(CharacteristicRole::Write)
        } else if *uuid == self.settings.control_uuid {
            Some(CharacteristicRole::Control)
        } else if *uuid == self.settings.notify_uuid {
            Some(CharacteristicRole::Notify)
        } else {
            None
        }
    }

    /// Forgets the devices of the previous scan and listens for advertisements again.
    pub fn start_scan(&mut self) -> Result<(), DeviceError> {
        self.devices.clear();
        self.seen.clear();

        if self.phase.is_established() {
            warn!("Not scanning, a peripheral session is already established");
            self.publish();
            return Err(DeviceError::AlreadyConnected);
        }

        if !self.radio_on {
            warn!("Not scanning, bluetooth is off");
            self.status_text = STATUS_RADIO_OFF.to_string();
            self.publish();
            return Err(DeviceError::RadioOff);
        }

        if let Phase::Connecting { device, .. } = &self.phase {
            let device = device.clone();
            self.central.cancel_connection(&device);
        }

        self.phase = Phase::Scanning;
        self.status_text = STATUS_SCANNING.to_string();
        self.central.start_scan();
        self.log("Started scanning for BLE devices".to_string());
        self.publish();
        Ok(())
    }

    fn halt_scan(&mut self) {
        self.central.stop_scan();
        self.log("Stopped scanning for BLE devices".to_string());
    }

    pub fn stop_scan(&mut self) {
        self.halt_scan();

        if self.phase == Phase::Scanning {
            self.phase = Phase::Idle;
            self.status_text = self.idle_status().to_string();
        }
        self.publish();
    }

    /// Tears the session down right away; a later platform disconnect event is harmless.
    pub fn disconnect(&mut self) {
        if self.phase == Phase::Scanning {
            self.halt_scan();
        } else if let Some((device, _)) = self.phase.target() {
            let device = device.clone();
            self.central.cancel_connection(&device);
        }
        self.reset_connection();
    }

    fn reset_connection(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Idle);
        self.write_handle = None;
        self.control_handle = None;
        self.status_text = self.idle_status().to_string();

        match previous.target() {
            Some((_, name)) => self.log(format!("Disconnected from {}", name)),
            None => debug!("Disconnect while no peripheral was targeted"),
        }
        self.publish();
    }

    fn write_to(&mut self, role: CharacteristicRole, payload: &str) -> Result<(), DeviceError> {
        let Some((device, name)) = self.phase.target().filter(|_| self.phase.is_established()) else {
            warn!("Cannot send {:?} payload: not connected", role);
            return Err(DeviceError::NotConnected);
        };
        let (device, name) = (device.clone(), name.to_string());

        let handle = match role {
            CharacteristicRole::Write => self.write_handle,
            CharacteristicRole::Control => self.control_handle,
            CharacteristicRole::Notify => None,
        };
        let Some(handle) = handle else {
            warn!("Cannot send {:?} payload: no such characteristic", role);
            return Err(DeviceError::MissingCharacteristic);
        };

        self.central.write_value(&device, &handle, payload.as_bytes().to_vec());
        match role {
            CharacteristicRole::Control => self.log(format!("Sent control command to {}: {}", name, payload)),
            _ => self.log(format!("Sent message to {}: {}", name, payload)),
        }
        Ok(())
    }

    /// Writes a message to the write characteristic.
    pub fn send(&mut self, message: &str) -> Result<(), DeviceError> {
        self.write_to(CharacteristicRole::Write, message)
    }

    /// Writes a command to the control characteristic.
    pub fn send_control(&mut self, command: &str) -> Result<(), DeviceError> {
        self.write_to(CharacteristicRole::Control, command)
    }

    fn is_target(&self, id: &DeviceId) -> bool {
        self.phase.target().map(|(device, _)| device == id).unwrap_or(false)
    }

    pub fn handle_event(&mut self, event: BleEvent) {
        match event {
            BleEvent::RadioState(state) => self.on_radio_state(state),
            BleEvent::ScanFailed { error } => {
                warn!("Scanning failed: {}", error);
                if self.phase == Phase::Scanning {
                    self.phase = Phase::Idle;
                    self.status_text = self.idle_status().to_string();
                    self.publish();
                }
            },
            BleEvent::Advertisement { id, name, rssi } => self.on_advertisement(id, name, rssi),
            BleEvent::Connected { id } => self.on_connected(id),
            BleEvent::ConnectFailed { id, error } => {
                warn!("Connecting to {} failed: {}", id, error);
            },
            BleEvent::Disconnected { id, error } => {
                if let Some(error) = error {
                    warn!("Peripheral {} disconnected with error: {}", id, error);
                }
                if !self.is_target(&id) {
                    debug!("Ignoring disconnect of untracked peripheral {}", id);
                    return;
                }
                self.reset_connection();
            },
            BleEvent::ServicesDiscovered { id, result } => self.on_services(id, result),
            BleEvent::CharacteristicsDiscovered { id, service, result } => self.on_characteristics(id, service, result),
            BleEvent::NotificationStateChanged { characteristic, result, .. } => match result {
                Ok(()) => debug!("Notification state updated for {}", characteristic),
                Err(err) => warn!("Notification error for {}: {}", characteristic, err),
            },
            BleEvent::ValueUpdated { id, characteristic, result } => self.on_value(id, characteristic, result),
            BleEvent::WriteCompleted { characteristic, result, .. } => match result {
                Ok(()) => debug!("Write to {} acknowledged", characteristic),
                Err(err) => warn!("Write error for {}: {}", characteristic, err),
            },
        }
    }

    fn on_radio_state(&mut self, state: RadioState) {
        match state {
            RadioState::PoweredOn => {
                self.radio_on = true;
                if !self.is_connected() {
                    self.status_text = STATUS_READY.to_string();
                }
                self.log("Bluetooth turned ON".to_string());
            },
            RadioState::PoweredOff => {
                self.radio_on = false;
                self.status_text = STATUS_RADIO_OFF.to_string();
                self.log("Bluetooth turned OFF".to_string());
            },
        }
        self.publish();
    }

    fn on_advertisement(&mut self, id: DeviceId, name: Option<String>, rssi: Option<i16>) {
        let Some(name) = name else {
            return;
        };

        if self.phase != Phase::Scanning || name != self.settings.device_name || self.seen.contains(&id) {
            return;
        }

        self.seen.insert(id.clone());
        self.devices.push(DiscoveredDevice {
            id: self.devices.len(),
            name: name.clone(),
            rssi: rssi.unwrap_or_default(),
            identifier: id.clone(),
        });

        self.halt_scan();
        self.central.connect(&id);
        self.status_text = status_connecting(&name);
        self.log(format!("Found {} ({}), connecting...", name, id));
        self.phase = Phase::Connecting { device: id, name };
        self.publish();
    }

    fn on_connected(&mut self, id: DeviceId) {
        let Phase::Connecting { device, name } = &self.phase else {
            debug!("Ignoring connect of {} outside of connecting state", id);
            return;
        };
        if *device != id {
            debug!("Ignoring connect of untracked peripheral {}", id);
            return;
        }
        let name = name.clone();

        self.status_text = status_connected(&name);
        self.log(format!("Successfully connected to {}", name));
        self.central.discover_services(&id, self.settings.service_uuid);
        self.phase = Phase::ServiceDiscovery { device: id, name };
        self.publish();
    }

    fn on_services(&mut self, id: DeviceId, result: Result<Vec<Uuid>, String>) {
        let Phase::ServiceDiscovery { device, name } = &self.phase else {
            debug!("Ignoring service discovery result for {}", id);
            return;
        };
        if *device != id {
            return;
        }
        let name = name.clone();

        let services = match result {
            Ok(services) => services,
            Err(err) => {
                warn!("Service discovery error: {}", err);
                return;
            },
        };

        if services.is_empty() {
            warn!("No services discovered on {}", name);
            return;
        }

        info!("Discovered {} services", services.len());
        for service in services {
            self.central.discover_characteristics(&id, service);
        }
        self.phase = Phase::CharacteristicDiscovery { device: id, name };
    }

    fn on_characteristics(&mut self, id: DeviceId, service: Uuid, result: Result<Vec<CharacteristicHandle>, String>) {
        let name = match &self.phase {
            Phase::CharacteristicDiscovery { device, name } | Phase::Connected { device, name } if *device == id => name.clone(),
            _ => {
                debug!("Ignoring characteristics of {} for {}", service, id);
                return;
            },
        };

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(err) => {
                warn!("Characteristic discovery error for {}: {}", service, err);
                return;
            },
        };

        for characteristic in characteristics {
            debug!("Found characteristic {}", characteristic.uuid);

            match self.role_of(&characteristic.uuid) {
                Some(CharacteristicRole::Write) => {
                    self.write_handle = Some(characteristic);
                    info!("Write characteristic ready");
                },
                Some(CharacteristicRole::Control) => {
                    self.control_handle = Some(characteristic);
                    info!("Control characteristic ready");
                },
                Some(CharacteristicRole::Notify) => {
                    self.central.set_notify(&id, &characteristic, true);
                    info!("Subscribed to notifications");
                },
                None => {},
            }

            self.central.read_value(&id, &characteristic);
        }

        self.phase = Phase::Connected { device: id, name };
        self.publish();
    }

    fn on_value(&mut self, id: DeviceId, characteristic: Uuid, result: Result<Vec<u8>, String>) {
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Read error for {}: {}", characteristic, err);
                return;
            },
        };

        let Ok(text) = String::from_utf8(bytes) else {
            debug!("Dropping non utf-8 value from {}", characteristic);
            return;
        };

        let name = self.phase.target().map(|(_, name)| name.to_string()).unwrap_or_else(|| id.to_string());
        let line = format!("Received from {}: {}", name, text);
        self.received_text = text;
        self.log(line);
        self.publish();
    }
}
