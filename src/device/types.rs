use std::fmt;
use uuid::Uuid;

/// Platform identifier of a peripheral, stable for the lifetime of the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Sequential within one scan
    pub id: usize,
    pub name: String,
    pub rssi: i16,
    pub identifier: DeviceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicRole {
    /// We send data and expect a write acknowledgement
    Write,
    /// We send out-of-band commands, such as sleep
    Control,
    /// The peripheral pushes data to us
    Notify,
}

/// Enough to address one characteristic on a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Everything the platform reports back to the session, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum BleEvent {
    RadioState(RadioState),
    ScanFailed {
        error: String,
    },
    Advertisement {
        id: DeviceId,
        name: Option<String>,
        rssi: Option<i16>,
    },
    Connected {
        id: DeviceId,
    },
    ConnectFailed {
        id: DeviceId,
        error: String,
    },
    Disconnected {
        id: DeviceId,
        error: Option<String>,
    },
    ServicesDiscovered {
        id: DeviceId,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        id: DeviceId,
        service: Uuid,
        result: Result<Vec<CharacteristicHandle>, String>,
    },
    NotificationStateChanged {
        id: DeviceId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
    /// A read response or a notification
    ValueUpdated {
        id: DeviceId,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    WriteCompleted {
        id: DeviceId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub status_text: String,
    pub radio_on: bool,
    pub is_connected: bool,
    pub received_text: String,
    pub devices: Vec<DiscoveredDevice>,
}
