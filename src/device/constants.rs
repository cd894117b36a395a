/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * Capacity of the channel that carries platform events to the session.
 */
pub const EVENT_BUFFER: usize = 64;

/**
 * Control command that puts the peripheral to sleep.
 */
pub const COMMAND_SLEEP: &str = "sleep";

pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_READY: &str = "Ready to connect";
pub const STATUS_RADIO_OFF: &str = "Bluetooth OFF";
pub const STATUS_SCANNING: &str = "Scanning...";

pub fn status_connecting(name: &str) -> String {
    format!("Connecting to {}...", name)
}

pub fn status_connected(name: &str) -> String {
    format!("Connected to {}", name)
}
