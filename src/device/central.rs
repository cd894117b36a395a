use uuid::Uuid;

use crate::device::types::{CharacteristicHandle, DeviceId};

/// The BLE central role as the platform offers it.
///
/// Every method only issues a request and returns immediately. Completion (or failure) is
/// reported later as a [`BleEvent`](crate::device::types::BleEvent) on the channel the
/// implementation was created with.
pub trait BleCentral {
    /// Listen for advertisements of any service.
    fn start_scan(&mut self);
    fn stop_scan(&mut self);
    fn connect(&mut self, device: &DeviceId);
    fn cancel_connection(&mut self, device: &DeviceId);
    /// Discover the given primary service only.
    fn discover_services(&mut self, device: &DeviceId, service: Uuid);
    /// Discover every characteristic of an already discovered service.
    fn discover_characteristics(&mut self, device: &DeviceId, service: Uuid);
    fn set_notify(&mut self, device: &DeviceId, characteristic: &CharacteristicHandle, enabled: bool);
    fn read_value(&mut self, device: &DeviceId, characteristic: &CharacteristicHandle);
    /// Write with response
    fn write_value(&mut self, device: &DeviceId, characteristic: &CharacteristicHandle, data: Vec<u8>);
}
