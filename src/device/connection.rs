use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{SinkExt, Stream, StreamExt};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::central::BleCentral;
use crate::device::constants::{EVENT_BUFFER, WRITE_DEADLINE};
use crate::device::types::{BleEvent, CharacteristicHandle, DeviceId, RadioState};
use crate::error::DeviceError;

fn device_id(id: &PeripheralId) -> DeviceId {
    DeviceId(format!("{:?}", id))
}

fn find_characteristic(peripheral: &Peripheral, handle: &CharacteristicHandle) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == handle.uuid && characteristic.service_uuid == handle.service)
}

#[derive(Clone)]
struct Shared {
    adapter: Adapter,
    peripherals: Arc<Mutex<HashMap<DeviceId, Peripheral>>>,
    readers: Arc<Mutex<HashMap<DeviceId, CancellationToken>>>,
    sender: Sender<BleEvent>,
    cancel: CancellationToken,
}

impl Shared {
    async fn emit(&self, event: BleEvent) {
        let mut sender = self.sender.clone();
        if let Err(err) = sender.send(event).await {
            debug!("BLE event dropped, session is gone: {}", err);
        }
    }

    fn emit_later(&self, event: BleEvent) {
        let shared = self.clone();
        spawn(async move {
            shared.emit(event).await;
        });
    }

    fn peripheral(&self, device: &DeviceId) -> Option<Peripheral> {
        self.peripherals.lock().expect("Failed to lock peripherals").get(device).cloned()
    }

    fn stop_notification_reader(&self, device: &DeviceId) {
        let token = self.readers.lock().expect("Failed to lock readers").remove(device);
        if let Some(token) = token {
            token.cancel();
        }
    }

    // forwards every notification of a connected peripheral until it disconnects
    fn start_notification_reader(&self, device: DeviceId, peripheral: Peripheral) {
        let cancel = self.cancel.child_token();
        let previous = self.readers.lock().expect("Failed to lock readers").insert(device.clone(), cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let shared = self.clone();
        spawn(async move {
            let mut notification_stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Failed to open notification stream for {}: {}", device, err);
                    return;
                },
            };

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    notification = notification_stream.next() => match notification {
                        None => break 'mainloop,
                        Some(data) => {
                            shared.emit(BleEvent::ValueUpdated {
                                id: device.clone(),
                                characteristic: data.uuid,
                                result: Ok(data.value),
                            }).await;
                        },
                    },
                }
            }

            debug!("Notification reader for {} stopped", device);
        });
    }

    async fn on_advertisement(&self, id: PeripheralId) {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                debug!("Advertised peripheral {:?} is gone: {}", id, err);
                return;
            },
        };

        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => {
                debug!("Peripheral {:?} has no properties", id);
                return;
            },
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                return;
            },
        };

        let device = device_id(&id);
        self.peripherals.lock().expect("Failed to lock peripherals").insert(device.clone(), peripheral);
        self.emit(BleEvent::Advertisement {
            id: device,
            name: properties.local_name,
            rssi: properties.rssi,
        }).await;
    }

    async fn pump_adapter_events<S>(self, mut events: S)
    where
        S: Stream<Item = CentralEvent> + Unpin + Send,
    {
        'mainloop: loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => match event {
                    None => {
                        warn!("Adapter event stream ended");
                        break 'mainloop;
                    },
                    Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                        self.on_advertisement(id).await;
                    },
                    Some(CentralEvent::DeviceDisconnected(id)) => {
                        let device = device_id(&id);
                        self.stop_notification_reader(&device);
                        self.emit(BleEvent::Disconnected { id: device, error: None }).await;
                    },
                    Some(_) => {},
                },
            }
        }
    }
}

/// [`BleCentral`] backed by the first btleplug adapter of this machine.
pub struct BtleCentral {
    // dropping the manager may release the platform central on some backends
    _manager: Manager,
    shared: Shared,
}

impl BtleCentral {
    /// Opens the adapter and starts forwarding its events. Must be called inside a tokio runtime.
    pub async fn new(cancel: CancellationToken) -> Result<(BtleCentral, Receiver<BleEvent>), DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let (sender, receiver) = channel::<BleEvent>(EVENT_BUFFER);
        let events = adapter.events().await?;

        let shared = Shared {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            readers: Arc::new(Mutex::new(HashMap::new())),
            sender,
            cancel: cancel.child_token(),
        };

        spawn(shared.clone().pump_adapter_events(events));
        shared.emit(BleEvent::RadioState(RadioState::PoweredOn)).await;

        Ok((BtleCentral { _manager: manager, shared }, receiver))
    }
}

impl Drop for BtleCentral {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl BleCentral for BtleCentral {
    fn start_scan(&mut self) {
        let shared = self.shared.clone();
        spawn(async move {
            if let Err(err) = shared.adapter.start_scan(ScanFilter::default()).await {
                shared.emit(BleEvent::ScanFailed { error: err.to_string() }).await;
            }
        });
    }

    fn stop_scan(&mut self) {
        let shared = self.shared.clone();
        spawn(async move {
            if let Err(err) = shared.adapter.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        });
    }

    fn connect(&mut self, device: &DeviceId) {
        let Some(peripheral) = self.shared.peripheral(device) else {
            self.shared.emit_later(BleEvent::ConnectFailed { id: device.clone(), error: "unknown peripheral".to_string() });
            return;
        };

        let shared = self.shared.clone();
        let device = device.clone();
        spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    shared.start_notification_reader(device.clone(), peripheral);
                    shared.emit(BleEvent::Connected { id: device }).await;
                },
                Err(err) => {
                    shared.emit(BleEvent::ConnectFailed { id: device, error: err.to_string() }).await;
                },
            }
        });
    }

    fn cancel_connection(&mut self, device: &DeviceId) {
        self.shared.stop_notification_reader(device);

        let Some(peripheral) = self.shared.peripheral(device) else {
            return;
        };

        let shared = self.shared.clone();
        let device = device.clone();
        spawn(async move {
            match peripheral.disconnect().await {
                Ok(()) => shared.emit(BleEvent::Disconnected { id: device, error: None }).await,
                Err(err) => warn!("Failed to disconnect {}: {}", device, err),
            }
        });
    }

    fn discover_services(&mut self, device: &DeviceId, service: Uuid) {
        let Some(peripheral) = self.shared.peripheral(device) else {
            self.shared.emit_later(BleEvent::ServicesDiscovered { id: device.clone(), result: Err("unknown peripheral".to_string()) });
            return;
        };

        let shared = self.shared.clone();
        let device = device.clone();
        spawn(async move {
            // btleplug always discovers everything, keep only the service that was asked for
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(
                    peripheral
                        .services()
                        .into_iter()
                        .filter(|found| found.uuid == service)
                        .map(|found| found.uuid)
                        .collect()
                ),
                Err(err) => Err(err.to_string()),
            };

            shared.emit(BleEvent::ServicesDiscovered { id: device, result }).await;
        });
    }

    fn discover_characteristics(&mut self, device: &DeviceId, service: Uuid) {
        let result = match self.shared.peripheral(device) {
            None => Err("unknown peripheral".to_string()),
            Some(peripheral) => peripheral
                .services()
                .into_iter()
                .find(|found| found.uuid == service)
                .map(|found| {
                    found.characteristics
                        .iter()
                        .map(|characteristic| CharacteristicHandle { service, uuid: characteristic.uuid })
                        .collect()
                })
                .ok_or_else(|| format!("service {} was not discovered", service)),
        };

        self.shared.emit_later(BleEvent::CharacteristicsDiscovered { id: device.clone(), service, result });
    }

    fn set_notify(&mut self, device: &DeviceId, characteristic: &CharacteristicHandle, enabled: bool) {
        let found = self.shared.peripheral(device)
            .and_then(|peripheral| find_characteristic(&peripheral, characteristic).map(|c| (peripheral, c)));
        let Some((peripheral, target)) = found else {
            self.shared.emit_later(BleEvent::NotificationStateChanged {
                id: device.clone(),
                characteristic: characteristic.uuid,
                result: Err("unknown characteristic".to_string()),
            });
            return;
        };

        let shared = self.shared.clone();
        let device = device.clone();
        spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };

            shared.emit(BleEvent::NotificationStateChanged {
                id: device,
                characteristic: target.uuid,
                result: result.map_err(|err| err.to_string()),
            }).await;
        });
    }

    fn read_value(&mut self, device: &DeviceId, characteristic: &CharacteristicHandle) {
        let found = self.shared.peripheral(device)
            .and_then(|peripheral| find_characteristic(&peripheral, characteristic).map(|c| (peripheral, c)));
        let Some((peripheral, target)) = found else {
            self.shared.emit_later(BleEvent::ValueUpdated {
                id: device.clone(),
                characteristic: characteristic.uuid,
                result: Err("unknown characteristic".to_string()),
            });
            return;
        };

        let shared = self.shared.clone();
        let device = device.clone();
        spawn(async move {
            let result = peripheral.read(&target).await.map_err(|err| err.to_string());
            shared.emit(BleEvent::ValueUpdated { id: device, characteristic: target.uuid, result }).await;
        });
    }

    fn write_value(&mut self, device: &DeviceId, characteristic: &CharacteristicHandle, data: Vec<u8>) {
        let found = self.shared.peripheral(device)
            .and_then(|peripheral| find_characteristic(&peripheral, characteristic).map(|c| (peripheral, c)));
        let Some((peripheral, target)) = found else {
            self.shared.emit_later(BleEvent::WriteCompleted {
                id: device.clone(),
                characteristic: characteristic.uuid,
                result: Err("unknown characteristic".to_string()),
            });
            return;
        };

        let shared = self.shared.clone();
        let device = device.clone();
        spawn(async move {
            let fut = peripheral.write(&target, &data, WriteType::WithResponse);

            let result = tokio::select! {
                _ = sleep(Duration::from_millis(WRITE_DEADLINE)) => {
                    Err("writing to characteristic took too long".to_string())
                }
                result = fut => result.map_err(|err| err.to_string()),
            };

            shared.emit(BleEvent::WriteCompleted { id: device, characteristic: target.uuid, result }).await;
        });
    }
}
