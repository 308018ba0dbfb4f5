//! BLE client for UWB peripherals
//!
//! The peripheral exposes a UART-style service: the phone writes frames to
//! RX and receives frames as notifications on TX.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use data_encoding::HEXLOWER;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use uwb_proto::ble::{RX_CHAR, SERVICE, TX_CHAR};
use uwb_session::{Transport, TransportError, TransportEvent};

/// Capacity of the transport event channel
const EVENT_BUFFER: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no UWB device found")]
    NotFound,
    #[error("{0} characteristic not found")]
    MissingCharacteristic(&'static str),
    #[error("bluetooth: {0}")]
    Btle(#[from] btleplug::Error),
}

impl From<BleError> for TransportError {
    fn from(err: BleError) -> Self {
        TransportError::Link(err.to_string())
    }
}

/// A discovered BLE device
#[derive(Debug, Clone)]
pub struct UwbDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Advertises the UWB OoB service
    pub has_oob_service: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, BleError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(BleError::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns every device seen. UWB peripherals have `has_oob_service = true`.
pub async fn scan(duration_secs: u64) -> Result<Vec<UwbDevice>, BleError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            devices.push(UwbDevice {
                name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                address: peripheral.address().to_string(),
                rssi: props.rssi,
                has_oob_service: props.services.contains(&SERVICE),
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find a device by name/address pattern, or any device advertising the OoB service
async fn find_peripheral(
    adapter: &Adapter,
    target: Option<&str>,
    scan_secs: u64,
) -> Result<(Peripheral, String), BleError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(scan_secs)).await;

    for peripheral in adapter.peripherals().await? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let name = props.local_name.unwrap_or_default();
        let addr = peripheral.address().to_string();

        let matches = match target {
            Some(t) => name.contains(t) || addr.contains(t),
            None => props.services.contains(&SERVICE),
        };

        if matches {
            adapter.stop_scan().await?;
            let label = if name.is_empty() { addr } else { name };
            return Ok((peripheral, label));
        }
    }

    adapter.stop_scan().await?;
    Err(BleError::NotFound)
}

/// Link-level state that only exists while connected
#[derive(Default)]
struct Link {
    rx: Option<Characteristic>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    fn clear(&mut self) {
        self.rx = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// OoB transport over a single BLE peripheral
///
/// Link events (connected, disconnected, received frames) are delivered on
/// the receiver returned by [`BleTransport::find`].
pub struct BleTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    name: String,
    events: mpsc::Sender<TransportEvent>,
    link: Mutex<Link>,
}

impl BleTransport {
    /// Scan for a peripheral and wrap it, without connecting.
    pub async fn find(
        target: Option<&str>,
        scan_secs: u64,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), BleError> {
        let adapter = get_adapter().await?;
        let (peripheral, name) = find_peripheral(&adapter, target, scan_secs).await?;
        info!("found UWB device {} ({})", name, peripheral.address());

        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let transport = Self {
            adapter,
            peripheral,
            name,
            events,
            link: Mutex::new(Link::default()),
        };
        Ok((transport, rx))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn open_link(&self) -> Result<(), BleError> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;

        let characteristics = self.peripheral.characteristics();
        let rx = characteristics
            .iter()
            .find(|c| c.uuid == RX_CHAR)
            .cloned()
            .ok_or(BleError::MissingCharacteristic("RX"))?;
        let tx = characteristics
            .iter()
            .find(|c| c.uuid == TX_CHAR)
            .cloned()
            .ok_or(BleError::MissingCharacteristic("TX"))?;

        // Take the stream before subscribing so early notifications are buffered
        let mut notifications = self.peripheral.notifications().await?;
        let mut central = self.adapter.events().await?;
        self.peripheral.subscribe(&tx).await?;

        let mut link = self.link.lock().await;
        link.clear();
        link.rx = Some(rx);

        // Connected goes out before any Received frame
        let _ = self
            .events
            .send(TransportEvent::Connected {
                peer: self.name.clone(),
            })
            .await;

        let events = self.events.clone();
        link.tasks.push(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != TX_CHAR {
                    continue;
                }
                debug!("<- {}", HEXLOWER.encode(&notification.value));
                if events
                    .send(TransportEvent::Received(notification.value))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }));

        let events = self.events.clone();
        let id = self.peripheral.id();
        link.tasks.push(tokio::spawn(async move {
            while let Some(event) = central.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event
                    && gone == id
                {
                    info!("peripheral disconnected");
                    let _ = events.send(TransportEvent::Disconnected).await;
                    return;
                }
            }
        }));

        Ok(())
    }

    /// Drop the link and report `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), BleError> {
        self.link.lock().await.clear();
        let result = self.peripheral.disconnect().await;
        let _ = self.events.send(TransportEvent::Disconnected).await;
        result.map_err(BleError::from)
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        info!("connecting to {}", self.name);
        if let Err(e) = self.open_link().await {
            warn!("connect to {} failed: {}", self.name, e);
            self.link.lock().await.clear();
            return Err(e.into());
        }
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let rx = self
            .link
            .lock()
            .await
            .rx
            .clone()
            .ok_or(TransportError::NotConnected)?;
        self.peripheral
            .write(&rx, frame, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::from(BleError::from(e)))
    }
}
