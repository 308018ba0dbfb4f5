//! BLE GATT constants for the UWB OoB service
//!
//! The device exposes a UART-like service: the phone writes frames to RX and
//! receives frames as notifications on TX.

use uuid::Uuid;

/// BLE Service UUID: 6e400001-b5a3-f393-e0a9-e50e24dcca9e
pub const SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

/// RX Characteristic UUID (phone writes)
pub const RX_CHAR_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// TX Characteristic UUID (device notifies)
pub const TX_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Client Characteristic Configuration Descriptor
pub const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

pub const SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
pub const RX_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const TX_CHAR: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
pub const CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);
