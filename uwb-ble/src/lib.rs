//! UWB BLE transport
//!
//! Carries OoB frames to a UWB peripheral over its UART-style GATT service.
//!
//! # Example
//!
//! ```ignore
//! use uwb_ble::BleTransport;
//! use uwb_session::Transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Scan for devices
//!     for device in uwb_ble::scan(5).await? {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     // Connect to the first device advertising the OoB service
//!     let (transport, mut events) = BleTransport::find(None, 5).await?;
//!     transport.connect().await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

mod ble;

pub use ble::{get_adapter, scan, BleError, BleTransport, UwbDevice};
