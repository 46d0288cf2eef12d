//! # i2c-points
//!
//! A Rust crate for driving I²C peripheral chips (GPIO expanders, LED
//! drivers, register-mapped sensors) and exposing them to a host as named,
//! typed points.
//!
//! Bus access goes through the [`I2cBus`] trait. The `linux` feature adds a
//! transport over `/dev/i2c-N` built on the `i2cdev` crate; [`MockBus`] is an
//! in-memory register file for tests.
//!
//! ## Features
//!
//! *   Shared bus access with per-device views ([`Bus`], [`BusDevice`]):
//!     *   SMBus byte, word, block and raw transfers.
//!     *   Big-endian and little-endian word adapters ([`WordOrder`]).
//!     *   Bus-wide transactions for multi-register sequences.
//!     *   Address scanning.
//! *   Cancellable [`Delay`] and a periodic [`Poller`] (50 ms minimum interval,
//!     one pending run per start, stoppable from its own callback).
//! *   Device handler lifecycle ([`DeviceHandler`], [`create_handler`],
//!     [`DeviceManager`]).
//! *   Generic register handler ([`GenericHandler`]):
//!     *   14 numeric register encodings ([`Encoding`]).
//!     *   Per-register read, write and polling settings.
//! *   Semtech SX1507 / SX1508 / SX1509 expander handler ([`Sx150xHandler`]):
//!     *   Inputs, outputs, pull resistors, open drain, polarity, debounce.
//!     *   LED driver modes: static, single shot, blink, breathe.
//!     *   Level shifter pairs (SX1508, SX1509).
//!     *   Keypad scanning (SX1508, SX1509).
//!     *   Change detection from polling or from an interrupt point.
//!
//! ## Configuration
//!
//! Devices are described in JSON (see [`AdapterConfig`] and [`DeviceConfig`]):
//!
//! ```json
//! {
//!   "busNumber": 1,
//!   "devices": [
//!     {
//!       "address": 62,
//!       "type": "SX1509",
//!       "name": "io",
//!       "settings": {
//!         "pollingInterval": 100,
//!         "pins": [ { "mode": "output" }, { "mode": "input", "pull": "up" } ]
//!       }
//!     },
//!     {
//!       "address": 72,
//!       "type": "Generic",
//!       "settings": {
//!         "registers": [ { "register": 16, "type": "uint16_be", "pollingInterval": 1000 } ]
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! ## Basic Usage
//!
//! ```no_run
//! use i2c_points::{AdapterConfig, Bus, DeviceManager, MockBus, PointRegistry, Result};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     // Optional: Initialize logging
//!     // env_logger::init();
//!
//!     let config = AdapterConfig::from_json_str(
//!         r#"{ "devices": [ { "address": 62, "type": "SX1508", "name": "io" } ] }"#,
//!     )?;
//!
//!     // Swap in `LinuxI2cBus::open(config.bus_number)?` with the `linux` feature.
//!     let transport = Arc::new(MockBus::new());
//!     transport.add_device(0x3E);
//!
//!     let host = Arc::new(PointRegistry::new());
//!     let mut manager = DeviceManager::new(Bus::new(transport), host.clone());
//!     let report = manager.start_all(&config.devices).await;
//!     println!("Started: {:?}, failed: {:?}", report.started, report.failed);
//!
//!     host.write("io.00", true)?;
//!
//!     manager.stop_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Point Naming
//!
//! *   Expander pins are `<prefix>.NN` with a two-digit pin number; the keypad
//!     publishes to `<prefix>.key`.
//! *   Generic registers use their configured name, or `<prefix>.0xNN`.
//! *   Without a configured name the prefix is `I2C-0xNN`.
//!
//! ## License
//!
//! This project is licensed under the WTFPL - see the [LICENSE](LICENSE) file for details.

mod consts;
mod error;
pub mod codec;
pub mod delay;
pub mod device;
pub mod expander;
pub mod generic;
pub mod gpio;
pub mod host;
pub mod i2c;
pub mod interrupt;
pub mod keypad;
#[cfg(feature = "linux")]
pub mod linux;
pub mod manager;
pub mod mock;
pub mod polling;
pub mod pwm;

pub use codec::Encoding;
pub use delay::{Delay, DelayCanceller, DelayOutcome};
pub use device::{create_handler, DeviceConfig, DeviceContext, DeviceHandler};
pub use error::{Error, Result};
pub use expander::{ExpanderSettings, Sx150xHandler, Variant};
pub use generic::{GenericHandler, GenericSettings};
pub use gpio::{GpioPin, GpioPull, PinConfig, PinMode};
pub use host::{Host, PointRegistry, PointSpec, PointValue};
pub use i2c::{Bus, BusDevice, I2cAddress, I2cBus, WordOrder};
#[cfg(feature = "linux")]
pub use linux::LinuxI2cBus;
pub use manager::{AdapterConfig, DeviceManager, StartReport};
pub use mock::MockBus;
pub use polling::Poller;
