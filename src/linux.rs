//! Bus transport over Linux `/dev/i2c-N` character devices.
//!
//! Each call runs on tokio's blocking pool. One `LinuxI2CDevice` is opened
//! per slave address on first use and kept for the lifetime of the bus.

use crate::error::{Error, Result};
use crate::i2c::{I2cAddress, I2cBus};
use async_trait::async_trait;
use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
use log::{debug, trace};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// SMBus block transfers carry at most 32 bytes.
const MAX_BLOCK_LEN: usize = 32;

// errno values reported by i2c-dev for a missing acknowledge or a timeout
const ENXIO: i32 = 6;
const ETIMEDOUT: i32 = 110;
const EREMOTEIO: i32 = 121;

fn map_error(address: I2cAddress, err: LinuxI2CError) -> Error {
    let err: io::Error = err.into();
    match err.raw_os_error() {
        Some(ENXIO) | Some(EREMOTEIO) => Error::I2cNack { address },
        Some(ETIMEDOUT) => Error::I2cTimeout { address },
        _ => Error::Io(err),
    }
}

/// A Linux I2C adapter.
#[derive(Clone)]
pub struct LinuxI2cBus {
    path: PathBuf,
    devices: Arc<Mutex<HashMap<u8, LinuxI2CDevice>>>,
}

impl fmt::Debug for LinuxI2cBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinuxI2cBus")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LinuxI2cBus {
    /// Opens `/dev/i2c-<bus_number>`.
    pub fn open(bus_number: u8) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/i2c-{}", bus_number));
        if !path.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        debug!("Opened I2C bus {}", path.display());
        Ok(LinuxI2cBus {
            path,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn with_device<T, F>(&self, address: I2cAddress, op: F) -> Result<T>
    where
        F: FnOnce(&mut LinuxI2CDevice) -> std::result::Result<T, LinuxI2CError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let devices = self.devices.clone();
        tokio::task::spawn_blocking(move || {
            let mut devices = devices.lock().unwrap_or_else(|e| e.into_inner());
            let device = match devices.entry(address.value()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let dev = LinuxI2CDevice::new(&path, address.value() as u16)
                        .map_err(|e| map_error(address, e))?;
                    entry.insert(dev)
                }
            };
            op(device).map_err(|e| map_error(address, e))
        })
        .await
        .map_err(|e| Error::Bus(format!("blocking I2C task failed: {}", e)))?
    }
}

#[async_trait]
impl I2cBus for LinuxI2cBus {
    async fn read_byte(&self, address: I2cAddress, register: u8) -> Result<u8> {
        self.with_device(address, move |d| d.smbus_read_byte_data(register))
            .await
    }

    async fn write_byte(&self, address: I2cAddress, register: u8, value: u8) -> Result<()> {
        self.with_device(address, move |d| d.smbus_write_byte_data(register, value))
            .await
    }

    async fn read_word(&self, address: I2cAddress, register: u8) -> Result<u16> {
        self.with_device(address, move |d| d.smbus_read_word_data(register))
            .await
    }

    async fn write_word(&self, address: I2cAddress, register: u8, value: u16) -> Result<()> {
        self.with_device(address, move |d| d.smbus_write_word_data(register, value))
            .await
    }

    async fn read_block(
        &self,
        address: I2cAddress,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<()> {
        let len = buffer.len();
        if len > MAX_BLOCK_LEN {
            return Err(Error::ArgumentOutOfRange(format!(
                "Block read of {} bytes exceeds {} bytes",
                len, MAX_BLOCK_LEN
            )));
        }
        let data = self
            .with_device(address, move |d| {
                d.smbus_read_i2c_block_data(register, len as u8)
            })
            .await?;
        if data.len() < len {
            return Err(Error::ShortTransfer {
                expected: len,
                actual: data.len(),
            });
        }
        buffer.copy_from_slice(&data[..len]);
        trace!("{} block 0x{:02X}: {:02X?}", address, register, buffer);
        Ok(())
    }

    async fn write_block(&self, address: I2cAddress, register: u8, data: &[u8]) -> Result<()> {
        if data.len() > MAX_BLOCK_LEN {
            return Err(Error::ArgumentOutOfRange(format!(
                "Block write of {} bytes exceeds {} bytes",
                data.len(),
                MAX_BLOCK_LEN
            )));
        }
        let data = data.to_vec();
        self.with_device(address, move |d| {
            d.smbus_write_i2c_block_data(register, &data)
        })
        .await
    }

    async fn receive_byte(&self, address: I2cAddress) -> Result<u8> {
        self.with_device(address, |d| d.smbus_read_byte()).await
    }

    async fn send_byte(&self, address: I2cAddress, value: u8) -> Result<()> {
        self.with_device(address, move |d| d.smbus_write_byte(value))
            .await
    }

    async fn read_raw(&self, address: I2cAddress, buffer: &mut [u8]) -> Result<()> {
        let len = buffer.len();
        let data = self
            .with_device(address, move |d| {
                let mut data = vec![0u8; len];
                d.read(&mut data).map(|_| data)
            })
            .await?;
        buffer.copy_from_slice(&data);
        Ok(())
    }

    async fn write_raw(&self, address: I2cAddress, data: &[u8]) -> Result<()> {
        let data = data.to_vec();
        self.with_device(address, move |d| d.write(&data)).await
    }

    async fn quick(&self, address: I2cAddress, bit: bool) -> Result<()> {
        self.with_device(address, move |d| d.smbus_write_quick(bit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bus_is_reported() {
        assert!(matches!(LinuxI2cBus::open(250), Err(Error::Io(_))));
    }

    #[test]
    fn test_errno_mapping() {
        let addr = I2cAddress::new(0x20).unwrap();
        let nack = LinuxI2CError::Io(io::Error::from_raw_os_error(EREMOTEIO));
        assert!(matches!(map_error(addr, nack), Error::I2cNack { .. }));
        let timeout = LinuxI2CError::Io(io::Error::from_raw_os_error(ETIMEDOUT));
        assert!(matches!(map_error(addr, timeout), Error::I2cTimeout { .. }));
    }
}
