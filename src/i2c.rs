//! Bus access: the transport trait, the shared bus, and address-bound
//! device handles with their word byte-order adapters.

use crate::consts;
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, trace};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// A validated 7-bit I2C slave address.
/// Use `I2cAddress::new(addr)` to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct I2cAddress(u8);

impl I2cAddress {
    /// Creates a 7-bit address, checking validity (0-127).
    pub fn new(addr: u8) -> Result<Self> {
        if addr <= 0x7F {
            Ok(I2cAddress(addr))
        } else {
            Err(Error::InvalidAddress(addr))
        }
    }

    /// Returns the raw 7-bit address.
    #[inline]
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for I2cAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Raw bus transport.
///
/// Word transfers use the transport's native (SMBus, little-endian) order;
/// byte-order adaptation happens in [`BusDevice`]. Implementations are
/// expected to make each single call atomic on the wire.
#[async_trait]
pub trait I2cBus: Send + Sync {
    async fn read_byte(&self, address: I2cAddress, register: u8) -> Result<u8>;
    async fn write_byte(&self, address: I2cAddress, register: u8, value: u8) -> Result<()>;
    async fn read_word(&self, address: I2cAddress, register: u8) -> Result<u16>;
    async fn write_word(&self, address: I2cAddress, register: u8, value: u16) -> Result<()>;
    /// Reads `buffer.len()` bytes starting at `register`.
    async fn read_block(&self, address: I2cAddress, register: u8, buffer: &mut [u8])
        -> Result<()>;
    /// Writes `data` starting at `register`.
    async fn write_block(&self, address: I2cAddress, register: u8, data: &[u8]) -> Result<()>;
    /// Reads one byte without a register address.
    async fn receive_byte(&self, address: I2cAddress) -> Result<u8>;
    /// Writes one byte without a register address.
    async fn send_byte(&self, address: I2cAddress, value: u8) -> Result<()>;
    /// Plain I2C read of `buffer.len()` bytes, no register addressing.
    async fn read_raw(&self, address: I2cAddress, buffer: &mut [u8]) -> Result<()>;
    /// Plain I2C write, no register addressing.
    async fn write_raw(&self, address: I2cAddress, data: &[u8]) -> Result<()>;
    /// SMBus quick command.
    async fn quick(&self, address: I2cAddress, bit: bool) -> Result<()>;

    /// Probes every address in `range` and returns those that acknowledged.
    /// NACKs and timeouts are expected and skipped silently.
    async fn scan(&self, range: RangeInclusive<u8>) -> Result<Vec<u8>> {
        let mut found = Vec::new();
        for addr in range {
            let address = I2cAddress::new(addr)?;
            match self.receive_byte(address).await {
                Ok(_) => found.push(addr),
                Err(Error::I2cNack { .. }) | Err(Error::I2cTimeout { .. }) => {}
                Err(e) => {
                    debug!("Error scanning address {}: {}", address, e);
                }
            }
        }
        Ok(found)
    }
}

/// Byte order of a chip's 16-bit registers.
///
/// `BigEndian` swaps bytes around the little-endian transport (the high
/// byte lives at the lower register address); `LittleEndian` passes words
/// through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordOrder {
    BigEndian,
    #[default]
    LittleEndian,
}

impl WordOrder {
    /// Converts between chip order and transport order. The conversion is
    /// its own inverse.
    #[inline]
    pub fn convert(self, value: u16) -> u16 {
        match self {
            WordOrder::BigEndian => value.swap_bytes(),
            WordOrder::LittleEndian => value,
        }
    }
}

/// A transport shared by every device on one physical bus, plus the lock
/// used to make multi-step sequences atomic across devices.
#[derive(Clone)]
pub struct Bus {
    transport: Arc<dyn I2cBus>,
    lock: Arc<Mutex<()>>,
}

impl Bus {
    pub fn new(transport: Arc<dyn I2cBus>) -> Self {
        Bus {
            transport,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Binds a device handle to `address` using the given word order.
    pub fn device(&self, address: I2cAddress, order: WordOrder) -> BusDevice {
        BusDevice {
            transport: self.transport.clone(),
            lock: self.lock.clone(),
            address,
            order,
        }
    }

    /// Scans the default address range 0x03..=0x77.
    pub async fn scan_default(&self) -> Result<Vec<u8>> {
        self.scan(consts::SCAN_FIRST_ADDRESS..=consts::SCAN_LAST_ADDRESS)
            .await
    }

    pub async fn scan(&self, range: RangeInclusive<u8>) -> Result<Vec<u8>> {
        let _guard = self.lock.lock().await;
        let found = self.transport.scan(range).await?;
        debug!("Bus scan found {} device(s): {:02X?}", found.len(), found);
        Ok(found)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus").finish_non_exhaustive()
    }
}

/// Address-bound access to one chip.
#[derive(Clone)]
pub struct BusDevice {
    transport: Arc<dyn I2cBus>,
    lock: Arc<Mutex<()>>,
    address: I2cAddress,
    order: WordOrder,
}

impl fmt::Debug for BusDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusDevice")
            .field("address", &self.address)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl BusDevice {
    pub fn address(&self) -> I2cAddress {
        self.address
    }

    pub fn word_order(&self) -> WordOrder {
        self.order
    }

    /// Holds the bus-wide lock for the lifetime of the guard. Use it around
    /// sequences that must not interleave with other devices' transfers.
    pub async fn transaction(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    pub async fn read_byte(&self, register: u8) -> Result<u8> {
        let value = self.transport.read_byte(self.address, register).await?;
        trace!("{} read reg 0x{:02X} = 0x{:02X}", self.address, register, value);
        Ok(value)
    }

    pub async fn write_byte(&self, register: u8, value: u8) -> Result<()> {
        trace!("{} write reg 0x{:02X} = 0x{:02X}", self.address, register, value);
        self.transport.write_byte(self.address, register, value).await
    }

    /// Reads a 16-bit register in the chip's byte order.
    pub async fn read_word(&self, register: u8) -> Result<u16> {
        let raw = self.transport.read_word(self.address, register).await?;
        let value = self.order.convert(raw);
        trace!("{} read word 0x{:02X} = 0x{:04X}", self.address, register, value);
        Ok(value)
    }

    /// Writes a 16-bit register in the chip's byte order.
    pub async fn write_word(&self, register: u8, value: u16) -> Result<()> {
        trace!("{} write word 0x{:02X} = 0x{:04X}", self.address, register, value);
        self.transport
            .write_word(self.address, register, self.order.convert(value))
            .await
    }

    pub async fn read_block(&self, register: u8, buffer: &mut [u8]) -> Result<()> {
        self.transport
            .read_block(self.address, register, buffer)
            .await?;
        trace!("{} read block 0x{:02X}: {:02X?}", self.address, register, buffer);
        Ok(())
    }

    pub async fn write_block(&self, register: u8, data: &[u8]) -> Result<()> {
        trace!("{} write block 0x{:02X}: {:02X?}", self.address, register, data);
        self.transport.write_block(self.address, register, data).await
    }

    pub async fn receive_byte(&self) -> Result<u8> {
        self.transport.receive_byte(self.address).await
    }

    pub async fn send_byte(&self, value: u8) -> Result<()> {
        self.transport.send_byte(self.address, value).await
    }

    pub async fn read_raw(&self, buffer: &mut [u8]) -> Result<()> {
        self.transport.read_raw(self.address, buffer).await
    }

    pub async fn write_raw(&self, data: &[u8]) -> Result<()> {
        self.transport.write_raw(self.address, data).await
    }

    pub async fn quick(&self, bit: bool) -> Result<()> {
        self.transport.quick(self.address, bit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;

    #[test]
    fn test_i2c_address_creation() {
        assert_eq!(I2cAddress::new(0x20).unwrap().value(), 0x20);
        assert!(I2cAddress::new(0x7F).is_ok());
        assert!(matches!(
            I2cAddress::new(0x80),
            Err(Error::InvalidAddress(0x80))
        ));
        assert_eq!(format!("{}", I2cAddress::new(0x3E).unwrap()), "0x3E");
    }

    #[test]
    fn test_word_order_conversion() {
        assert_eq!(WordOrder::BigEndian.convert(0x1234), 0x3412);
        assert_eq!(WordOrder::LittleEndian.convert(0x1234), 0x1234);
        for v in [0u16, 1, 0x00FF, 0xFF00, 0xBEEF] {
            assert_eq!(WordOrder::BigEndian.convert(WordOrder::BigEndian.convert(v)), v);
        }
    }

    #[tokio::test]
    async fn test_big_endian_word_lands_high_byte_first() {
        let mock = Arc::new(MockBus::new());
        mock.add_device(0x3E);
        let bus = Bus::new(mock.clone());
        let addr = I2cAddress::new(0x3E).unwrap();

        let be = bus.device(addr, WordOrder::BigEndian);
        be.write_word(0x10, 0xAB01).await.unwrap();
        assert_eq!(mock.register(0x3E, 0x10), 0xAB);
        assert_eq!(mock.register(0x3E, 0x11), 0x01);
        assert_eq!(be.read_word(0x10).await.unwrap(), 0xAB01);

        let le = bus.device(addr, WordOrder::LittleEndian);
        assert_eq!(le.read_word(0x10).await.unwrap(), 0x01AB);
    }

    #[tokio::test]
    async fn test_byte_access_ignores_word_order() {
        let mock = Arc::new(MockBus::new());
        mock.add_device(0x20);
        let bus = Bus::new(mock.clone());
        let dev = bus.device(I2cAddress::new(0x20).unwrap(), WordOrder::BigEndian);
        dev.write_byte(0x05, 0x5A).await.unwrap();
        assert_eq!(dev.read_byte(0x05).await.unwrap(), 0x5A);
    }

    #[tokio::test]
    async fn test_scan_reports_responding_addresses() {
        let mock = Arc::new(MockBus::new());
        mock.add_device(0x20);
        mock.add_device(0x48);
        let bus = Bus::new(mock);
        assert_eq!(bus.scan_default().await.unwrap(), vec![0x20, 0x48]);
        assert_eq!(bus.scan(0x40..=0x4F).await.unwrap(), vec![0x48]);
    }
}
