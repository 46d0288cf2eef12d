//! In-memory bus transport for tests and dry runs.
//!
//! [`MockBus`] models each attached device as a 256-byte register file with
//! auto-increment, records every transfer, and can be told to fail.

use crate::error::{Error, Result};
use crate::i2c::{I2cAddress, I2cBus};
use async_trait::async_trait;
use log::trace;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// One recorded transfer. `register` is `None` for unaddressed transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Read {
        address: u8,
        register: Option<u8>,
        len: usize,
    },
    Write {
        address: u8,
        register: Option<u8>,
        data: Vec<u8>,
    },
    Quick {
        address: u8,
        bit: bool,
    },
}

#[derive(Debug, Default)]
struct MockState {
    devices: HashSet<u8>,
    registers: HashMap<(u8, u8), u8>,
    raw_input: HashMap<u8, VecDeque<u8>>,
    ops: Vec<BusOp>,
    fail_next: usize,
    failing: HashSet<u8>,
}

/// Simulated bus. Unknown addresses NACK.
#[derive(Debug, Default)]
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attaches a device that acknowledges at `address`.
    pub fn add_device(&self, address: u8) {
        self.lock().devices.insert(address);
    }

    pub fn set_register(&self, address: u8, register: u8, value: u8) {
        self.lock().registers.insert((address, register), value);
    }

    /// Current content of a register (0 if never written).
    pub fn register(&self, address: u8, register: u8) -> u8 {
        self.lock()
            .registers
            .get(&(address, register))
            .copied()
            .unwrap_or(0)
    }

    /// Queues bytes returned by unaddressed reads from `address`.
    pub fn push_raw(&self, address: u8, bytes: &[u8]) {
        self.lock()
            .raw_input
            .entry(address)
            .or_default()
            .extend(bytes.iter().copied());
    }

    /// Makes the next `count` transfers fail with a bus error.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Makes every transfer to `address` fail until cleared.
    pub fn set_failing(&self, address: u8, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(address);
        } else {
            state.failing.remove(&address);
        }
    }

    /// All transfers so far, oldest first.
    pub fn ops(&self) -> Vec<BusOp> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Payloads of every write to `register` on `address`, oldest first.
    pub fn writes_to(&self, address: u8, register: Option<u8>) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BusOp::Write {
                    address: a,
                    register: r,
                    data,
                } if *a == address && *r == register => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of reads of `register` on `address`.
    pub fn reads_of(&self, address: u8, register: Option<u8>) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| {
                matches!(op, BusOp::Read { address: a, register: r, .. }
                    if *a == address && *r == register)
            })
            .count()
    }

    fn begin(&self, address: I2cAddress, op: BusOp) -> Result<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        trace!("mock: {:?}", op);
        state.ops.push(op);
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::Bus("injected failure".to_string()));
        }
        if state.failing.contains(&address.value()) {
            return Err(Error::I2cTimeout { address });
        }
        if !state.devices.contains(&address.value()) {
            return Err(Error::I2cNack { address });
        }
        Ok(state)
    }

    fn read_into(&self, address: I2cAddress, register: u8, buffer: &mut [u8]) -> Result<()> {
        let state = self.begin(
            address,
            BusOp::Read {
                address: address.value(),
                register: Some(register),
                len: buffer.len(),
            },
        )?;
        for (i, b) in buffer.iter_mut().enumerate() {
            let reg = register.wrapping_add(i as u8);
            *b = state
                .registers
                .get(&(address.value(), reg))
                .copied()
                .unwrap_or(0);
        }
        Ok(())
    }

    fn write_from(&self, address: I2cAddress, register: u8, data: &[u8]) -> Result<()> {
        let mut state = self.begin(
            address,
            BusOp::Write {
                address: address.value(),
                register: Some(register),
                data: data.to_vec(),
            },
        )?;
        for (i, b) in data.iter().enumerate() {
            let reg = register.wrapping_add(i as u8);
            state.registers.insert((address.value(), reg), *b);
        }
        Ok(())
    }
}

#[async_trait]
impl I2cBus for MockBus {
    async fn read_byte(&self, address: I2cAddress, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(address, register, &mut buf)?;
        Ok(buf[0])
    }

    async fn write_byte(&self, address: I2cAddress, register: u8, value: u8) -> Result<()> {
        self.write_from(address, register, &[value])
    }

    async fn read_word(&self, address: I2cAddress, register: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(address, register, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    async fn write_word(&self, address: I2cAddress, register: u8, value: u16) -> Result<()> {
        self.write_from(address, register, &value.to_le_bytes())
    }

    async fn read_block(
        &self,
        address: I2cAddress,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<()> {
        self.read_into(address, register, buffer)
    }

    async fn write_block(&self, address: I2cAddress, register: u8, data: &[u8]) -> Result<()> {
        self.write_from(address, register, data)
    }

    async fn receive_byte(&self, address: I2cAddress) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_raw(address, &mut buf).await?;
        Ok(buf[0])
    }

    async fn send_byte(&self, address: I2cAddress, value: u8) -> Result<()> {
        self.write_raw(address, &[value]).await
    }

    async fn read_raw(&self, address: I2cAddress, buffer: &mut [u8]) -> Result<()> {
        let mut state = self.begin(
            address,
            BusOp::Read {
                address: address.value(),
                register: None,
                len: buffer.len(),
            },
        )?;
        let queue = state.raw_input.entry(address.value()).or_default();
        for b in buffer.iter_mut() {
            *b = queue.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    async fn write_raw(&self, address: I2cAddress, data: &[u8]) -> Result<()> {
        self.begin(
            address,
            BusOp::Write {
                address: address.value(),
                register: None,
                data: data.to_vec(),
            },
        )?;
        Ok(())
    }

    async fn quick(&self, address: I2cAddress, bit: bool) -> Result<()> {
        self.begin(
            address,
            BusOp::Quick {
                address: address.value(),
                bit,
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_address_nacks() {
        let bus = MockBus::new();
        let addr = I2cAddress::new(0x50).unwrap();
        assert!(matches!(
            bus.read_byte(addr, 0).await,
            Err(Error::I2cNack { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let bus = MockBus::new();
        bus.add_device(0x50);
        let addr = I2cAddress::new(0x50).unwrap();
        bus.fail_next(1);
        assert!(bus.write_byte(addr, 1, 2).await.is_err());
        assert!(bus.write_byte(addr, 1, 2).await.is_ok());
        assert_eq!(bus.writes_to(0x50, Some(1)).len(), 2);
        assert_eq!(bus.register(0x50, 1), 2);
    }

    #[tokio::test]
    async fn test_raw_reads_drain_queue() {
        let bus = MockBus::new();
        bus.add_device(0x40);
        bus.push_raw(0x40, &[1, 2, 3]);
        let addr = I2cAddress::new(0x40).unwrap();
        let mut buf = [0u8; 2];
        bus.read_raw(addr, &mut buf).await.unwrap();
        assert_eq!(buf, [1, 2]);
        assert_eq!(bus.receive_byte(addr).await.unwrap(), 3);
        assert_eq!(bus.receive_byte(addr).await.unwrap(), 0);
    }
}
