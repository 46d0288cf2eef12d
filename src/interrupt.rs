//! Interrupt sense configuration and change detection shared by polled and
//! interrupt-driven inputs.

use crate::gpio::{PinConfig, PinMode};
use log::trace;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// Packs the two-bit sense code of every input pin into `len` bytes, most
/// significant byte first (pin 0 occupies bits 1:0 of the last byte).
/// Non-input pins get code 0 (no edge).
pub fn pack_interrupt_sense(pins: &[PinConfig], len: usize) -> Vec<u8> {
    let packed = pins
        .iter()
        .take(16)
        .enumerate()
        .filter(|(_, pin)| pin.mode == PinMode::Input)
        .fold(0u32, |acc, (i, pin)| {
            acc | ((pin.interrupt.code() as u32) << (2 * i))
        });
    let bytes = packed.to_be_bytes();
    bytes[bytes.len() - len.min(4)..].to_vec()
}

/// Bits of `mask` that must be reported after reading `new`. With no
/// previous value (a forced read) every masked bit counts as changed.
pub fn changed_bits(previous: Option<u16>, new: u16, mask: u16) -> u16 {
    match previous {
        Some(old) => (old ^ new) & mask,
        None => mask,
    }
}

/// Iterates `(pin, level)` for every set bit of `changed`.
pub fn pin_levels(changed: u16, value: u16) -> impl Iterator<Item = (usize, bool)> {
    (0..16)
        .filter(move |i| changed & (1 << i) != 0)
        .map(move |i| (i, value & (1 << i) != 0))
}

/// Collapses overlapping read requests.
///
/// A request that arrives while a read pass is running does not start a
/// second pass; it makes the running pass go round once more when it
/// finishes. Any number of requests during one pass yield one extra pass.
#[derive(Debug, Default)]
pub struct ReadCoalescer {
    busy: AtomicBool,
    again: AtomicBool,
}

impl ReadCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `pass`, or schedules one more run if a pass is in progress.
    /// Returns once no further pass is pending from this caller's side.
    pub async fn run<F, Fut>(&self, mut pass: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        if self.busy.swap(true, Ordering::AcqRel) {
            self.again.store(true, Ordering::Release);
            trace!("Read in progress, queued one more pass");
            return;
        }
        loop {
            self.again.store(false, Ordering::Release);
            pass().await;
            if self.again.load(Ordering::Acquire) {
                continue;
            }
            self.busy.store(false, Ordering::Release);
            // a request may have slipped in between the check and the release
            if self.again.load(Ordering::Acquire) && !self.busy.swap(true, Ordering::AcqRel) {
                continue;
            }
            break;
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::InterruptSense;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn input(sense: InterruptSense) -> PinConfig {
        PinConfig {
            mode: PinMode::Input,
            interrupt: sense,
            ..Default::default()
        }
    }

    #[test]
    fn test_sense_single_byte() {
        let pins = vec![
            input(InterruptSense::Rising),
            input(InterruptSense::Falling),
            PinConfig::with_mode(PinMode::Output),
            input(InterruptSense::Both),
        ];
        assert_eq!(pack_interrupt_sense(&pins, 1), vec![0b11_00_10_01]);
    }

    #[test]
    fn test_sense_is_big_endian_across_bytes() {
        let mut pins = vec![PinConfig::default(); 16];
        pins[0] = input(InterruptSense::Rising);
        pins[15] = input(InterruptSense::Falling);
        assert_eq!(pack_interrupt_sense(&pins, 4), vec![0x80, 0x00, 0x00, 0x01]);
        let mut pins = vec![PinConfig::default(); 8];
        pins[4] = input(InterruptSense::Both);
        assert_eq!(pack_interrupt_sense(&pins, 2), vec![0x03, 0x00]);
    }

    #[test]
    fn test_sense_ignored_on_non_inputs() {
        let mut out = PinConfig::with_mode(PinMode::Output);
        out.interrupt = InterruptSense::Both;
        assert_eq!(pack_interrupt_sense(&[out], 1), vec![0]);
    }

    #[test]
    fn test_only_changed_bits_reported() {
        let mask = 0x0100;
        assert_eq!(changed_bits(Some(0x0000), 0x0100, mask), 0x0100);
        assert_eq!(changed_bits(Some(0x0100), 0x0101, mask), 0);
        assert_eq!(changed_bits(None, 0x0000, mask), mask);
        let levels: Vec<_> = pin_levels(0x0101, 0x0100).collect();
        assert_eq!(levels, vec![(0, false), (8, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_during_a_pass_collapse_into_one() {
        let coalescer = Arc::new(ReadCoalescer::new());
        let passes = Arc::new(AtomicUsize::new(0));

        let run = |c: Arc<ReadCoalescer>, p: Arc<AtomicUsize>| async move {
            c.run(|| {
                let p = p.clone();
                async move {
                    p.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;
        };

        let first = tokio::spawn(run(coalescer.clone(), passes.clone()));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(coalescer.is_busy());
        for _ in 0..3 {
            run(coalescer.clone(), passes.clone()).await;
        }
        first.await.unwrap();
        assert_eq!(passes.load(Ordering::SeqCst), 2);
        assert!(!coalescer.is_busy());
    }
}
