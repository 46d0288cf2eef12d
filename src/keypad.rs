//! Key matrix scanning: configuration packing and key decoding.

use crate::gpio::{PinConfig, PinMode};
use log::trace;
use serde::Deserialize;

/// Bit layout of the key scan configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyConfigLayout {
    /// 8-pin chips: one byte, `[7:6]` auto-sleep, `[5:4]` scan time,
    /// `[3:2]` rows - 1, `[1:0]` columns - 1. Up to 4x4 keys.
    Byte,
    /// 16-pin chips: a big-endian word. High byte: `[6:4]` auto-sleep,
    /// `[2:0]` scan time. Low byte: `[5:3]` rows - 1, `[2:0]` columns - 1.
    /// Up to 8x8 keys.
    Word,
}

impl KeyConfigLayout {
    /// Largest row (and column) count of the layout.
    pub fn max_lines(self) -> u8 {
        match self {
            KeyConfigLayout::Byte => 4,
            KeyConfigLayout::Word => 8,
        }
    }
}

/// Key matrix configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeypadConfig {
    pub rows: u8,
    pub columns: u8,
    /// Auto-sleep code (0 = off).
    pub auto_sleep: u8,
    /// Scan time per row code.
    pub scan_time: u8,
    /// Row-major labels; `key_values[row][col]`.
    pub key_values: Vec<Vec<String>>,
}

impl Default for KeypadConfig {
    fn default() -> Self {
        KeypadConfig {
            rows: 2,
            columns: 1,
            auto_sleep: 0,
            scan_time: 0,
            key_values: Vec::new(),
        }
    }
}

impl KeypadConfig {
    /// Packs the key scan configuration register(s). A row count of zero
    /// would switch the engine off, so rows are clamped to at least 2.
    pub fn pack(&self, layout: KeyConfigLayout) -> u16 {
        let max = layout.max_lines();
        let rows = self.rows.clamp(2, max) - 1;
        let cols = self.columns.clamp(1, max) - 1;
        match layout {
            KeyConfigLayout::Byte => {
                let value = ((self.auto_sleep & 0b11) << 6)
                    | ((self.scan_time & 0b11) << 4)
                    | ((rows & 0b11) << 2)
                    | (cols & 0b11);
                value as u16
            }
            KeyConfigLayout::Word => {
                let config1 = ((self.auto_sleep & 0b111) << 4) | (self.scan_time & 0b111);
                let config2 = ((rows & 0b111) << 3) | (cols & 0b111);
                u16::from_be_bytes([config1, config2])
            }
        }
    }

    /// Decodes the pressed key from a key data value.
    ///
    /// A pressed key clears exactly one row bit (lower half of the pins) and
    /// one column bit (upper half). Only keypad-mode pins inside the
    /// configured row and column counts are considered; anything other than
    /// a single row and a single column yields `None`.
    pub fn decode(&self, key_data: u16, pins: &[PinConfig]) -> Option<&str> {
        let half = pins.len() / 2;
        let mut row = None;
        let mut col = None;
        let mut ambiguous = false;
        for (i, pin) in pins.iter().enumerate() {
            if pin.mode != PinMode::Keypad || key_data & (1 << i) != 0 {
                continue;
            }
            let (slot, line, limit) = if i < half {
                (&mut row, i, self.rows as usize)
            } else {
                (&mut col, i - half, self.columns as usize)
            };
            if line >= limit {
                continue;
            }
            if slot.replace(line).is_some() {
                ambiguous = true;
            }
        }
        if ambiguous {
            trace!("Ambiguous key data 0x{:04X}", key_data);
            return None;
        }
        let (r, c) = (row?, col?);
        self.key_values
            .get(r)
            .and_then(|cols| cols.get(c))
            .map(String::as_str)
    }
}
