//! Internal constants, register addresses, and bit definitions.

use std::time::Duration;

/// Lower bound for any polling interval; shorter requests are clamped so a
/// misconfigured device cannot flood the bus.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(50);

/// First and last 7-bit address probed by a default bus scan.
pub const SCAN_FIRST_ADDRESS: u8 = 0x03;
pub const SCAN_LAST_ADDRESS: u8 = 0x77;

// --- SX150x family (SX1507 / SX1508 / SX1509) ---

/// Values written to RegReset, in order, to trigger a software reset.
pub const SX150X_RESET_SEQUENCE: [u8; 2] = [0x12, 0x34];

/// RegClock bits.
pub mod clock {
    /// Oscillator source field, bits 6:5.
    pub const SOURCE_SHIFT: u8 = 5;
    pub const SOURCE_EXTERNAL: u8 = 0b01;
    pub const SOURCE_INTERNAL: u8 = 0b10;
}

/// RegMisc bits.
pub mod misc {
    /// LED driver mode for bank B (pins 8-15): 1 = logarithmic.
    pub const LOG_BANK_B: u8 = 1 << 7;
    /// ClkX divider field, bits 6:4. 0 disables the LED clock.
    pub const CLKX_SHIFT: u8 = 4;
    pub const CLKX_MASK: u8 = 0b111;
    /// LED driver mode for bank A (pins 0-7): 1 = logarithmic.
    pub const LOG_BANK_A: u8 = 1 << 3;
}

/// Two-bit level shifter codes (RegLevelShifter).
pub mod level_shifter {
    pub const OFF: u8 = 0b00;
    pub const A_TO_B: u8 = 0b01;
    pub const B_TO_A: u8 = 0b10;
}

/// Per-pin LED register block. Absent fields do not exist for that pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedBlock {
    pub t_on: Option<u8>,
    pub i_on: u8,
    pub off: Option<u8>,
    pub t_rise: Option<u8>,
    pub t_fall: Option<u8>,
}

const fn blink(t_on: u8) -> LedBlock {
    LedBlock {
        t_on: Some(t_on),
        i_on: t_on + 1,
        off: Some(t_on + 2),
        t_rise: None,
        t_fall: None,
    }
}

const fn breathe(t_on: u8) -> LedBlock {
    LedBlock {
        t_on: Some(t_on),
        i_on: t_on + 1,
        off: Some(t_on + 2),
        t_rise: Some(t_on + 3),
        t_fall: Some(t_on + 4),
    }
}

const fn intensity_only(i_on: u8) -> LedBlock {
    LedBlock {
        t_on: None,
        i_on,
        off: None,
        t_rise: None,
        t_fall: None,
    }
}

/// SX1507: 4 I/O, byte registers, no keypad, no level shifter.
pub mod sx1507 {
    use super::{blink, breathe, LedBlock};

    pub const REG_INPUT_DISABLE: u8 = 0x00;
    pub const REG_PULL_UP: u8 = 0x03;
    pub const REG_PULL_DOWN: u8 = 0x04;
    pub const REG_OPEN_DRAIN: u8 = 0x05;
    pub const REG_POLARITY: u8 = 0x06;
    pub const REG_DIR: u8 = 0x07;
    pub const REG_DATA: u8 = 0x08;
    pub const REG_INTERRUPT_MASK: u8 = 0x09;
    pub const REG_SENSE: u8 = 0x0A; // RegSense, 1 byte
    pub const REG_INTERRUPT_SOURCE: u8 = 0x0B;
    pub const REG_CLOCK: u8 = 0x0D;
    pub const REG_MISC: u8 = 0x0E;
    pub const REG_LED_DRIVER_ENABLE: u8 = 0x0F;
    pub const REG_DEBOUNCE_CONFIG: u8 = 0x10;
    pub const REG_DEBOUNCE_ENABLE: u8 = 0x11;
    pub const REG_RESET: u8 = 0x7D;

    pub const LEDS: [LedBlock; 4] = [blink(0x12), breathe(0x15), blink(0x1A), breathe(0x1D)];
}

/// SX1508: 8 I/O, byte registers, 4x4 keypad, one level shifter bank pair.
pub mod sx1508 {
    use super::{blink, breathe, intensity_only, LedBlock};

    pub const REG_INPUT_DISABLE: u8 = 0x00;
    pub const REG_PULL_UP: u8 = 0x03;
    pub const REG_PULL_DOWN: u8 = 0x04;
    pub const REG_OPEN_DRAIN: u8 = 0x05;
    pub const REG_POLARITY: u8 = 0x06;
    pub const REG_DIR: u8 = 0x07;
    pub const REG_DATA: u8 = 0x08;
    pub const REG_INTERRUPT_MASK: u8 = 0x09;
    pub const REG_SENSE_HIGH: u8 = 0x0A; // RegSenseHigh, RegSenseLow
    pub const REG_INTERRUPT_SOURCE: u8 = 0x0C;
    pub const REG_LEVEL_SHIFTER: u8 = 0x0E;
    pub const REG_CLOCK: u8 = 0x0F;
    pub const REG_MISC: u8 = 0x10;
    pub const REG_LED_DRIVER_ENABLE: u8 = 0x11;
    pub const REG_DEBOUNCE_CONFIG: u8 = 0x12;
    pub const REG_DEBOUNCE_ENABLE: u8 = 0x13;
    pub const REG_KEY_CONFIG: u8 = 0x14;
    pub const REG_KEY_DATA: u8 = 0x15;
    pub const REG_HIGH_INPUT: u8 = 0x2A;
    pub const REG_RESET: u8 = 0x7D;

    pub const LEDS: [LedBlock; 8] = [
        intensity_only(0x16),
        intensity_only(0x17),
        blink(0x18),
        breathe(0x1B),
        intensity_only(0x20),
        intensity_only(0x21),
        blink(0x22),
        breathe(0x25),
    ];
}

/// SX1509: 16 I/O in two banks. Bank B occupies the lower address of each
/// pair, so the pair reads as a big-endian word.
pub mod sx1509 {
    use super::{blink, breathe, LedBlock};

    pub const REG_INPUT_DISABLE_B: u8 = 0x00;
    pub const REG_PULL_UP_B: u8 = 0x06;
    pub const REG_PULL_DOWN_B: u8 = 0x08;
    pub const REG_OPEN_DRAIN_B: u8 = 0x0A;
    pub const REG_POLARITY_B: u8 = 0x0C;
    pub const REG_DIR_B: u8 = 0x0E;
    pub const REG_DATA_B: u8 = 0x10;
    pub const REG_INTERRUPT_MASK_B: u8 = 0x12;
    pub const REG_SENSE_HIGH_B: u8 = 0x14; // SenseHighB, SenseLowB, SenseHighA, SenseLowA
    pub const REG_INTERRUPT_SOURCE_B: u8 = 0x18;
    pub const REG_LEVEL_SHIFTER_1: u8 = 0x1C;
    pub const REG_CLOCK: u8 = 0x1E;
    pub const REG_MISC: u8 = 0x1F;
    pub const REG_LED_DRIVER_ENABLE_B: u8 = 0x20;
    pub const REG_DEBOUNCE_CONFIG: u8 = 0x22;
    pub const REG_DEBOUNCE_ENABLE_B: u8 = 0x23;
    pub const REG_KEY_CONFIG_1: u8 = 0x25;
    pub const REG_KEY_DATA_1: u8 = 0x27;
    pub const REG_HIGH_INPUT_B: u8 = 0x69;
    pub const REG_RESET: u8 = 0x7D;

    pub const LEDS: [LedBlock; 16] = [
        blink(0x29),
        blink(0x2C),
        blink(0x2F),
        blink(0x32),
        breathe(0x35),
        breathe(0x3A),
        breathe(0x3F),
        breathe(0x44),
        blink(0x49),
        blink(0x4C),
        blink(0x4F),
        blink(0x52),
        breathe(0x55),
        breathe(0x5A),
        breathe(0x5F),
        breathe(0x64),
    ];
}
