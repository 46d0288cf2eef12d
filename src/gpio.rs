//! Pin configuration for GPIO expanders and the per-pin bitmap writer.

use crate::consts::level_shifter;
use crate::error::{Error, Result};
use crate::pwm::LedConfig;
use serde::Deserialize;

/// Largest pin count of any supported chip.
pub const MAX_PINS: usize = 16;

/// Represents a valid expander pin number (0-15).
/// Use `GpioPin::new(num)` to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpioPin(u8);

impl GpioPin {
    /// Creates a new GpioPin, returning an error if the number is out of range (0-15).
    pub fn new(pin_num: u8) -> Result<Self> {
        if (pin_num as usize) < MAX_PINS {
            Ok(GpioPin(pin_num))
        } else {
            Err(Error::ArgumentOutOfRange(format!(
                "Pin number {} must be 0-{}",
                pin_num,
                MAX_PINS - 1
            )))
        }
    }

    /// Returns the underlying pin number (0-15).
    #[inline]
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Returns the bank (0 = A, pins 0-7; 1 = B, pins 8-15).
    #[inline]
    pub fn bank_index(&self) -> u8 {
        self.0 / 8
    }

    /// Returns the bit mask (1 << pin) for register operations.
    #[inline]
    pub fn mask(&self) -> u16 {
        1u16 << self.0
    }

    /// Point name of the pin, e.g. `"07"`.
    pub fn point_name(&self) -> String {
        format!("{:02}", self.0)
    }
}

/// What a pin is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    #[default]
    Unused,
    Input,
    Output,
    /// LED driver, constant intensity while on.
    LedStatic,
    /// LED driver, one on-period per switch-on.
    LedSingle,
    LedBlink,
    /// Blinking with fade in and fade out.
    LedBreathe,
    /// Row (lower half of the pins) or column (upper half) of the key matrix.
    Keypad,
    LevelShifterAToB,
    LevelShifterBToA,
}

impl PinMode {
    pub fn is_led(self) -> bool {
        matches!(
            self,
            PinMode::LedStatic | PinMode::LedSingle | PinMode::LedBlink | PinMode::LedBreathe
        )
    }

    /// Pins whose level is driven from the data register: outputs and LEDs.
    pub fn is_driven(self) -> bool {
        self == PinMode::Output || self.is_led()
    }

    pub fn is_level_shifter(self) -> bool {
        matches!(self, PinMode::LevelShifterAToB | PinMode::LevelShifterBToA)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpioPull {
    #[default]
    None,
    Up,
    Down,
}

/// Edge(s) on which an input pin raises an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptSense {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl InterruptSense {
    /// Two-bit RegSense code.
    pub fn code(self) -> u8 {
        match self {
            InterruptSense::None => 0b00,
            InterruptSense::Rising => 0b01,
            InterruptSense::Falling => 0b10,
            InterruptSense::Both => 0b11,
        }
    }
}

/// Configuration of one pin. Fields that do not apply to the pin's mode
/// are ignored.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PinConfig {
    pub mode: PinMode,
    pub pull: GpioPull,
    /// Invert the pin level (inputs and outputs only).
    pub invert: bool,
    /// Open-drain drive (outputs and LEDs only).
    pub open_drain: bool,
    /// Debounce the input.
    pub debounce: bool,
    pub interrupt: InterruptSense,
    /// Use the high input voltage threshold, where the chip has one.
    pub high_input: bool,
    pub led: Option<LedConfig>,
}

impl PinConfig {
    pub fn with_mode(mode: PinMode) -> Self {
        PinConfig {
            mode,
            ..Default::default()
        }
    }
}

/// Per-pin registers configured through the bitmap writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    InputDisable,
    PullUp,
    PullDown,
    OpenDrain,
    Polarity,
    /// 1 = input.
    Direction,
    /// 1 = interrupt masked.
    InterruptMask,
    DebounceEnable,
    LedDriverEnable,
    HighInput,
}

impl Feature {
    pub const ALL: [Feature; 10] = [
        Feature::InputDisable,
        Feature::PullUp,
        Feature::PullDown,
        Feature::OpenDrain,
        Feature::Polarity,
        Feature::Direction,
        Feature::InterruptMask,
        Feature::DebounceEnable,
        Feature::LedDriverEnable,
        Feature::HighInput,
    ];

    /// Whether the feature bit is set for the pin at `index` of a chip
    /// with `pin_count` pins.
    pub fn holds(self, index: usize, pin: &PinConfig, pin_count: usize) -> bool {
        let input = pin.mode == PinMode::Input;
        let keypad_row = pin.mode == PinMode::Keypad && index < pin_count / 2;
        let keypad_column = pin.mode == PinMode::Keypad && index >= pin_count / 2;
        match self {
            Feature::InputDisable => pin.mode.is_led(),
            Feature::PullUp => (input && pin.pull == GpioPull::Up) || keypad_column,
            Feature::PullDown => input && pin.pull == GpioPull::Down,
            Feature::OpenDrain => (pin.mode.is_driven() && pin.open_drain) || keypad_row,
            Feature::Polarity => (input || pin.mode == PinMode::Output) && pin.invert,
            Feature::Direction => {
                input || keypad_column || pin.mode == PinMode::Unused || pin.mode.is_level_shifter()
            }
            Feature::InterruptMask => !(input && pin.interrupt != InterruptSense::None),
            Feature::DebounceEnable => (input && pin.debounce) || keypad_column,
            Feature::LedDriverEnable => pin.mode.is_led(),
            Feature::HighInput => input && pin.high_input,
        }
    }

    /// Register bitmap of this feature over all pins.
    pub fn bitmap(self, pins: &[PinConfig]) -> u16 {
        let count = pins.len();
        bitmap(pins, |i, pin| self.holds(i, pin, count))
    }
}

/// ORs `1 << i` for every pin `i` for which `predicate` holds.
pub fn bitmap<F>(pins: &[PinConfig], predicate: F) -> u16
where
    F: Fn(usize, &PinConfig) -> bool,
{
    pins.iter()
        .take(MAX_PINS)
        .enumerate()
        .filter(|(i, pin)| predicate(*i, pin))
        .fold(0u16, |acc, (i, _)| acc | (1 << i))
}

/// Packs the two-bit level shifter code of the first `pairs` pins (bank A).
/// Bank B pins are the partners and carry no code of their own.
pub fn pack_level_shifter(pins: &[PinConfig], pairs: usize) -> u16 {
    pins.iter()
        .take(pairs.min(8))
        .enumerate()
        .fold(0u16, |acc, (i, pin)| {
            let code = match pin.mode {
                PinMode::LevelShifterAToB => level_shifter::A_TO_B,
                PinMode::LevelShifterBToA => level_shifter::B_TO_A,
                _ => level_shifter::OFF,
            };
            acc | ((code as u16) << (2 * i))
        })
}

/// Pads or truncates a configured pin list to the chip's pin count.
/// Missing entries become unused pins.
pub fn normalize_pins(mut pins: Vec<PinConfig>, pin_count: usize) -> Vec<PinConfig> {
    pins.resize_with(pin_count, PinConfig::default);
    pins
}
