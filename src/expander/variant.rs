//! Supported chip models and their register tables.

use crate::consts::{self, sx1507, sx1508, sx1509, LedBlock};
use crate::error::{Error, Result};
use crate::gpio::Feature;
use crate::keypad::KeyConfigLayout;
use std::fmt;
use std::str::FromStr;

/// Access width of the per-pin registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    Byte,
    /// Big-endian word: bank B at the lower address.
    Word,
}

/// Physical addresses of one chip model. Absent entries are features the
/// model does not have.
#[derive(Debug, PartialEq, Eq)]
pub struct RegisterTable {
    pub width: RegisterWidth,
    pub input_disable: u8,
    pub pull_up: u8,
    pub pull_down: u8,
    pub open_drain: u8,
    pub polarity: u8,
    pub direction: u8,
    pub data: u8,
    pub interrupt_mask: u8,
    pub sense: u8,
    /// RegSense length in bytes.
    pub sense_len: usize,
    pub interrupt_source: u8,
    pub level_shifter: Option<u8>,
    pub clock: u8,
    pub misc: u8,
    pub led_driver_enable: u8,
    pub debounce_config: u8,
    pub debounce_enable: u8,
    pub key_config: Option<u8>,
    pub key_data: Option<u8>,
    pub high_input: Option<u8>,
    pub reset: u8,
    pub leds: &'static [LedBlock],
}

impl RegisterTable {
    /// Register configured by the bitmap writer for `feature`.
    pub fn feature(&self, feature: Feature) -> Option<u8> {
        match feature {
            Feature::InputDisable => Some(self.input_disable),
            Feature::PullUp => Some(self.pull_up),
            Feature::PullDown => Some(self.pull_down),
            Feature::OpenDrain => Some(self.open_drain),
            Feature::Polarity => Some(self.polarity),
            Feature::Direction => Some(self.direction),
            Feature::InterruptMask => Some(self.interrupt_mask),
            Feature::DebounceEnable => Some(self.debounce_enable),
            Feature::LedDriverEnable => Some(self.led_driver_enable),
            Feature::HighInput => self.high_input,
        }
    }
}

static SX1507_TABLE: RegisterTable = RegisterTable {
    width: RegisterWidth::Byte,
    input_disable: sx1507::REG_INPUT_DISABLE,
    pull_up: sx1507::REG_PULL_UP,
    pull_down: sx1507::REG_PULL_DOWN,
    open_drain: sx1507::REG_OPEN_DRAIN,
    polarity: sx1507::REG_POLARITY,
    direction: sx1507::REG_DIR,
    data: sx1507::REG_DATA,
    interrupt_mask: sx1507::REG_INTERRUPT_MASK,
    sense: sx1507::REG_SENSE,
    sense_len: 1,
    interrupt_source: sx1507::REG_INTERRUPT_SOURCE,
    level_shifter: None,
    clock: sx1507::REG_CLOCK,
    misc: sx1507::REG_MISC,
    led_driver_enable: sx1507::REG_LED_DRIVER_ENABLE,
    debounce_config: sx1507::REG_DEBOUNCE_CONFIG,
    debounce_enable: sx1507::REG_DEBOUNCE_ENABLE,
    key_config: None,
    key_data: None,
    high_input: None,
    reset: sx1507::REG_RESET,
    leds: &sx1507::LEDS,
};

static SX1508_TABLE: RegisterTable = RegisterTable {
    width: RegisterWidth::Byte,
    input_disable: sx1508::REG_INPUT_DISABLE,
    pull_up: sx1508::REG_PULL_UP,
    pull_down: sx1508::REG_PULL_DOWN,
    open_drain: sx1508::REG_OPEN_DRAIN,
    polarity: sx1508::REG_POLARITY,
    direction: sx1508::REG_DIR,
    data: sx1508::REG_DATA,
    interrupt_mask: sx1508::REG_INTERRUPT_MASK,
    sense: sx1508::REG_SENSE_HIGH,
    sense_len: 2,
    interrupt_source: sx1508::REG_INTERRUPT_SOURCE,
    level_shifter: Some(sx1508::REG_LEVEL_SHIFTER),
    clock: sx1508::REG_CLOCK,
    misc: sx1508::REG_MISC,
    led_driver_enable: sx1508::REG_LED_DRIVER_ENABLE,
    debounce_config: sx1508::REG_DEBOUNCE_CONFIG,
    debounce_enable: sx1508::REG_DEBOUNCE_ENABLE,
    key_config: Some(sx1508::REG_KEY_CONFIG),
    key_data: Some(sx1508::REG_KEY_DATA),
    high_input: Some(sx1508::REG_HIGH_INPUT),
    reset: sx1508::REG_RESET,
    leds: &sx1508::LEDS,
};

static SX1509_TABLE: RegisterTable = RegisterTable {
    width: RegisterWidth::Word,
    input_disable: sx1509::REG_INPUT_DISABLE_B,
    pull_up: sx1509::REG_PULL_UP_B,
    pull_down: sx1509::REG_PULL_DOWN_B,
    open_drain: sx1509::REG_OPEN_DRAIN_B,
    polarity: sx1509::REG_POLARITY_B,
    direction: sx1509::REG_DIR_B,
    data: sx1509::REG_DATA_B,
    interrupt_mask: sx1509::REG_INTERRUPT_MASK_B,
    sense: sx1509::REG_SENSE_HIGH_B,
    sense_len: 4,
    interrupt_source: sx1509::REG_INTERRUPT_SOURCE_B,
    level_shifter: Some(sx1509::REG_LEVEL_SHIFTER_1),
    clock: sx1509::REG_CLOCK,
    misc: sx1509::REG_MISC,
    led_driver_enable: sx1509::REG_LED_DRIVER_ENABLE_B,
    debounce_config: sx1509::REG_DEBOUNCE_CONFIG,
    debounce_enable: sx1509::REG_DEBOUNCE_ENABLE_B,
    key_config: Some(sx1509::REG_KEY_CONFIG_1),
    key_data: Some(sx1509::REG_KEY_DATA_1),
    high_input: Some(sx1509::REG_HIGH_INPUT_B),
    reset: sx1509::REG_RESET,
    leds: &sx1509::LEDS,
};

/// A supported SX150x model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Sx1507,
    Sx1508,
    Sx1509,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::Sx1507 => "SX1507",
            Variant::Sx1508 => "SX1508",
            Variant::Sx1509 => "SX1509",
        }
    }

    pub fn pin_count(self) -> usize {
        match self {
            Variant::Sx1507 => 4,
            Variant::Sx1508 => 8,
            Variant::Sx1509 => 16,
        }
    }

    pub fn registers(self) -> &'static RegisterTable {
        match self {
            Variant::Sx1507 => &SX1507_TABLE,
            Variant::Sx1508 => &SX1508_TABLE,
            Variant::Sx1509 => &SX1509_TABLE,
        }
    }

    /// Key scan register layout, `None` without a keypad engine.
    pub fn key_layout(self) -> Option<KeyConfigLayout> {
        match self {
            Variant::Sx1507 => None,
            Variant::Sx1508 => Some(KeyConfigLayout::Byte),
            Variant::Sx1509 => Some(KeyConfigLayout::Word),
        }
    }

    /// Number of bank A pins with a level shifter partner in bank B.
    pub fn level_shifter_pairs(self) -> usize {
        match self {
            Variant::Sx1507 => 0,
            _ => self.pin_count() / 2,
        }
    }

    /// Values written to RegReset to reset the chip.
    pub fn reset_sequence(self) -> [u8; 2] {
        consts::SX150X_RESET_SEQUENCE
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SX1507" => Ok(Variant::Sx1507),
            "SX1508" => Ok(Variant::Sx1508),
            "SX1509" => Ok(Variant::Sx1509),
            _ => Err(Error::UnsupportedDevice(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variant() {
        assert_eq!("sx1509".parse::<Variant>().unwrap(), Variant::Sx1509);
        assert!("SX1506".parse::<Variant>().is_err());
    }

    #[test]
    fn test_tables_cover_every_pin() {
        for v in [Variant::Sx1507, Variant::Sx1508, Variant::Sx1509] {
            assert_eq!(v.registers().leds.len(), v.pin_count(), "{}", v);
            assert_eq!(v.registers().sense_len * 4, v.pin_count(), "{}", v);
        }
    }

    #[test]
    fn test_optional_features() {
        let small = Variant::Sx1507.registers();
        assert!(small.level_shifter.is_none());
        assert!(small.key_config.is_none());
        assert!(small.high_input.is_none());
        assert_eq!(Variant::Sx1507.key_layout(), None);
        assert_eq!(Variant::Sx1508.level_shifter_pairs(), 4);
        assert_eq!(Variant::Sx1509.registers().width, RegisterWidth::Word);
        assert_eq!(small.feature(Feature::HighInput), None);
        assert_eq!(
            Variant::Sx1509.registers().feature(Feature::Direction),
            Some(0x0E)
        );
    }

    #[test]
    fn test_fade_registers_only_on_some_pins() {
        let leds = Variant::Sx1508.registers().leds;
        let fading: Vec<usize> = (0..8).filter(|&i| leds[i].t_rise.is_some()).collect();
        assert_eq!(fading, vec![3, 7]);
        assert!(leds[0].t_on.is_none());
    }
}
