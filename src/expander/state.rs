//! Runtime state of one expander, kept apart from bus I/O.

use crate::gpio::{bitmap, PinConfig, PinMode};
use crate::interrupt::{changed_bits, pin_levels};
use crate::keypad::KeypadConfig;

/// Pin configuration plus the cached register values of one expander.
///
/// Output bits hold the desired data register content; `written` is what
/// the chip last accepted. Reads are compared against `last_read` so that
/// only changed pins are reported.
#[derive(Debug, Clone)]
pub struct ExpanderState {
    pins: Vec<PinConfig>,
    keypad: Option<KeypadConfig>,
    output: u16,
    written: Option<u16>,
    last_read: Option<u16>,
    last_key_data: Option<u16>,
}

impl ExpanderState {
    /// Creates the state with every output off.
    pub fn new(pins: Vec<PinConfig>, keypad: Option<KeypadConfig>) -> Self {
        let leds_off = bitmap(&pins, |_, pin| pin.mode.is_led());
        ExpanderState {
            pins,
            keypad,
            output: leds_off,
            written: None,
            last_read: None,
            last_key_data: None,
        }
    }

    pub fn pins(&self) -> &[PinConfig] {
        &self.pins
    }

    pub fn keypad(&self) -> Option<&KeypadConfig> {
        self.keypad.as_ref()
    }

    /// Pins driven from the data register.
    pub fn driven_mask(&self) -> u16 {
        bitmap(&self.pins, |_, pin| pin.mode.is_driven())
    }

    /// Pins reported from data register reads.
    pub fn input_mask(&self) -> u16 {
        bitmap(&self.pins, |_, pin| pin.mode == PinMode::Input)
    }

    pub fn has_keypad(&self) -> bool {
        self.keypad.is_some() && self.pins.iter().any(|p| p.mode == PinMode::Keypad)
    }

    /// Output bits with one pin changed. LEDs sink current, so an LED that
    /// is on has its data bit cleared.
    fn output_with(&self, pin: usize, on: bool) -> u16 {
        let Some(config) = self.pins.get(pin) else {
            return self.output;
        };
        let high = if config.mode.is_led() { !on } else { on };
        if high {
            self.output | 1 << pin
        } else {
            self.output & !(1 << pin)
        }
    }

    fn pack(&self, output: u16) -> u16 {
        let driven = self.driven_mask();
        (output & driven) | !driven
    }

    /// Sets the logical state of an output or LED pin.
    pub fn set_output(&mut self, pin: usize, on: bool) {
        self.output = self.output_with(pin, on);
    }

    /// Logical state of an output or LED pin.
    pub fn output(&self, pin: usize) -> bool {
        let high = self.output & (1 << pin) != 0;
        match self.pins.get(pin) {
            Some(config) if config.mode.is_led() => !high,
            _ => high,
        }
    }

    /// Data register value to write: driven pins from the output state,
    /// every other bit 1.
    pub fn packed_output(&self) -> u16 {
        self.pack(self.output)
    }

    /// Data register value needed to set one output, or `None` when the
    /// chip already holds it. The state itself is left untouched.
    pub fn pending_output(&self, pin: usize, on: bool) -> Option<u16> {
        let packed = self.pack(self.output_with(pin, on));
        (self.written != Some(packed)).then_some(packed)
    }

    /// Records a successful data register write.
    pub fn mark_written(&mut self, value: u16) {
        self.written = Some(value);
    }

    /// Takes a data register read and returns `(pin, level)` for every
    /// input whose level changed. A forced read reports every input.
    pub fn apply_read(&mut self, value: u16, force: bool) -> Vec<(usize, bool)> {
        let previous = if force { None } else { self.last_read };
        let changed = changed_bits(previous, value, self.input_mask());
        self.last_read = Some(value);
        pin_levels(changed, value).collect()
    }

    /// Takes a key data read and returns the label of a newly pressed key.
    /// Unchanged key data and releases produce nothing.
    pub fn apply_key_data(&mut self, value: u16, force: bool) -> Option<String> {
        let unchanged = self.last_key_data == Some(value);
        self.last_key_data = Some(value);
        if unchanged && !force {
            return None;
        }
        self.keypad
            .as_ref()?
            .decode(value, &self.pins)
            .map(str::to_string)
    }
}
