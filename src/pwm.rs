//! LED driver timing and the oscillator registers that feed it.

use crate::consts::{clock, misc};
use crate::gpio::PinMode;
use log::warn;
use serde::Deserialize;

/// Largest value of the 5-bit time fields (TOn, TOff, TRise, TFall).
pub const MAX_TIME: u8 = 31;
/// Largest value of the 3-bit off intensity field.
pub const MAX_OFF_INTENSITY: u8 = 7;

/// LED timing and intensity of one pin, in chip register units.
///
/// Times are 0-31 and the on intensity is 0-255. The off intensity is
/// 0-7. Out-of-range values are clamped rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedConfig {
    pub on_time: u8,
    pub on_intensity: u8,
    pub off_time: u8,
    pub off_intensity: u8,
    pub rise_time: u8,
    pub fall_time: u8,
}

impl Default for LedConfig {
    fn default() -> Self {
        LedConfig {
            on_time: 0,
            on_intensity: 255,
            off_time: 0,
            off_intensity: 0,
            rise_time: 0,
            fall_time: 0,
        }
    }
}

impl LedConfig {
    /// Returns a copy with every field inside its register range.
    pub fn clamped(&self) -> LedConfig {
        let clamp = |name: &str, value: u8, max: u8| {
            if value > max {
                warn!("LED {} {} out of range, clamped to {}", name, value, max);
                max
            } else {
                value
            }
        };
        LedConfig {
            on_time: clamp("on time", self.on_time, MAX_TIME),
            on_intensity: self.on_intensity,
            off_time: clamp("off time", self.off_time, MAX_TIME),
            off_intensity: clamp("off intensity", self.off_intensity, MAX_OFF_INTENSITY),
            rise_time: clamp("rise time", self.rise_time, MAX_TIME),
            fall_time: clamp("fall time", self.fall_time, MAX_TIME),
        }
    }
}

/// Register values of one pin's LED block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedRegisters {
    pub t_on: u8,
    pub i_on: u8,
    /// TOff in bits 7:3, off intensity in bits 2:0.
    pub off: u8,
    pub t_rise: u8,
    pub t_fall: u8,
}

/// Computes the LED block for a pin. Pins that are not LEDs get all zeros.
pub fn led_registers(mode: PinMode, led: Option<&LedConfig>) -> LedRegisters {
    if !mode.is_led() {
        return LedRegisters::default();
    }
    let led = led.copied().unwrap_or_default().clamped();
    let mut regs = LedRegisters {
        t_on: 0,
        i_on: led.on_intensity,
        off: led.off_intensity,
        t_rise: 0,
        t_fall: 0,
    };
    match mode {
        PinMode::LedSingle => {
            regs.t_on = led.on_time;
        }
        PinMode::LedBlink => {
            regs.t_on = led.on_time;
            regs.off |= led.off_time << 3;
        }
        PinMode::LedBreathe => {
            regs.t_on = led.on_time;
            regs.off |= led.off_time << 3;
            regs.t_rise = led.rise_time;
            regs.t_fall = led.fall_time;
        }
        _ => {}
    }
    regs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    /// 2 MHz internal oscillator.
    #[default]
    Internal,
    /// OSCIO pin as clock input.
    External,
}

/// Chip-level oscillator, LED clock and debounce settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClockSettings {
    pub source: ClockSource,
    /// ClkX divider exponent for the LED driver, 1-7 (fOSC / 2^(n-1)).
    pub led_divider: u8,
    /// Logarithmic dimming for bank A.
    pub logarithmic_a: bool,
    /// Logarithmic dimming for bank B.
    pub logarithmic_b: bool,
    /// Debounce time code, 0-7 (0.5 ms * 2^n at 2 MHz).
    pub debounce_time: u8,
}

impl Default for ClockSettings {
    fn default() -> Self {
        ClockSettings {
            source: ClockSource::Internal,
            led_divider: 1,
            logarithmic_a: false,
            logarithmic_b: false,
            debounce_time: 0,
        }
    }
}

/// RegClock value. The oscillator is only enabled when something needs it.
pub fn clock_register(settings: &ClockSettings, needed: bool) -> u8 {
    if !needed {
        return 0;
    }
    let source = match settings.source {
        ClockSource::Internal => clock::SOURCE_INTERNAL,
        ClockSource::External => clock::SOURCE_EXTERNAL,
    };
    source << clock::SOURCE_SHIFT
}

/// RegMisc value. The LED clock divider is left at 0 (off) unless LEDs are used.
pub fn misc_register(settings: &ClockSettings, leds_used: bool) -> u8 {
    let mut value = 0;
    if leds_used {
        let divider = settings.led_divider.clamp(1, misc::CLKX_MASK);
        value |= (divider & misc::CLKX_MASK) << misc::CLKX_SHIFT;
    }
    if settings.logarithmic_b {
        value |= misc::LOG_BANK_B;
    }
    if settings.logarithmic_a {
        value |= misc::LOG_BANK_A;
    }
    value
}

/// RegDebounceConfig value.
pub fn debounce_config(settings: &ClockSettings) -> u8 {
    settings.debounce_time & 0b111
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led() -> LedConfig {
        LedConfig {
            on_time: 5,
            on_intensity: 200,
            off_time: 10,
            off_intensity: 3,
            rise_time: 4,
            fall_time: 6,
        }
    }

    #[test]
    fn test_non_led_pins_get_zeros() {
        assert_eq!(
            led_registers(PinMode::Input, Some(&led())),
            LedRegisters::default()
        );
    }

    #[test]
    fn test_static_mode_has_no_timing() {
        let regs = led_registers(PinMode::LedStatic, Some(&led()));
        assert_eq!(regs.t_on, 0);
        assert_eq!(regs.i_on, 200);
        assert_eq!(regs.off, 3);
        assert_eq!((regs.t_rise, regs.t_fall), (0, 0));
    }

    #[test]
    fn test_single_shot_leaves_off_time_zero() {
        let regs = led_registers(PinMode::LedSingle, Some(&led()));
        assert_eq!(regs.t_on, 5);
        assert_eq!(regs.off >> 3, 0);
    }

    #[test]
    fn test_blink_and_breathe() {
        let blink = led_registers(PinMode::LedBlink, Some(&led()));
        assert_eq!(blink.off, (10 << 3) | 3);
        assert_eq!(blink.t_rise, 0);
        let breathe = led_registers(PinMode::LedBreathe, Some(&led()));
        assert_eq!(breathe.off, (10 << 3) | 3);
        assert_eq!((breathe.t_rise, breathe.t_fall), (4, 6));
    }

    #[test]
    fn test_out_of_range_fields_are_clamped() {
        let wild = LedConfig {
            on_time: 99,
            off_intensity: 200,
            ..led()
        };
        let regs = led_registers(PinMode::LedBlink, Some(&wild));
        assert_eq!(regs.t_on, MAX_TIME);
        assert_eq!(regs.off & 0b111, MAX_OFF_INTENSITY);
    }

    #[test]
    fn test_missing_led_config_uses_full_intensity() {
        let regs = led_registers(PinMode::LedStatic, None);
        assert_eq!(regs.i_on, 255);
    }

    #[test]
    fn test_clock_register() {
        let internal = ClockSettings::default();
        assert_eq!(clock_register(&internal, false), 0);
        assert_eq!(clock_register(&internal, true), 0b0100_0000);
        let external = ClockSettings {
            source: ClockSource::External,
            ..internal
        };
        assert_eq!(clock_register(&external, true), 0b0010_0000);
    }

    #[test]
    fn test_misc_register() {
        let mut settings = ClockSettings::default();
        assert_eq!(misc_register(&settings, false), 0);
        assert_eq!(misc_register(&settings, true), 0b0001_0000);
        settings.led_divider = 0;
        assert_eq!(misc_register(&settings, true), 0b0001_0000);
        settings.led_divider = 7;
        settings.logarithmic_a = true;
        settings.logarithmic_b = true;
        assert_eq!(misc_register(&settings, true), 0b1111_1000);
    }

    #[test]
    fn test_clock_settings_json() {
        let s: ClockSettings =
            serde_json::from_str(r#"{ "source": "external", "debounceTime": 9 }"#).unwrap();
        assert_eq!(s.source, ClockSource::External);
        assert_eq!(s.led_divider, 1);
        assert_eq!(debounce_config(&s), 1);
    }
}
