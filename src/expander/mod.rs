//! SX1507 / SX1508 / SX1509 GPIO expander and LED driver.
//!
//! Every pin is configured from a [`PinConfig`]; the handler turns the pin
//! list into per-register bitmaps, writes the whole configuration after a
//! software reset, then follows inputs by polling or by re-reading when a
//! foreign interrupt point changes.

mod state;
mod variant;

pub use state::ExpanderState;
pub use variant::{RegisterTable, RegisterWidth, Variant};

use crate::device::{DeviceConfig, DeviceContext, DeviceHandler};
use crate::error::{unsupported_keypad, unsupported_level_shifter, Error, Result};
use crate::gpio::{normalize_pins, pack_level_shifter, Feature, GpioPin, PinConfig, PinMode};
use crate::host::{Host, PointSpec, PointValue};
use crate::i2c::{Bus, I2cAddress, WordOrder};
use crate::interrupt::{pack_interrupt_sense, ReadCoalescer};
use crate::keypad::{KeyConfigLayout, KeypadConfig};
use crate::polling::Poller;
use crate::pwm::{clock_register, debounce_config, led_registers, misc_register, ClockSettings};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Point carrying the label of the last pressed key.
pub const KEY_POINT: &str = "key";

/// Settings blob of an expander device.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpanderSettings {
    /// Input polling period in milliseconds; 0 disables polling.
    pub polling_interval: u64,
    /// Foreign point wired to the chip's NINT output. Takes precedence
    /// over polling.
    pub interrupt: Option<String>,
    pub clock: ClockSettings,
    pub keypad: Option<KeypadConfig>,
    pub pins: Vec<PinConfig>,
}

/// Fits a pin list to the model: pads it to the pin count and turns pins
/// using features the model lacks into unused pins.
fn fit_pins(
    variant: Variant,
    pins: Vec<PinConfig>,
    keypad: Option<KeypadConfig>,
) -> (Vec<PinConfig>, Option<KeypadConfig>) {
    let mut pins = normalize_pins(pins, variant.pin_count());
    let uses_keypad = keypad.is_some() || pins.iter().any(|p| p.mode == PinMode::Keypad);
    let keypad = match variant.key_layout() {
        Some(_) => keypad,
        None => {
            if uses_keypad {
                warn!("{}, keypad configuration ignored", unsupported_keypad(variant.name()));
            }
            None
        }
    };
    let pairs = variant.level_shifter_pairs();
    for (i, pin) in pins.iter_mut().enumerate() {
        if pin.mode == PinMode::Keypad && keypad.is_none() {
            debug!("Pin {} set to keypad without a keypad configuration", i);
            pin.mode = PinMode::Unused;
        }
        if pin.mode.is_level_shifter() && i >= pairs {
            if pairs == 0 {
                warn!("{}, pin {} left unused", unsupported_level_shifter(variant.name()), i);
            } else {
                warn!("Level shifter on pin {} ignored, only pins 0-{} pair up", i, pairs - 1);
            }
            pin.mode = PinMode::Unused;
        }
    }
    (pins, keypad)
}

struct Inner {
    ctx: DeviceContext,
    variant: Variant,
    polling_interval: Duration,
    interrupt: Option<String>,
    clock: ClockSettings,
    state: Mutex<ExpanderState>,
    output_lock: tokio::sync::Mutex<()>,
    reads: ReadCoalescer,
    poller: Poller,
}

/// Handler for the SX150x family.
pub struct Sx150xHandler {
    inner: Arc<Inner>,
}

impl Sx150xHandler {
    /// Builds a handler from a device configuration whose type names an
    /// SX150x model.
    pub fn from_config(config: &DeviceConfig, bus: &Bus, host: Arc<dyn Host>) -> Result<Self> {
        let variant: Variant = config.kind.parse()?;
        let settings: ExpanderSettings = if config.settings.is_null() {
            ExpanderSettings::default()
        } else {
            serde_json::from_value(config.settings.clone())?
        };
        let address = I2cAddress::new(config.address)?;
        // byte registers ignore the word order; SX1509 pairs are big-endian
        let device = bus.device(address, WordOrder::BigEndian);
        let ctx = DeviceContext::new(device, host, config.prefix());
        Ok(Self::new(ctx, variant, settings))
    }

    pub fn new(ctx: DeviceContext, variant: Variant, settings: ExpanderSettings) -> Self {
        let (pins, keypad) = fit_pins(variant, settings.pins, settings.keypad);
        Sx150xHandler {
            inner: Arc::new(Inner {
                ctx,
                variant,
                polling_interval: Duration::from_millis(settings.polling_interval),
                interrupt: settings.interrupt.filter(|id| !id.is_empty()),
                clock: settings.clock,
                state: Mutex::new(ExpanderState::new(pins, keypad)),
                output_lock: tokio::sync::Mutex::new(()),
                reads: ReadCoalescer::new(),
                poller: Poller::new(format!("{} inputs", variant)),
            }),
        }
    }

    pub fn variant(&self) -> Variant {
        self.inner.variant
    }

    /// Snapshot of the runtime state.
    pub fn state(&self) -> ExpanderState {
        self.inner.lock_state().clone()
    }

    /// Re-reads the inputs now, as an interrupt would.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ExpanderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn registers(&self) -> &'static RegisterTable {
        self.variant.registers()
    }

    async fn write_register(&self, register: u8, value: u16) -> Result<()> {
        let dev = self.ctx.device();
        match self.registers().width {
            RegisterWidth::Byte => dev.write_byte(register, value as u8).await,
            RegisterWidth::Word => dev.write_word(register, value).await,
        }
    }

    async fn read_register(&self, register: u8) -> Result<u16> {
        let dev = self.ctx.device();
        match self.registers().width {
            RegisterWidth::Byte => Ok(dev.read_byte(register).await? as u16),
            RegisterWidth::Word => dev.read_word(register).await,
        }
    }

    fn declare_points(&self) -> Result<()> {
        let (pins, keypad) = {
            let state = self.lock_state();
            (state.pins().to_vec(), state.has_keypad())
        };
        for (i, pin) in pins.iter().enumerate() {
            let spec = match pin.mode {
                PinMode::Input => PointSpec::indicator(),
                PinMode::Output => PointSpec::switch(),
                mode if mode.is_led() => PointSpec::switch().with_role("switch.light"),
                _ => continue,
            };
            let gpio = GpioPin::new(i as u8)?;
            self.ctx.declare(&gpio.point_name(), spec)?;
        }
        if keypad {
            self.ctx.declare(KEY_POINT, PointSpec::text("text"))?;
        }
        Ok(())
    }

    /// Seeds output and LED states from their last known values.
    fn restore_outputs(&self) {
        let mut state = self.lock_state();
        for i in 0..state.pins().len() {
            if !state.pins()[i].mode.is_driven() {
                continue;
            }
            let name = format!("{:02}", i);
            let on = self
                .ctx
                .last_known(&name)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            state.set_output(i, on);
        }
    }

    /// Resets the chip and writes the complete configuration.
    async fn configure(&self) -> Result<()> {
        let prefix = self.ctx.prefix();
        let regs = self.registers();
        let dev = self.ctx.device();
        let (pins, keypad) = {
            let state = self.lock_state();
            let keypad = state.keypad().filter(|_| state.has_keypad()).cloned();
            (state.pins().to_vec(), keypad)
        };

        let _bus = dev.transaction().await;
        for value in self.variant.reset_sequence() {
            dev.write_byte(regs.reset, value).await?;
        }

        for feature in Feature::ALL {
            let Some(register) = regs.feature(feature) else {
                continue;
            };
            let value = feature.bitmap(&pins);
            debug!("{}: {:?} = 0x{:04X}", prefix, feature, value);
            self.write_register(register, value).await?;
        }

        let sense = pack_interrupt_sense(&pins, regs.sense_len);
        debug!("{}: sense = {:02X?}", prefix, sense);
        dev.write_block(regs.sense, &sense).await?;

        if let Some(register) = regs.level_shifter {
            let value = pack_level_shifter(&pins, self.variant.level_shifter_pairs());
            self.write_register(register, value).await?;
        }

        let leds_used = pins.iter().any(|p| p.mode.is_led());
        let debounce_used = pins
            .iter()
            .any(|p| (p.mode == PinMode::Input && p.debounce) || p.mode == PinMode::Keypad);
        let clock = clock_register(&self.clock, leds_used || debounce_used);
        dev.write_byte(regs.clock, clock).await?;
        dev.write_byte(regs.misc, misc_register(&self.clock, leds_used))
            .await?;
        dev.write_byte(regs.debounce_config, debounce_config(&self.clock))
            .await?;

        if let (Some(keypad), Some(layout), Some(register)) =
            (keypad, self.variant.key_layout(), regs.key_config)
        {
            let value = keypad.pack(layout);
            debug!("{}: key config = 0x{:04X}", prefix, value);
            match layout {
                KeyConfigLayout::Byte => dev.write_byte(register, value as u8).await?,
                KeyConfigLayout::Word => dev.write_word(register, value).await?,
            }
        }

        for (i, (block, pin)) in regs.leds.iter().zip(&pins).enumerate() {
            let led = led_registers(pin.mode, pin.led.as_ref());
            if pin.mode.is_led() && led.t_on != 0 && block.t_on.is_none() {
                debug!("{}: pin {} has no LED timing registers", prefix, i);
            }
            if let Some(register) = block.t_on {
                dev.write_byte(register, led.t_on).await?;
            }
            dev.write_byte(block.i_on, led.i_on).await?;
            if let Some(register) = block.off {
                dev.write_byte(register, led.off).await?;
            }
            if let Some(register) = block.t_rise {
                dev.write_byte(register, led.t_rise).await?;
            }
            if let Some(register) = block.t_fall {
                dev.write_byte(register, led.t_fall).await?;
            }
        }

        self.write_register(regs.interrupt_source, 0xFFFF).await?;
        debug!("{}: configuration written", prefix);
        Ok(())
    }

    /// Writes the packed output value of every driven pin.
    async fn write_outputs(&self) -> Result<()> {
        let _guard = self.output_lock.lock().await;
        let value = self.lock_state().packed_output();
        self.write_register(self.registers().data, value).await?;
        self.lock_state().mark_written(value);
        Ok(())
    }

    /// Drives one output. The state only changes once the chip accepted the
    /// new data register value. Returns whether a write happened.
    async fn set_output(&self, pin: usize, on: bool) -> Result<bool> {
        let _guard = self.output_lock.lock().await;
        let pending = self.lock_state().pending_output(pin, on);
        if let Some(value) = pending {
            self.write_register(self.registers().data, value).await?;
        }
        let mut state = self.lock_state();
        state.set_output(pin, on);
        if let Some(value) = pending {
            state.mark_written(value);
        }
        Ok(pending.is_some())
    }

    async fn handle_command(&self, pin: usize, name: &str, value: PointValue) {
        let Some(on) = value.as_bool() else {
            let err = Error::InvalidPointValue {
                point: self.ctx.point_id(name),
                value: value.to_string(),
            };
            warn!("{}", err);
            return;
        };
        match self.set_output(pin, on).await {
            Ok(written) => {
                if !written {
                    debug!("{}: {} unchanged, no write", self.ctx.prefix(), name);
                }
                self.ctx.publish(name, PointValue::Bool(on));
            }
            Err(e) => warn!("{}: failed to set {}: {}", self.ctx.prefix(), name, e),
        }
    }

    /// Reads the data register and, with a keypad, the key data register,
    /// publishing what changed.
    async fn read_inputs(&self, force: bool) -> Result<()> {
        let regs = self.registers();
        let (inputs, keypad) = {
            let state = self.lock_state();
            (state.input_mask() != 0, state.has_keypad())
        };
        if inputs {
            let value = self.read_register(regs.data).await?;
            let changes = self.lock_state().apply_read(value, force);
            for (pin, level) in changes {
                let gpio = GpioPin::new(pin as u8)?;
                self.ctx
                    .publish(&gpio.point_name(), PointValue::Bool(level));
            }
        }
        if let (true, Some(register)) = (keypad, regs.key_data) {
            let value = self.read_register(register).await?;
            let key = self.lock_state().apply_key_data(value, force);
            if let Some(key) = key {
                debug!("{}: key '{}' pressed", self.ctx.prefix(), key);
                self.ctx.publish(KEY_POINT, PointValue::Text(key));
            }
        }
        Ok(())
    }

    /// One coalesced read pass; failures are logged and the pass skipped.
    async fn refresh(&self) {
        self.reads
            .run(|| async move {
                if let Err(e) = self.read_inputs(false).await {
                    warn!("{}: input read failed: {}", self.ctx.prefix(), e);
                    return;
                }
                if self.interrupt.is_some() {
                    let source = self.registers().interrupt_source;
                    if let Err(e) = self.write_register(source, 0xFFFF).await {
                        warn!("{}: failed to clear interrupts: {}", self.ctx.prefix(), e);
                    }
                }
            })
            .await;
    }

    fn listen_outputs(inner: &Arc<Inner>) {
        let driven: Vec<usize> = inner
            .lock_state()
            .pins()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.mode.is_driven())
            .map(|(i, _)| i)
            .collect();
        for pin in driven {
            let name = format!("{:02}", pin);
            let me = Arc::clone(inner);
            let point = name.clone();
            inner.ctx.on_point_change(&name, move |change| {
                let me = me.clone();
                let point = point.clone();
                async move { me.handle_command(pin, &point, change.new).await }
            });
        }
    }

    fn monitor_inputs(inner: &Arc<Inner>) {
        let (inputs, keypad) = {
            let state = inner.lock_state();
            (state.input_mask() != 0, state.has_keypad())
        };
        if !inputs && !keypad {
            return;
        }
        let prefix = inner.ctx.prefix();
        if let Some(id) = &inner.interrupt {
            info!("{}: inputs follow interrupt point {}", prefix, id);
            let me = Arc::clone(inner);
            inner.ctx.on_external_point_change(id, move |_| {
                let me = me.clone();
                async move { me.refresh().await }
            });
        } else if !inner.polling_interval.is_zero() {
            info!("{}: polling inputs every {:?}", prefix, inner.polling_interval);
            let me = Arc::clone(inner);
            inner.poller.start(inner.polling_interval, move || {
                let me = me.clone();
                async move {
                    me.refresh().await;
                    Ok(())
                }
            });
        } else {
            info!("{}: no interrupt and no polling, inputs read once", prefix);
        }
    }
}

#[async_trait]
impl DeviceHandler for Sx150xHandler {
    fn name(&self) -> &str {
        self.inner.ctx.prefix()
    }

    async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let prefix = inner.ctx.prefix();
        if let Some(id) = &inner.interrupt {
            if !inner.ctx.host().point_exists(id) {
                return Err(Error::MissingInterruptPoint(id.clone()));
            }
        }
        inner.declare_points()?;
        inner.restore_outputs();
        inner.configure().await?;

        let (driven, reads) = {
            let state = inner.lock_state();
            (
                state.driven_mask() != 0,
                state.input_mask() != 0 || state.has_keypad(),
            )
        };
        if driven {
            inner.write_outputs().await?;
            let acks: Vec<(String, bool)> = {
                let state = inner.lock_state();
                state
                    .pins()
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.mode.is_driven())
                    .map(|(i, _)| (format!("{:02}", i), state.output(i)))
                    .collect()
            };
            for (name, on) in acks {
                inner.ctx.publish(&name, PointValue::Bool(on));
            }
        }
        if reads {
            if let Err(e) = inner.read_inputs(true).await {
                warn!("{}: initial input read failed: {}", prefix, e);
            }
        }

        Inner::listen_outputs(inner);
        Inner::monitor_inputs(inner);
        info!("{}: {} started", prefix, inner.variant);
        Ok(())
    }

    async fn stop(&self) {
        self.inner.poller.stop().await;
        self.inner.ctx.shutdown();
        info!("{}: stopped", self.inner.ctx.prefix());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PointRegistry;
    use crate::mock::MockBus;
    use serde_json::json;

    const ADDR: u8 = 0x3E;

    fn setup(kind: &str, settings: serde_json::Value) -> (Arc<MockBus>, Arc<PointRegistry>, Sx150xHandler) {
        let mock = Arc::new(MockBus::new());
        mock.add_device(ADDR);
        let bus = Bus::new(mock.clone());
        let host = Arc::new(PointRegistry::new());
        let mut config = DeviceConfig::new(ADDR, kind, settings);
        config.name = Some("io".to_string());
        let handler = Sx150xHandler::from_config(&config, &bus, host.clone()).unwrap();
        (mock, host, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_sequence_comes_first() {
        let (mock, _host, handler) = setup("SX1507", json!({}));
        handler.start().await.unwrap();
        let ops = mock.ops();
        assert_eq!(
            &ops[..2],
            &[
                crate::mock::BusOp::Write {
                    address: ADDR,
                    register: Some(0x7D),
                    data: vec![0x12]
                },
                crate::mock::BusOp::Write {
                    address: ADDR,
                    register: Some(0x7D),
                    data: vec![0x34]
                },
            ]
        );
        handler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sx1508_byte_bitmaps() {
        let (mock, _host, handler) = setup(
            "SX1508",
            json!({ "pins": [
                { "mode": "output", "openDrain": true },
                { "mode": "input", "pull": "up", "interrupt": "both", "highInput": true },
                { "mode": "led_static" },
            ]}),
        );
        handler.start().await.unwrap();
        // pins 3-7 are padded as unused inputs
        assert_eq!(mock.writes_to(ADDR, Some(0x07)), vec![vec![0b1111_1010]]);
        assert_eq!(mock.writes_to(ADDR, Some(0x05)), vec![vec![0b0000_0001]]);
        assert_eq!(mock.writes_to(ADDR, Some(0x03)), vec![vec![0b0000_0010]]);
        assert_eq!(mock.writes_to(ADDR, Some(0x00)), vec![vec![0b0000_0100]]);
        assert_eq!(mock.writes_to(ADDR, Some(0x09)), vec![vec![0b1111_1101]]);
        assert_eq!(mock.writes_to(ADDR, Some(0x0A)), vec![vec![0x00, 0b0000_1100]]);
        assert_eq!(mock.writes_to(ADDR, Some(0x2A)), vec![vec![0b0000_0010]]);
        // LED used: internal clock and ClkX = 1
        assert_eq!(mock.writes_to(ADDR, Some(0x0F)), vec![vec![0b0100_0000]]);
        assert_eq!(mock.writes_to(ADDR, Some(0x10)), vec![vec![0b0001_0000]]);
        // pin 2 LED intensity register, full brightness by default
        assert_eq!(mock.writes_to(ADDR, Some(0x18 + 1)), vec![vec![0xFF]]);
        handler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_interrupt_point_is_fatal() {
        let (mock, _host, handler) = setup(
            "SX1509",
            json!({ "interrupt": "gpio.0.nint", "pins": [{ "mode": "input" }] }),
        );
        assert!(matches!(
            handler.start().await,
            Err(Error::MissingInterruptPoint(_))
        ));
        assert!(mock.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_write_failure_is_fatal() {
        let (mock, _host, handler) = setup("SX1509", json!({ "pins": [{ "mode": "output" }] }));
        mock.set_failing(ADDR, true);
        assert!(handler.start().await.is_err());
    }

    #[test]
    fn test_sx1507_drops_keypad_and_level_shifter() {
        let pins = vec![
            PinConfig::with_mode(PinMode::Keypad),
            PinConfig::with_mode(PinMode::LevelShifterAToB),
        ];
        let (pins, keypad) = fit_pins(Variant::Sx1507, pins, Some(KeypadConfig::default()));
        assert!(keypad.is_none());
        assert_eq!(pins.len(), 4);
        assert!(pins.iter().all(|p| p.mode == PinMode::Unused));
    }

    #[test]
    fn test_level_shifter_only_on_bank_a() {
        let mut pins = vec![PinConfig::default(); 8];
        pins[1].mode = PinMode::LevelShifterBToA;
        pins[6].mode = PinMode::LevelShifterBToA;
        let (pins, _) = fit_pins(Variant::Sx1508, pins, None);
        assert_eq!(pins[1].mode, PinMode::LevelShifterBToA);
        assert_eq!(pins[6].mode, PinMode::Unused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keypad_publishes_key_label() {
        let mut pins = vec![json!({}); 8];
        pins[0] = json!({ "mode": "keypad" });
        pins[4] = json!({ "mode": "keypad" });
        let (mock, host, handler) = setup(
            "SX1508",
            json!({
                "keypad": { "rows": 2, "columns": 1, "keyValues": [["1"], ["2"]] },
                "pins": pins,
            }),
        );
        mock.set_register(ADDR, 0x15, 0xFF);
        handler.start().await.unwrap();
        assert_eq!(mock.writes_to(ADDR, Some(0x14)), vec![vec![0b0000_0100]]);
        assert!(host.spec("io.key").is_some());
        assert_eq!(host.cached_value("io.key"), None);

        mock.set_register(ADDR, 0x15, 0xFF & !((1 << 0) | (1 << 4)));
        handler.refresh().await;
        assert_eq!(host.cached_value("io.key"), Some(PointValue::from("1")));
        handler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_value_is_ignored() {
        let (mock, host, handler) = setup("SX1507", json!({ "pins": [{ "mode": "output" }] }));
        handler.start().await.unwrap();
        mock.clear_ops();
        host.write("io.00", "dimmed").unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(mock.ops().is_empty());
        assert!(!handler.state().output(0));
        handler.stop().await;
    }
}
