//! Data-driven handler for chips exposing plain numeric registers.
//!
//! Each configured register becomes one number point. Its encoding fixes
//! the transfer length; reads decode and publish, host writes encode and
//! transfer, and every register may poll on its own schedule.

use crate::codec::Encoding;
use crate::device::{DeviceContext, DeviceHandler};
use crate::error::{Error, Result};
use crate::host::{PointSpec, PointValue};
use crate::polling::Poller;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Settings blob of a generic device.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenericSettings {
    pub registers: Vec<RegisterSettings>,
}

/// One register as configured. `type` stays a string so an unknown
/// encoding only disables that register.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSettings {
    /// Register address; negative or missing means unaddressed raw I/O.
    #[serde(default, deserialize_with = "register_address")]
    pub register: Option<u8>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    /// Milliseconds; 0 disables polling.
    #[serde(default)]
    pub polling_interval: u64,
    #[serde(default)]
    pub unit: Option<String>,
}

fn default_true() -> bool {
    true
}

fn register_address<'de, D>(deserializer: D) -> std::result::Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(r) if r < 0 => Ok(None),
        Some(r) => u8::try_from(r)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("register {} out of range", r))),
    }
}

/// A validated register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub register: Option<u8>,
    /// Point name.
    pub name: String,
    pub encoding: Encoding,
    pub read: bool,
    pub write: bool,
    pub polling_interval: Option<Duration>,
    pub unit: Option<String>,
}

impl RegisterDescriptor {
    pub fn from_settings(settings: &RegisterSettings) -> Result<Self> {
        let encoding: Encoding = settings.encoding.parse()?;
        let name = match (&settings.name, settings.register) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(register)) => format!("0x{:02X}", register),
            (_, None) => "raw".to_string(),
        };
        Ok(RegisterDescriptor {
            register: settings.register,
            name,
            encoding,
            read: settings.read,
            write: settings.write,
            polling_interval: (settings.polling_interval > 0)
                .then(|| Duration::from_millis(settings.polling_interval)),
            unit: settings.unit.clone().filter(|unit| !unit.is_empty()),
        })
    }

    /// Transfer length in bytes.
    pub fn len(&self) -> usize {
        self.encoding.len()
    }
}

struct Slot {
    desc: RegisterDescriptor,
    buffer: Mutex<Vec<u8>>,
    poller: Poller,
}

struct Inner {
    ctx: DeviceContext,
    slots: Vec<Arc<Slot>>,
}

/// Handler driven entirely by register descriptors.
pub struct GenericHandler {
    inner: Arc<Inner>,
}

impl GenericHandler {
    /// Registers with an invalid descriptor are logged and left out.
    pub fn new(ctx: DeviceContext, settings: GenericSettings) -> Self {
        let mut slots = Vec::new();
        for reg in &settings.registers {
            match RegisterDescriptor::from_settings(reg) {
                Ok(desc) => {
                    let poller = Poller::new(format!("{}.{}", ctx.prefix(), desc.name));
                    slots.push(Arc::new(Slot {
                        buffer: Mutex::new(vec![0u8; desc.len()]),
                        desc,
                        poller,
                    }));
                }
                Err(e) => warn!("{}: register skipped: {}", ctx.prefix(), e),
            }
        }
        GenericHandler {
            inner: Arc::new(Inner { ctx, slots }),
        }
    }

    pub fn registers(&self) -> Vec<RegisterDescriptor> {
        self.inner.slots.iter().map(|s| s.desc.clone()).collect()
    }
}

impl Inner {
    async fn read(&self, slot: &Slot) -> Result<f64> {
        let dev = self.ctx.device();
        let mut buf = slot.buffer.lock().await;
        match slot.desc.register {
            Some(register) => dev.read_block(register, &mut buf).await?,
            None => dev.read_raw(&mut buf).await?,
        }
        let value = slot.desc.encoding.decode(&buf)?;
        drop(buf);
        self.ctx.publish(&slot.desc.name, PointValue::Number(value));
        Ok(value)
    }

    async fn write(&self, slot: &Slot, value: &PointValue) -> Result<()> {
        let number = value.as_f64().ok_or_else(|| Error::InvalidPointValue {
            point: self.ctx.point_id(&slot.desc.name),
            value: value.to_string(),
        })?;
        let dev = self.ctx.device();
        let mut buf = slot.buffer.lock().await;
        slot.desc.encoding.encode(number, &mut buf)?;
        match slot.desc.register {
            Some(register) => dev.write_block(register, &buf).await?,
            None => dev.write_raw(&buf).await?,
        }
        // acknowledge what the chip got, not what was asked for
        let written = slot.desc.encoding.decode(&buf)?;
        drop(buf);
        self.ctx.publish(&slot.desc.name, PointValue::Number(written));
        Ok(())
    }

    async fn start_slot(inner: &Arc<Inner>, slot: &Arc<Slot>) -> Result<()> {
        let desc = &slot.desc;
        let prefix = inner.ctx.prefix();
        let mut spec = PointSpec::number(desc.read, desc.write);
        if let Some(unit) = &desc.unit {
            spec = spec.with_unit(unit);
        }
        inner.ctx.declare(&desc.name, spec)?;

        if desc.read {
            if let Err(e) = inner.read(slot).await {
                warn!("{}: initial read of {} failed: {}", prefix, desc.name, e);
            }
            if let Some(interval) = desc.polling_interval {
                let me = Arc::clone(inner);
                let target = Arc::clone(slot);
                slot.poller.start(interval, move || {
                    let me = me.clone();
                    let target = target.clone();
                    async move {
                        if let Err(e) = me.read(&target).await {
                            warn!("{}: reading {} failed: {}", me.ctx.prefix(), target.desc.name, e);
                        }
                        Ok(())
                    }
                });
            }
        }

        if desc.write {
            if !desc.read && desc.polling_interval.is_none() {
                if let Some(value) = inner.ctx.last_known(&desc.name) {
                    debug!("{}: restoring {} = {}", prefix, desc.name, value);
                    if let Err(e) = inner.write(slot, &value).await {
                        warn!("{}: restoring {} failed: {}", prefix, desc.name, e);
                    }
                }
            }
            let me = Arc::clone(inner);
            let target = Arc::clone(slot);
            inner.ctx.on_point_change(&desc.name, move |change| {
                let me = me.clone();
                let target = target.clone();
                async move {
                    if let Err(e) = me.write(&target, &change.new).await {
                        warn!("{}: writing {} failed: {}", me.ctx.prefix(), target.desc.name, e);
                    }
                }
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceHandler for GenericHandler {
    fn name(&self) -> &str {
        self.inner.ctx.prefix()
    }

    async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        for slot in &inner.slots {
            if let Err(e) = Inner::start_slot(inner, slot).await {
                warn!("{}: register {} not started: {}", inner.ctx.prefix(), slot.desc.name, e);
            }
        }
        info!(
            "{}: generic device started with {} register(s)",
            inner.ctx.prefix(),
            inner.slots.len()
        );
        Ok(())
    }

    async fn stop(&self) {
        for slot in &self.inner.slots {
            slot.poller.stop().await;
        }
        self.inner.ctx.shutdown();
        info!("{}: stopped", self.inner.ctx.prefix());
    }
}
