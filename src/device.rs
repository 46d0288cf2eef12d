//! Device handler lifecycle: configuration, the common handler contract,
//! and the per-device context every handler is built on.

use crate::error::{Error, Result};
use crate::expander::Sx150xHandler;
use crate::generic::GenericHandler;
use crate::host::{Host, PointChange, PointSpec, PointValue};
use crate::i2c::{Bus, BusDevice, I2cAddress, WordOrder};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Configuration of one device on the bus.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// 7-bit bus address.
    pub address: u8,
    /// Declared chip type, e.g. `"SX1509"` or `"Generic"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional point prefix; defaults to one derived from the address.
    #[serde(default)]
    pub name: Option<String>,
    /// Handler-specific settings.
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl DeviceConfig {
    pub fn new(address: u8, kind: &str, settings: serde_json::Value) -> Self {
        DeviceConfig {
            address,
            kind: kind.to_string(),
            name: None,
            settings,
        }
    }

    /// Point prefix for this device: the configured name, or `I2C-0xNN`.
    pub fn prefix(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("I2C-0x{:02X}", self.address),
        }
    }
}

/// Common contract of all device handlers.
#[async_trait]
pub trait DeviceHandler: Send + Sync {
    /// Point prefix used for log messages and point ids.
    fn name(&self) -> &str;

    /// Declares points, configures the hardware, performs the first
    /// read/write pass and starts polling or interrupt listening.
    async fn start(&self) -> Result<()>;

    /// Cancels polling, pending delays and listeners.
    async fn stop(&self);
}

/// Shared plumbing for a handler: its bus handle, the host, the point
/// namespace and the session cache of last-known values.
pub struct DeviceContext {
    device: BusDevice,
    host: Arc<dyn Host>,
    prefix: String,
    cache: Mutex<HashMap<String, PointValue>>,
    shutdown: watch::Sender<bool>,
}

impl DeviceContext {
    pub fn new(device: BusDevice, host: Arc<dyn Host>, prefix: String) -> Self {
        let (shutdown, _) = watch::channel(false);
        DeviceContext {
            device,
            host,
            prefix,
            cache: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn device(&self) -> &BusDevice {
        &self.device
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full point id for a device-local point name.
    pub fn point_id(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    pub fn declare(&self, name: &str, spec: PointSpec) -> Result<()> {
        self.host.declare_point(&self.point_id(name), spec)
    }

    /// Publishes an acknowledged value and records it in the session cache.
    /// Only call this after the hardware operation succeeded.
    pub fn publish(&self, name: &str, value: PointValue) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.clone());
        self.host.publish_value(&self.point_id(name), value);
    }

    /// Last value this handler published for `name` during this session.
    pub fn cached(&self, name: &str) -> Option<PointValue> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Value the host remembers for `name` (the persisted mirror).
    pub fn stored(&self, name: &str) -> Option<PointValue> {
        self.host.cached_value(&self.point_id(name))
    }

    /// Value to bring the hardware back to on start: this session's last
    /// acknowledged value, else what the host remembers.
    pub fn last_known(&self, name: &str) -> Option<PointValue> {
        self.cached(name).or_else(|| self.stored(name))
    }

    /// Runs `callback` for every host-side write of the local point `name`,
    /// one at a time, until [`DeviceContext::shutdown`].
    pub fn on_point_change<F, Fut>(&self, name: &str, mut callback: F)
    where
        F: FnMut(PointChange) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.point_id(name);
        let mut rx = self.host.on_point_change(&id);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = rx.recv() => match change {
                        Some(change) => callback(change).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Listener for {} ended", id);
        });
    }

    /// Runs `callback` for every update of the foreign point `id`.
    pub fn on_external_point_change<F, Fut>(&self, id: &str, mut callback: F)
    where
        F: FnMut(PointValue) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = id.to_string();
        let mut rx = self.host.on_external_point_change(&id);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    value = rx.recv() => match value {
                        Some(value) => callback(value).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Watcher for {} ended", id);
        });
    }

    /// Ends every listener started through this context.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Builds the handler for a configured device.
pub fn create_handler(
    config: &DeviceConfig,
    bus: &Bus,
    host: Arc<dyn Host>,
) -> Result<Arc<dyn DeviceHandler>> {
    let address = I2cAddress::new(config.address)?;
    let kind = config.kind.to_ascii_uppercase();
    match kind.as_str() {
        "GENERIC" => {
            let settings = serde_json::from_value(config.settings.clone())?;
            // generic registers are addressed by block transfers; word order only
            // matters to callers of the word API
            let device = bus.device(address, WordOrder::BigEndian);
            let ctx = DeviceContext::new(device, host, config.prefix());
            Ok(Arc::new(GenericHandler::new(ctx, settings)))
        }
        "SX1507" | "SX1508" | "SX1509" => Ok(Arc::new(Sx150xHandler::from_config(
            config, bus, host,
        )?)),
        _ => {
            warn!("No handler for device type '{}'", config.kind);
            Err(Error::UnsupportedDevice(config.kind.clone()))
        }
    }
}
