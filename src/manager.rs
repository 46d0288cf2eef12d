//! Starting and stopping every device configured on one bus.

use crate::consts;
use crate::device::{create_handler, DeviceConfig, DeviceHandler};
use crate::error::Result;
use crate::host::Host;
use crate::i2c::Bus;
use log::{error, info};
use serde::Deserialize;
use std::sync::Arc;

/// Adapter configuration: one bus and the devices on it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Linux bus number (`/dev/i2c-N`).
    #[serde(default = "default_bus_number")]
    pub bus_number: u8,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_bus_number() -> u8 {
    1
}

impl AdapterConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Outcome of [`DeviceManager::start_all`].
#[derive(Debug, Default)]
pub struct StartReport {
    /// Names of the devices that started.
    pub started: Vec<String>,
    /// Names of the devices that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Owns the handlers of one bus.
pub struct DeviceManager {
    bus: Bus,
    host: Arc<dyn Host>,
    handlers: Vec<Arc<dyn DeviceHandler>>,
}

impl DeviceManager {
    pub fn new(bus: Bus, host: Arc<dyn Host>) -> Self {
        DeviceManager {
            bus,
            host,
            handlers: Vec::new(),
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Creates and starts a handler for every device. A device that cannot
    /// be created or started is logged and skipped; the others still start.
    pub async fn start_all(&mut self, devices: &[DeviceConfig]) -> StartReport {
        let mut report = StartReport::default();
        for config in devices {
            let name = config.prefix();
            let handler = match create_handler(config, &self.bus, self.host.clone()) {
                Ok(handler) => handler,
                Err(e) => {
                    error!("{}: cannot create handler: {}", name, e);
                    report.failed.push((name, e.to_string()));
                    continue;
                }
            };
            match handler.start().await {
                Ok(()) => {
                    report.started.push(name);
                    self.handlers.push(handler);
                }
                Err(e) => {
                    if e.is_transport() {
                        error!("{}: device not responding: {}", name, e);
                    } else {
                        error!("{}: start failed: {}", name, e);
                    }
                    handler.stop().await;
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        info!(
            "{} device(s) started, {} failed",
            report.started.len(),
            report.failed.len()
        );
        report
    }

    /// Stops every running handler, most recently started first.
    pub async fn stop_all(&mut self) {
        while let Some(handler) = self.handlers.pop() {
            handler.stop().await;
        }
    }

    pub fn running(&self) -> usize {
        self.handlers.len()
    }

    /// Addresses answering in the default range.
    pub async fn scan(&self) -> Result<Vec<u8>> {
        let found = self.bus.scan_default().await?;
        info!(
            "Scan 0x{:02X}-0x{:02X}: {:02X?}",
            consts::SCAN_FIRST_ADDRESS,
            consts::SCAN_LAST_ADDRESS,
            found
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_config_defaults() {
        let cfg = AdapterConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.bus_number, 1);
        assert!(cfg.devices.is_empty());
        let cfg = AdapterConfig::from_json_str(
            r#"{ "busNumber": 0, "devices": [ { "address": 62, "type": "SX1509", "name": "io" } ] }"#,
        )
        .unwrap();
        assert_eq!(cfg.bus_number, 0);
        assert_eq!(cfg.devices[0].prefix(), "io");
        assert!(AdapterConfig::from_json_str("{ \"devices\": 3 }").is_err());
    }
}
