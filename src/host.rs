//! The host boundary: typed point values, point declarations, and the
//! registry through which devices publish state and receive commands.
//!
//! Devices only see the [`Host`] trait. [`PointRegistry`] is the in-process
//! implementation; it keeps the last value of every point (the mirror of the
//! host's persisted store) and fans changes out to subscribers over tokio
//! channels.

use crate::error::{Error, Result};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Value carried by a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PointValue {
    /// Interprets the value as a switch state. Numbers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PointValue::Bool(b) => Some(*b),
            PointValue::Number(n) => Some(*n != 0.0),
            PointValue::Text(s) => match s.as_str() {
                "true" | "on" | "1" => Some(true),
                "false" | "off" | "0" => Some(false),
                _ => None,
            },
        }
    }

    /// Interprets the value as a number. Booleans map to 0 and 1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            PointValue::Number(n) => Some(*n),
            PointValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Bool(b) => write!(f, "{}", b),
            PointValue::Number(n) => write!(f, "{}", n),
            PointValue::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<bool> for PointValue {
    fn from(b: bool) -> Self {
        PointValue::Bool(b)
    }
}

impl From<f64> for PointValue {
    fn from(n: f64) -> Self {
        PointValue::Number(n)
    }
}

impl From<&str> for PointValue {
    fn from(s: &str) -> Self {
        PointValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Number,
    String,
}

/// Declaration of a point: access, type, unit and a role hint for the host UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointSpec {
    pub read: bool,
    pub write: bool,
    pub value_type: ValueType,
    pub unit: Option<String>,
    pub role: String,
}

impl PointSpec {
    /// Read-only boolean, e.g. a GPIO input.
    pub fn indicator() -> Self {
        PointSpec {
            read: true,
            write: false,
            value_type: ValueType::Boolean,
            unit: None,
            role: "indicator".to_string(),
        }
    }

    /// Writable boolean, e.g. a GPIO output.
    pub fn switch() -> Self {
        PointSpec {
            read: true,
            write: true,
            value_type: ValueType::Boolean,
            unit: None,
            role: "switch".to_string(),
        }
    }

    pub fn number(read: bool, write: bool) -> Self {
        PointSpec {
            read,
            write,
            value_type: ValueType::Number,
            unit: None,
            role: "value".to_string(),
        }
    }

    pub fn text(role: &str) -> Self {
        PointSpec {
            read: true,
            write: false,
            value_type: ValueType::String,
            unit: None,
            role: role.to_string(),
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }
}

/// A command from the host: the point was written by someone other than
/// the device that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct PointChange {
    pub id: String,
    pub old: Option<PointValue>,
    pub new: PointValue,
}

/// Stream of commands for one point.
pub type CommandReceiver = mpsc::UnboundedReceiver<PointChange>;
/// Stream of every value update of one (possibly foreign) point.
pub type ValueReceiver = mpsc::UnboundedReceiver<PointValue>;

/// The narrow interface device handlers use to talk to the host.
pub trait Host: Send + Sync {
    /// Declares (or re-declares) a point.
    fn declare_point(&self, id: &str, spec: PointSpec) -> Result<()>;
    /// Publishes an acknowledged state.
    fn publish_value(&self, id: &str, value: PointValue);
    /// Last value the host knows for `id`, acknowledged or not.
    fn cached_value(&self, id: &str) -> Option<PointValue>;
    fn point_exists(&self, id: &str) -> bool;
    /// Subscribes to host-side writes of `id`.
    fn on_point_change(&self, id: &str) -> CommandReceiver;
    /// Subscribes to every update of `id`, which need not belong to this device.
    fn on_external_point_change(&self, id: &str) -> ValueReceiver;
}

/// Stored state of a point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointState {
    pub value: PointValue,
    /// True when the value was published by the owning device.
    pub ack: bool,
}

#[derive(Debug, Default)]
struct Entry {
    spec: Option<PointSpec>,
    state: Option<PointState>,
    updates: u64,
}

#[derive(Debug, Default)]
struct Registry {
    points: HashMap<String, Entry>,
    commands: HashMap<String, Vec<mpsc::UnboundedSender<PointChange>>>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<PointValue>>>,
}

impl Registry {
    fn notify_watchers(&mut self, id: &str, value: &PointValue) {
        if let Some(subs) = self.watchers.get_mut(id) {
            subs.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }
}

/// In-process point registry implementing [`Host`].
#[derive(Debug, Default)]
pub struct PointRegistry {
    inner: Mutex<Registry>,
}

impl PointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Host-side write (a user or another component commanding a point).
    /// The value is stored unacknowledged and delivered to the owner.
    pub fn write(&self, id: &str, value: impl Into<PointValue>) -> Result<()> {
        let value = value.into();
        let mut reg = self.lock();
        let entry = reg
            .points
            .get_mut(id)
            .ok_or_else(|| Error::UnknownPoint(id.to_string()))?;
        let old = entry.state.as_ref().map(|s| s.value.clone());
        entry.state = Some(PointState {
            value: value.clone(),
            ack: false,
        });
        entry.updates += 1;
        debug!("Host write {} = {}", id, value);
        let change = PointChange {
            id: id.to_string(),
            old,
            new: value.clone(),
        };
        if let Some(subs) = reg.commands.get_mut(id) {
            subs.retain(|tx| tx.send(change.clone()).is_ok());
        }
        reg.notify_watchers(id, &value);
        Ok(())
    }

    /// Seeds a stored value without notifying anyone, as if restored from
    /// the persisted store at startup. Creates the point if needed.
    pub fn restore(&self, id: &str, value: impl Into<PointValue>) {
        let mut reg = self.lock();
        let entry = reg.points.entry(id.to_string()).or_default();
        entry.state = Some(PointState {
            value: value.into(),
            ack: true,
        });
    }

    pub fn state(&self, id: &str) -> Option<PointState> {
        self.lock().points.get(id).and_then(|e| e.state.clone())
    }

    pub fn spec(&self, id: &str) -> Option<PointSpec> {
        self.lock().points.get(id).and_then(|e| e.spec.clone())
    }

    /// Number of value updates (publishes and writes) seen for `id`.
    pub fn update_count(&self, id: &str) -> u64 {
        self.lock().points.get(id).map_or(0, |e| e.updates)
    }

    /// Ids of all known points, sorted.
    pub fn point_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().points.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Host for PointRegistry {
    fn declare_point(&self, id: &str, spec: PointSpec) -> Result<()> {
        if id.is_empty() {
            return Err(Error::ArgumentOutOfRange("empty point id".to_string()));
        }
        trace!("Declare point {}: {:?}", id, spec);
        self.lock().points.entry(id.to_string()).or_default().spec = Some(spec);
        Ok(())
    }

    fn publish_value(&self, id: &str, value: PointValue) {
        let mut reg = self.lock();
        let entry = reg.points.entry(id.to_string()).or_default();
        entry.state = Some(PointState {
            value: value.clone(),
            ack: true,
        });
        entry.updates += 1;
        trace!("Publish {} = {}", id, value);
        reg.notify_watchers(id, &value);
    }

    fn cached_value(&self, id: &str) -> Option<PointValue> {
        self.state(id).map(|s| s.value)
    }

    fn point_exists(&self, id: &str) -> bool {
        self.lock().points.contains_key(id)
    }

    fn on_point_change(&self, id: &str) -> CommandReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .commands
            .entry(id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    fn on_external_point_change(&self, id: &str) -> ValueReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .watchers
            .entry(id.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(PointValue::Number(2.0).as_bool(), Some(true));
        assert_eq!(PointValue::Number(0.0).as_bool(), Some(false));
        assert_eq!(PointValue::from("on").as_bool(), Some(true));
        assert_eq!(PointValue::from("maybe").as_bool(), None);
        assert_eq!(PointValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(PointValue::from(" 12.5 ").as_f64(), Some(12.5));
    }

    #[test]
    fn test_value_json_is_untagged() {
        let v: PointValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, PointValue::Bool(true));
        let v: PointValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(v, PointValue::Number(3.5));
        let v: PointValue = serde_json::from_str("\"A\"").unwrap();
        assert_eq!(v, PointValue::Text("A".to_string()));
    }

    #[tokio::test]
    async fn test_write_reaches_command_subscribers() {
        let reg = PointRegistry::new();
        reg.declare_point("dev.00", PointSpec::switch()).unwrap();
        reg.publish_value("dev.00", PointValue::Bool(false));
        let mut rx = reg.on_point_change("dev.00");
        reg.write("dev.00", true).unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.old, Some(PointValue::Bool(false)));
        assert_eq!(change.new, PointValue::Bool(true));
        assert!(!reg.state("dev.00").unwrap().ack);
    }

    #[tokio::test]
    async fn test_publish_does_not_echo_as_command() {
        let reg = PointRegistry::new();
        reg.declare_point("dev.00", PointSpec::switch()).unwrap();
        let mut commands = reg.on_point_change("dev.00");
        let mut watch = reg.on_external_point_change("dev.00");
        reg.publish_value("dev.00", PointValue::Bool(true));
        assert_eq!(watch.recv().await, Some(PointValue::Bool(true)));
        assert!(commands.try_recv().is_err());
        assert!(reg.state("dev.00").unwrap().ack);
    }

    #[test]
    fn test_write_to_unknown_point_fails() {
        let reg = PointRegistry::new();
        assert!(matches!(
            reg.write("nope", 1.0),
            Err(Error::UnknownPoint(_))
        ));
    }

    #[test]
    fn test_restore_seeds_without_counting() {
        let reg = PointRegistry::new();
        reg.restore("dev.01", true);
        assert!(reg.point_exists("dev.01"));
        assert_eq!(reg.cached_value("dev.01"), Some(PointValue::Bool(true)));
        assert_eq!(reg.update_count("dev.01"), 0);
    }
}
