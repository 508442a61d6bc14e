//! Device types for tracking discovered hardware

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rack::RackKey;

/// Severity of a device status record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusVariant {
    Success,
    Info,
    Warning,
    Error,
    Disabled,
}

impl Default for StatusVariant {
    fn default() -> Self {
        Self::Info
    }
}

/// Point-in-time health record attached to a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Key of the device this status describes
    pub key: String,
    pub variant: StatusVariant,
    pub message: String,
    pub time: DateTime<Utc>,
}

impl DeviceStatus {
    /// Status recorded when a device is observed during a scan
    pub fn present(key: &str) -> Self {
        Self {
            key: key.to_string(),
            variant: StatusVariant::Success,
            message: "Device present".to_string(),
            time: Utc::now(),
        }
    }

    /// Status recorded when a known device is missing from a scan
    pub fn disconnected(key: &str) -> Self {
        Self {
            key: key.to_string(),
            variant: StatusVariant::Warning,
            message: "Device disconnected".to_string(),
            time: Utc::now(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.variant == StatusVariant::Success
    }
}

/// A discovered hardware resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Serial number for physical devices, resource name for simulated ones
    pub key: String,
    pub make: String,
    /// Product name with the vendor prefix stripped
    pub model: String,
    pub name: String,
    /// Rack that owns this device
    pub rack: RackKey,
    pub is_simulated: bool,
    /// User alias reported by the vendor service
    pub location: String,
    /// Vendor resource path, without surrounding delimiters
    pub resource_name: String,
    /// Bus/link this device attaches to (modules)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connects_to_link_name: String,
    /// Bus/link this device exposes to others (chassis, carriers)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provides_link_name: String,
    /// Key of the device providing `connects_to_link_name`, if found in the same scan
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_device: String,
    pub status: DeviceStatus,
    /// Raw scanned properties
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Device {
    pub fn has_parent(&self) -> bool {
        !self.parent_device.is_empty()
    }

    /// Check if the device status is older than the given timeout
    pub fn is_stale(&self, timeout_secs: i64) -> bool {
        let elapsed = Utc::now() - self.status.time;
        elapsed.num_seconds() > timeout_secs
    }
}

/// Merge scanned properties over previously known ones.
///
/// Top-level keys from `scanned` replace those in `remote`; nested objects are
/// replaced wholesale.
pub fn merge_properties(remote: &Map<String, Value>, scanned: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = remote.clone();
    for (key, value) in scanned {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_scanned_overrides_remote() {
        let remote = obj(json!({"key1": "remote_value", "key2": "only_remote"}));
        let scanned = obj(json!({"key1": "scanned_value", "key3": "only_scanned"}));
        let merged = merge_properties(&remote, &scanned);
        assert_eq!(merged["key1"], "scanned_value");
        assert_eq!(merged["key2"], "only_remote");
        assert_eq!(merged["key3"], "only_scanned");
    }

    #[test]
    fn test_merge_with_empty_side() {
        let props = obj(json!({"key1": "value1"}));
        assert_eq!(merge_properties(&Map::new(), &props), props);
        assert_eq!(merge_properties(&props, &Map::new()), props);
        assert!(merge_properties(&Map::new(), &Map::new()).is_empty());
    }

    #[test]
    fn test_nested_objects_replaced_not_merged() {
        let remote = obj(json!({"nested": {"a": "1", "b": "2"}}));
        let scanned = obj(json!({"nested": {"a": "new"}}));
        let merged = merge_properties(&remote, &scanned);
        assert_eq!(merged["nested"]["a"], "new");
        assert!(merged["nested"].get("b").is_none());
    }

    #[test]
    fn test_status_constructors() {
        let present = DeviceStatus::present("01A2B3C4");
        assert_eq!(present.key, "01A2B3C4");
        assert!(present.is_present());

        let gone = DeviceStatus::disconnected("01A2B3C4");
        assert_eq!(gone.variant, StatusVariant::Warning);
        assert!(!gone.is_present());
    }
}
