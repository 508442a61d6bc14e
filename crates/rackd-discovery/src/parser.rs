//! Turns a raw hardware resource into a typed [`Device`]

use rackd_core::{Device, DeviceStatus, RackKey};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::provider::{
    IndexedProperty, PropertyValue, ProviderError, ResourceHandle, ResourceProperty,
    ResourceProvider,
};

/// Make reported for every parsed device
pub const DEFAULT_MAKE: &str = "NI";

/// Vendor prefix stripped from product names to form the model
pub const DEFAULT_MODEL_PREFIX: &str = "NI ";

/// Models that are never reported (controllers and placeholder entries)
pub const DEFAULT_IGNORED_MODELS: &[&str] = &["O*", "cRIO*", "nown*"];

#[derive(Error, Debug)]
pub enum ParseError {
    /// The resource is malformed or filtered out; drop it and keep scanning
    #[error("skipping device: {0}")]
    Skip(String),
    #[error("failed to read resource: {0}")]
    Provider(#[from] ProviderError),
}

impl ParseError {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// Model patterns to ignore. A trailing `*` matches by prefix, anything else
/// matches exactly.
#[derive(Debug, Clone, Default)]
pub struct IgnoredModels {
    patterns: Vec<String>,
}

impl IgnoredModels {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, model: &str) -> bool {
        self.patterns.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => model.starts_with(prefix),
            None => model == p,
        })
    }
}

type IgnorePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Parses resources reported by a [`ResourceProvider`]
pub struct DeviceParser {
    make: String,
    model_prefix: String,
    rack: RackKey,
    ignore: IgnorePredicate,
}

impl std::fmt::Debug for DeviceParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceParser")
            .field("make", &self.make)
            .field("model_prefix", &self.model_prefix)
            .field("rack", &self.rack)
            .finish_non_exhaustive()
    }
}

impl Default for DeviceParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAKE, DEFAULT_MODEL_PREFIX, RackKey::UNSET)
    }
}

impl DeviceParser {
    pub fn new(make: impl Into<String>, model_prefix: impl Into<String>, rack: RackKey) -> Self {
        Self {
            make: make.into(),
            model_prefix: model_prefix.into(),
            rack,
            ignore: Box::new(|_| false),
        }
    }

    /// Skip every device whose model matches `predicate`
    pub fn with_ignore<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.ignore = Box::new(predicate);
        self
    }

    pub fn set_rack(&mut self, rack: RackKey) {
        self.rack = rack;
    }

    pub fn rack(&self) -> RackKey {
        self.rack
    }

    /// Build a device from one resource.
    ///
    /// Missing serial number (physical devices), product name, user alias or
    /// resource name yields [`ParseError::Skip`]. Link names are optional.
    pub fn parse<P: ResourceProvider + ?Sized>(
        &self,
        provider: &mut P,
        resource: ResourceHandle,
    ) -> Result<Device, ParseError> {
        let mut properties = Map::new();

        let is_simulated = match provider.get_resource_property(resource, ResourceProperty::IsSimulated) {
            Ok(value) => value.as_bool(),
            Err(ProviderError::PropertyNotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        properties.insert("is_simulated".to_string(), Value::Bool(is_simulated));

        let mut key = String::new();
        if !is_simulated {
            key = required(provider.get_resource_property(resource, ResourceProperty::SerialNumber), "serial number")?;
            properties.insert("serial_number".to_string(), Value::String(key.clone()));
        }

        let product_name = required(
            provider.get_resource_property(resource, ResourceProperty::ProductName),
            "product name",
        )?;
        let model = product_name
            .strip_prefix(self.model_prefix.as_str())
            .unwrap_or(&product_name)
            .to_string();
        properties.insert("product_name".to_string(), Value::String(product_name.clone()));

        // TODO: a missing alias should leave location empty instead of dropping the device
        let location = required(
            provider.get_resource_indexed_property(resource, IndexedProperty::ExpertUserAlias, 0),
            "user alias",
        )?;

        let connects_to_link_name = optional(
            provider.get_resource_property(resource, ResourceProperty::ConnectsToLinkName),
        )?;
        let provides_link_name = optional(
            provider.get_resource_property(resource, ResourceProperty::ProvidesLinkName),
        )?;

        let raw_resource_name = required(
            provider.get_resource_indexed_property(resource, IndexedProperty::ExpertResourceName, 0),
            "resource name",
        )?;
        let resource_name = trim_delimiter(&raw_resource_name).to_string();
        properties.insert("resource_name".to_string(), Value::String(resource_name.clone()));

        if is_simulated {
            key = resource_name.clone();
        }
        if key.is_empty() {
            return Err(ParseError::Skip("empty device key".to_string()));
        }

        if (self.ignore)(&model) {
            return Err(ParseError::Skip(format!("ignored model {}", model)));
        }

        for (name, link) in [
            ("connects_to_link_name", &connects_to_link_name),
            ("provides_link_name", &provides_link_name),
        ] {
            if !link.is_empty() {
                properties.insert(name.to_string(), Value::String(link.clone()));
            }
        }

        let status = DeviceStatus::present(&key);
        Ok(Device {
            key,
            make: self.make.clone(),
            model,
            name: location.clone(),
            rack: self.rack,
            is_simulated,
            location,
            resource_name,
            connects_to_link_name,
            provides_link_name,
            parent_device: String::new(),
            status,
            properties,
        })
    }
}

fn required(value: Result<PropertyValue, ProviderError>, what: &str) -> Result<String, ParseError> {
    match value {
        Ok(v) => Ok(v.into_string()),
        Err(ProviderError::PropertyNotFound(_)) => Err(ParseError::Skip(format!("missing {}", what))),
        Err(e) => Err(e.into()),
    }
}

fn optional(value: Result<PropertyValue, ProviderError>) -> Result<String, ParseError> {
    match value {
        Ok(v) => Ok(v.into_string()),
        Err(ProviderError::PropertyNotFound(_)) => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Strip one leading and one trailing `"` from a vendor resource name
fn trim_delimiter(name: &str) -> &str {
    let name = name.strip_prefix('"').unwrap_or(name);
    name.strip_suffix('"').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FilterMode, ResourceHandle};
    use crate::sim::{SimulatedProvider, SimulatedResource};
    use std::time::Duration;

    fn module() -> SimulatedResource {
        SimulatedResource {
            is_simulated: Some(false),
            serial_number: Some("01D5E6F7".to_string()),
            product_name: Some("NI 9205".to_string()),
            user_alias: Some("cDAQ1Mod1".to_string()),
            resource_name: Some("\"cDAQ1Mod1\"".to_string()),
            connects_to_link_name: Some("cDAQ1-bus".to_string()),
            ..Default::default()
        }
    }

    fn parse_one(parser: &DeviceParser, resource: SimulatedResource) -> Result<Device, ParseError> {
        let mut provider = SimulatedProvider::new(vec![resource]);
        let session = provider
            .initialize_session("localhost", None, Duration::from_secs(1))
            .unwrap();
        let filter = provider.create_filter(session).unwrap();
        let resources = provider
            .find_hardware(session, FilterMode::MatchValuesAll, filter, &[])
            .unwrap();
        let handle: ResourceHandle = provider.next_resource(session, resources).unwrap().unwrap();
        parser.parse(&mut provider, handle)
    }

    #[test]
    fn test_parse_physical_module() {
        let parser = DeviceParser::new("NI", "NI ", RackKey(3));
        let device = parse_one(&parser, module()).unwrap();

        assert_eq!(device.key, "01D5E6F7");
        assert_eq!(device.make, "NI");
        assert_eq!(device.model, "9205");
        assert_eq!(device.name, "cDAQ1Mod1");
        assert_eq!(device.location, "cDAQ1Mod1");
        assert_eq!(device.resource_name, "cDAQ1Mod1");
        assert_eq!(device.rack, RackKey(3));
        assert_eq!(device.connects_to_link_name, "cDAQ1-bus");
        assert!(device.provides_link_name.is_empty());
        assert!(device.parent_device.is_empty());
        assert!(device.status.is_present());
        assert_eq!(device.status.key, "01D5E6F7");
        assert_eq!(device.properties["serial_number"], "01D5E6F7");
    }

    #[test]
    fn test_simulated_device_keyed_by_resource_name() {
        let resource = SimulatedResource {
            is_simulated: Some(true),
            serial_number: None,
            resource_name: Some("\"SimDev1\"".to_string()),
            ..module()
        };
        let device = parse_one(&DeviceParser::default(), resource).unwrap();
        assert!(device.is_simulated);
        assert_eq!(device.key, "SimDev1");
    }

    #[test]
    fn test_missing_required_properties_skip() {
        let parser = DeviceParser::default();
        let cases = [
            SimulatedResource { serial_number: None, ..module() },
            SimulatedResource { product_name: None, ..module() },
            SimulatedResource { user_alias: None, ..module() },
            SimulatedResource { resource_name: None, ..module() },
            SimulatedResource { serial_number: Some(String::new()), ..module() },
        ];
        for resource in cases {
            let err = parse_one(&parser, resource).unwrap_err();
            assert!(err.is_skip(), "expected skip, got {err}");
        }
    }

    #[test]
    fn test_missing_link_names_are_optional() {
        let resource = SimulatedResource {
            connects_to_link_name: None,
            provides_link_name: None,
            ..module()
        };
        let device = parse_one(&DeviceParser::default(), resource).unwrap();
        assert!(device.connects_to_link_name.is_empty());
        assert!(device.provides_link_name.is_empty());
    }

    #[test]
    fn test_missing_simulated_flag_means_physical() {
        let resource = SimulatedResource { is_simulated: None, ..module() };
        let device = parse_one(&DeviceParser::default(), resource).unwrap();
        assert!(!device.is_simulated);
        assert_eq!(device.key, "01D5E6F7");
    }

    #[test]
    fn test_ignored_model_skips() {
        let ignored = IgnoredModels::new(DEFAULT_IGNORED_MODELS.iter().copied());
        let parser = DeviceParser::default().with_ignore(move |model| ignored.matches(model));
        let resource = SimulatedResource {
            product_name: Some("NI cRIO-9045".to_string()),
            ..module()
        };
        assert!(parse_one(&parser, resource).unwrap_err().is_skip());
        assert!(parse_one(&parser, module()).is_ok());
    }

    #[test]
    fn test_ignored_models_patterns() {
        let ignored = IgnoredModels::new(["cRIO*", "9205"]);
        assert!(ignored.matches("cRIO-9045"));
        assert!(ignored.matches("9205"));
        assert!(!ignored.matches("9205A"));
        assert!(!ignored.matches("PXIe-4309"));
    }

    #[test]
    fn test_trim_delimiter() {
        assert_eq!(trim_delimiter("\"Dev1\""), "Dev1");
        assert_eq!(trim_delimiter("Dev1"), "Dev1");
        assert_eq!(trim_delimiter("\"\"Dev1\"\""), "\"Dev1\"");
    }
}
