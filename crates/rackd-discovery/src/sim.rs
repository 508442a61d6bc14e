//! In-memory resource provider serving simulated hardware
//!
//! Used when no vendor configuration service is installed, and to drive the
//! scanner in tests. Tracks every handle it issues so callers can verify that
//! nothing leaks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::provider::{
    Credentials, EnumHandle, FilterHandle, FilterMode, FilterProperty, Handle, IndexedProperty,
    PropertyValue, ProviderError, ResourceHandle, ResourceProperty, ResourceProvider,
    SessionHandle,
};

/// A simulated hardware resource; absent fields are reported as missing properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedResource {
    #[serde(default)]
    pub is_simulated: Option<bool>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub user_alias: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub connects_to_link_name: Option<String>,
    #[serde(default)]
    pub provides_link_name: Option<String>,
    #[serde(default)]
    pub is_chassis: bool,
}

#[derive(Debug)]
enum Issued {
    Session,
    Filter { exclude_chassis: bool, simulated: Option<bool> },
    Enum { matches: Vec<usize>, cursor: usize },
    Resource(usize),
}

/// Resource provider backed by a fixed list of simulated resources
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    resources: Vec<SimulatedResource>,
    issued: HashMap<u64, Issued>,
    next_handle: u64,
    closed: usize,
    find_error: Option<ProviderError>,
    enum_close_error: Option<ProviderError>,
    filter_error: Option<ProviderError>,
    /// Keyed by resource index
    property_errors: HashMap<(usize, ResourceProperty), ProviderError>,
}

impl SimulatedProvider {
    pub fn new(resources: Vec<SimulatedResource>) -> Self {
        Self {
            resources,
            next_handle: 1,
            ..Default::default()
        }
    }

    /// Fail every `find_hardware` call with the given error
    pub fn with_find_error(mut self, err: ProviderError) -> Self {
        self.find_error = Some(err);
        self
    }

    /// Fail every `set_filter_property` call with the given error
    pub fn with_filter_error(mut self, err: ProviderError) -> Self {
        self.filter_error = Some(err);
        self
    }

    /// Fail the release of enumeration handles with the given error
    pub fn with_enum_close_error(mut self, err: ProviderError) -> Self {
        self.enum_close_error = Some(err);
        self
    }

    /// Fail reads of `property` on the resource at `index` with the given error
    pub fn with_property_error(mut self, index: usize, property: ResourceProperty, err: ProviderError) -> Self {
        self.property_errors.insert((index, property), err);
        self
    }

    pub fn set_resources(&mut self, resources: Vec<SimulatedResource>) {
        self.resources = resources;
    }

    /// Number of handles issued and not yet released
    pub fn open_handles(&self) -> usize {
        self.issued.len()
    }

    /// Number of resource and enumeration handles currently open
    pub fn open_scan_handles(&self) -> usize {
        self.issued
            .values()
            .filter(|h| matches!(h, Issued::Enum { .. } | Issued::Resource(_)))
            .count()
    }

    /// Total handles released so far
    pub fn closed_handles(&self) -> usize {
        self.closed
    }

    fn issue(&mut self, handle: Issued) -> u64 {
        let id = self.next_handle.max(1);
        self.next_handle = id + 1;
        self.issued.insert(id, handle);
        id
    }

    fn resource(&self, handle: ResourceHandle) -> Result<&SimulatedResource, ProviderError> {
        match self.issued.get(&handle.0) {
            Some(Issued::Resource(index)) => self
                .resources
                .get(*index)
                .ok_or(ProviderError::InvalidHandle(handle.0)),
            _ => Err(ProviderError::InvalidHandle(handle.0)),
        }
    }

    fn matches_filter(resource: &SimulatedResource, exclude_chassis: bool, simulated: Option<bool>) -> bool {
        if exclude_chassis && resource.is_chassis {
            return false;
        }
        match simulated {
            Some(want) => resource.is_simulated.unwrap_or(false) == want,
            None => true,
        }
    }
}

fn string_property(value: &Option<String>, name: impl ToString) -> Result<PropertyValue, ProviderError> {
    value
        .clone()
        .map(PropertyValue::String)
        .ok_or_else(|| ProviderError::PropertyNotFound(name.to_string()))
}

impl ResourceProvider for SimulatedProvider {
    fn initialize_session(
        &mut self,
        _target: &str,
        _credentials: Option<&Credentials>,
        _timeout: Duration,
    ) -> Result<SessionHandle, ProviderError> {
        Ok(SessionHandle(self.issue(Issued::Session)))
    }

    fn create_filter(&mut self, session: SessionHandle) -> Result<FilterHandle, ProviderError> {
        if !matches!(self.issued.get(&session.0), Some(Issued::Session)) {
            return Err(ProviderError::InvalidHandle(session.0));
        }
        Ok(FilterHandle(self.issue(Issued::Filter {
            exclude_chassis: false,
            simulated: None,
        })))
    }

    fn set_filter_property(
        &mut self,
        filter: FilterHandle,
        property: FilterProperty,
    ) -> Result<(), ProviderError> {
        if let Some(err) = &self.filter_error {
            return Err(err.clone());
        }
        let Some(Issued::Filter {
            exclude_chassis,
            simulated,
        }) = self.issued.get_mut(&filter.0)
        else {
            return Err(ProviderError::InvalidHandle(filter.0));
        };
        match property {
            FilterProperty::IsChassis(is_chassis) => *exclude_chassis = !is_chassis,
            FilterProperty::IsSimulated(want) => *simulated = Some(want),
            // Every simulated resource is a present device
            FilterProperty::IsDevice(_) | FilterProperty::IsPresent(_) => {}
        }
        Ok(())
    }

    fn find_hardware(
        &mut self,
        session: SessionHandle,
        _mode: FilterMode,
        filter: FilterHandle,
        _expert_names: &[String],
    ) -> Result<EnumHandle, ProviderError> {
        if let Some(err) = &self.find_error {
            return Err(err.clone());
        }
        if !matches!(self.issued.get(&session.0), Some(Issued::Session)) {
            return Err(ProviderError::InvalidHandle(session.0));
        }
        let (exclude_chassis, simulated) = match self.issued.get(&filter.0) {
            Some(Issued::Filter {
                exclude_chassis,
                simulated,
            }) => (*exclude_chassis, *simulated),
            _ => return Err(ProviderError::InvalidHandle(filter.0)),
        };

        let matches: Vec<usize> = self
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| Self::matches_filter(r, exclude_chassis, simulated))
            .map(|(i, _)| i)
            .collect();

        if matches.is_empty() {
            return Err(ProviderError::EndOfEnum);
        }
        Ok(EnumHandle(self.issue(Issued::Enum { matches, cursor: 0 })))
    }

    fn next_resource(
        &mut self,
        _session: SessionHandle,
        resources: EnumHandle,
    ) -> Result<Option<ResourceHandle>, ProviderError> {
        let next = match self.issued.get_mut(&resources.0) {
            Some(Issued::Enum { matches, cursor }) => {
                let next = matches.get(*cursor).copied();
                *cursor += 1;
                next
            }
            _ => return Err(ProviderError::InvalidHandle(resources.0)),
        };
        Ok(next.map(|index| ResourceHandle(self.issue(Issued::Resource(index)))))
    }

    fn get_resource_property(
        &mut self,
        resource: ResourceHandle,
        property: ResourceProperty,
    ) -> Result<PropertyValue, ProviderError> {
        if let Some(Issued::Resource(index)) = self.issued.get(&resource.0) {
            if let Some(err) = self.property_errors.get(&(*index, property)) {
                return Err(err.clone());
            }
        }
        let r = self.resource(resource)?;
        match property {
            ResourceProperty::IsSimulated => r
                .is_simulated
                .map(PropertyValue::Bool)
                .ok_or_else(|| ProviderError::PropertyNotFound(property.to_string())),
            ResourceProperty::SerialNumber => string_property(&r.serial_number, property),
            ResourceProperty::ProductName => string_property(&r.product_name, property),
            ResourceProperty::ConnectsToLinkName => string_property(&r.connects_to_link_name, property),
            ResourceProperty::ProvidesLinkName => string_property(&r.provides_link_name, property),
        }
    }

    fn get_resource_indexed_property(
        &mut self,
        resource: ResourceHandle,
        property: IndexedProperty,
        index: u32,
    ) -> Result<PropertyValue, ProviderError> {
        let r = self.resource(resource)?;
        if index != 0 {
            return Err(ProviderError::PropertyNotFound(format!("{}[{}]", property, index)));
        }
        match property {
            IndexedProperty::ExpertName => Ok(PropertyValue::String("simulated".to_string())),
            IndexedProperty::ExpertResourceName => string_property(&r.resource_name, property),
            IndexedProperty::ExpertUserAlias => string_property(&r.user_alias, property),
        }
    }

    fn close_handle(&mut self, handle: Handle) -> Result<(), ProviderError> {
        let issued = self
            .issued
            .remove(&handle.0)
            .ok_or(ProviderError::InvalidHandle(handle.0))?;
        self.closed += 1;
        if let (Issued::Enum { .. }, Some(err)) = (&issued, &self.enum_close_error) {
            return Err(err.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chassis() -> SimulatedResource {
        SimulatedResource {
            serial_number: Some("01A2B3C4".to_string()),
            product_name: Some("NI cDAQ-9178".to_string()),
            user_alias: Some("cDAQ1".to_string()),
            resource_name: Some("\"cDAQ1\"".to_string()),
            provides_link_name: Some("cDAQ1-bus".to_string()),
            is_chassis: true,
            ..Default::default()
        }
    }

    fn open(provider: &mut SimulatedProvider) -> (SessionHandle, FilterHandle) {
        let session = provider
            .initialize_session("localhost", None, Duration::from_secs(1))
            .unwrap();
        let filter = provider.create_filter(session).unwrap();
        (session, filter)
    }

    #[test]
    fn test_empty_provider_ends_enumeration() {
        let mut provider = SimulatedProvider::new(Vec::new());
        let (session, filter) = open(&mut provider);
        let err = provider
            .find_hardware(session, FilterMode::MatchValuesAll, filter, &[])
            .unwrap_err();
        assert_eq!(err, ProviderError::EndOfEnum);
    }

    #[test]
    fn test_chassis_filter() {
        let mut provider = SimulatedProvider::new(vec![chassis()]);
        let (session, filter) = open(&mut provider);
        provider
            .set_filter_property(filter, FilterProperty::IsChassis(false))
            .unwrap();
        assert_eq!(
            provider.find_hardware(session, FilterMode::MatchValuesAll, filter, &[]),
            Err(ProviderError::EndOfEnum)
        );
    }

    #[test]
    fn test_missing_property_and_double_close() {
        let mut provider = SimulatedProvider::new(vec![chassis()]);
        let (session, filter) = open(&mut provider);
        let resources = provider
            .find_hardware(session, FilterMode::MatchValuesAll, filter, &[])
            .unwrap();
        let resource = provider.next_resource(session, resources).unwrap().unwrap();

        assert_eq!(
            provider.get_resource_property(resource, ResourceProperty::SerialNumber),
            Ok(PropertyValue::String("01A2B3C4".to_string()))
        );
        assert!(matches!(
            provider.get_resource_property(resource, ResourceProperty::ConnectsToLinkName),
            Err(ProviderError::PropertyNotFound(_))
        ));
        assert_eq!(provider.next_resource(session, resources), Ok(None));

        provider.close_handle(resource.into()).unwrap();
        assert_eq!(
            provider.close_handle(resource.into()),
            Err(ProviderError::InvalidHandle(resource.0))
        );
    }
}
