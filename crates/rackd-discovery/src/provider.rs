//! Hardware configuration service abstraction
//!
//! [`ResourceProvider`] is the boundary to the vendor system-configuration service.
//! Every handle it hands out must be released exactly once through
//! [`ResourceProvider::close_handle`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No (more) resources match the enumeration
    #[error("end of enumeration")]
    EndOfEnum,
    #[error("property not found: {0}")]
    PropertyNotFound(String),
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),
    #[error("vendor error {code}: {message}")]
    Vendor { code: i32, message: String },
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl From<$name> for Handle {
            fn from(h: $name) -> Self {
                Handle(h.0)
            }
        }
    };
}

/// Any handle issued by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

handle_type!(
    /// Open session with the configuration service
    SessionHandle
);
handle_type!(
    /// Hardware filter attached to a session
    FilterHandle
);
handle_type!(
    /// Enumeration over matching resources
    EnumHandle
);
handle_type!(
    /// Single hardware resource
    ResourceHandle
);

/// Session credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Presence state used when filtering hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    NotPresent,
    Present,
    Any,
}

/// Typed filter settings, one variant per property family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterProperty {
    IsDevice(bool),
    IsChassis(bool),
    IsSimulated(bool),
    IsPresent(PresentState),
}

/// How filter properties are combined when finding hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    MatchValuesAll,
    MatchValuesAny,
    AllPropertiesExist,
}

/// Per-resource properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceProperty {
    IsSimulated,
    SerialNumber,
    ProductName,
    ConnectsToLinkName,
    ProvidesLinkName,
}

/// Properties reported once per expert, addressed by index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexedProperty {
    ExpertName,
    ExpertResourceName,
    ExpertUserAlias,
}

impl std::fmt::Display for ResourceProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::IsSimulated => "is_simulated",
            Self::SerialNumber => "serial_number",
            Self::ProductName => "product_name",
            Self::ConnectsToLinkName => "connects_to_link_name",
            Self::ProvidesLinkName => "provides_link_name",
        };
        f.write_str(name)
    }
}

impl std::fmt::Display for IndexedProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ExpertName => "expert_name",
            Self::ExpertResourceName => "resource_name",
            Self::ExpertUserAlias => "user_alias",
        };
        f.write_str(name)
    }
}

/// Value of a resource property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    String(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::String(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::String(s) => s,
        }
    }
}

/// Vendor system-configuration service
pub trait ResourceProvider: Send {
    fn initialize_session(
        &mut self,
        target: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<SessionHandle, ProviderError>;

    fn create_filter(&mut self, session: SessionHandle) -> Result<FilterHandle, ProviderError>;

    fn set_filter_property(
        &mut self,
        filter: FilterHandle,
        property: FilterProperty,
    ) -> Result<(), ProviderError>;

    /// Begin enumerating matching hardware. Fails with
    /// [`ProviderError::EndOfEnum`] when nothing matches.
    fn find_hardware(
        &mut self,
        session: SessionHandle,
        mode: FilterMode,
        filter: FilterHandle,
        expert_names: &[String],
    ) -> Result<EnumHandle, ProviderError>;

    /// Next resource in the enumeration, `None` once exhausted
    fn next_resource(
        &mut self,
        session: SessionHandle,
        resources: EnumHandle,
    ) -> Result<Option<ResourceHandle>, ProviderError>;

    fn get_resource_property(
        &mut self,
        resource: ResourceHandle,
        property: ResourceProperty,
    ) -> Result<PropertyValue, ProviderError>;

    fn get_resource_indexed_property(
        &mut self,
        resource: ResourceHandle,
        property: IndexedProperty,
        index: u32,
    ) -> Result<PropertyValue, ProviderError>;

    fn close_handle(&mut self, handle: Handle) -> Result<(), ProviderError>;
}

impl<P: ResourceProvider + ?Sized> ResourceProvider for Box<P> {
    fn initialize_session(
        &mut self,
        target: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<SessionHandle, ProviderError> {
        (**self).initialize_session(target, credentials, timeout)
    }

    fn create_filter(&mut self, session: SessionHandle) -> Result<FilterHandle, ProviderError> {
        (**self).create_filter(session)
    }

    fn set_filter_property(
        &mut self,
        filter: FilterHandle,
        property: FilterProperty,
    ) -> Result<(), ProviderError> {
        (**self).set_filter_property(filter, property)
    }

    fn find_hardware(
        &mut self,
        session: SessionHandle,
        mode: FilterMode,
        filter: FilterHandle,
        expert_names: &[String],
    ) -> Result<EnumHandle, ProviderError> {
        (**self).find_hardware(session, mode, filter, expert_names)
    }

    fn next_resource(
        &mut self,
        session: SessionHandle,
        resources: EnumHandle,
    ) -> Result<Option<ResourceHandle>, ProviderError> {
        (**self).next_resource(session, resources)
    }

    fn get_resource_property(
        &mut self,
        resource: ResourceHandle,
        property: ResourceProperty,
    ) -> Result<PropertyValue, ProviderError> {
        (**self).get_resource_property(resource, property)
    }

    fn get_resource_indexed_property(
        &mut self,
        resource: ResourceHandle,
        property: IndexedProperty,
        index: u32,
    ) -> Result<PropertyValue, ProviderError> {
        (**self).get_resource_indexed_property(resource, property, index)
    }

    fn close_handle(&mut self, handle: Handle) -> Result<(), ProviderError> {
        (**self).close_handle(handle)
    }
}

/// Releases a handle when dropped
pub struct Scoped<'a, P: ResourceProvider + ?Sized> {
    provider: &'a mut P,
    handle: Handle,
}

impl<'a, P: ResourceProvider + ?Sized> Scoped<'a, P> {
    pub fn new(provider: &'a mut P, handle: impl Into<Handle>) -> Self {
        Self {
            provider,
            handle: handle.into(),
        }
    }

    pub fn provider(&mut self) -> &mut P {
        self.provider
    }
}

impl<P: ResourceProvider + ?Sized> Drop for Scoped<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.provider.close_handle(self.handle) {
            tracing::warn!(handle = %self.handle, error = %e, "Failed to release handle");
        }
    }
}
