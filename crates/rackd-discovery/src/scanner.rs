//! Discovery pass over the hardware configuration service

use rackd_core::{resolve_parents, Device, RackKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::parser::{DeviceParser, IgnoredModels, DEFAULT_IGNORED_MODELS, DEFAULT_MAKE, DEFAULT_MODEL_PREFIX};
use crate::provider::{
    Credentials, FilterHandle, FilterMode, FilterProperty, PresentState, ProviderError,
    ResourceProvider, Scoped, SessionHandle,
};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scanner session not started")]
    NotStarted,
    #[error("failed to open hardware session: {0}")]
    Session(ProviderError),
    #[error("hardware enumeration failed: {0}")]
    Enumerate(ProviderError),
    #[error("failed to release enumeration handle: {0}")]
    Release(ProviderError),
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Host running the configuration service
    pub target: String,
    pub credentials: Option<Credentials>,
    /// Session timeout in milliseconds
    pub timeout_ms: u64,
    pub make: String,
    /// Prefix stripped from product names
    pub model_prefix: String,
    /// Model patterns to skip (trailing `*` matches by prefix)
    pub ignored_models: Vec<String>,
    /// Report chassis alongside modules
    pub include_chassis: bool,
    /// Restrict enumeration to these experts (empty = all)
    pub expert_names: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            target: "localhost".to_string(),
            credentials: None,
            timeout_ms: 10_000,
            make: DEFAULT_MAKE.to_string(),
            model_prefix: DEFAULT_MODEL_PREFIX.to_string(),
            ignored_models: DEFAULT_IGNORED_MODELS.iter().map(|s| s.to_string()).collect(),
            include_chassis: true,
            expert_names: Vec::new(),
        }
    }
}

/// Per-pass context supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ScannerContext {
    /// Number of scan passes run so far
    pub count: usize,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    session: SessionHandle,
    filter: FilterHandle,
}

/// Enumerates hardware resources and turns them into resolved devices
pub struct Scanner<P: ResourceProvider> {
    provider: P,
    parser: DeviceParser,
    config: ScannerConfig,
    session: Option<Session>,
}

impl<P: ResourceProvider> Scanner<P> {
    pub fn new(provider: P, config: ScannerConfig, rack: RackKey) -> Self {
        let ignored = IgnoredModels::new(config.ignored_models.iter().cloned());
        let parser = DeviceParser::new(config.make.clone(), config.model_prefix.clone(), rack)
            .with_ignore(move |model| ignored.matches(model));
        Self {
            provider,
            parser,
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn rack(&self) -> RackKey {
        self.parser.rack()
    }

    /// Tag devices from subsequent scans with a new rack
    pub fn set_rack(&mut self, rack: RackKey) {
        self.parser.set_rack(rack);
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    /// Open a session and configure the hardware filter
    pub fn start(&mut self) -> Result<(), ScanError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = self
            .provider
            .initialize_session(
                &self.config.target,
                self.config.credentials.as_ref(),
                Duration::from_millis(self.config.timeout_ms),
            )
            .map_err(ScanError::Session)?;

        let filter = match self.configure_filter(session) {
            Ok(filter) => filter,
            Err(e) => {
                if let Err(release) = self.provider.close_handle(session.into()) {
                    warn!(error = %release, "Failed to release hardware session");
                }
                return Err(ScanError::Session(e));
            }
        };

        info!(target = %self.config.target, "Hardware session opened");
        self.session = Some(Session { session, filter });
        Ok(())
    }

    fn configure_filter(&mut self, session: SessionHandle) -> Result<FilterHandle, ProviderError> {
        let filter = self.provider.create_filter(session)?;
        let mut properties = vec![
            FilterProperty::IsDevice(true),
            FilterProperty::IsPresent(PresentState::Present),
        ];
        if !self.config.include_chassis {
            properties.push(FilterProperty::IsChassis(false));
        }
        for property in properties {
            if let Err(e) = self.provider.set_filter_property(filter, property) {
                if let Err(release) = self.provider.close_handle(filter.into()) {
                    warn!(error = %release, "Failed to release hardware filter");
                }
                return Err(e);
            }
        }
        Ok(filter)
    }

    /// Close the filter and session
    pub fn stop(&mut self) {
        if let Some(Session { session, filter }) = self.session.take() {
            if let Err(e) = self.provider.close_handle(filter.into()) {
                warn!(error = %e, "Failed to release hardware filter");
            }
            if let Err(e) = self.provider.close_handle(session.into()) {
                warn!(error = %e, "Failed to release hardware session");
            }
            debug!("Hardware session closed");
        }
    }

    /// Run one discovery pass.
    ///
    /// An empty enumeration is a successful empty result. Per-resource failures
    /// drop the resource; the enumeration handle release error is only reported
    /// when no resource was dropped during the pass.
    pub fn scan(&mut self, ctx: &ScannerContext) -> Result<Vec<Device>, ScanError> {
        let Session { session, filter } = self.session.ok_or(ScanError::NotStarted)?;

        let resources = match self.provider.find_hardware(
            session,
            FilterMode::MatchValuesAll,
            filter,
            &self.config.expert_names,
        ) {
            Ok(resources) => resources,
            Err(ProviderError::EndOfEnum) => {
                debug!(pass = ctx.count, "No matching hardware resources");
                return Ok(Vec::new());
            }
            Err(e) => return Err(ScanError::Enumerate(e)),
        };

        let mut devices = Vec::new();
        let mut skipped = false;
        loop {
            let resource = match self.provider.next_resource(session, resources) {
                Ok(Some(resource)) => resource,
                Ok(None) | Err(ProviderError::EndOfEnum) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to advance hardware enumeration");
                    break;
                }
            };

            let mut scoped = Scoped::new(&mut self.provider, resource);
            match self.parser.parse(scoped.provider(), resource) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    skipped = true;
                    if e.is_skip() {
                        debug!(error = %e, "Dropped hardware resource");
                    } else {
                        warn!(error = %e, "Failed to parse hardware resource");
                    }
                }
            }
        }

        let devices = resolve_parents(devices);

        if let Err(e) = self.provider.close_handle(resources.into()) {
            if !skipped {
                return Err(ScanError::Release(e));
            }
            warn!(error = %e, "Failed to release enumeration handle");
        }

        debug!(pass = ctx.count, found = devices.len(), "Hardware scan pass complete");
        Ok(devices)
    }
}

impl<P: ResourceProvider> Drop for Scanner<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
