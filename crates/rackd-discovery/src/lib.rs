//! rackd Discovery - Hardware resource discovery
//!
//! This crate turns the resources reported by a vendor configuration service into
//! device records:
//! - `ResourceProvider` abstracts the configuration service
//! - `DeviceParser` builds typed devices and applies the skip policy
//! - `Scanner` runs one enumeration pass and resolves chassis/module topology
//! - `ScanTask` tracks devices across passes and publishes events

pub mod parser;
pub mod provider;
pub mod scanner;
pub mod sim;
pub mod task;

pub use parser::{DeviceParser, IgnoredModels, ParseError};
pub use provider::{ProviderError, ResourceProvider};
pub use scanner::{ScanError, Scanner, ScannerConfig, ScannerContext};
pub use sim::{SimulatedProvider, SimulatedResource};
pub use task::{DeviceRegistry, DiscoveryEvent, ScanTask};
