//! rackd Core - Core types for hardware discovery and rack registration
//!
//! This crate provides the foundational types for the rackd system:
//! - Device records for discovered hardware resources
//! - Rack identity shared with the remote cluster, with persistence
//! - Link-name based parent resolution and topology graph

pub mod device;
pub mod rack;
pub mod topology;

pub use device::{merge_properties, Device, DeviceStatus, StatusVariant};
pub use rack::{ClusterKey, IdentityError, Rack, RackIdentity, RackKey};
pub use topology::{resolve_parents, Topology, TopologyGraph, TopologyNode};
