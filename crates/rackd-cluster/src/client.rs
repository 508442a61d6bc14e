//! Cluster control-plane client abstraction

use rackd_core::{ClusterKey, Rack, RackKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The cluster has no record of the requested entity
    #[error("not found: {0}")]
    NotFound(String),
    /// The cluster could not be reached; worth retrying
    #[error("cluster unreachable: {0}")]
    Unreachable(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("unexpected cluster response: {0}")]
    Unexpected(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Information about the cluster returned on authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_key: ClusterKey,
    #[serde(default)]
    pub node_version: Option<String>,
}

/// Operations this host needs from the cluster
pub trait ClusterClient: Send {
    fn authenticate(&mut self) -> Result<ClusterInfo, ClusterError>;

    /// Fails with [`ClusterError::NotFound`] when no rack has this key
    fn retrieve_rack(&mut self, key: RackKey) -> Result<Rack, ClusterError>;

    fn create_rack(&mut self, name: &str) -> Result<Rack, ClusterError>;
}
