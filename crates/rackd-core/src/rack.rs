//! Rack identity: this host's registration with a remote cluster
//!
//! A rack key is only meaningful together with the key of the cluster that issued
//! it. The pair is persisted as JSON so the host keeps its identity across restarts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Cluster-assigned rack key. Zero means "not yet registered".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RackKey(pub u32);

impl RackKey {
    pub const UNSET: RackKey = RackKey(0);

    pub fn is_set(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for RackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterKey(pub Uuid);

impl ClusterKey {
    /// Key used before any cluster has been seen
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rack record as returned by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rack {
    pub key: RackKey,
    pub name: String,
}

/// Persisted (rack_key, cluster_key) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackIdentity {
    #[serde(default)]
    pub rack_key: RackKey,
    #[serde(default)]
    pub cluster_key: ClusterKey,
}

impl RackIdentity {
    pub fn new(rack_key: RackKey, cluster_key: ClusterKey) -> Self {
        Self {
            rack_key,
            cluster_key,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.rack_key.is_set()
    }

    /// Check whether the stored rack key was issued by a different cluster
    pub fn has_drifted(&self, cluster: ClusterKey) -> bool {
        self.rack_key.is_set() && self.cluster_key != cluster
    }

    /// Load identity from a file
    pub fn from_file(path: &Path) -> Result<Self, IdentityError> {
        let content = std::fs::read_to_string(path)?;
        let identity: RackIdentity = serde_json::from_str(&content)?;
        Ok(identity)
    }

    /// Load identity or start unregistered if the file doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save identity to a file
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_drift_requires_registered_rack() {
        let a = ClusterKey(Uuid::new_v4());
        let b = ClusterKey(Uuid::new_v4());

        let unregistered = RackIdentity::new(RackKey::UNSET, a);
        assert!(!unregistered.has_drifted(b));

        let registered = RackIdentity::new(RackKey(5), a);
        assert!(!registered.has_drifted(a));
        assert!(registered.has_drifted(b));
    }

    #[test]
    fn test_identity_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("identity.json");

        let missing = RackIdentity::load_or_create(&path).unwrap();
        assert!(!missing.is_registered());
        assert!(missing.cluster_key.is_nil());

        let identity = RackIdentity::new(RackKey(42), ClusterKey(Uuid::new_v4()));
        identity.save(&path).unwrap();

        let loaded = RackIdentity::load_or_create(&path).unwrap();
        assert_eq!(loaded, identity);
    }

    #[test]
    fn test_corrupt_identity_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("identity.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            RackIdentity::load_or_create(&path),
            Err(IdentityError::JsonError(_))
        ));
    }
}
