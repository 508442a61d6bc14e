//! Rack identity reconciliation
//!
//! Converges the persisted `(rack_key, cluster_key)` pair with what the cluster
//! knows about this host:
//! 1. Authenticate; failure is fatal.
//! 2. If the stored rack was issued by a different cluster, forget it and start over.
//! 3. Retrieve the stored rack, or create one named after the host when unset.
//!    A rack the cluster no longer knows is forgotten and the process starts over.
//! 4. Unreachable clusters are retried through the [`Breaker`].
//! 5. Commit the rack key and cluster key.

use rackd_core::{Rack, RackIdentity, RackKey};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::breaker::Breaker;
use crate::client::{ClusterClient, ClusterError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("failed to authenticate with cluster: {0}")]
    Auth(ClusterError),
    /// The breaker gave up waiting for the cluster
    #[error("gave up reaching cluster: {0}")]
    Unreachable(ClusterError),
    #[error("rack reconciliation failed: {0}")]
    Cluster(ClusterError),
}

/// Outcome of one reconciliation attempt
#[derive(Debug)]
enum Step {
    Committed(Rack),
    /// Identity was invalidated; start over
    Reset,
    /// Transient failure; the breaker allowed another attempt
    Retry,
    Fatal(ReconcileError),
}

/// Reconciles this host's rack identity with the cluster
#[derive(Debug, Clone)]
pub struct Reconciler {
    host_name: String,
}

impl Reconciler {
    /// `host_name` labels racks created for this host
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Run reconciliation until the identity is committed or a terminal error
    /// occurs. Blocks while the breaker backs off.
    pub fn reconcile<C: ClusterClient + ?Sized>(
        &self,
        identity: &mut RackIdentity,
        client: &mut C,
        breaker: &mut Breaker,
    ) -> Result<Rack, ReconcileError> {
        loop {
            match self.step(identity, client, breaker) {
                Step::Committed(rack) => {
                    breaker.reset();
                    return Ok(rack);
                }
                Step::Reset => debug!(rack = %identity.rack_key, "Restarting reconciliation"),
                Step::Retry => debug!("Retrying reconciliation"),
                Step::Fatal(e) => {
                    error!(error = %e, "Rack reconciliation failed");
                    return Err(e);
                }
            }
        }
    }

    fn step<C: ClusterClient + ?Sized>(
        &self,
        identity: &mut RackIdentity,
        client: &mut C,
        breaker: &mut Breaker,
    ) -> Step {
        let cluster = match client.authenticate() {
            Ok(cluster) => cluster,
            Err(e) => return Step::Fatal(ReconcileError::Auth(e)),
        };

        if identity.has_drifted(cluster.cluster_key) {
            warn!(
                rack = %identity.rack_key,
                stored = %identity.cluster_key,
                cluster = %cluster.cluster_key,
                "Cluster identity changed, discarding rack"
            );
            identity.rack_key = RackKey::UNSET;
            identity.cluster_key = cluster.cluster_key;
            return Step::Reset;
        }

        let result = if identity.rack_key.is_set() {
            client.retrieve_rack(identity.rack_key)
        } else {
            info!(name = %self.host_name, "Registering new rack");
            client.create_rack(&self.host_name)
        };

        match result {
            Ok(rack) if !rack.key.is_set() => Step::Fatal(ReconcileError::Cluster(
                ClusterError::Unexpected(format!("cluster returned rack {} without a key", rack.name)),
            )),
            Ok(rack) => {
                identity.rack_key = rack.key;
                identity.cluster_key = cluster.cluster_key;
                info!(rack = %rack.key, name = %rack.name, cluster = %cluster.cluster_key, "Rack identity committed");
                Step::Committed(rack)
            }
            Err(ClusterError::NotFound(_)) if identity.rack_key.is_set() => {
                warn!(rack = %identity.rack_key, "Rack not found on cluster, registering again");
                identity.rack_key = RackKey::UNSET;
                Step::Reset
            }
            Err(ClusterError::Unreachable(reason)) => {
                if breaker.wait(&reason) {
                    Step::Retry
                } else {
                    Step::Fatal(ReconcileError::Unreachable(ClusterError::Unreachable(reason)))
                }
            }
            Err(e) => Step::Fatal(ReconcileError::Cluster(e)),
        }
    }
}
