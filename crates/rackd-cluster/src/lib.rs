//! rackd Cluster - Rack registration with the cluster control plane
//!
//! This crate provides:
//! - `ClusterClient` abstraction and its HTTP implementation
//! - `Breaker` for bounded retry with exponential backoff
//! - `Reconciler` converging this host's rack identity with the cluster

pub mod breaker;
pub mod client;
pub mod http;
pub mod reconcile;

pub use breaker::{Breaker, BreakerConfig, StopHandle};
pub use client::{ClusterClient, ClusterError, ClusterInfo};
pub use http::{ClusterConfig, HttpClusterClient};
pub use reconcile::{ReconcileError, Reconciler};
