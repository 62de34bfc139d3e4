//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces the application layer uses to talk to
//! the cluster and to the manifest. Implementations live in `kubernetes`
//! and `config`.

mod cluster;
mod manifest;

pub use cluster::{ClusterClient, ClusterClientFactory, ForwardChannel, RestConfig};
pub use manifest::TargetSource;
