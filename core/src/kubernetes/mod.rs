//! Kubernetes module: the kubectl-backed cluster client.
//!
//! This module provides:
//! - Object lookup and pod listing via `kubectl get -o json`
//! - Port-forward channels via `kubectl port-forward`
//! - Classification of kubectl failures

pub mod channel;
pub mod client;
pub mod errors;
pub mod models;

// Re-export commonly used types
pub use channel::KubectlChannel;
pub use client::{KubectlClient, KubectlFactory};
pub use errors::KubectlError;
