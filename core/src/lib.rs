//! churl Core Library
//!
//! Queries a chart museum that is only reachable inside a Kubernetes cluster.
//! Provides functionality to:
//! - Locate the pod behind a service, controller or pod name
//! - Resolve numeric and named ports through services and pods
//! - Forward a local port to the pod and signal when it is ready
//! - Fetch chart version metadata through the tunnel
//! - Manage the manifest of known chart museums
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Pure business logic and data models
//! - `ports`: Trait definitions (interfaces)
//! - `kubernetes`: kubectl-backed cluster client
//! - `application`: Use case services
//!
//! # Example
//! ```no_run
//! use churl_core::{
//!     KubectlChannel, KubectlFactory, Manifest, MetadataClient, RestConfig, SessionOptions,
//!     TargetSource, TunnelSession,
//! };
//!
//! # async fn run() -> churl_core::Result<()> {
//! let manifest = Manifest::open_from_file("config.json").await?;
//! let target = manifest.current()?;
//! let config = RestConfig::default();
//!
//! let session: TunnelSession<KubectlChannel> = TunnelSession::open(
//!     &KubectlFactory::new(),
//!     &config,
//!     &target.descriptor()?,
//!     SessionOptions::new(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

// Hexagonal architecture layers
pub mod application;
pub mod domain;
pub mod kubernetes;
pub mod ports;

pub mod config;
pub mod error;

// Re-export domain types (primary API)
pub use domain::{
    ApiError, ChartVersion, ClusterObject, ObjectKind, ObjectRef, PortMapping, PortSource,
    ReadinessGate, SelectedTarget, TargetDescriptor, Workload, DEFAULT_LOCAL_PORT,
};

// Re-export other commonly used types
pub use application::{
    MetadataClient, SessionOptions, SessionState, TunnelSession, WorkloadLocator,
    DEFAULT_ATTACH_TIMEOUT,
};
pub use config::{default_manifest_path, Manifest, Museum};
pub use error::{Error, Phase, Result};
pub use kubernetes::{KubectlChannel, KubectlClient, KubectlFactory};
pub use ports::{ClusterClient, ClusterClientFactory, ForwardChannel, RestConfig, TargetSource};
