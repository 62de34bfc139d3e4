//! Domain layer - Pure business logic and data models.
//!
//! This module contains the types a session is built from: targets, cluster
//! objects, port mappings and the readiness signal. They have no I/O
//! dependencies and can be tested in isolation.

mod chart;
mod port_mapping;
mod readiness;
mod target;
mod workload;

// Re-export all domain types
pub use chart::{ApiError, ChartVersion};
pub use port_mapping::{resolve, PortMapping, PortSource, DEFAULT_LOCAL_PORT};
pub use readiness::ReadinessGate;
pub use target::{ObjectKind, ObjectRef, SelectedTarget, TargetDescriptor};
pub use workload::{
    selector_string, ClusterObject, ContainerPort, PodPhase, Service, ServicePortDecl, TargetPort,
    Workload,
};
