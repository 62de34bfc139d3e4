//! Cluster objects as the core sees them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use super::target::ObjectKind;

/// A port declared by one of a pod's containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPort {
    pub name: Option<String>,
    pub container_port: u16,
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// A concrete pod a tunnel can attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    pub ports: Vec<ContainerPort>,
    pub created: Option<DateTime<Utc>>,
    /// Set once the pod is being torn down.
    pub deleting: bool,
}

impl Workload {
    /// Whether a tunnel can attach to this pod right now.
    pub fn is_attachable(&self) -> bool {
        self.phase == PodPhase::Running && !self.deleting
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A service's `targetPort`: a number, or a container port name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

/// One entry of a service's port table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortDecl {
    pub name: Option<String>,
    pub port: u16,
    /// `None` when the service omits `targetPort`, which means "same as `port`".
    pub target_port: Option<TargetPort>,
}

/// A service: a port table in front of the pods its selector matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePortDecl>,
}

/// Whatever a logical name turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterObject {
    Pod(Workload),
    Service(Service),
    /// A controller (deployment, stateful set, ...) that owns pods through a selector.
    Controller {
        kind: ObjectKind,
        namespace: String,
        name: String,
        selector: BTreeMap<String, String>,
    },
    /// An object no pod can be found for.
    Unsupported { kind: String, name: String },
}

impl ClusterObject {
    /// Returns a `kind/name` label for logs and errors.
    pub fn label(&self) -> String {
        match self {
            Self::Pod(pod) => format!("pod/{}", pod.name),
            Self::Service(svc) => format!("service/{}", svc.name),
            Self::Controller { kind, name, .. } => format!("{}/{}", kind, name),
            Self::Unsupported { kind, name } => format!("{}/{}", kind, name),
        }
    }
}

/// Renders a label selector the way kubectl's `-l` flag expects it.
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
