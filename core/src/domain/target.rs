//! Target descriptors: what a session should tunnel into.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The chart museum selected in the manifest.
///
/// This is read-only input to the core; nothing in a session mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedTarget {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,
    pub namespace: String,
    pub service_name: String,
    pub port: String,
}

impl SelectedTarget {
    /// Builds the descriptor a session resolves.
    pub fn descriptor(&self) -> Result<TargetDescriptor> {
        TargetDescriptor::new(&self.namespace, &self.service_name, &self.port)
    }
}

/// Kinds of cluster objects a logical name can refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Pod,
    Service,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    ReplicationController,
    /// Anything else; carries the kind as written by the user.
    Other(String),
}

impl ObjectKind {
    /// Parses a kubectl-style resource name, accepting short names and plurals.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Self::Pod,
            "svc" | "service" | "services" => Self::Service,
            "deploy" | "deployment" | "deployments" => Self::Deployment,
            "rs" | "replicaset" | "replicasets" => Self::ReplicaSet,
            "sts" | "statefulset" | "statefulsets" => Self::StatefulSet,
            "ds" | "daemonset" | "daemonsets" => Self::DaemonSet,
            "job" | "jobs" => Self::Job,
            "rc" | "replicationcontroller" | "replicationcontrollers" => {
                Self::ReplicationController
            }
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the resource name kubectl accepts for this kind.
    pub fn resource(&self) -> &str {
        match self {
            Self::Pod => "pod",
            Self::Service => "service",
            Self::Deployment => "deployment",
            Self::ReplicaSet => "replicaset",
            Self::StatefulSet => "statefulset",
            Self::DaemonSet => "daemonset",
            Self::Job => "job",
            Self::ReplicationController => "replicationcontroller",
            Self::Other(kind) => kind,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

/// A reference to a cluster object as written by the user.
///
/// `svc/cm` names a service, `cm` leaves the kind open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: Option<ObjectKind>,
    pub name: String,
}

impl ObjectRef {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (kind, name) = match s.split_once('/') {
            Some((kind, name)) => (Some(ObjectKind::parse(kind)), name),
            None => (None, s),
        };

        if name.is_empty() || name.contains('/') {
            return Err(Error::Resolution(format!(
                "invalid object reference '{}'",
                s
            )));
        }

        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{}/{}", kind, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Namespace, logical name and requested port of a tunnel.
///
/// Immutable once resolution starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    namespace: String,
    object: ObjectRef,
    port: String,
}

impl TargetDescriptor {
    pub fn new(namespace: &str, name: &str, port: &str) -> Result<Self> {
        let namespace = namespace.trim();
        let port = port.trim();
        if port.is_empty() {
            return Err(Error::Resolution(format!(
                "no port given for '{}'",
                name
            )));
        }

        Ok(Self {
            namespace: if namespace.is_empty() {
                "default".to_string()
            } else {
                namespace.to_string()
            },
            object: ObjectRef::parse(name)?,
            port: port.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// The port spec, `remote`, `local:remote` or `:remote`.
    pub fn port(&self) -> &str {
        &self.port
    }
}
