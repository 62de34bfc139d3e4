//! kubectl JSON response parsing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::errors::{KubectlError, Result};
use crate::domain::{
    ClusterObject, ContainerPort, ObjectKind, PodPhase, Service, ServicePortDecl, TargetPort,
    Workload,
};

// ============================================================================
// Shared
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// Controllers either carry a plain label map (replication controllers) or
/// a `LabelSelector` (everything in `apps/v1` and `batch/v1`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    Map(BTreeMap<String, String>),
    LabelSelector(LabelSelector),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: Option<BTreeMap<String, String>>,
}

impl SelectorSpec {
    fn into_labels(self) -> BTreeMap<String, String> {
        match self {
            Self::Map(map) => map,
            Self::LabelSelector(selector) => selector.match_labels.unwrap_or_default(),
        }
    }
}

// ============================================================================
// Pods
// ============================================================================

/// Response structure for `kubectl get pods -o json`.
#[derive(Debug, Deserialize)]
pub struct PodListResponse {
    pub items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
pub struct PodItem {
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub spec: Option<PodSpec>,
    #[serde(default)]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub ports: Vec<ContainerPortSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortSpec {
    pub name: Option<String>,
    pub container_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct PodStatus {
    pub phase: Option<String>,
}

impl PodItem {
    pub fn into_workload(self, fallback_namespace: &str) -> Workload {
        Workload {
            namespace: self
                .metadata
                .namespace
                .unwrap_or_else(|| fallback_namespace.to_string()),
            name: self.metadata.name,
            phase: self
                .status
                .and_then(|s| s.phase)
                .map(|p| PodPhase::parse(&p))
                .unwrap_or_default(),
            ports: self
                .spec
                .map(|spec| spec.containers)
                .unwrap_or_default()
                .into_iter()
                .flat_map(|c| c.ports)
                .map(|p| ContainerPort {
                    name: p.name,
                    container_port: p.container_port,
                })
                .collect(),
            created: self.metadata.creation_timestamp,
            deleting: self.metadata.deletion_timestamp.is_some(),
        }
    }
}

impl PodListResponse {
    /// Converts the kubectl response to a list of workloads.
    pub fn into_workloads(self, namespace: &str) -> Vec<Workload> {
        self.items
            .into_iter()
            .map(|item| item.into_workload(namespace))
            .collect()
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServiceItem {
    pub metadata: ObjectMetadata,
    pub spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub selector: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub ports: Option<Vec<ServicePortSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortSpec {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: Option<TargetPortSpec>,
}

/// Kubernetes targetPort can be either an integer or a string (named port).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TargetPortSpec {
    Int(u16),
    String(String),
}

impl From<TargetPortSpec> for TargetPort {
    fn from(spec: TargetPortSpec) -> Self {
        match spec {
            TargetPortSpec::Int(n) => TargetPort::Number(n),
            // The API server accepts "8080" here and treats it as a number.
            TargetPortSpec::String(s) => match s.parse::<u16>() {
                Ok(n) => TargetPort::Number(n),
                Err(_) => TargetPort::Name(s),
            },
        }
    }
}

impl ServiceItem {
    pub fn into_service(self, fallback_namespace: &str) -> Service {
        Service {
            namespace: self
                .metadata
                .namespace
                .unwrap_or_else(|| fallback_namespace.to_string()),
            name: self.metadata.name,
            selector: self.spec.selector.unwrap_or_default(),
            ports: self
                .spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| ServicePortDecl {
                    name: p.name,
                    port: p.port,
                    target_port: p.target_port.map(TargetPort::from),
                })
                .collect(),
        }
    }
}

// ============================================================================
// Controllers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ControllerItem {
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub spec: Option<ControllerSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ControllerSpec {
    #[serde(default)]
    pub selector: Option<SelectorSpec>,
}

// ============================================================================
// Dispatch
// ============================================================================

/// Parses the output of `kubectl get <kind>/<name> -o json`.
pub fn parse_object(output: &str, namespace: &str) -> Result<ClusterObject> {
    let value: serde_json::Value =
        serde_json::from_str(output).map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

    let kind = value
        .get("kind")
        .and_then(|k| k.as_str())
        .ok_or_else(|| KubectlError::ParsingFailed("object has no kind".to_string()))?
        .to_string();

    let object = match ObjectKind::parse(&kind) {
        ObjectKind::Pod => ClusterObject::Pod(decode::<PodItem>(value)?.into_workload(namespace)),
        ObjectKind::Service => {
            ClusterObject::Service(decode::<ServiceItem>(value)?.into_service(namespace))
        }
        ObjectKind::Other(_) => {
            let name = value
                .pointer("/metadata/name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            ClusterObject::Unsupported { kind, name }
        }
        controller => {
            let item = decode::<ControllerItem>(value)?;
            ClusterObject::Controller {
                kind: controller,
                namespace: item
                    .metadata
                    .namespace
                    .unwrap_or_else(|| namespace.to_string()),
                name: item.metadata.name,
                selector: item
                    .spec
                    .and_then(|s| s.selector)
                    .map(SelectorSpec::into_labels)
                    .unwrap_or_default(),
            }
        }
    };

    Ok(object)
}

/// Parses the output of `kubectl get pods -l <selector> -o json`.
pub fn parse_pod_list(output: &str, namespace: &str) -> Result<Vec<Workload>> {
    let response: PodListResponse =
        serde_json::from_str(output).map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;
    Ok(response.into_workloads(namespace))
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| KubectlError::ParsingFailed(e.to_string()))
}
