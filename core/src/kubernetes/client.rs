//! Cluster client backed by kubectl commands.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::channel::KubectlChannel;
use super::errors::KubectlError;
use super::models::{parse_object, parse_pod_list};
use crate::domain::{selector_string, ClusterObject, ObjectKind, Workload};
use crate::error::{Error, Result};
use crate::ports::{ClusterClient, ClusterClientFactory, RestConfig};

/// Default paths to search for kubectl.
const KUBECTL_PATHS: &[&str] = &[
    "/opt/homebrew/bin/kubectl", // Apple Silicon
    "/usr/local/bin/kubectl",    // Intel Mac / Homebrew
    "/usr/bin/kubectl",          // System
];

/// Timeout for kubectl read commands.
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(15);

/// Request timeout passed to kubectl when the config sets none.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds [`KubectlClient`]s, locating the kubectl binary once.
#[derive(Debug, Clone)]
pub struct KubectlFactory {
    kubectl_path: Option<PathBuf>,
}

impl KubectlFactory {
    /// Creates a factory, searching `PATH` and the usual install locations for kubectl.
    pub fn new() -> Self {
        Self {
            kubectl_path: find_kubectl(),
        }
    }

    /// Creates a factory with a custom kubectl path.
    pub fn with_path(kubectl_path: Option<PathBuf>) -> Self {
        Self { kubectl_path }
    }

    /// Returns the kubectl path if found.
    pub fn kubectl_path(&self) -> Option<&PathBuf> {
        self.kubectl_path.as_ref()
    }
}

impl Default for KubectlFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterClientFactory for KubectlFactory {
    type Client = KubectlClient;

    fn client(&self, config: &RestConfig) -> Result<KubectlClient> {
        let kubectl_path = self
            .kubectl_path
            .clone()
            .ok_or(KubectlError::KubectlNotFound)?;

        Ok(KubectlClient {
            kubectl_path,
            config: config.clone(),
        })
    }
}

/// Reads cluster objects and opens port-forward channels through kubectl.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl_path: PathBuf,
    config: RestConfig,
}

impl KubectlClient {
    /// Arguments selecting the cluster, shared by every kubectl invocation.
    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(context) = &self.config.context {
            args.push(format!("--context={}", context));
        }
        if let Some(kubeconfig) = &self.config.kubeconfig {
            args.push(format!("--kubeconfig={}", kubeconfig.display()));
        }
        args
    }

    fn request_timeout_arg(&self) -> String {
        let timeout = self.config.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        format!("--request-timeout={}s", timeout.as_secs().max(1))
    }

    /// Executes a kubectl command and returns its stdout.
    async fn execute_kubectl(&self, args: &[&str]) -> std::result::Result<String, KubectlError> {
        let mut command = Command::new(&self.kubectl_path);
        command
            .args(self.global_args())
            .args(args)
            .arg(self.request_timeout_arg())
            .kill_on_drop(true);

        debug!(?args, "Running kubectl");

        let result = timeout(KUBECTL_TIMEOUT, async {
            let output = command.output().await?;

            Ok::<_, std::io::Error>((output.status, output.stdout, output.stderr))
        })
        .await;

        match result {
            Ok(Ok((status, stdout, stderr))) => {
                if status.success() {
                    String::from_utf8(stdout)
                        .map_err(|e| KubectlError::ParsingFailed(e.to_string()))
                } else {
                    let stderr_str = String::from_utf8_lossy(&stderr);
                    Err(KubectlError::from_kubectl_error(&stderr_str))
                }
            }
            Ok(Err(e)) => Err(KubectlError::Io(e)),
            Err(_) => Err(KubectlError::Timeout),
        }
    }
}

impl ClusterClient for KubectlClient {
    type Channel = KubectlChannel;

    async fn get_object(
        &self,
        namespace: &str,
        kind: &ObjectKind,
        name: &str,
    ) -> Result<Option<ClusterObject>> {
        let resource = format!("{}/{}", kind.resource(), name);
        let output = self
            .execute_kubectl(&["get", &resource, "-n", namespace, "-o", "json"])
            .await;

        match output {
            Ok(output) => Ok(Some(parse_object(&output, namespace)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>> {
        let selector = selector_string(selector);
        let output = self
            .execute_kubectl(&["get", "pods", "-n", namespace, "-l", &selector, "-o", "json"])
            .await?;

        Ok(parse_pod_list(&output, namespace)?)
    }

    async fn open_channel(&self, pod: &Workload, remote_port: u16) -> Result<KubectlChannel> {
        KubectlChannel::start(&self.kubectl_path, &self.global_args(), pod, remote_port)
            .await
            .map_err(|e| Error::Transport(format!("failed to open port-forward to {}: {}", pod, e)))
    }
}

/// Finds kubectl on `PATH`, then in the usual install locations.
fn find_kubectl() -> Option<PathBuf> {
    let on_path = std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join("kubectl"))
            .find(|candidate| candidate.is_file())
    });

    on_path.or_else(|| find_executable(KUBECTL_PATHS))
}

/// Finds an executable in the given paths.
fn find_executable(paths: &[&str]) -> Option<PathBuf> {
    for path in paths {
        let path_buf = PathBuf::from(path);
        if path_buf.exists() {
            return Some(path_buf);
        }
    }
    None
}
