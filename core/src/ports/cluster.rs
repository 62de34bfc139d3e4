//! Cluster client port (interface).

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{ClusterObject, ObjectKind, Workload};
use crate::error::Result;

/// Credentials and transport settings for reaching the cluster.
///
/// The core treats this as opaque and hands it to a [`ClusterClientFactory`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestConfig {
    /// kubeconfig context to use; `None` keeps the current context.
    pub context: Option<String>,
    /// kubeconfig file; `None` uses the client's default lookup.
    pub kubeconfig: Option<PathBuf>,
    /// Per-request timeout for reads against the API server.
    pub request_timeout: Option<Duration>,
}

impl RestConfig {
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }
}

/// Builds cluster clients from a [`RestConfig`].
pub trait ClusterClientFactory: Send + Sync {
    type Client: ClusterClient;

    /// Builds a client. Fails when the client cannot be constructed at all
    /// (e.g. the tooling it drives is missing).
    fn client(&self, config: &RestConfig) -> Result<Self::Client>;
}

/// Port for reading cluster objects and opening forward channels.
///
/// Implementations delegate the control-plane protocol to an external client.
pub trait ClusterClient: Send + Sync + 'static {
    type Channel: ForwardChannel;

    /// Fetches one object. `Ok(None)` when it does not exist.
    fn get_object(
        &self,
        namespace: &str,
        kind: &ObjectKind,
        name: &str,
    ) -> impl Future<Output = Result<Option<ClusterObject>>> + Send;

    /// Lists the pods matching a label selector.
    fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Vec<Workload>>> + Send;

    /// Upgrades a connection to the pod's port-forward sub-resource.
    fn open_channel(
        &self,
        pod: &Workload,
        remote_port: u16,
    ) -> impl Future<Output = Result<Self::Channel>> + Send;
}

/// A multiplexed connection to one port of one pod.
///
/// Every local connection gets its own stream over the channel.
pub trait ForwardChannel: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a new stream to the remote port.
    fn open_stream(&self) -> impl Future<Output = std::io::Result<Self::Stream>> + Send;

    /// Resolves when the channel has terminated, with the reason if it failed.
    fn closed(&self) -> impl Future<Output = Result<()>> + Send;

    /// Releases the channel. Safe to call more than once.
    fn close(&self);
}
