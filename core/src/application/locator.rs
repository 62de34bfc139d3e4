//! Workload lookup: from a logical name to a pod a tunnel can attach to.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::domain::{ClusterObject, ObjectKind, ObjectRef, Workload};
use crate::error::{Error, Result};
use crate::ports::ClusterClient;

/// Interval between discovery attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A located target: the object the name resolved to and the pod behind it.
#[derive(Debug, Clone)]
pub struct Located {
    pub object: ClusterObject,
    pub pod: Workload,
}

/// Resolves logical names into attachable pods.
///
/// Discovery is retried at a fixed interval until `timeout` elapses, so a
/// pod that is still being scheduled does not fail the lookup.
pub struct WorkloadLocator<'a, C: ClusterClient> {
    client: &'a C,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a, C: ClusterClient> WorkloadLocator<'a, C> {
    pub fn new(client: &'a C, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Resolves `object` in `namespace` and waits for an attachable pod.
    pub async fn locate(&self, namespace: &str, object: &ObjectRef) -> Result<Located> {
        let resolved = self.resolve_object(namespace, object).await?;
        let pod = self.attachable_instance_for(&resolved).await?;

        info!(object = %resolved.label(), pod = %pod, "Located workload");
        Ok(Located {
            object: resolved,
            pod,
        })
    }

    /// Fetches the object a name refers to.
    ///
    /// A bare name is looked up as a service first and as a pod second.
    pub async fn resolve_object(&self, namespace: &str, object: &ObjectRef) -> Result<ClusterObject> {
        let kinds = match &object.kind {
            Some(kind) => vec![kind.clone()],
            None => vec![ObjectKind::Service, ObjectKind::Pod],
        };

        for kind in &kinds {
            debug!(namespace, kind = %kind, name = %object.name, "Looking up object");
            if let Some(found) = self.client.get_object(namespace, kind, &object.name).await? {
                return Ok(found);
            }
        }

        let tried = kinds
            .iter()
            .map(|k| k.resource())
            .collect::<Vec<_>>()
            .join(" or ");
        Err(Error::Resolution(format!(
            "no {} named '{}' in namespace '{}'",
            tried, object.name, namespace
        )))
    }

    /// Follows `object` to a running pod, polling until the timeout elapses.
    pub async fn attachable_instance_for(&self, object: &ClusterObject) -> Result<Workload> {
        match object {
            ClusterObject::Pod(pod) if pod.is_attachable() => return Ok(pod.clone()),
            ClusterObject::Pod(_) => {}
            ClusterObject::Service(svc) => ensure_selector(&object.label(), &svc.selector)?,
            ClusterObject::Controller { selector, .. } => {
                ensure_selector(&object.label(), selector)?
            }
            ClusterObject::Unsupported { kind, name } => {
                return Err(Error::Resolution(format!(
                    "cannot attach to {}/{}: no pods behind objects of kind {}",
                    kind, name, kind
                )))
            }
        }

        let attempt = async {
            loop {
                if let Some(pod) = self.find_attachable(object).await? {
                    return Ok::<Workload, Error>(pod);
                }
                debug!(object = %object.label(), "No attachable pod yet");
                sleep(self.poll_interval).await;
            }
        };

        match timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::LocatorTimeout {
                object: object.label(),
                timeout: self.timeout,
            }),
        }
    }

    async fn find_attachable(&self, object: &ClusterObject) -> Result<Option<Workload>> {
        match object {
            ClusterObject::Pod(pod) => {
                let current = self
                    .client
                    .get_object(&pod.namespace, &ObjectKind::Pod, &pod.name)
                    .await?;
                Ok(match current {
                    Some(ClusterObject::Pod(pod)) if pod.is_attachable() => Some(pod),
                    _ => None,
                })
            }
            ClusterObject::Service(svc) => self.newest_attachable(&svc.namespace, &svc.selector).await,
            ClusterObject::Controller {
                namespace,
                selector,
                ..
            } => self.newest_attachable(namespace, selector).await,
            ClusterObject::Unsupported { .. } => Ok(None),
        }
    }

    async fn newest_attachable(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Option<Workload>> {
        let pods = self.client.list_pods(namespace, selector).await?;
        Ok(pods
            .into_iter()
            .filter(Workload::is_attachable)
            .max_by(|a, b| a.created.cmp(&b.created)))
    }
}

fn ensure_selector(label: &str, selector: &BTreeMap<String, String>) -> Result<()> {
    if selector.is_empty() {
        return Err(Error::Resolution(format!(
            "{} has no pod selector, there is no pod to attach to",
            label
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio::time::Instant;

    use super::*;
    use crate::domain::{PodPhase, Service};
    use crate::ports::ForwardChannel;

    struct NoChannel;

    impl ForwardChannel for NoChannel {
        type Stream = DuplexStream;

        async fn open_stream(&self) -> std::io::Result<DuplexStream> {
            Err(std::io::ErrorKind::Unsupported.into())
        }

        async fn closed(&self) -> Result<()> {
            Ok(())
        }

        fn close(&self) {}
    }

    /// Serves fixed objects; pods become running after `running_after` lists.
    #[derive(Default)]
    struct MockCluster {
        objects: Mutex<Vec<ClusterObject>>,
        pods: Mutex<Vec<Workload>>,
        running_after: Option<usize>,
        lists: AtomicUsize,
    }

    impl ClusterClient for Arc<MockCluster> {
        type Channel = NoChannel;

        async fn get_object(
            &self,
            _namespace: &str,
            kind: &ObjectKind,
            name: &str,
        ) -> Result<Option<ClusterObject>> {
            Ok(self
                .objects
                .lock()
                .iter()
                .find(|o| match (kind, o) {
                    (ObjectKind::Pod, ClusterObject::Pod(p)) => p.name == name,
                    (ObjectKind::Service, ClusterObject::Service(s)) => s.name == name,
                    (k, ClusterObject::Controller { kind, name: n, .. }) => k == kind && n == name,
                    _ => false,
                })
                .cloned())
        }

        async fn list_pods(
            &self,
            _namespace: &str,
            _selector: &BTreeMap<String, String>,
        ) -> Result<Vec<Workload>> {
            let n = self.lists.fetch_add(1, Ordering::SeqCst) + 1;
            let mut pods = self.pods.lock().clone();
            if let Some(after) = self.running_after {
                if n >= after {
                    for pod in &mut pods {
                        pod.phase = PodPhase::Running;
                    }
                }
            }
            Ok(pods)
        }

        async fn open_channel(&self, _pod: &Workload, _remote_port: u16) -> Result<NoChannel> {
            Ok(NoChannel)
        }
    }

    fn pod(name: &str, phase: PodPhase, created_secs: i64) -> Workload {
        Workload {
            namespace: "default".to_string(),
            name: name.to_string(),
            phase,
            ports: vec![],
            created: chrono::DateTime::from_timestamp(created_secs, 0),
            deleting: false,
        }
    }

    fn service(selector: &[(&str, &str)]) -> ClusterObject {
        ClusterObject::Service(Service {
            namespace: "default".to_string(),
            name: "cm".to_string(),
            selector: selector
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ports: vec![],
        })
    }

    #[tokio::test]
    async fn test_bare_name_prefers_service() {
        let cluster = Arc::new(MockCluster::default());
        cluster.objects.lock().push(service(&[("app", "cm")]));
        cluster.pods.lock().push(pod("cm-1", PodPhase::Running, 10));

        let locator = WorkloadLocator::new(&cluster, Duration::from_secs(1));
        let located = locator
            .locate("default", &ObjectRef::parse("cm").unwrap())
            .await
            .unwrap();

        assert!(matches!(located.object, ClusterObject::Service(_)));
        assert_eq!(located.pod.name, "cm-1");
    }

    #[tokio::test]
    async fn test_bare_name_falls_back_to_pod() {
        let cluster = Arc::new(MockCluster::default());
        cluster
            .objects
            .lock()
            .push(ClusterObject::Pod(pod("cm", PodPhase::Running, 10)));

        let locator = WorkloadLocator::new(&cluster, Duration::from_secs(1));
        let located = locator
            .locate("default", &ObjectRef::parse("cm").unwrap())
            .await
            .unwrap();
        assert_eq!(located.pod.name, "cm");
    }

    #[tokio::test]
    async fn test_missing_object_is_resolution_error() {
        let cluster = Arc::new(MockCluster::default());
        let locator = WorkloadLocator::new(&cluster, Duration::from_secs(1));

        let err = locator
            .locate("default", &ObjectRef::parse("cm").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
        assert!(err.to_string().contains("service or pod"));
    }

    #[tokio::test]
    async fn test_newest_running_pod_wins() {
        let cluster = Arc::new(MockCluster::default());
        cluster.pods.lock().extend([
            pod("old", PodPhase::Running, 10),
            pod("new", PodPhase::Running, 20),
            pod("pending", PodPhase::Pending, 30),
        ]);

        let locator = WorkloadLocator::new(&cluster, Duration::from_secs(1));
        let found = locator
            .attachable_instance_for(&service(&[("app", "cm")]))
            .await
            .unwrap();
        assert_eq!(found.name, "new");
    }

    #[tokio::test]
    async fn test_unsupported_kind_fails_without_polling() {
        let cluster = Arc::new(MockCluster::default());
        let locator = WorkloadLocator::new(&cluster, Duration::from_secs(60));

        let err = locator
            .attachable_instance_for(&ClusterObject::Unsupported {
                kind: "ConfigMap".to_string(),
                name: "settings".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
        assert_eq!(cluster.lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_without_selector_fails() {
        let cluster = Arc::new(MockCluster::default());
        let locator = WorkloadLocator::new(&cluster, Duration::from_secs(60));

        let err = locator
            .attachable_instance_for(&service(&[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no pod selector"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerates_pod_not_yet_running() {
        let cluster = Arc::new(MockCluster {
            running_after: Some(3),
            ..Default::default()
        });
        cluster.pods.lock().push(pod("cm-1", PodPhase::Pending, 10));

        let locator = WorkloadLocator::new(&cluster, Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(100));
        let found = locator
            .attachable_instance_for(&service(&[("app", "cm")]))
            .await
            .unwrap();

        assert_eq!(found.name, "cm-1");
        assert_eq!(cluster.lists.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let cluster = Arc::new(MockCluster::default());
        cluster.pods.lock().push(pod("cm-1", PodPhase::Pending, 10));

        let attach_timeout = Duration::from_secs(2);
        let locator = WorkloadLocator::new(&cluster, attach_timeout)
            .with_poll_interval(Duration::from_millis(100));

        let started = Instant::now();
        let err = locator
            .attachable_instance_for(&service(&[("app", "cm")]))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::LocatorTimeout { .. }));
        assert!(elapsed >= attach_timeout);
        assert!(elapsed < attach_timeout + Duration::from_millis(150));
    }
}
