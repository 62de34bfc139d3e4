//! End-to-end tests: manifest -> session -> forward loop -> chart museum.
//!
//! The cluster is faked in-process; its forward channel dials a stub chart
//! museum listening on loopback.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use churl_core::domain::{ContainerPort, PodPhase, Service, ServicePortDecl, TargetPort};
use churl_core::{
    ClusterClient, ClusterClientFactory, ClusterObject, Error, ForwardChannel, Manifest,
    MetadataClient, ObjectKind, RestConfig, SessionOptions, SessionState, TargetSource,
    TunnelSession, Workload,
};

const MANIFEST: &str = r#"{
    "current": "default",
    "museums": [
        { "name": "default", "namespace": "default", "serviceName": "cm", "port": "8080" }
    ]
}"#;

const MYCHART: &str = r#"[
    {"name":"mychart","version":"0.2.0","apiVersion":"v1","urls":["charts/mychart-0.2.0.tgz"],"created":"2019-11-21T05:44:14Z","digest":"f00d"},
    {"name":"mychart","version":"0.1.0","apiVersion":"v1","urls":["charts/mychart-0.1.0.tgz"]}
]"#;

/// Minimal chart museum: knows one chart, 404s everything else.
async fn start_museum() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((conn, _)) = listener.accept().await {
            tokio::spawn(serve(conn));
        }
    });

    addr
}

async fn serve(mut conn: TcpStream) {
    let mut buf = vec![0u8; 8192];
    let mut read = 0;
    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
        match conn.read(&mut buf[read..]).await {
            Ok(0) | Err(_) => return,
            Ok(n) => read += n,
        }
    }

    let request = String::from_utf8_lossy(&buf[..read]).into_owned();
    let path = request.split_whitespace().nth(1).unwrap_or_default();
    let (status, body) = match path {
        "/api/charts/myrepo/mychart" => ("200 OK", MYCHART),
        "/api/charts/myrepo/empty" => ("200 OK", "[]"),
        _ => ("404 Not Found", r#"{"error":"chart not found"}"#),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = conn.write_all(response.as_bytes()).await;
    let _ = conn.shutdown().await;
}

struct MuseumChannel {
    museum: SocketAddr,
    stop: CancellationToken,
}

impl ForwardChannel for MuseumChannel {
    type Stream = TcpStream;

    async fn open_stream(&self) -> io::Result<TcpStream> {
        TcpStream::connect(self.museum).await
    }

    async fn closed(&self) -> churl_core::Result<()> {
        self.stop.cancelled().await;
        Ok(())
    }

    fn close(&self) {
        self.stop.cancel();
    }
}

/// A cluster with service `cm` selecting one running pod.
#[derive(Clone)]
struct FakeCluster {
    museum: SocketAddr,
    dialed: Arc<Mutex<Vec<(String, u16)>>>,
}

impl ClusterClient for FakeCluster {
    type Channel = MuseumChannel;

    async fn get_object(
        &self,
        namespace: &str,
        kind: &ObjectKind,
        name: &str,
    ) -> churl_core::Result<Option<ClusterObject>> {
        if *kind != ObjectKind::Service || name != "cm" {
            return Ok(None);
        }
        Ok(Some(ClusterObject::Service(Service {
            namespace: namespace.to_string(),
            name: name.to_string(),
            selector: BTreeMap::from([("app".to_string(), "chartmuseum".to_string())]),
            ports: vec![ServicePortDecl {
                name: Some("http".to_string()),
                port: 8080,
                target_port: Some(TargetPort::Number(8080)),
            }],
        })))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        _selector: &BTreeMap<String, String>,
    ) -> churl_core::Result<Vec<Workload>> {
        Ok(vec![Workload {
            namespace: namespace.to_string(),
            name: "cm-chartmuseum-7d9f".to_string(),
            phase: PodPhase::Running,
            ports: vec![ContainerPort {
                name: Some("http".to_string()),
                container_port: 8080,
            }],
            created: None,
            deleting: false,
        }])
    }

    async fn open_channel(
        &self,
        pod: &Workload,
        remote_port: u16,
    ) -> churl_core::Result<MuseumChannel> {
        self.dialed.lock().push((pod.name.clone(), remote_port));
        Ok(MuseumChannel {
            museum: self.museum,
            stop: CancellationToken::new(),
        })
    }
}

impl ClusterClientFactory for FakeCluster {
    type Client = FakeCluster;

    fn client(&self, _config: &RestConfig) -> churl_core::Result<FakeCluster> {
        Ok(self.clone())
    }
}

async fn fake_cluster() -> FakeCluster {
    FakeCluster {
        museum: start_museum().await,
        dialed: Arc::new(Mutex::new(Vec::new())),
    }
}

async fn open_session(
    cluster: &FakeCluster,
    options: SessionOptions,
) -> churl_core::Result<TunnelSession<MuseumChannel>> {
    let manifest = Manifest::open(MANIFEST.as_bytes())?;
    let target = manifest.current()?.descriptor()?;
    TunnelSession::open(cluster, &RestConfig::default(), &target, options).await
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_latest_through_tunnel() {
    let cluster = fake_cluster().await;
    let session = Arc::new(open_session(&cluster, SessionOptions::new()).await.unwrap());

    assert_eq!(session.mapping().remote, "8080");
    assert_eq!(session.mapping().local, "9999");
    assert_eq!(
        cluster.dialed.lock().clone(),
        vec![("cm-chartmuseum-7d9f".to_string(), 8080)]
    );

    let forward = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.forward_ports().await }
    });

    assert!(session.ready().wait_timeout(Duration::from_secs(5)).await);
    assert_eq!(session.local_port(), Some(9999));

    let client = MetadataClient::for_local_port(9999).unwrap();
    let latest = client.latest("myrepo/mychart").await.unwrap().unwrap();
    assert_eq!(latest.name, "mychart");
    assert_eq!(latest.version, "0.2.0");
    assert_eq!(latest.digest.as_deref(), Some("f00d"));

    session.close();
    timeout(Duration::from_secs(5), forward)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_not_found_and_empty_through_tunnel() {
    let cluster = fake_cluster().await;
    let session = Arc::new(
        open_session(&cluster, SessionOptions::new().local_port("0"))
            .await
            .unwrap(),
    );

    let forward = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.forward_ports().await }
    });
    session.ready().wait().await;

    let port = session.local_port().unwrap();
    assert_ne!(port, 0);
    let client = MetadataClient::for_local_port(port).unwrap();

    assert!(client.latest("myrepo/empty").await.unwrap().is_none());

    let err = client.latest("myrepo/missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("chart not found"));

    session.close();
    forward.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_request_before_ready_fails_to_connect() {
    let cluster = fake_cluster().await;
    let port = free_port();
    let session = open_session(&cluster, SessionOptions::new().local_port(port.to_string()))
        .await
        .unwrap();
    assert!(!session.ready().is_fired());

    let client = MetadataClient::for_local_port(port).unwrap();
    let err = client.latest("myrepo/mychart").await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test]
async fn test_close_before_forward_never_binds() {
    let cluster = fake_cluster().await;
    let port = free_port();
    let session = open_session(&cluster, SessionOptions::new().local_port(port.to_string()))
        .await
        .unwrap();

    session.close();
    session.close();

    timeout(Duration::from_secs(1), session.forward_ports())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.local_port(), None);
    assert!(!session.ready().is_fired());

    // The port was never taken.
    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[tokio::test]
async fn test_unknown_service_fails_to_open() {
    let cluster = fake_cluster().await;
    let manifest = Manifest::open(
        r#"{"museums": [{"name": "x", "serviceName": "nope", "port": 8080}]}"#.as_bytes(),
    )
    .unwrap();
    let target = manifest.current().unwrap().descriptor().unwrap();

    let err = TunnelSession::<MuseumChannel>::open(
        &cluster,
        &RestConfig::default(),
        &target,
        SessionOptions::new(),
    )
    .await
    .err()
    .unwrap();

    assert!(matches!(err, Error::Resolution(_)));
    assert!(cluster.dialed.lock().is_empty());
}
