//! Tunnel session: one port-forward from a local listener to a pod port.
//!
//! A session is created by [`TunnelSession::open`], which locates the pod,
//! resolves the port mapping and dials the forward channel. The caller then
//! runs [`TunnelSession::forward_ports`] on a background task and waits on
//! the session's [`ReadinessGate`] before issuing requests against the local
//! port. [`TunnelSession::close`] ends the forward loop from any task.

use std::fmt;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::locator::{WorkloadLocator, DEFAULT_POLL_INTERVAL};
use crate::domain::{
    resolve, ClusterObject, PortMapping, PortSource, ReadinessGate, TargetDescriptor, Workload,
    DEFAULT_LOCAL_PORT,
};
use crate::error::{Error, Result};
use crate::ports::{ClusterClient, ClusterClientFactory, ForwardChannel, RestConfig};

/// Default time allowed for a pod to become attachable.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(2);

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

fn discard() -> Sink {
    Arc::new(Mutex::new(Box::new(io::sink())))
}

/// Options for [`TunnelSession::open`].
pub struct SessionOptions {
    out: Sink,
    err: Sink,
    attach_timeout: Duration,
    poll_interval: Duration,
    ready: ReadinessGate,
    local_port: String,
    address: IpAddr,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            out: discard(),
            err: discard(),
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready: ReadinessGate::new(),
            local_port: DEFAULT_LOCAL_PORT.to_string(),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink for progress lines ("Forwarding from ...", "Handling connection for ...").
    pub fn out(mut self, writer: impl Write + Send + 'static) -> Self {
        self.out = Arc::new(Mutex::new(Box::new(writer)));
        self
    }

    /// Sink for per-connection relay errors.
    pub fn err(mut self, writer: impl Write + Send + 'static) -> Self {
        self.err = Arc::new(Mutex::new(Box::new(writer)));
        self
    }

    pub fn attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Uses a caller-owned gate instead of a fresh one.
    pub fn ready(mut self, gate: ReadinessGate) -> Self {
        self.ready = gate;
        self
    }

    /// Local side used when the port spec names none. `"0"` lets the OS pick.
    pub fn local_port(mut self, port: impl Into<String>) -> Self {
        self.local_port = port.into();
        self
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.attach_timeout.is_zero() {
            return Err(Error::Config("attach timeout must be greater than zero".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be greater than zero".to_string()));
        }
        if self.local_port.is_empty() {
            return Err(Error::Config("local port must not be empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("attach_timeout", &self.attach_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("local_port", &self.local_port)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a session after it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Dialed; the forward loop has not started.
    Open,
    Forwarding,
    Closed,
}

/// An open port-forward to one pod.
pub struct TunnelSession<C: ForwardChannel> {
    channel: Arc<C>,
    pod: Workload,
    mapping: PortMapping,
    address: IpAddr,
    ready: ReadinessGate,
    stop: CancellationToken,
    forwarding: AtomicBool,
    bound: Mutex<Option<SocketAddr>>,
    out: Sink,
    err: Sink,
}

impl<C: ForwardChannel> TunnelSession<C> {
    /// Locates the target's pod, resolves the port mapping and dials the channel.
    pub async fn open<F>(
        factory: &F,
        config: &RestConfig,
        target: &TargetDescriptor,
        options: SessionOptions,
    ) -> Result<Self>
    where
        F: ClusterClientFactory,
        F::Client: ClusterClient<Channel = C>,
    {
        options.validate()?;
        let requested = PortMapping::parse(target.port(), &options.local_port)?;

        let client = factory.client(config)?;
        let located = WorkloadLocator::new(&client, options.attach_timeout)
            .with_poll_interval(options.poll_interval)
            .locate(target.namespace(), target.object())
            .await?;

        let source = match &located.object {
            ClusterObject::Service(service) => PortSource::Service {
                service,
                pod: &located.pod,
            },
            _ => PortSource::Workload(&located.pod),
        };
        let mapping = resolve(&requested, source)?;
        let remote = mapping.remote_port()?;
        // Validated here so a bad local side fails before dialing.
        mapping.local_port()?;

        debug!(pod = %located.pod, mapping = %mapping, "Dialing forward channel");
        let channel = client.open_channel(&located.pod, remote).await?;

        info!(pod = %located.pod, mapping = %mapping, "Tunnel session opened");
        Ok(Self {
            channel: Arc::new(channel),
            pod: located.pod,
            mapping,
            address: options.address,
            ready: options.ready,
            stop: CancellationToken::new(),
            forwarding: AtomicBool::new(false),
            bound: Mutex::new(None),
            out: options.out,
            err: options.err,
        })
    }

    /// The resolved mapping. Both sides are numeric.
    pub fn mapping(&self) -> &PortMapping {
        &self.mapping
    }

    pub fn pod(&self) -> &Workload {
        &self.pod
    }

    /// The gate fired once the local listener accepts connections.
    pub fn ready(&self) -> &ReadinessGate {
        &self.ready
    }

    /// The bound local port; `None` until the forward loop has bound.
    pub fn local_port(&self) -> Option<u16> {
        self.bound.lock().map(|addr| addr.port())
    }

    pub fn state(&self) -> SessionState {
        if self.stop.is_cancelled() {
            SessionState::Closed
        } else if self.forwarding.load(Ordering::SeqCst) {
            SessionState::Forwarding
        } else {
            SessionState::Open
        }
    }

    /// Runs the forward loop until [`close`](Self::close) or a fatal channel error.
    ///
    /// Returns immediately, without binding, when the session is already closed.
    /// A loop that failed to bind leaves the session open, so it can be retried.
    pub async fn forward_ports(&self) -> Result<()> {
        if self.stop.is_cancelled() {
            return Ok(());
        }
        if self.forwarding.swap(true, Ordering::SeqCst) {
            return Err(Error::Transport(
                "forward loop is already running for this session".to_string(),
            ));
        }

        let (listener, addr, remote) = match self.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                self.forwarding.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *self.bound.lock() = Some(addr);

        write_line(&self.out, format_args!("Forwarding from {} -> {}", addr, remote));
        info!(local = %addr, remote, pod = %self.pod, "Forwarding");
        self.ready.fire();

        let closed = self.channel.closed();
        tokio::pin!(closed);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!(local = %addr, "Forward loop stopped");
                    return Ok(());
                }
                result = &mut closed => {
                    if self.stop.is_cancelled() {
                        return Ok(());
                    }
                    return Err(result.err().unwrap_or_else(|| {
                        Error::Transport(format!("lost connection to pod {}", self.pod))
                    }));
                }
                accepted = listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        write_line(&self.out, format_args!("Handling connection for {}", addr.port()));
                        debug!(peer = %peer, "Accepted connection");
                        self.relay(conn, peer);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        write_line(&self.err, format_args!("error accepting connection: {}", e));
                    }
                },
            }
        }
    }

    async fn bind(&self) -> Result<(TcpListener, SocketAddr, u16)> {
        let local = self.mapping.local_port()?;
        let remote = self.mapping.remote_port()?;
        let listener = TcpListener::bind((self.address, local)).await.map_err(|e| {
            Error::Transport(format!("unable to listen on {}:{}: {}", self.address, local, e))
        })?;
        let addr = listener.local_addr()?;
        Ok((listener, addr, remote))
    }

    /// Opens a stream for one local connection and copies bytes both ways.
    ///
    /// Runs on its own task so a slow stream never holds up the accept loop.
    fn relay(&self, mut conn: TcpStream, peer: SocketAddr) {
        let channel = Arc::clone(&self.channel);
        let stop = self.stop.clone();
        let err = Arc::clone(&self.err);

        tokio::spawn(async move {
            let relay = async {
                let mut upstream = match channel.open_stream().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Failed to open stream to pod");
                        write_line(&err, format_args!("error creating stream for {}: {}", peer, e));
                        return;
                    }
                };

                match tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
                    Ok((sent, received)) => {
                        debug!(peer = %peer, sent, received, "Connection finished");
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Relay failed");
                        write_line(&err, format_args!("error copying data for {}: {}", peer, e));
                    }
                }
            };

            tokio::select! {
                _ = stop.cancelled() => {}
                _ = relay => {}
            }
        });
    }

    /// Stops the forward loop and releases the channel. Idempotent.
    pub fn close(&self) {
        if !self.stop.is_cancelled() {
            debug!(pod = %self.pod, "Closing tunnel session");
        }
        self.stop.cancel();
        self.channel.close();
    }
}

impl<C: ForwardChannel> Drop for TunnelSession<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_line(sink: &Sink, args: fmt::Arguments<'_>) {
    let mut sink = sink.lock();
    let _ = sink.write_fmt(args).and_then(|_| sink.write_all(b"\n"));
}
