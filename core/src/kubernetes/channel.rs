//! Port-forward channel backed by a `kubectl port-forward` child process.
//!
//! kubectl performs the upgrade to the pod's `portforward` sub-resource and
//! multiplexes every accepted connection over it. The child listens on an
//! ephemeral loopback port that only this channel knows about; each stream
//! the session opens is a TCP connection to that port.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::{KubectlError, Result};
use crate::domain::Workload;
use crate::error::Error;
use crate::ports::ForwardChannel;

/// How long kubectl gets to report the forward as established.
const CHANNEL_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Exit state of the child: `None` while running.
type ExitState = Option<std::result::Result<(), String>>;

/// A running `kubectl port-forward` to one pod port.
pub struct KubectlChannel {
    port: u16,
    stop: CancellationToken,
    exit: watch::Receiver<ExitState>,
}

impl KubectlChannel {
    /// Spawns kubectl and waits until it reports the listener it bound.
    pub(crate) async fn start(
        kubectl_path: &Path,
        global_args: &[String],
        pod: &Workload,
        remote_port: u16,
    ) -> Result<Self> {
        let mut child = Command::new(kubectl_path)
            .args(global_args)
            .args([
                "port-forward",
                "-n",
                &pod.namespace,
                &format!("pod/{}", pod.name),
                &format!(":{}", remote_port),
                "--address=127.0.0.1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KubectlError::ProcessError(format!("Failed to start kubectl: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KubectlError::ProcessError("kubectl stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        let mut lines = BufReader::new(stdout).lines();
        let announced = timeout(CHANNEL_READY_TIMEOUT, async {
            while let Some(line) = lines.next_line().await? {
                debug!(line = %line, "kubectl port-forward");
                if let Some(port) = parse_forwarding_line(&line) {
                    return Ok(Some(port));
                }
            }
            Ok::<_, std::io::Error>(None)
        })
        .await;

        let port = match announced {
            Ok(Ok(Some(port))) => port,
            Ok(Ok(None)) => {
                let message = exit_message(&mut child, stderr).await;
                return Err(KubectlError::from_kubectl_error(&message));
            }
            Ok(Err(e)) => return Err(KubectlError::Io(e)),
            Err(_) => {
                let _ = child.kill().await;
                return Err(KubectlError::Timeout);
            }
        };

        info!(pod = %pod, remote_port, channel_port = port, "Port-forward channel established");

        let stop = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, lines, stderr, stop.clone(), exit_tx));

        Ok(Self {
            port,
            stop,
            exit: exit_rx,
        })
    }
}

impl ForwardChannel for KubectlChannel {
    type Stream = TcpStream;

    async fn open_stream(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn closed(&self) -> crate::error::Result<()> {
        let mut exit = self.exit.clone();
        let state = exit
            .wait_for(|state| state.is_some())
            .await
            .map(|state| state.clone())
            .unwrap_or_else(|_| Some(Err("port-forward supervisor went away".to_string())));

        match state {
            Some(Err(message)) => Err(Error::Transport(message)),
            _ => Ok(()),
        }
    }

    fn close(&self) {
        self.stop.cancel();
    }
}

impl Drop for KubectlChannel {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Owns the child until it exits or the channel is closed.
async fn supervise(
    mut child: Child,
    mut stdout: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
    stderr: Option<ChildStderr>,
    stop: CancellationToken,
    exit: watch::Sender<ExitState>,
) {
    let mut stderr = stderr.map(|s| BufReader::new(s).lines());
    let mut last_error: Option<String> = None;

    let state = loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = child.kill().await;
                debug!("Port-forward channel closed");
                break Ok(());
            }
            status = child.wait() => {
                let message = match status {
                    Ok(status) => last_error
                        .take()
                        .unwrap_or_else(|| format!("kubectl port-forward exited ({})", status)),
                    Err(e) => format!("failed to wait for kubectl port-forward: {}", e),
                };
                warn!(error = %message, "Port-forward channel lost");
                break Err(message);
            }
            line = next_line(&mut stdout) => {
                if let Some(line) = line {
                    debug!(line = %line, "kubectl port-forward");
                }
            }
            line = next_stderr_line(&mut stderr) => {
                match line {
                    Some(line) if is_error_line(&line) => {
                        warn!(line = %line, "kubectl port-forward");
                        last_error = Some(line);
                    }
                    Some(line) => debug!(line = %line, "kubectl port-forward"),
                    None => stderr = None,
                }
            }
        }
    };

    let _ = exit.send(Some(state));
}

async fn next_line(
    lines: &mut tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
) -> Option<String> {
    match lines.next_line().await {
        Ok(Some(line)) => Some(line),
        // Park once stdout is done; the child exit branch ends the loop.
        _ => std::future::pending().await,
    }
}

async fn next_stderr_line(
    lines: &mut Option<tokio::io::Lines<BufReader<ChildStderr>>>,
) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Collects what a child that exited early printed to stderr.
async fn exit_message(child: &mut Child, stderr: Option<ChildStderr>) -> String {
    let mut message = String::new();
    if let Some(stderr) = stderr {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(&line);
        }
    }

    let status = child.wait().await;
    if message.is_empty() {
        message = match status {
            Ok(status) => format!("kubectl port-forward exited ({})", status),
            Err(e) => format!("kubectl port-forward failed: {}", e),
        };
    }
    message
}

// ============================================================================
// Output Parsing
// ============================================================================

/// Extracts the local port from `Forwarding from 127.0.0.1:PORT -> REMOTE`.
pub fn parse_forwarding_line(line: &str) -> Option<u16> {
    static FORWARDING: OnceLock<Regex> = OnceLock::new();
    let re = FORWARDING.get_or_init(|| {
        Regex::new(r"Forwarding from (?:127\.0\.0\.1|\[::1\]):(\d+) -> \d+").expect("valid regex")
    });

    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Checks if a line indicates an error.
pub fn is_error_line(line: &str) -> bool {
    let line_lower = line.to_lowercase();
    line_lower.contains("error")
        || line_lower.contains("failed")
        || line_lower.contains("unable to")
        || line_lower.contains("connection refused")
        || line_lower.contains("lost connection")
        || line_lower.contains("an error occurred")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forwarding_line() {
        assert_eq!(
            parse_forwarding_line("Forwarding from 127.0.0.1:41235 -> 8080"),
            Some(41235)
        );
        assert_eq!(
            parse_forwarding_line("Forwarding from [::1]:41235 -> 8080"),
            Some(41235)
        );
        assert_eq!(parse_forwarding_line("Handling connection for 41235"), None);
    }

    #[test]
    fn test_is_error_line() {
        assert!(is_error_line(
            "E1121 portforward.go:400] an error occurred forwarding 41235 -> 8080"
        ));
        assert!(is_error_line("error: lost connection to pod"));
        assert!(is_error_line("Unable to listen on port 41235"));
        assert!(!is_error_line("Forwarding from 127.0.0.1:41235 -> 8080"));
    }
}
