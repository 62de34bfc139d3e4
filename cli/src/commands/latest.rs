//! Latest command - fetch the newest version of a chart through a tunnel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use churl_core::{
    ChartVersion, KubectlChannel, KubectlFactory, Manifest, MetadataClient, RestConfig,
    SessionOptions, TargetSource, TunnelSession,
};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::parse_duration;

/// How long a closed session gets to wind down its forward loop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct LatestArgs {
    /// Chart path; several arguments are joined with `/` (`myrepo mychart`)
    #[arg(required = true, value_name = "CHART")]
    chart: Vec<String>,

    /// kubeconfig context to use, overriding the museum's
    #[arg(long)]
    context: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Namespace of the chart museum service, overriding the museum's
    #[arg(short, long)]
    namespace: Option<String>,

    /// How long to wait for a running chart museum pod
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pod_running_timeout: Duration,

    /// Local port for the tunnel (0 picks a free port)
    #[arg(long)]
    local_port: Option<u16>,

    /// Deadline for the whole command
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    timeout: Duration,
}

pub async fn run(args: LatestArgs, config_path: &Path) -> Result<()> {
    let chart_path = chart_path(&args.chart)?;

    let manifest = Manifest::open_from_file(config_path)
        .await
        .context("Failed to open manifest file")?;
    let mut target = manifest.current()?;
    if let Some(namespace) = &args.namespace {
        target.namespace = namespace.clone();
    }
    debug!(museum = %target.name, namespace = %target.namespace, service = %target.service_name, "Selected chart museum");

    let rest_config = RestConfig {
        context: args.context.clone().or_else(|| target.kube_context.clone()),
        kubeconfig: args.kubeconfig.clone(),
        request_timeout: None,
    };

    let mut options = SessionOptions::new()
        .out(std::io::stderr())
        .err(std::io::stderr())
        .attach_timeout(args.pod_running_timeout);
    if let Some(port) = args.local_port {
        options = options.local_port(port.to_string());
    }

    let deadline = deadline_after(args.timeout)?;
    let factory = KubectlFactory::new();
    let session: TunnelSession<KubectlChannel> = timeout_at(
        deadline,
        TunnelSession::open(&factory, &rest_config, &target.descriptor()?, options),
    )
    .await
    .map_err(|_| anyhow!("timed out after {:?} opening the port forward", args.timeout))?
    .context("Failed to open port forward")?;
    let session = Arc::new(session);

    let mut forward = tokio::spawn({
        let session = Arc::clone(&session);
        async move {
            let result = session.forward_ports().await;
            if let Err(e) = &result {
                error!(error = %e, "Failed to forward port");
            }
            result
        }
    });

    let outcome = timeout_at(deadline, fetch_latest(&session, &mut forward, &chart_path)).await;

    session.close();
    if !forward.is_finished() {
        match timeout(SHUTDOWN_GRACE, forward).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Forward task panicked"),
            Err(_) => warn!("Forward loop did not stop in time"),
        }
    }

    let latest = outcome
        .map_err(|_| anyhow!("timed out after {:?} waiting for chart '{}'", args.timeout, chart_path))??;

    println!("{}", serde_json::to_string(&latest)?);
    Ok(())
}

/// Waits for the tunnel, racing the forward task so an early failure surfaces.
async fn fetch_latest(
    session: &TunnelSession<KubectlChannel>,
    forward: &mut JoinHandle<churl_core::Result<()>>,
    chart_path: &str,
) -> Result<Option<ChartVersion>> {
    info!("Waiting for port forward to be ready...");
    tokio::select! {
        _ = session.ready().wait() => {}
        joined = forward => {
            return Err(match joined {
                Ok(Ok(())) => anyhow!("port forward stopped before it was ready"),
                Ok(Err(e)) => anyhow::Error::new(e).context("Failed to forward port"),
                Err(e) => anyhow::Error::new(e).context("Forward task failed"),
            });
        }
    }
    info!("Ready");

    let port = session
        .local_port()
        .context("port forward is ready but has no local port")?;
    let client = MetadataClient::for_local_port(port)?;
    client
        .latest(chart_path)
        .await
        .with_context(|| format!("Could not get chart at '{}'", chart_path))
}

fn deadline_after(timeout: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(timeout)
        .ok_or_else(|| anyhow!("timeout {:?} is too large", timeout))
}

/// Trims each argument and joins them with `/`.
fn chart_path(args: &[String]) -> Result<String> {
    let parts: Vec<&str> = args
        .iter()
        .map(|a| a.trim().trim_matches('/'))
        .filter(|a| !a.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(anyhow!("no chart name given"));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_path() {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(chart_path(&args(&["myrepo/mychart"])).unwrap(), "myrepo/mychart");
        assert_eq!(
            chart_path(&args(&[" myrepo ", "mychart\n"])).unwrap(),
            "myrepo/mychart"
        );
        assert!(chart_path(&args(&["  "])).is_err());
    }

    #[test]
    fn test_deadline_after() {
        assert!(deadline_after(Duration::from_secs(30)).is_ok());
        assert!(deadline_after(Duration::MAX).is_err());
        assert!(deadline_after(Duration::from_secs(u64::MAX)).is_err());
    }
}
