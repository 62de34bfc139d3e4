//! Chart museum metadata client.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::domain::{ApiError, ChartVersion};
use crate::error::{Error, Result};

/// Default timeout for one metadata request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Queries the chart museum API behind a tunnel's local port.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    base: Url,
    http: reqwest::Client,
}

impl MetadataClient {
    /// Client for a museum reachable on `127.0.0.1:<port>`.
    pub fn for_local_port(port: u16) -> Result<Self> {
        Self::new(&format!("http://127.0.0.1:{}/", port))
    }

    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        // `Url::join` replaces the last segment unless the path ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        // The tunnel is on loopback; never route it through a proxy.
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(client_build_error)?;

        Ok(Self { base, http })
    }

    /// URL of the version list for `chart_path` (`repo/chart`).
    pub fn charts_url(&self, chart_path: &str) -> Result<Url> {
        let path = format!("api/charts/{}", chart_path.trim_matches('/'));
        self.base
            .join(&path)
            .map_err(|e| Error::Config(format!("invalid chart path '{}': {}", chart_path, e)))
    }

    /// Fetches every version of a chart, newest first.
    pub async fn versions(&self, chart_path: &str) -> Result<Vec<ChartVersion>> {
        let url = self.charts_url(chart_path)?;
        debug!(url = %url, "Fetching chart versions");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "Chart museum responded");

        if status != StatusCode::OK {
            let error: ApiError = serde_json::from_slice(&body).map_err(|source| Error::Decode {
                what: "error response",
                source,
            })?;
            return Err(Error::Api {
                status: status.as_u16(),
                error,
            });
        }

        let versions: Option<Vec<ChartVersion>> =
            serde_json::from_slice(&body).map_err(|source| Error::Decode {
                what: "chart versions",
                source,
            })?;
        Ok(versions.unwrap_or_default())
    }

    /// Fetches the newest version of a chart. `Ok(None)` when it has none.
    pub async fn latest(&self, chart_path: &str) -> Result<Option<ChartVersion>> {
        Ok(self.versions(chart_path).await?.into_iter().next())
    }
}

/// A client that cannot be built is a setup problem, not a failed request.
fn client_build_error(e: reqwest::Error) -> Error {
    Error::Config(format!("failed to build HTTP client: {}", e))
}
