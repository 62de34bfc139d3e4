//! Version command - report the version of the tool.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

/// Commit the binary was built from, injected at build time.
const GIT_COMMIT: Option<&str> = option_env!("CHURL_GIT_COMMIT");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    JsonCompact,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Version {
    version: &'static str,
    git_commit: &'static str,
}

impl Version {
    fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: GIT_COMMIT.filter(|c| !c.is_empty()).unwrap_or("unset"),
        }
    }

    fn render(&self, format: OutputFormat) -> Result<String> {
        let rendered = match format {
            OutputFormat::Text => format!(
                "Version:    {}\nGit commit: {}",
                self.version, self.git_commit
            ),
            OutputFormat::Json => serde_json::to_string_pretty(self)
                .context("internal error: failed to encode version")?,
            OutputFormat::JsonCompact => {
                serde_json::to_string(self).context("internal error: failed to encode version")?
            }
        };
        Ok(rendered)
    }
}

pub fn run(format: OutputFormat) -> Result<()> {
    println!("{}", Version::current().render(format)?);
    Ok(())
}
