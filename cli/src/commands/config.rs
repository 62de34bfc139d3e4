//! Config command - inspect the manifest.

use std::path::Path;

use anyhow::{Context, Result};
use churl_core::Manifest;

/// Prints the selected chart museum as JSON.
pub async fn current(config_path: &Path) -> Result<()> {
    let manifest = Manifest::open_from_file(config_path)
        .await
        .context("Failed to open manifest file")?;
    let museum = manifest.current_museum()?;

    println!("{}", serde_json::to_string_pretty(museum)?);
    Ok(())
}
