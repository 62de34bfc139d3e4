//! Init command - create an empty manifest.

use std::path::Path;

use anyhow::Result;
use churl_core::Manifest;

pub async fn run(config_path: &Path) -> Result<()> {
    Manifest::init(config_path).await?;
    println!("Created {}", config_path.display());
    Ok(())
}
