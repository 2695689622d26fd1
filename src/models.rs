//! Locating and fetching model files.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::time::Duration;

/// Model downloads are large; give them longer than image fetches.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Make sure `path` exists, downloading it from `url` when allowed.
pub fn ensure_model(path: &Path, url: &str, allow_download: bool) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }

    if !allow_download {
        bail!("model file {} does not exist", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create models directory {}", parent.display()))?;
    }

    tracing::info!(model = %path.display(), "Downloading model...");
    let agent = ureq::AgentBuilder::new().timeout(DOWNLOAD_TIMEOUT).build();
    let response = agent
        .get(url)
        .call()
        .map_err(|e| anyhow!("Failed to download model: {}", e))?;

    // Write to a sibling file first so an interrupted download never looks complete.
    let partial = path.with_extension("part");
    let mut file = std::fs::File::create(&partial)?;
    std::io::copy(&mut response.into_reader(), &mut file)?;
    drop(file);
    std::fs::rename(&partial, path)?;

    tracing::info!(model = %path.display(), "Model downloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_existing_model_is_used() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"weights").unwrap();

        assert!(ensure_model(&path, "http://127.0.0.1:9/unused", false).is_ok());
    }

    #[test]
    fn test_missing_model_without_download() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");

        let err = ensure_model(&path, "http://127.0.0.1:9/unused", false).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
