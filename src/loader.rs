//! Resolve an image source (local path or HTTP(S) URL) to decoded pixels.

use image::{DynamicImage, GenericImageView};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::LoadError;

/// A decoded image and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub source: String,
    pub image: DynamicImage,
}

impl LoadedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Load an image from a local path or URL.
pub fn load_image(source: &str, network: &NetworkConfig) -> Result<LoadedImage, LoadError> {
    tracing::debug!(source = %source, "Attempting to load image");

    let image = if is_url(source) {
        fetch_image(source, network)?
    } else {
        open_local(Path::new(source))?
    };

    let (width, height) = image.dimensions();
    tracing::debug!(
        width,
        height,
        channels = image.color().channel_count(),
        "Successfully loaded image"
    );

    Ok(LoadedImage {
        source: source.to_string(),
        image,
    })
}

fn fetch_image(url: &str, network: &NetworkConfig) -> Result<DynamicImage, LoadError> {
    tracing::debug!(url = %url, "Loading image from URL");

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(network.timeout_secs))
        .build();

    let response = agent
        .get(url)
        .call()
        .map_err(|e| LoadError::Fetch(url.to_string(), e.to_string()))?;

    let too_large = || LoadError::Fetch(url.to_string(), format!("response body exceeds {} bytes", network.max_bytes));

    let declared = response.header("Content-Length").and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > network.max_bytes) {
        return Err(too_large());
    }

    // One byte past the limit tells an oversized body from one that fits exactly
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(network.max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| LoadError::Fetch(url.to_string(), e.to_string()))?;

    if bytes.len() as u64 > network.max_bytes {
        return Err(too_large());
    }

    if bytes.is_empty() {
        return Err(LoadError::Fetch(url.to_string(), "empty response body".to_string()));
    }

    image::load_from_memory(&bytes).map_err(|e| LoadError::Decode(url.to_string(), e.to_string()))
}

fn open_local(path: &Path) -> Result<DynamicImage, LoadError> {
    let path = normalize(path)?;
    tracing::debug!(path = ?path, "Normalized path");

    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::NotFound(path));
        }
        Err(e) => return Err(LoadError::Io(path.display().to_string(), e)),
    };

    if !metadata.is_file() {
        return Err(LoadError::NotFound(path));
    }

    tracing::debug!(bytes = metadata.len(), "File size");
    if metadata.len() == 0 {
        return Err(LoadError::EmptyFile(path));
    }

    match image::open(&path) {
        Ok(img) => Ok(img),
        Err(primary) => {
            // The extension may be missing or lie about the format; sniff the content instead.
            tracing::debug!(error = %primary, "Extension-based decode failed, trying raw bytes");
            let bytes = std::fs::read(&path)
                .map_err(|e| LoadError::Io(path.display().to_string(), e))?;
            image::load_from_memory(&bytes).map_err(|fallback| {
                LoadError::Decode(
                    path.display().to_string(),
                    format!("{}; {}", primary, fallback),
                )
            })
        }
    }
}

fn normalize(path: &Path) -> Result<PathBuf, LoadError> {
    std::path::absolute(path).map_err(|e| LoadError::Io(path.display().to_string(), e))
}
