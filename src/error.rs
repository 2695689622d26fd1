use std::path::PathBuf;
use thiserror::Error;

/// Reasons an image source could not be turned into pixels.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("File is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("Could not decode image: {0}: {1}")]
    Decode(String, String),

    #[error("Failed to fetch image from {0}: {1}")]
    Fetch(String, String),

    #[error("Error loading image {0}: {1}")]
    Io(String, #[source] std::io::Error),
}

/// A third-party capability required by the requested action is unavailable.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Face cascade model unavailable: {0}")]
    CascadeModel(String),

    #[error("Face embedding model unavailable: {0}")]
    EmbeddingModel(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
