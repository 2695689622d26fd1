//! Face detection, embedding, comparison and image quality scoring.
//!
//! Each invocation of the `faceprobe` binary maps one [`actions::Request`]
//! to one JSON document; this library holds the pipeline behind it.

pub mod actions;
pub mod config;
pub mod error;
pub mod faces;
pub mod loader;
pub mod logging;
pub mod models;
pub mod processor;
pub mod quality;
pub mod response;
pub mod similarity;

pub use actions::{Action, Request};
pub use config::Config;
pub use error::{CapabilityError, LoadError};
pub use processor::FaceProcessor;
