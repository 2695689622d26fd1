use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where model files are looked up and downloaded to.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub comparison: ComparisonConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Explicit SeetaFace model file. Falls back to `models_dir` when unset.
    #[serde(default)]
    pub cascade_model: Option<PathBuf>,

    #[serde(default = "default_cascade_model_url")]
    pub cascade_model_url: String,

    /// Download missing model files instead of failing.
    #[serde(default = "default_auto_download")]
    pub auto_download: bool,

    /// Enable the UltraFace DNN stage of the fallback chain.
    #[serde(default)]
    pub dnn: bool,

    #[serde(default)]
    pub dnn_model: Option<PathBuf>,

    #[serde(default = "default_dnn_model_url")]
    pub dnn_model_url: String,

    /// Boxes narrower or shorter than this fraction of the shorter image side are dropped.
    #[serde(default = "default_min_face_ratio")]
    pub min_face_ratio: f32,

    /// Confidence reported when the detector does not supply one.
    #[serde(default = "default_confidence")]
    pub default_confidence: f32,

    #[serde(default = "default_template_threshold")]
    pub template_threshold: f32,

    #[serde(default = "default_template_max_matches")]
    pub template_max_matches: usize,

    #[serde(default = "default_statistical_min_variance")]
    pub statistical_min_variance: f64,
}

fn default_cascade_model_url() -> String {
    "https://github.com/atomashpolskiy/rustface/raw/master/model/seeta_fd_frontal_v1.0.bin".to_string()
}

fn default_dnn_model_url() -> String {
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx".to_string()
}

fn default_auto_download() -> bool {
    true
}

fn default_min_face_ratio() -> f32 {
    0.05
}

fn default_confidence() -> f32 {
    0.8
}

fn default_template_threshold() -> f32 {
    0.3
}

fn default_template_max_matches() -> usize {
    5
}

fn default_statistical_min_variance() -> f64 {
    100.0
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cascade_model: None,
            cascade_model_url: default_cascade_model_url(),
            auto_download: default_auto_download(),
            dnn: false,
            dnn_model: None,
            dnn_model_url: default_dnn_model_url(),
            min_face_ratio: default_min_face_ratio(),
            default_confidence: default_confidence(),
            template_threshold: default_template_threshold(),
            template_max_matches: default_template_max_matches(),
            statistical_min_variance: default_statistical_min_variance(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMethod {
    #[default]
    Histogram,
    ArcFace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub method: EmbeddingMethod,

    /// Extra context around each face box, as a fraction of the box size per side.
    #[serde(default = "default_margin")]
    pub margin: f32,

    #[serde(default)]
    pub model: Option<PathBuf>,

    #[serde(default = "default_embedding_model_url")]
    pub model_url: String,

    /// Model embeddings scoring at or below this are discarded.
    #[serde(default = "default_min_quality")]
    pub min_quality: f32,
}

fn default_margin() -> f32 {
    0.2
}

fn default_embedding_model_url() -> String {
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx".to_string()
}

fn default_min_quality() -> f32 {
    0.5
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            method: EmbeddingMethod::default(),
            margin: default_margin(),
            model: None,
            model_url: default_embedding_model_url(),
            min_quality: default_min_quality(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    #[default]
    Enhanced,
    Cosine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    #[serde(default)]
    pub mode: ComparisonMode,

    /// Weighted similarity below this is reported as 0.0.
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f32,
}

fn default_similarity_threshold() -> f32 {
    0.5
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            mode: ComparisonMode::default(),
            threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound on a fetched image body.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_bytes() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("faceprobe")
        .join("models")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            detection: DetectionConfig::default(),
            embedding: EmbeddingConfig::default(),
            comparison: ComparisonConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, or built-in defaults when no file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Path of the SeetaFace cascade model.
    pub fn cascade_model_path(&self) -> PathBuf {
        self.detection
            .cascade_model
            .clone()
            .unwrap_or_else(|| self.models_dir.join("seeta_fd_frontal_v1.0.bin"))
    }

    pub fn dnn_model_path(&self) -> PathBuf {
        self.detection
            .dnn_model
            .clone()
            .unwrap_or_else(|| self.models_dir.join("ultraface-320.onnx"))
    }

    pub fn embedding_model_path(&self) -> PathBuf {
        self.embedding
            .model
            .clone()
            .unwrap_or_else(|| self.models_dir.join("arcface-resnet100.onnx"))
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FACEPROBE_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("faceprobe")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.embedding.method, EmbeddingMethod::Histogram);
        assert_eq!(config.comparison.mode, ComparisonMode::Enhanced);
        assert!((config.detection.min_face_ratio - 0.05).abs() < f32::EPSILON);
        assert!((config.detection.default_confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.detection.template_max_matches, 5);
        assert_eq!(config.network.timeout_secs, 30);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
models_dir = "/opt/models"

[embedding]
method = "arcface"
margin = 0.1

[comparison]
mode = "cosine"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.embedding.method, EmbeddingMethod::ArcFace);
        assert_eq!(config.comparison.mode, ComparisonMode::Cosine);
        assert_eq!(
            config.cascade_model_path(),
            PathBuf::from("/opt/models/seeta_fd_frontal_v1.0.bin")
        );
        assert!((config.embedding.min_quality - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[embedding]\nmethod = \"sift\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
