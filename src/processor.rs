use image::DynamicImage;

use crate::config::{Config, EmbeddingMethod};
use crate::error::CapabilityError;
use crate::faces::cascade::SeetaCascade;
use crate::faces::dnn::{DnnStrategy, UltraFace};
use crate::faces::embedding::ArcFace;
use crate::faces::{EmbeddingExtractor, Extraction, FaceLocator, Location};
use crate::loader::{self, LoadedImage};
use crate::models;
use crate::quality;
use crate::response::{Detection, Embeddings, Quality, Response};
use crate::similarity::{self, Comparison};

/// Which external capabilities a request needs loaded up front
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub faces: bool,
    pub embeddings: bool,
}

/// Runs the detection, embedding, comparison and quality pipelines for one
/// invocation.
pub struct FaceProcessor {
    config: Config,
    locator: Option<FaceLocator>,
    extractor: Option<EmbeddingExtractor>,
}

impl FaceProcessor {
    /// A processor with no detector or embedder loaded.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            locator: None,
            extractor: None,
        }
    }

    /// Load the capabilities `needs` asks for, failing if a required one is unavailable.
    pub fn init(config: Config, needs: Requirements) -> Result<Self, CapabilityError> {
        let locator = if needs.faces {
            Some(build_locator(&config)?)
        } else {
            None
        };

        let extractor = if needs.embeddings {
            Some(build_extractor(&config)?)
        } else {
            None
        };

        Ok(Self {
            config,
            locator,
            extractor,
        })
    }

    pub fn with_locator(mut self, locator: FaceLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_extractor(mut self, extractor: EmbeddingExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    fn load(&self, source: &str) -> Result<LoadedImage, String> {
        let loaded = loader::load_image(source, &self.config.network).map_err(|e| e.to_string())?;
        tracing::info!(
            source = %loaded.source,
            width = loaded.width(),
            height = loaded.height(),
            channels = loaded.channels(),
            "Image loaded"
        );
        Ok(loaded)
    }

    fn locate(&self, image: &DynamicImage) -> Result<Location, String> {
        let locator = self
            .locator
            .as_ref()
            .ok_or_else(|| "Face detector not initialized".to_string())?;
        Ok(locator.locate(image))
    }

    fn embed(&self, image: &DynamicImage) -> Result<(Extraction, &'static str), String> {
        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| "Embedding extractor not initialized".to_string())?;
        let location = self.locate(image)?;
        Ok((extractor.extract(image, &location.faces), extractor.method()))
    }

    pub fn detect_faces(&self, source: &str) -> Response<Detection> {
        tracing::info!(source = %source, "Starting face detection");

        let loaded = match self.load(source) {
            Ok(loaded) => loaded,
            Err(e) => return Response::failure(e),
        };

        match self.locate(&loaded.image) {
            Ok(location) => {
                for face in &location.faces {
                    tracing::debug!(
                        face_id = face.face_id,
                        x = face.x,
                        y = face.y,
                        w = face.width,
                        h = face.height,
                        "Face"
                    );
                }
                Response::ok(Detection {
                    face_count: location.faces.len(),
                    faces: location.faces,
                    method: location.method,
                })
            }
            Err(e) => Response::failure(format!("Face detection error: {}", e)),
        }
    }

    pub fn extract_embeddings(&self, source: &str) -> Response<Embeddings> {
        tracing::info!(source = %source, "Starting embedding extraction");

        let loaded = match self.load(source) {
            Ok(loaded) => loaded,
            Err(e) => return Response::failure(e),
        };

        match self.embed(&loaded.image) {
            Ok((extraction, method)) => Response::ok(Embeddings {
                face_count: extraction.entries.len(),
                embeddings: extraction.entries,
                rejected: extraction.rejected,
                method: Some(method),
            }),
            Err(e) => Response::failure(format!("Embedding extraction error: {}", e)),
        }
    }

    pub fn compare_embeddings(&self, a: &[f32], b: &[f32]) -> Response<Comparison> {
        match similarity::compare(a, b, &self.config.comparison) {
            Some(comparison) => Response::ok(comparison),
            None => Response::failure("Comparison error: embeddings must not be empty"),
        }
    }

    /// Compare the best-ranked face of each image.
    pub fn compare_images(&self, first: &str, second: &str) -> Response<Comparison> {
        let a = match self.best_embedding(first) {
            Ok(embedding) => embedding,
            Err(e) => return Response::failure(e),
        };
        let b = match self.best_embedding(second) {
            Ok(embedding) => embedding,
            Err(e) => return Response::failure(e),
        };

        self.compare_embeddings(&a, &b)
    }

    fn best_embedding(&self, source: &str) -> Result<Vec<f32>, String> {
        let loaded = self.load(source)?;
        let (extraction, _) = self.embed(&loaded.image)?;
        extraction
            .entries
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| format!("No usable face found in {}", source))
    }

    pub fn assess_quality(&self, source: &str) -> Response<Quality> {
        let loaded = match self.load(source) {
            Ok(loaded) => loaded,
            Err(e) => return Response::failure(e),
        };

        let assessment = quality::assess_image(&loaded.image.to_luma8());
        tracing::info!(score = assessment.quality_score, "Image quality assessed");

        Response::ok(Quality {
            quality_score: assessment.quality_score,
            metrics: Some(assessment.metrics),
        })
    }
}

fn build_locator(config: &Config) -> Result<FaceLocator, CapabilityError> {
    let detection = &config.detection;

    let cascade_path = config.cascade_model_path();
    models::ensure_model(&cascade_path, &detection.cascade_model_url, detection.auto_download)
        .and_then(|_| SeetaCascade::from_file(&cascade_path))
        .map(|cascade| {
            let dnn = if detection.dnn { load_dnn(config) } else { DnnStrategy::disabled() };
            FaceLocator::standard(detection, Box::new(cascade), dnn)
        })
        .map_err(|e| CapabilityError::CascadeModel(format!("{:#}", e)))
}

/// The DNN stage is optional, so a load failure only disables it.
fn load_dnn(config: &Config) -> DnnStrategy {
    let path = config.dnn_model_path();
    let loaded = models::ensure_model(&path, &config.detection.dnn_model_url, config.detection.auto_download)
        .and_then(|_| UltraFace::from_file(&path));

    match loaded {
        Ok(model) => DnnStrategy::new(model),
        Err(e) => {
            tracing::warn!(error = %e, "DNN face detector unavailable, skipping that stage");
            DnnStrategy::disabled()
        }
    }
}

fn build_extractor(config: &Config) -> Result<EmbeddingExtractor, CapabilityError> {
    let embedding = &config.embedding;

    match embedding.method {
        EmbeddingMethod::Histogram => Ok(EmbeddingExtractor::histogram(embedding.margin)),
        EmbeddingMethod::ArcFace => {
            let path = config.embedding_model_path();
            models::ensure_model(&path, &embedding.model_url, config.detection.auto_download)
                .and_then(|_| ArcFace::from_file(&path))
                .map(|model| EmbeddingExtractor::with_model(Box::new(model), embedding.margin, embedding.min_quality))
                .map_err(|e| CapabilityError::EmbeddingModel(format!("{:#}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::cascade::{CascadeDetector, CascadeParams};
    use crate::faces::BoundingBox;
    use image::{GrayImage, Luma};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    /// Reports one 60px face at the image centre.
    struct CentreCascade;

    impl CascadeDetector for CentreCascade {
        fn detect(&self, gray: &GrayImage, _params: &CascadeParams) -> Vec<BoundingBox> {
            let (w, h) = gray.dimensions();
            vec![BoundingBox::new(w / 2 - 30, h / 2 - 30, 60, 60)]
        }
    }

    fn processor() -> FaceProcessor {
        let config = Config::default();
        let locator = FaceLocator::standard(&config.detection, Box::new(CentreCascade), DnnStrategy::disabled());
        FaceProcessor::new(config)
            .with_locator(locator)
            .with_extractor(EmbeddingExtractor::histogram(0.2))
    }

    fn write_face(dir: &TempDir, name: &str, seed: u32) -> PathBuf {
        let path = dir.path().join(name);
        GrayImage::from_fn(200, 160, |x, y| {
            if (70..130).contains(&x) && (50..110).contains(&y) {
                Luma([(((x * 7 + y * 13 + seed) % 160) + 60) as u8])
            } else {
                Luma([15])
            }
        })
        .save(&path)
        .unwrap();
        path
    }

    #[test]
    fn test_detect_missing_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.jpg");

        let response = processor().detect_faces(missing.to_str().unwrap());
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("File not found:"));
        assert_eq!(response.payload.face_count, 0);
    }

    #[test]
    fn test_detect_single_centred_face() {
        let dir = tempdir().unwrap();
        let path = write_face(&dir, "face.png", 0);

        let response = processor().detect_faces(path.to_str().unwrap());
        assert!(response.success);
        assert_eq!(response.payload.face_count, 1);
        assert_eq!(response.payload.method, Some("cascade"));
        assert!((response.payload.faces[0].confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_detect_without_locator_fails_softly() {
        let dir = tempdir().unwrap();
        let path = write_face(&dir, "face.png", 0);

        let response = FaceProcessor::new(Config::default()).detect_faces(path.to_str().unwrap());
        assert!(!response.success);
        assert!(response.error.unwrap().contains("not initialized"));
    }

    #[test]
    fn test_extract_embeddings() {
        let dir = tempdir().unwrap();
        let path = write_face(&dir, "face.png", 0);

        let response = processor().extract_embeddings(path.to_str().unwrap());
        assert!(response.success);
        assert_eq!(response.payload.face_count, 1);
        assert_eq!(response.payload.method, Some("histogram"));
        assert_eq!(response.payload.embeddings[0].embedding.len(), 256);
    }

    #[test]
    fn test_compare_same_image_twice() {
        let dir = tempdir().unwrap();
        let path = write_face(&dir, "face.png", 0);
        let path = path.to_str().unwrap();

        let response = processor().compare_images(path, path);
        assert!(response.success);
        assert!((response.payload.similarity - 1.0).abs() < 1e-9);
        assert!(response.payload.distance.abs() < 1e-9);
    }

    #[test]
    fn test_compare_empty_embedding() {
        let response = processor().compare_embeddings(&[], &[0.5, 0.2]);
        assert!(!response.success);
        assert_eq!(response.payload.similarity, 0.0);
        assert_eq!(response.payload.distance, 1.0);
    }

    #[test]
    fn test_quality_needs_no_capabilities() {
        let dir = tempdir().unwrap();
        let path = write_face(&dir, "face.png", 3);

        let response = FaceProcessor::new(Config::default()).assess_quality(path.to_str().unwrap());
        assert!(response.success);
        assert!((0.0..=100.0).contains(&response.payload.quality_score));
        let metrics = response.payload.metrics.unwrap();
        assert_eq!((metrics.width, metrics.height), (200, 160));
    }

    #[test]
    fn test_quality_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.png");
        std::fs::File::create(&path).unwrap();

        let response = FaceProcessor::new(Config::default()).assess_quality(path.to_str().unwrap());
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("File is empty:"));
        assert_eq!(response.payload.quality_score, 0.0);
    }

    #[test]
    fn test_init_without_requirements_loads_nothing() {
        assert!(FaceProcessor::init(Config::default(), Requirements::default()).is_ok());
    }

    #[test]
    fn test_init_fails_without_cascade_model() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.models_dir = dir.path().to_path_buf();
        config.detection.auto_download = false;

        let needs = Requirements {
            faces: true,
            embeddings: false,
        };
        let err = FaceProcessor::init(config, needs).err().unwrap();
        assert!(matches!(err, CapabilityError::CascadeModel(_)));
    }
}
