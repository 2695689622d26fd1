//! Per-face feature vectors: an intensity histogram, or an ArcFace
//! embedding from ONNX Runtime.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView, GrayImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

use super::{BoundingBox, FaceBox};

/// Side of the square a face is resized to before histogramming.
const HISTOGRAM_FACE_SIZE: u32 = 100;
pub const HISTOGRAM_BINS: usize = 256;

/// Something that turns a face crop into a feature vector.
pub trait FaceEmbedder {
    fn name(&self) -> &'static str;

    fn embed(&self, face: &DynamicImage) -> Result<Vec<f32>>;
}

/// ArcFace ResNet100 (512-dim, L2-normalized).
pub struct ArcFace {
    session: Mutex<Session>,
}

impl ArcFace {
    const INPUT_SIZE: u32 = 112;

    pub fn from_file(path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(path)?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl FaceEmbedder for ArcFace {
    fn name(&self) -> &'static str {
        "arcface"
    }

    fn embed(&self, face: &DynamicImage) -> Result<Vec<f32>> {
        let size = Self::INPUT_SIZE;
        let resized = face.resize_exact(size, size, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        // NCHW, (pixel - 127.5) / 127.5
        let plane = (size * size) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let idx = y as usize * size as usize + x as usize;
            for c in 0..3 {
                input_data[c * plane + idx] = (pixel[c] as f32 - 127.5) / 127.5;
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, size as usize, size as usize],
            input_data.into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock embedding model: {}", e))?;

        // The ArcFace ONNX export names its input "data"
        let outputs = session.run(ort::inputs!["data" => input_tensor])?;

        let embedding_output = outputs.iter().next().ok_or_else(|| anyhow!("No embedding output"))?;
        let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

        let embedding: Vec<f32> = embedding_data.to_vec();
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm > 0.0 {
            Ok(embedding.iter().map(|x| x / norm).collect())
        } else {
            Ok(embedding)
        }
    }
}

/// Grow `bbox` by `margin` of its size on every side, clipped to the image.
pub fn crop_region(bbox: &BoundingBox, margin: f32, img_width: u32, img_height: u32) -> BoundingBox {
    let pad_x = (bbox.width as f32 * margin) as u32;
    let pad_y = (bbox.height as f32 * margin) as u32;

    let x = bbox.x.saturating_sub(pad_x);
    let y = bbox.y.saturating_sub(pad_y);
    let right = (bbox.x as u64 + bbox.width as u64 + pad_x as u64).min(img_width as u64) as u32;
    let bottom = (bbox.y as u64 + bbox.height as u64 + pad_y as u64).min(img_height as u64) as u32;

    BoundingBox::new(
        x.min(img_width),
        y.min(img_height),
        right.saturating_sub(x),
        bottom.saturating_sub(y),
    )
}

/// 256-bin intensity histogram of the face resized to 100x100. An empty crop
/// gives all zeros.
pub fn histogram_embedding(face: &GrayImage) -> Vec<f32> {
    let mut hist = vec![0.0f32; HISTOGRAM_BINS];
    if face.width() == 0 || face.height() == 0 {
        return hist;
    }

    let resized = image::imageops::resize(
        face,
        HISTOGRAM_FACE_SIZE,
        HISTOGRAM_FACE_SIZE,
        image::imageops::FilterType::Triangle,
    );
    for pixel in resized.pixels() {
        hist[pixel[0] as usize] += 1.0;
    }

    hist
}

/// Sanity score for a model embedding in [0, 1]: unusable vectors score at
/// most 0.3, healthy normalized ones 0.7 and up.
pub fn embedding_quality(embedding: &[f32]) -> f32 {
    if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
        return 0.0;
    }

    let n = embedding.len() as f64;
    let mean = embedding.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = embedding.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if variance < 1e-4 {
        return 0.1;
    }
    if embedding.iter().any(|v| v.abs() > 10.0) {
        return 0.3;
    }

    let mut quality = 0.7;
    if variance > 0.01 && variance < 1.0 {
        quality += 0.2;
    }
    if std_dev > 0.1 && std_dev < 1.0 {
        quality += 0.1;
    }

    (quality as f32).min(1.0)
}

/// Face box as reported alongside its embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingEntry {
    pub face_id: usize,
    pub embedding: Vec<f32>,
    pub region: Region,
    pub face_quality: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_quality: Option<f32>,
}

/// Embeddings for the faces of one image
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entries: Vec<EmbeddingEntry>,
    /// Faces whose embedding failed or was rejected as low quality
    pub rejected: usize,
}

/// Turns located faces into embeddings.
pub struct EmbeddingExtractor {
    model: Option<Box<dyn FaceEmbedder>>,
    margin: f32,
    min_quality: f32,
}

impl EmbeddingExtractor {
    pub fn histogram(margin: f32) -> Self {
        Self {
            model: None,
            margin,
            min_quality: 0.0,
        }
    }

    pub fn with_model(model: Box<dyn FaceEmbedder>, margin: f32, min_quality: f32) -> Self {
        Self {
            model: Some(model),
            margin,
            min_quality,
        }
    }

    pub fn method(&self) -> &'static str {
        self.model.as_ref().map_or("histogram", |m| m.name())
    }

    /// Embed every face, in the order given.
    pub fn extract(&self, image: &DynamicImage, faces: &[FaceBox]) -> Extraction {
        let (width, height) = image.dimensions();
        let mut extraction = Extraction::default();

        for face in faces {
            let crop = crop_region(&face.bbox(), self.margin, width, height);
            tracing::debug!(face_id = face.face_id, ?crop, "Extracting embedding");

            let (embedding, embedding_quality) = match &self.model {
                None => {
                    let gray = image.crop_imm(crop.x, crop.y, crop.width, crop.height).to_luma8();
                    (histogram_embedding(&gray), None)
                }
                Some(model) => match self.embed_with_model(model.as_ref(), image, &crop) {
                    Some((embedding, quality)) => (embedding, Some(quality)),
                    None => {
                        extraction.rejected += 1;
                        continue;
                    }
                },
            };

            extraction.entries.push(EmbeddingEntry {
                face_id: face.face_id,
                embedding,
                region: Region {
                    x: face.x,
                    y: face.y,
                    w: face.width,
                    h: face.height,
                },
                face_quality: face.quality_score,
                embedding_quality,
            });
        }

        tracing::info!(
            extracted = extraction.entries.len(),
            rejected = extraction.rejected,
            method = self.method(),
            "Embedding extraction finished"
        );
        extraction
    }

    fn embed_with_model(
        &self,
        model: &dyn FaceEmbedder,
        image: &DynamicImage,
        crop: &BoundingBox,
    ) -> Option<(Vec<f32>, f32)> {
        if crop.width == 0 || crop.height == 0 {
            tracing::warn!(?crop, "Empty face crop, skipping");
            return None;
        }

        let face = image.crop_imm(crop.x, crop.y, crop.width, crop.height);
        let embedding = match model.embed(&face) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding model failed");
                return None;
            }
        };

        let quality = embedding_quality(&embedding);
        if quality <= self.min_quality {
            tracing::warn!(quality, len = embedding.len(), "Rejected low-quality embedding");
            return None;
        }

        Some((embedding, quality))
    }
}
