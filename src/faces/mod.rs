pub mod cascade;
pub mod dnn;
pub mod embedding;
pub mod fallback;
pub mod locator;

use anyhow::Result;
use image::{DynamicImage, GrayImage};
use serde::Serialize;

pub use embedding::{EmbeddingEntry, EmbeddingExtractor, Extraction, FaceEmbedder};
pub use locator::{FaceLocator, Location};

/// Bounding box of a face in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Shrink the box so it lies within a `img_width` x `img_height` image.
    pub fn clamp_to(&self, img_width: u32, img_height: u32) -> Self {
        let x = self.x.min(img_width);
        let y = self.y.min(img_height);
        Self {
            x,
            y,
            width: self.width.min(img_width - x),
            height: self.height.min(img_height - y),
        }
    }
}

/// A box proposed by a detection strategy, before filtering and ranking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    /// Detector-supplied confidence, if the backend produces one in [0, 1]
    pub confidence: Option<f32>,
}

impl Candidate {
    pub fn new(bbox: BoundingBox) -> Self {
        Self { bbox, confidence: None }
    }
}

/// A located, ranked face
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceBox {
    pub face_id: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub quality_score: f64,
}

impl FaceBox {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.x, self.y, self.width, self.height)
    }
}

/// The image handed to every detection strategy.
pub struct Frame<'a> {
    pub color: &'a DynamicImage,
    pub gray: &'a GrayImage,
}

impl<'a> Frame<'a> {
    pub fn new(color: &'a DynamicImage, gray: &'a GrayImage) -> Self {
        Self { color, gray }
    }

    pub fn shorter_side(&self) -> u32 {
        self.gray.width().min(self.gray.height())
    }
}

/// One stage of the face-location fallback chain.
pub trait FaceStrategy {
    /// Name reported in responses and logs
    fn name(&self) -> &'static str;

    fn locate(&self, frame: &Frame<'_>) -> Result<Vec<Candidate>>;
}

/// Compute Intersection over Union between two bounding boxes
pub fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x) as i64;
    let y1 = a.y.max(b.y) as i64;
    let x2 = (a.x as i64 + a.width as i64).min(b.x as i64 + b.width as i64);
    let y2 = (a.y as i64 + a.height as i64).min(b.y as i64 + b.height as i64);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let union = a.area() as f32 + b.area() as f32 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Non-maximum suppression: keep the best-scored boxes, dropping any that
/// overlap an already kept box by more than `threshold` IoU.
pub fn nms(boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    nms_top(boxes, threshold, usize::MAX)
}

/// [`nms`] that stops once `limit` boxes are kept.
pub fn nms_top(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32, limit: usize) -> Vec<(BoundingBox, f32)> {
    // Sort by score descending
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(BoundingBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep.len() >= limit {
            break;
        }
        if keep.iter().all(|(kept, _)| compute_iou(kept, &candidate.0) <= threshold) {
            keep.push(candidate);
        }
    }

    keep
}
