use image::DynamicImage;

use super::cascade::{CascadeDetector, CascadeStrategy};
use super::dnn::DnnStrategy;
use super::fallback::{StatisticalStrategy, TemplateStrategy};
use super::{Candidate, FaceBox, FaceStrategy, Frame};
use crate::config::DetectionConfig;
use crate::quality;

/// Outcome of running the fallback chain over one image
#[derive(Debug, Clone, Default)]
pub struct Location {
    /// Name of the strategy that produced the faces, if any did
    pub method: Option<&'static str>,
    /// Faces ordered best quality first; `face_id` is the position
    pub faces: Vec<FaceBox>,
}

/// Runs detection strategies in priority order until one finds a face.
pub struct FaceLocator {
    strategies: Vec<Box<dyn FaceStrategy>>,
    min_face_ratio: f32,
    default_confidence: f32,
}

impl FaceLocator {
    pub fn new(strategies: Vec<Box<dyn FaceStrategy>>, min_face_ratio: f32, default_confidence: f32) -> Self {
        Self {
            strategies,
            min_face_ratio,
            default_confidence,
        }
    }

    /// The standard chain: cascade, DNN, template matching, central variance.
    pub fn standard(config: &DetectionConfig, cascade: Box<dyn CascadeDetector>, dnn: DnnStrategy) -> Self {
        let strategies: Vec<Box<dyn FaceStrategy>> = vec![
            Box::new(CascadeStrategy::new(cascade)),
            Box::new(dnn),
            Box::new(TemplateStrategy::new(config.template_threshold, config.template_max_matches)),
            Box::new(StatisticalStrategy::new(config.statistical_min_variance)),
        ];

        Self::new(strategies, config.min_face_ratio, config.default_confidence)
    }

    /// Locate faces in a decoded image.
    pub fn locate(&self, image: &DynamicImage) -> Location {
        let gray = image.to_luma8();
        tracing::debug!(width = gray.width(), height = gray.height(), "Converted to grayscale");
        self.locate_in(&Frame::new(image, &gray))
    }

    pub fn locate_in(&self, frame: &Frame<'_>) -> Location {
        for strategy in &self.strategies {
            tracing::debug!(strategy = strategy.name(), "Trying face detection strategy");

            let candidates = match strategy.locate(frame) {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(strategy = strategy.name(), error = %e, "Face detection strategy failed");
                    continue;
                }
            };

            let found = candidates.len();
            let kept = self.filter_small(frame, candidates);
            tracing::debug!(strategy = strategy.name(), found, kept = kept.len(), "Strategy result");

            if !kept.is_empty() {
                let faces = self.rank(frame, kept);
                tracing::info!(strategy = strategy.name(), faces = faces.len(), "Faces located");
                return Location {
                    method: Some(strategy.name()),
                    faces,
                };
            }
        }

        tracing::info!("No faces located");
        Location::default()
    }

    fn filter_small(&self, frame: &Frame<'_>, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let min_side = frame.shorter_side() as f32 * self.min_face_ratio;
        candidates
            .into_iter()
            .filter(|c| c.bbox.width as f32 >= min_side && c.bbox.height as f32 >= min_side)
            .collect()
    }

    /// Score each face region and order best first.
    fn rank(&self, frame: &Frame<'_>, candidates: Vec<Candidate>) -> Vec<FaceBox> {
        let (width, height) = frame.gray.dimensions();

        let mut scored: Vec<(Candidate, f64)> = candidates
            .into_iter()
            .map(|c| {
                let bbox = c.bbox.clamp_to(width, height);
                let region = image::imageops::crop_imm(frame.gray, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
                let score = quality::score_face_region(&region).score;
                (Candidate { bbox, ..c }, score)
            })
            .collect();

        // Stable, so equal scores keep detector order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .enumerate()
            .map(|(face_id, (c, quality_score))| FaceBox {
                face_id,
                x: c.bbox.x,
                y: c.bbox.y,
                width: c.bbox.width,
                height: c.bbox.height,
                confidence: c.confidence.unwrap_or(self.default_confidence).clamp(0.0, 1.0),
                quality_score,
            })
            .collect()
    }
}
