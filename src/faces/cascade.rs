//! Cascade detection stage, backed by the SeetaFace engine from `rustface`.

use anyhow::Result;
use image::GrayImage;
use std::path::Path;

use super::{BoundingBox, Candidate, FaceStrategy, Frame};

/// One detection attempt: how finely to scan, how strict to be, and the
/// smallest face to look for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    pub scale_factor: f32,
    pub min_neighbors: u32,
    pub min_size: u32,
}

impl CascadeParams {
    const fn new(scale_factor: f32, min_neighbors: u32, min_size: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size,
        }
    }
}

/// Tried in order until one finds something.
pub const PARAMETER_SETS: [CascadeParams; 4] = [
    // Standard
    CascadeParams::new(1.1, 5, 30),
    // More sensitive
    CascadeParams::new(1.05, 3, 20),
    // Large faces
    CascadeParams::new(1.2, 8, 50),
    // Very small faces
    CascadeParams::new(1.03, 2, 15),
];

/// A cascade classifier that can be run with a given parameter tuple.
pub trait CascadeDetector {
    fn detect(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<BoundingBox>;
}

/// SeetaFace frontal face cascade.
pub struct SeetaCascade {
    model: rustface::Model,
}

impl SeetaCascade {
    /// The engine refuses windows smaller than this.
    pub const MIN_FACE_SIZE: u32 = 20;

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let model = rustface::read_model(std::io::BufReader::new(file))?;
        tracing::debug!(path = %path.display(), "Loaded face cascade");
        Ok(Self { model })
    }
}

impl CascadeDetector for SeetaCascade {
    fn detect(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<BoundingBox> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(params.min_size.max(Self::MIN_FACE_SIZE));
        // SeetaFace's default threshold of 2.0 corresponds to the standard five neighbours.
        detector.set_score_thresh(0.4 * params.min_neighbors as f64);
        detector.set_pyramid_scale_factor(1.0 / params.scale_factor);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let x = bbox.x().max(0) as u32;
                let y = bbox.y().max(0) as u32;
                let clipped = BoundingBox::new(x, y, bbox.width(), bbox.height()).clamp_to(width, height);
                (clipped.width > 0 && clipped.height > 0).then_some(clipped)
            })
            .collect()
    }
}

/// First stage of the locator: run the cascade with each parameter set in turn.
pub struct CascadeStrategy {
    detector: Box<dyn CascadeDetector>,
}

impl CascadeStrategy {
    pub fn new(detector: Box<dyn CascadeDetector>) -> Self {
        Self { detector }
    }
}

impl FaceStrategy for CascadeStrategy {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn locate(&self, frame: &Frame<'_>) -> Result<Vec<Candidate>> {
        for (i, params) in PARAMETER_SETS.iter().enumerate() {
            let boxes = self.detector.detect(frame.gray, params);
            tracing::debug!(set = i + 1, ?params, faces = boxes.len(), "Cascade parameter set");

            if !boxes.is_empty() {
                tracing::debug!(set = i + 1, faces = boxes.len(), "Using cascade parameter set");
                return Ok(boxes.into_iter().map(Candidate::new).collect());
            }
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Luma};
    use std::cell::RefCell;

    /// Answers only for one parameter set and records what it was asked.
    struct Scripted {
        hit_on: Option<usize>,
        calls: RefCell<Vec<CascadeParams>>,
    }

    impl CascadeDetector for Scripted {
        fn detect(&self, _gray: &GrayImage, params: &CascadeParams) -> Vec<BoundingBox> {
            self.calls.borrow_mut().push(*params);
            match self.hit_on {
                Some(i) if PARAMETER_SETS[i] == *params => vec![BoundingBox::new(1, 2, 30, 30)],
                _ => Vec::new(),
            }
        }
    }

    impl CascadeDetector for std::rc::Rc<Scripted> {
        fn detect(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<BoundingBox> {
            self.as_ref().detect(gray, params)
        }
    }

    fn run(hit_on: Option<usize>) -> (Vec<Candidate>, Vec<CascadeParams>) {
        let scripted = std::rc::Rc::new(Scripted {
            hit_on,
            calls: RefCell::new(Vec::new()),
        });
        let strategy = CascadeStrategy::new(Box::new(scripted.clone()));

        let gray = GrayImage::from_pixel(64, 64, Luma([0]));
        let color = DynamicImage::ImageLuma8(gray.clone());
        let found = strategy.locate(&Frame::new(&color, &gray)).unwrap();
        let calls = scripted.calls.borrow().clone();
        (found, calls)
    }

    #[test]
    fn test_stops_at_first_productive_set() {
        let (found, calls) = run(Some(1));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, None);
        assert_eq!(calls, PARAMETER_SETS[..2].to_vec());
    }

    #[test]
    fn test_tries_every_set_before_giving_up() {
        let (found, calls) = run(None);
        assert!(found.is_empty());
        assert_eq!(calls, PARAMETER_SETS.to_vec());
    }

    #[test]
    fn test_missing_model_file() {
        assert!(SeetaCascade::from_file(Path::new("/nonexistent/seeta.bin")).is_err());
    }
}
