//! UltraFace detection stage (ONNX Runtime). Optional: when the stage is
//! disabled or its model cannot be loaded it finds nothing and the chain
//! moves on.

use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

use super::{nms, BoundingBox, Candidate, FaceStrategy, Frame};

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
const CONFIDENCE_THRESHOLD: f32 = 0.7;
const NMS_THRESHOLD: f32 = 0.3;

/// UltraFace 320x240 face detector.
pub struct UltraFace {
    session: Mutex<Session>,
}

impl UltraFace {
    pub fn from_file(path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(path)?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Detect faces, returning boxes in original image coordinates with the model's score.
    pub fn detect(&self, img: &DynamicImage) -> Result<Vec<(BoundingBox, f32)>> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;

        let (orig_width, orig_height) = img.dimensions();

        let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        // NCHW, normalized to roughly [-1, 1]
        let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
        let mut input_data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let idx = y as usize * INPUT_WIDTH as usize + x as usize;
            for c in 0..3 {
                input_data[c * plane + idx] = (pixel[c] as f32 - 127.0) / 128.0;
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
            input_data.into_boxed_slice(),
        ))?;

        let outputs = session.run(ort::inputs!["input" => input_tensor])?;

        let scores_value = outputs.get("scores").ok_or_else(|| anyhow!("No scores output"))?;
        let boxes_value = outputs.get("boxes").ok_or_else(|| anyhow!("No boxes output"))?;

        let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
        let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

        // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized corners
        let num_anchors = scores_shape[1] as usize;
        let mut face_boxes = Vec::new();

        for i in 0..num_anchors {
            let confidence = scores_data[i * 2 + 1];
            if confidence <= CONFIDENCE_THRESHOLD {
                continue;
            }

            let to_px = |v: f32, max: u32| (v * max as f32).clamp(0.0, max as f32) as u32;
            let x1 = to_px(boxes_data[i * 4], orig_width);
            let y1 = to_px(boxes_data[i * 4 + 1], orig_height);
            let x2 = to_px(boxes_data[i * 4 + 2], orig_width);
            let y2 = to_px(boxes_data[i * 4 + 3], orig_height);

            if x2 > x1 && y2 > y1 {
                face_boxes.push((BoundingBox::new(x1, y1, x2 - x1, y2 - y1), confidence));
            }
        }

        Ok(nms(face_boxes, NMS_THRESHOLD))
    }
}

/// Second stage of the locator.
pub struct DnnStrategy {
    model: Option<UltraFace>,
}

impl DnnStrategy {
    /// A stage that never finds anything.
    pub fn disabled() -> Self {
        Self { model: None }
    }

    pub fn new(model: UltraFace) -> Self {
        Self { model: Some(model) }
    }
}

impl FaceStrategy for DnnStrategy {
    fn name(&self) -> &'static str {
        "dnn"
    }

    fn locate(&self, frame: &Frame<'_>) -> Result<Vec<Candidate>> {
        let Some(model) = &self.model else {
            tracing::debug!("DNN face detection not configured");
            return Ok(Vec::new());
        };

        Ok(model
            .detect(frame.color)?
            .into_iter()
            .map(|(bbox, confidence)| Candidate {
                bbox,
                confidence: Some(confidence.clamp(0.0, 1.0)),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_disabled_stage_finds_nothing() {
        let gray = GrayImage::from_pixel(32, 32, Luma([200]));
        let color = DynamicImage::ImageLuma8(gray.clone());

        let found = DnnStrategy::disabled().locate(&Frame::new(&color, &gray)).unwrap();
        assert!(found.is_empty());
    }
}
