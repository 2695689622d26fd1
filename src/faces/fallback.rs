//! Last-resort detection stages used when no detector model finds a face:
//! elliptical template matching, then a central-variance check.

use anyhow::Result;
use image::imageops::FilterType;
use image::GrayImage;
use std::borrow::Cow;

use super::{nms_top, BoundingBox, Candidate, FaceStrategy, Frame};

/// Overlap above which a weaker template match is treated as the same face.
const TEMPLATE_NMS_THRESHOLD: f32 = 0.3;

/// Larger frames are matched on a copy with this shorter side.
const TEMPLATE_WORKING_SIDE: u32 = 320;

/// A filled ellipse on a black square, stored as one horizontal span per row.
#[derive(Debug, Clone)]
pub struct EllipseTemplate {
    size: u32,
    /// Inclusive `[start, end]` columns lit on each row
    spans: Vec<Option<(u32, u32)>>,
    lit: u64,
}

impl EllipseTemplate {
    /// An upright ellipse centred in a `size` x `size` square with semi-axes
    /// `size / 3` (horizontal) and `size / 2` (vertical).
    pub fn new(size: u32) -> Self {
        let center = (size / 2) as f64;
        let a = (size / 3) as f64;
        let b = (size / 2) as f64;

        let spans: Vec<Option<(u32, u32)>> = (0..size)
            .map(|y| {
                if a <= 0.0 || b <= 0.0 {
                    return None;
                }
                let dy = (y as f64 - center) / b;
                if dy.abs() > 1.0 {
                    return None;
                }
                let half = a * (1.0 - dy * dy).sqrt();
                let start = (center - half).round().max(0.0) as u32;
                let end = ((center + half).round() as u32).min(size - 1);
                Some((start, end))
            })
            .collect();

        let lit = spans
            .iter()
            .flatten()
            .map(|(start, end)| (end - start + 1) as u64)
            .sum();

        Self { size, spans, lit }
    }

    pub fn is_lit(&self, x: u32, y: u32) -> bool {
        matches!(self.spans.get(y as usize), Some(Some((start, end))) if (*start..=*end).contains(&x))
    }
}

/// Per-row prefix sums plus a summed-area table of squares, so that window
/// and span sums are O(1).
struct Sums {
    width: usize,
    /// `row[y * (width + 1) + x]` = sum of pixels `0..x` on row `y`
    row: Vec<u64>,
    /// Summed-area tables with one row/column of padding
    area: Vec<u64>,
    area_sq: Vec<u64>,
}

impl Sums {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut row = vec![0u64; h * stride];
        let mut area = vec![0u64; (h + 1) * stride];
        let mut area_sq = vec![0u64; (h + 1) * stride];

        for y in 0..h {
            let mut acc = 0u64;
            let mut acc_sq = 0u64;
            for x in 0..w {
                let v = gray.get_pixel(x as u32, y as u32)[0] as u64;
                acc += v;
                acc_sq += v * v;
                row[y * stride + x + 1] = acc;
                area[(y + 1) * stride + x + 1] = area[y * stride + x + 1] + acc;
                area_sq[(y + 1) * stride + x + 1] = area_sq[y * stride + x + 1] + acc_sq;
            }
        }

        Self {
            width: w,
            row,
            area,
            area_sq,
        }
    }

    fn window(table: &[u64], stride: usize, x: usize, y: usize, size: usize) -> u64 {
        table[(y + size) * stride + x + size] + table[y * stride + x]
            - table[y * stride + x + size]
            - table[(y + size) * stride + x]
    }

    fn span(&self, y: usize, start: usize, end_inclusive: usize) -> u64 {
        let stride = self.width + 1;
        self.row[y * stride + end_inclusive + 1] - self.row[y * stride + start]
    }
}

/// Normalized correlation-coefficient score of `template` at every offset of
/// `gray`, row-major, `(w - size + 1) x (h - size + 1)`. Flat windows score 0.
pub fn match_template(gray: &GrayImage, template: &EllipseTemplate) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let size = template.size as usize;
    if size == 0 || size > w || size > h {
        return Vec::new();
    }

    let sums = Sums::new(gray);
    let stride = w + 1;
    let n = (size * size) as f64;
    let lit_fraction = template.lit as f64 / n;
    // Variance term of a 0/255 template with `lit` bright pixels
    let template_energy = 255.0 * 255.0 * n * lit_fraction * (1.0 - lit_fraction);

    let out_w = w - size + 1;
    let out_h = h - size + 1;
    let mut scores = vec![0.0f32; out_w * out_h];

    if template_energy <= 0.0 {
        return scores;
    }

    for oy in 0..out_h {
        for ox in 0..out_w {
            let sum = Sums::window(&sums.area, stride, ox, oy, size) as f64;
            let sum_sq = Sums::window(&sums.area_sq, stride, ox, oy, size) as f64;
            let image_energy = sum_sq - sum * sum / n;
            if image_energy <= f64::EPSILON {
                continue;
            }

            let lit_sum: u64 = template
                .spans
                .iter()
                .enumerate()
                .filter_map(|(ty, span)| span.map(|(start, end)| (ty, start, end)))
                .map(|(ty, start, end)| sums.span(oy + ty, ox + start as usize, ox + end as usize))
                .sum();

            let numerator = 255.0 * (lit_sum as f64 - lit_fraction * sum);
            let score = numerator / (template_energy * image_energy).sqrt();
            if score.is_finite() {
                scores[oy * out_w + ox] = score as f32;
            }
        }
    }

    scores
}

/// Third stage: correlate an oval face template against the image.
pub struct TemplateStrategy {
    threshold: f32,
    max_matches: usize,
}

impl TemplateStrategy {
    pub fn new(threshold: f32, max_matches: usize) -> Self {
        Self { threshold, max_matches }
    }
}

impl FaceStrategy for TemplateStrategy {
    fn name(&self) -> &'static str {
        "template"
    }

    fn locate(&self, frame: &Frame<'_>) -> Result<Vec<Candidate>> {
        let (width, height) = frame.gray.dimensions();
        let (work, scale) = working_copy(frame.gray);

        let size = work.width().min(work.height()) / 8;
        if size < 3 {
            tracing::debug!(size, "Image too small for template matching");
            return Ok(Vec::new());
        }

        let template = EllipseTemplate::new(size);
        let scores = match_template(&work, &template);
        let out_w = (work.width() - size + 1) as usize;

        let hits: Vec<(BoundingBox, f32)> = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| **score >= self.threshold)
            .map(|(i, score)| {
                let x = (i % out_w) as u32;
                let y = (i / out_w) as u32;
                (BoundingBox::new(x, y, size, size), *score)
            })
            .collect();

        tracing::debug!(matches = hits.len(), scale, "Template matching candidates");

        let to_frame = |v: u32| (v as f32 * scale).round() as u32;
        Ok(nms_top(hits, TEMPLATE_NMS_THRESHOLD, self.max_matches)
            .into_iter()
            .map(|(bbox, _)| {
                let scaled = BoundingBox::new(to_frame(bbox.x), to_frame(bbox.y), to_frame(size), to_frame(size));
                Candidate::new(scaled.clamp_to(width, height))
            })
            .collect())
    }
}

/// Downscale `gray` so its shorter side is at most [`TEMPLATE_WORKING_SIDE`],
/// returning the copy and the factor that maps its coordinates back.
fn working_copy(gray: &GrayImage) -> (Cow<'_, GrayImage>, f32) {
    let (w, h) = gray.dimensions();
    let shorter = w.min(h);
    if shorter <= TEMPLATE_WORKING_SIDE {
        return (Cow::Borrowed(gray), 1.0);
    }

    let scale = shorter as f32 / TEMPLATE_WORKING_SIDE as f32;
    let work_w = ((w as f32 / scale).round() as u32).max(1);
    let work_h = ((h as f32 / scale).round() as u32).max(1);
    let resized = image::imageops::resize(gray, work_w, work_h, FilterType::Triangle);
    (Cow::Owned(resized), scale)
}

/// Last stage: assume a face in the middle if that region has some texture.
pub struct StatisticalStrategy {
    min_variance: f64,
}

impl StatisticalStrategy {
    pub fn new(min_variance: f64) -> Self {
        Self { min_variance }
    }
}

impl FaceStrategy for StatisticalStrategy {
    fn name(&self) -> &'static str {
        "statistical"
    }

    fn locate(&self, frame: &Frame<'_>) -> Result<Vec<Candidate>> {
        let (w, h) = frame.gray.dimensions();
        let side = frame.shorter_side() / 4;
        if side == 0 {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(w / 2 - side / 2, h / 2 - side / 2, side, side);
        let roi = image::imageops::crop_imm(frame.gray, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
        let variance = crate::quality::pixel_variance(&roi);

        if variance > self.min_variance {
            tracing::debug!(variance, "Statistical analysis found potential face at center");
            Ok(vec![Candidate::new(bbox)])
        } else {
            tracing::debug!(variance, "Statistical analysis found no faces");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Luma};

    fn locate(strategy: &dyn FaceStrategy, gray: &GrayImage) -> Vec<Candidate> {
        let color = DynamicImage::ImageLuma8(gray.clone());
        strategy.locate(&Frame::new(&color, gray)).unwrap()
    }

    /// Black canvas with the template's own ellipse painted at (`x`, `y`).
    fn canvas_with_ellipse(w: u32, h: u32, size: u32, x: u32, y: u32) -> GrayImage {
        let template = EllipseTemplate::new(size);
        GrayImage::from_fn(w, h, |px, py| {
            if px >= x && py >= y && px < x + size && py < y + size && template.is_lit(px - x, py - y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_ellipse_shape() {
        let t = EllipseTemplate::new(24);
        // Tall and narrow: lit at the centre column top to bottom, not at the sides
        assert!(t.is_lit(12, 1));
        assert!(t.is_lit(12, 22));
        assert!(t.is_lit(12, 12));
        assert!(!t.is_lit(2, 12));
        assert!(!t.is_lit(22, 12));
        assert!(!t.is_lit(0, 0));
    }

    #[test]
    fn test_perfect_match_scores_one() {
        let size = 16;
        let gray = canvas_with_ellipse(64, 64, size, 20, 30);
        let scores = match_template(&gray, &EllipseTemplate::new(size));

        let out_w = 64 - size as usize + 1;
        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!((best.0 % out_w, best.0 / out_w), (20, 30));
        assert!((best.1 - 1.0).abs() < 1e-4);
        assert!(scores.iter().all(|s| (-1.0001..=1.0001).contains(s)));
    }

    #[test]
    fn test_template_strategy_finds_the_ellipse() {
        // 128 wide -> template of 16
        let gray = canvas_with_ellipse(128, 128, 16, 56, 40);
        let found = locate(&TemplateStrategy::new(0.3, 5), &gray);

        assert!(!found.is_empty() && found.len() <= 5);
        assert_eq!(found[0].bbox, BoundingBox::new(56, 40, 16, 16));
        assert_eq!(found[0].confidence, None);
    }

    #[test]
    fn test_large_frame_is_matched_downscaled() {
        // Shorter side 960 -> matched at 427x320, boxes mapped back by 3x
        let gray = canvas_with_ellipse(1280, 960, 120, 600, 400);
        let found = locate(&TemplateStrategy::new(0.3, 5), &gray);

        assert!(!found.is_empty());
        let bbox = found[0].bbox;
        assert!(bbox.x.abs_diff(600) <= 6, "x = {}", bbox.x);
        assert!(bbox.y.abs_diff(400) <= 6, "y = {}", bbox.y);
        assert_eq!((bbox.width, bbox.height), (120, 120));
    }

    #[test]
    fn test_working_copy_only_shrinks_large_frames() {
        let small = GrayImage::from_pixel(300, 200, Luma([0]));
        let (work, scale) = working_copy(&small);
        assert!(matches!(work, Cow::Borrowed(_)));
        assert_eq!(scale, 1.0);

        let large = GrayImage::from_pixel(1280, 960, Luma([0]));
        let (work, scale) = working_copy(&large);
        assert_eq!(work.dimensions(), (427, 320));
        assert!((scale - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_template_strategy_flat_image() {
        let gray = GrayImage::from_pixel(128, 128, Luma([90]));
        assert!(locate(&TemplateStrategy::new(0.3, 5), &gray).is_empty());
    }

    #[test]
    fn test_template_strategy_tiny_image() {
        let gray = GrayImage::from_pixel(16, 16, Luma([90]));
        assert!(locate(&TemplateStrategy::new(0.3, 5), &gray).is_empty());
    }

    #[test]
    fn test_statistical_textured_center() {
        let gray = GrayImage::from_fn(200, 100, |x, y| if (x + y) % 2 == 0 { Luma([200]) } else { Luma([20]) });
        let found = locate(&StatisticalStrategy::new(100.0), &gray);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, BoundingBox::new(88, 38, 25, 25));
    }

    #[test]
    fn test_statistical_flat_center() {
        let gray = GrayImage::from_pixel(200, 100, Luma([128]));
        assert!(locate(&StatisticalStrategy::new(100.0), &gray).is_empty());
    }
}
