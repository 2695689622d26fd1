//! Brightness, contrast and sharpness scoring for whole images and face regions.

use image::GrayImage;
use serde::Serialize;

/// Reference resolution for a full resolution score.
const FULL_HD_PIXELS: f64 = 1920.0 * 1080.0;

/// Raw grayscale statistics of a region.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelStats {
    pub mean: f64,
    pub std_dev: f64,
    pub laplacian_variance: f64,
}

impl PixelStats {
    /// Compute statistics over every pixel. Returns `None` for empty regions
    /// or when any statistic is not finite.
    pub fn of(gray: &GrayImage) -> Option<Self> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let n = (width as f64) * (height as f64);
        let (sum, sum_sq) = gray.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
            let v = p[0] as f64;
            (s + v, sq + v * v)
        });
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);

        let stats = Self {
            mean,
            std_dev: variance.sqrt(),
            laplacian_variance: laplacian_variance(gray),
        };

        if stats.mean.is_finite() && stats.std_dev.is_finite() && stats.laplacian_variance.is_finite() {
            Some(stats)
        } else {
            None
        }
    }
}

/// Population variance of the pixel values.
pub fn pixel_variance(gray: &GrayImage) -> f64 {
    PixelStats::of(gray).map(|s| s.std_dev * s.std_dev).unwrap_or(0.0)
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge pixel.
fn reflect_101(i: i64, n: i64) -> u32 {
    if n == 1 {
        return 0;
    }
    let i = if i < 0 { -i } else { i };
    let i = if i >= n { 2 * (n - 1) - i } else { i };
    i as u32
}

/// Variance of the 4-neighbour Laplacian response `[0,1,0; 1,-4,1; 0,1,0]`
/// over all pixels, with reflected borders.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }

    let (w, h) = (width as i64, height as i64);
    let at = |x: i64, y: i64| gray.get_pixel(reflect_101(x, w), reflect_101(y, h))[0] as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let response = at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += response;
            sum_sq += response * response;
        }
    }

    let n = (w * h) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Whole-image metrics on a 0-100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ImageQualityMetrics {
    pub brightness: f64,
    pub contrast: f64,
    pub sharpness: f64,
    pub resolution: f64,
    pub width: u32,
    pub height: u32,
}

/// Whole-image assessment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ImageQuality {
    pub quality_score: f64,
    pub metrics: ImageQualityMetrics,
}

/// Score a whole image: the mean of brightness, contrast, sharpness and
/// resolution, each on 0-100, rounded to two decimals.
pub fn assess_image(gray: &GrayImage) -> ImageQuality {
    let (width, height) = gray.dimensions();
    let Some(stats) = PixelStats::of(gray) else {
        tracing::warn!(width, height, "Quality assessment on an empty or degenerate image");
        return ImageQuality::default();
    };

    let brightness = (stats.mean / 255.0 * 100.0).clamp(0.0, 100.0);
    let contrast = (stats.std_dev / 128.0 * 100.0).clamp(0.0, 100.0);
    let sharpness = (stats.laplacian_variance / 1000.0 * 100.0).clamp(0.0, 100.0);
    let resolution = ((width as f64 * height as f64) / FULL_HD_PIXELS * 100.0).clamp(0.0, 100.0);

    let quality_score = 0.25 * brightness + 0.25 * contrast + 0.25 * sharpness + 0.25 * resolution;

    ImageQuality {
        quality_score: finite_or_zero(round2(quality_score)),
        metrics: ImageQualityMetrics {
            brightness: finite_or_zero(round2(brightness)),
            contrast: finite_or_zero(round2(contrast)),
            sharpness: finite_or_zero(round2(sharpness)),
            resolution: finite_or_zero(round2(resolution)),
            width,
            height,
        },
    }
}

/// Face-region metrics normalized to 0-1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FaceQuality {
    pub brightness: f64,
    pub contrast: f64,
    pub sharpness: f64,
    pub score: f64,
}

/// Score a face crop for ranking. Sharpness and contrast carry the score;
/// poor exposure and blur each halve it.
pub fn score_face_region(region: &GrayImage) -> FaceQuality {
    let Some(stats) = PixelStats::of(region) else {
        return FaceQuality::default();
    };

    let sharpness = (stats.laplacian_variance / 100.0).min(1.0);
    let brightness = (stats.mean / 255.0).clamp(0.0, 1.0);
    let contrast = (stats.std_dev / 128.0).min(1.0);

    let mut score = 0.4 * sharpness + 0.3 * contrast;
    if !(0.2..=0.8).contains(&brightness) {
        score *= 0.5;
    }
    if sharpness < 0.2 {
        score *= 0.5;
    }

    FaceQuality {
        brightness,
        contrast,
        sharpness,
        score: finite_or_zero(score).clamp(0.0, 1.0),
    }
}
