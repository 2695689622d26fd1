//! Embedding comparison: cosine, Euclidean and Pearson similarity, blended.

use serde::Serialize;

use crate::config::{ComparisonConfig, ComparisonMode};

const COSINE_WEIGHT: f64 = 0.6;
const EUCLIDEAN_WEIGHT: f64 = 0.25;
const PEARSON_WEIGHT: f64 = 0.15;

/// Cosine similarity mapped from [-1, 1] to [0, 1]. Zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum();
    let norm_a: f64 = a.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    ((dot / (norm_a * norm_b) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// `1 - min(|a - b| / sqrt(2), 1)`
pub fn euclidean_similarity(a: &[f32], b: &[f32]) -> f64 {
    let distance = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
        .sum::<f64>()
        .sqrt();

    1.0 - (distance / std::f64::consts::SQRT_2).min(1.0)
}

/// Pearson correlation, `None` when undefined (fewer than two values or no variance).
pub fn pearson_correlation(a: &[f32], b: &[f32]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n <= 1 {
        return None;
    }

    let mean_a = a[..n].iter().map(|&x| x as f64).sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().map(|&x| x as f64).sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a[..n].iter().zip(&b[..n]) {
        let dx = x as f64 - mean_a;
        let dy = y as f64 - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let r = cov / (var_a * var_b).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// `(r + 1) / 2`, or 0 when the correlation is undefined.
pub fn pearson_similarity(a: &[f32], b: &[f32]) -> f64 {
    pearson_correlation(a, b).map_or(0.0, |r| (r + 1.0) / 2.0)
}

/// The three component similarities, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Components {
    pub cosine: f64,
    pub euclidean: f64,
    pub pearson: f64,
}

impl Components {
    pub fn of(a: &[f32], b: &[f32]) -> Self {
        Self {
            cosine: cosine_similarity(a, b),
            euclidean: euclidean_similarity(a, b),
            pearson: pearson_similarity(a, b),
        }
    }

    pub fn weighted(&self) -> f64 {
        COSINE_WEIGHT * self.cosine + EUCLIDEAN_WEIGHT * self.euclidean + PEARSON_WEIGHT * self.pearson
    }

    /// How much the components agree: 1 when identical, lower as they spread.
    pub fn confidence(&self) -> f64 {
        let values = [self.cosine, self.euclidean, self.pearson];
        let mean = values.iter().sum::<f64>() / 3.0;
        let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0).sqrt();
        (1.0 - std_dev / (mean + 1e-6)).clamp(0.0, 1.0)
    }

    /// The weighted similarity, or 0.0 below `threshold`.
    pub fn gated(&self, threshold: f64) -> f64 {
        let weighted = self.weighted();
        if weighted >= threshold {
            weighted
        } else {
            0.0
        }
    }
}

/// Component scores plus the blend, as reported
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub cosine: f64,
    pub euclidean: f64,
    pub pearson: f64,
    pub weighted: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub similarity: f64,
    pub distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl Comparison {
    /// The failure value: no similarity, maximum distance.
    pub fn invalid() -> Self {
        Self {
            similarity: 0.0,
            distance: 1.0,
            confidence: None,
            metrics: None,
        }
    }

    fn from_similarity(similarity: f64) -> Self {
        Self {
            similarity,
            distance: 1.0 - similarity,
            confidence: None,
            metrics: None,
        }
    }

    /// Replace anything non-finite or out of range with the failure value.
    fn sanitized(self) -> Self {
        let finite = self.similarity.is_finite()
            && self.confidence.map_or(true, f64::is_finite)
            && self.metrics.map_or(true, |m| {
                [m.cosine, m.euclidean, m.pearson, m.weighted].iter().all(|v| v.is_finite())
            });

        if !finite {
            return Self::invalid();
        }

        let similarity = self.similarity.clamp(0.0, 1.0);
        Self {
            similarity,
            distance: 1.0 - similarity,
            ..self
        }
    }
}

impl Default for Comparison {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Compare two embeddings of possibly different length.
///
/// Returns `None` if either is empty. Otherwise both are truncated to the
/// shorter length before scoring.
pub fn compare(a: &[f32], b: &[f32], config: &ComparisonConfig) -> Option<Comparison> {
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let n = a.len().min(b.len());
    if a.len() != b.len() {
        tracing::debug!(left = a.len(), right = b.len(), compared = n, "Truncating embeddings to common length");
    }
    let (a, b) = (&a[..n], &b[..n]);

    let comparison = match config.mode {
        ComparisonMode::Cosine => Comparison::from_similarity(cosine_similarity(a, b)),
        ComparisonMode::Enhanced => {
            let components = Components::of(a, b);
            Comparison {
                confidence: Some(components.confidence()),
                metrics: Some(Metrics {
                    cosine: components.cosine,
                    euclidean: components.euclidean,
                    pearson: components.pearson,
                    weighted: components.weighted(),
                }),
                ..Comparison::from_similarity(components.gated(config.threshold as f64))
            }
        }
    };

    Some(comparison.sanitized())
}
