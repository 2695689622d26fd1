//! The JSON documents written to stdout.

use serde::Serialize;

use crate::faces::{EmbeddingEntry, FaceBox};
use crate::quality::ImageQualityMetrics;

/// Envelope shared by every action. On failure the payload holds its
/// zeroed defaults so callers always find the fields they expect.
#[derive(Debug, Clone, Serialize)]
pub struct Response<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: T,
}

impl<T: Default> Response<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            error: None,
            payload,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        tracing::warn!(error = %error, "Request failed");
        Self {
            success: false,
            error: Some(error),
            payload: T::default(),
        }
    }
}

impl<T: Serialize> Response<T> {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "error": format!("Failed to serialize response: {}", e) })
        })
    }
}

/// `detect_faces` payload
#[derive(Debug, Clone, Default, Serialize)]
pub struct Detection {
    pub face_count: usize,
    pub faces: Vec<FaceBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
}

/// `extract_embeddings` payload
#[derive(Debug, Clone, Default, Serialize)]
pub struct Embeddings {
    pub face_count: usize,
    pub embeddings: Vec<EmbeddingEntry>,
    pub rejected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
}

/// `quality` payload
#[derive(Debug, Clone, Default, Serialize)]
pub struct Quality {
    pub quality_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ImageQualityMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::Comparison;

    #[test]
    fn test_failure_carries_zeroed_payload() {
        let json = Response::<Detection>::failure("File not found: /x.jpg").to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "File not found: /x.jpg");
        assert_eq!(json["face_count"], 0);
        assert_eq!(json["faces"], serde_json::json!([]));
        assert!(json.get("method").is_none());
    }

    #[test]
    fn test_comparison_failure_defaults() {
        let json = Response::<Comparison>::failure("Two embeddings required for comparison").to_json();
        assert_eq!(json["similarity"], 0.0);
        assert_eq!(json["distance"], 1.0);
        assert!(json.get("confidence").is_none());
    }

    #[test]
    fn test_success_has_no_error_field() {
        let json = Response::ok(Quality {
            quality_score: 42.5,
            metrics: None,
        })
        .to_json();
        assert_eq!(json["success"], true);
        assert_eq!(json["quality_score"], 42.5);
        assert!(json.get("error").is_none());
    }
}
