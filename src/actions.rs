//! Dispatch of one CLI request to the processor.

use clap::ValueEnum;

use crate::processor::{FaceProcessor, Requirements};
use crate::response::{Detection, Embeddings, Quality, Response};
use crate::similarity::Comparison;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Locate faces in --img1
    #[value(name = "detect_faces")]
    DetectFaces,
    /// Locate faces in --img1 and compute one embedding per face
    #[value(name = "extract_embeddings")]
    ExtractEmbeddings,
    /// Compare --emb1 with --emb2, or the best faces of --img1 and --img2
    #[value(name = "compare_embeddings")]
    CompareEmbeddings,
    /// Score the overall quality of --img1
    #[value(name = "quality")]
    Quality,
}

/// Everything one invocation was asked to do
#[derive(Debug, Clone)]
pub struct Request {
    pub action: Action,
    pub img1: Option<String>,
    pub img2: Option<String>,
    /// JSON array of numbers
    pub emb1: Option<String>,
    pub emb2: Option<String>,
}

impl Request {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            img1: None,
            img2: None,
            emb1: None,
            emb2: None,
        }
    }

    fn compares_images(&self) -> bool {
        self.emb1.is_none() && self.emb2.is_none() && self.img1.is_some() && self.img2.is_some()
    }

    /// Capabilities that must load before this request can run.
    pub fn requirements(&self) -> Requirements {
        match self.action {
            Action::DetectFaces => Requirements {
                faces: true,
                embeddings: false,
            },
            Action::ExtractEmbeddings => Requirements {
                faces: true,
                embeddings: true,
            },
            Action::CompareEmbeddings if self.compares_images() => Requirements {
                faces: true,
                embeddings: true,
            },
            Action::CompareEmbeddings | Action::Quality => Requirements::default(),
        }
    }
}

fn parse_embedding(name: &str, raw: &str) -> Result<Vec<f32>, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid embedding JSON for {}: {}", name, e))
}

fn missing_image<T: Default>() -> Response<T> {
    Response::failure("--img1 is required for this action")
}

/// Run a request to completion. Never fails: problems become a
/// `success: false` document.
pub fn run(processor: &FaceProcessor, request: &Request) -> serde_json::Value {
    tracing::debug!(action = ?request.action, "Running action");

    match request.action {
        Action::DetectFaces => match &request.img1 {
            Some(img) => processor.detect_faces(img).to_json(),
            None => missing_image::<Detection>().to_json(),
        },
        Action::ExtractEmbeddings => match &request.img1 {
            Some(img) => processor.extract_embeddings(img).to_json(),
            None => missing_image::<Embeddings>().to_json(),
        },
        Action::Quality => match &request.img1 {
            Some(img) => processor.assess_quality(img).to_json(),
            None => missing_image::<Quality>().to_json(),
        },
        Action::CompareEmbeddings => compare(processor, request).to_json(),
    }
}

fn compare(processor: &FaceProcessor, request: &Request) -> Response<Comparison> {
    if request.compares_images() {
        if let (Some(first), Some(second)) = (&request.img1, &request.img2) {
            return processor.compare_images(first, second);
        }
    }

    let (Some(raw1), Some(raw2)) = (&request.emb1, &request.emb2) else {
        return Response::failure("Two embeddings required for comparison");
    };

    let parsed = parse_embedding("--emb1", raw1).and_then(|a| Ok((a, parse_embedding("--emb2", raw2)?)));
    match parsed {
        Ok((a, b)) => processor.compare_embeddings(&a, &b),
        Err(e) => Response::failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn compare_request(emb1: Option<&str>, emb2: Option<&str>) -> Request {
        Request {
            emb1: emb1.map(String::from),
            emb2: emb2.map(String::from),
            ..Request::new(Action::CompareEmbeddings)
        }
    }

    fn processor() -> FaceProcessor {
        FaceProcessor::new(Config::default())
    }

    #[test]
    fn test_requirements() {
        assert_eq!(Request::new(Action::Quality).requirements(), Requirements::default());
        assert!(Request::new(Action::DetectFaces).requirements().faces);
        assert!(Request::new(Action::ExtractEmbeddings).requirements().embeddings);
        assert_eq!(
            compare_request(Some("[1]"), Some("[1]")).requirements(),
            Requirements::default()
        );

        let images = Request {
            img1: Some("a.jpg".into()),
            img2: Some("b.jpg".into()),
            ..Request::new(Action::CompareEmbeddings)
        };
        assert!(images.requirements().faces && images.requirements().embeddings);
    }

    #[test]
    fn test_compare_identical() {
        let json = run(&processor(), &compare_request(Some("[0.1, 0.5, -0.3]"), Some("[0.1, 0.5, -0.3]")));
        assert_eq!(json["success"], true);
        assert!((json["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-6);
        assert!(json["distance"].as_f64().unwrap().abs() < 1e-6);
        assert!(json["metrics"]["cosine"].is_number());
        assert!(json["confidence"].is_number());
    }

    #[test]
    fn test_compare_different_lengths() {
        let request = compare_request(
            Some("[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]"),
            Some("[1, 2, 3, 4, 5, 7]"),
        );
        let first = run(&processor(), &request);
        let second = run(&processor(), &request);

        assert_eq!(first["success"], true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_compare_requires_both_embeddings() {
        let json = run(&processor(), &compare_request(Some("[1, 2]"), None));
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Two embeddings required for comparison");
        assert_eq!(json["similarity"], 0.0);
        assert_eq!(json["distance"], 1.0);
    }

    #[test]
    fn test_compare_bad_json() {
        let json = run(&processor(), &compare_request(Some("[1, 2"), Some("[1, 2]")));
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("--emb1"));
    }

    #[test]
    fn test_compare_empty_embedding() {
        let json = run(&processor(), &compare_request(Some("[]"), Some("[1, 2]")));
        assert_eq!(json["success"], false);
        assert_eq!(json["distance"], 1.0);
    }

    #[test]
    fn test_image_actions_need_img1() {
        for action in [Action::DetectFaces, Action::ExtractEmbeddings, Action::Quality] {
            let json = run(&processor(), &Request::new(action));
            assert_eq!(json["success"], false);
            assert!(json["error"].as_str().unwrap().contains("--img1"));
        }
    }

    #[test]
    fn test_quality_of_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request {
            img1: Some(dir.path().join("nope.png").to_string_lossy().into_owned()),
            ..Request::new(Action::Quality)
        };

        let json = run(&processor(), &request);
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().starts_with("File not found:"));
        assert_eq!(json["quality_score"], 0.0);
    }
}
