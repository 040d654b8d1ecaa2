//! facewatch-core — Real-time identity matching and online gallery maintenance.
//!
//! Tracks faces across frames, freezes a stable reference once a face has
//! been seen long enough, matches its embedding against an in-memory
//! gallery, and enrolls faces that stay unrecognized. The SCRFD localizer
//! and the embedding extractor run via ONNX Runtime.

pub mod detector;
pub mod enrollment;
pub mod gallery;
pub mod matcher;
pub mod metric;
pub mod model;
pub mod overlay;
pub mod recognizer;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod types;

pub use detector::{FaceDetector, FaceLocalizer};
pub use enrollment::{EnrollmentConfig, EnrollmentOutcome, EnrollmentRequest, EnrollmentWorkflow};
pub use gallery::{GalleryEntry, GallerySnapshot, GalleryStore};
pub use matcher::{MatchResult, Matcher, NearestMatcher};
pub use metric::DistanceMetric;
pub use model::EmbeddingModel;
pub use recognizer::{EmbeddingExtractor, FaceRecognizer};
pub use session::{FaceReport, FrameReport, Session, SessionConfig};
pub use storage::{DirectoryStore, SampleStore};
pub use tracker::{FreezePolicy, TrackId, TrackState, Tracker, TrackerConfig};
pub use types::{BoundingBox, Embedding};

/// Default directory searched for ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("facewatch/models")
}
