//! Embedding model registry: target input sizes and tuned match thresholds.

use crate::metric::DistanceMetric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown embedding model: {0}")]
pub struct UnknownModel(pub String);

/// Embedding models the matcher has tuned thresholds for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbeddingModel {
    VggFace,
    OpenFace,
    Facenet,
    DeepFace,
    DeepId,
    Dlib,
    ArcFace,
}

impl EmbeddingModel {
    pub const ALL: [EmbeddingModel; 7] = [
        Self::VggFace,
        Self::OpenFace,
        Self::Facenet,
        Self::DeepFace,
        Self::DeepId,
        Self::Dlib,
        Self::ArcFace,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::VggFace => "VGG-Face",
            Self::OpenFace => "OpenFace",
            Self::Facenet => "Facenet",
            Self::DeepFace => "DeepFace",
            Self::DeepId => "DeepID",
            Self::Dlib => "Dlib",
            Self::ArcFace => "ArcFace",
        }
    }

    /// Face crop size `(width, height)` the model consumes.
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            Self::VggFace => (224, 224),
            Self::OpenFace => (96, 96),
            Self::Facenet => (160, 160),
            Self::DeepFace => (152, 152),
            Self::DeepId => (47, 55),
            Self::Dlib => (150, 150),
            Self::ArcFace => (112, 112),
        }
    }

    /// ONNX file name looked up in the model directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::VggFace => "vgg_face.onnx",
            Self::OpenFace => "openface.onnx",
            Self::Facenet => "facenet.onnx",
            Self::DeepFace => "deepface.onnx",
            Self::DeepId => "deepid.onnx",
            Self::Dlib => "dlib_resnet.onnx",
            Self::ArcFace => "w600k_r50.onnx",
        }
    }

    /// Empirically tuned accept threshold for this model under `metric`.
    ///
    /// A match is accepted when `distance <= threshold`.
    pub fn threshold(&self, metric: DistanceMetric) -> f32 {
        use DistanceMetric::*;
        match (self, metric) {
            (Self::VggFace, Cosine) => 0.40,
            (Self::VggFace, Euclidean) => 0.55,
            (Self::VggFace, EuclideanL2) => 0.75,

            (Self::OpenFace, Cosine) => 0.10,
            (Self::OpenFace, Euclidean) => 0.55,
            (Self::OpenFace, EuclideanL2) => 0.55,

            (Self::Facenet, Cosine) => 0.40,
            (Self::Facenet, Euclidean) => 10.0,
            (Self::Facenet, EuclideanL2) => 0.80,

            (Self::DeepFace, Cosine) => 0.23,
            (Self::DeepFace, Euclidean) => 64.0,
            (Self::DeepFace, EuclideanL2) => 0.64,

            (Self::DeepId, Cosine) => 0.015,
            (Self::DeepId, Euclidean) => 45.0,
            (Self::DeepId, EuclideanL2) => 0.17,

            (Self::Dlib, Cosine) => 0.07,
            (Self::Dlib, Euclidean) => 0.60,
            (Self::Dlib, EuclideanL2) => 0.60,

            (Self::ArcFace, Cosine) => 0.68,
            (Self::ArcFace, Euclidean) => 4.15,
            (Self::ArcFace, EuclideanL2) => 1.13,
        }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EmbeddingModel {
    type Err = UnknownModel;

    /// Case-insensitive; `-` and `_` are ignored ("vgg_face", "VGG-Face").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|m| m.name().replace('-', "").to_ascii_lowercase() == key)
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}
