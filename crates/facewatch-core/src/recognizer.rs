//! Embedding extraction: the [`EmbeddingExtractor`] seam and an ONNX
//! implementation for any of the registered [`EmbeddingModel`]s.

use crate::model::EmbeddingModel;
use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face crop is {actual:?}, model expects {expected:?}")]
    InputSizeMismatch { expected: (u32, u32), actual: (u32, u32) },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns a face crop of a fixed size into an embedding.
pub trait EmbeddingExtractor {
    /// Crop size `(width, height)` this extractor consumes.
    fn input_size(&self) -> (u32, u32);

    fn embed(&mut self, face: &GrayImage) -> Result<Embedding, RecognizerError>;
}

/// Cut `bbox` out of `frame` and resize it to `target`.
///
/// Returns `None` if the box lies entirely outside the frame.
pub fn prepare_face(
    frame: &GrayImage,
    bbox: &BoundingBox,
    target: (u32, u32),
) -> Option<GrayImage> {
    let (x, y, w, h) = bbox.clip_to(frame.width(), frame.height())?;
    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    Some(imageops::resize(&crop, target.0, target.1, FilterType::Triangle))
}

/// ONNX embedding model over grayscale face crops.
pub struct FaceRecognizer {
    session: Session,
    model: EmbeddingModel,
}

impl FaceRecognizer {
    /// Load the ONNX file for `model` from the given path.
    pub fn load(model_path: &Path, model: EmbeddingModel) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %model,
            input = ?model.input_size(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session, model })
    }

    pub fn model(&self) -> EmbeddingModel {
        self.model
    }

    /// NCHW float tensor; the gray channel is replicated into RGB.
    fn preprocess(face: &GrayImage) -> Array4<f32> {
        let (w, h) = (face.width() as usize, face.height() as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
        for (x, y, pixel) in face.enumerate_pixels() {
            let normalized = (pixel.0[0] as f32 - INPUT_MEAN) / INPUT_STD;
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = normalized;
            }
        }
        tensor
    }
}

impl EmbeddingExtractor for FaceRecognizer {
    fn input_size(&self) -> (u32, u32) {
        self.model.input_size()
    }

    fn embed(&mut self, face: &GrayImage) -> Result<Embedding, RecognizerError> {
        let expected = self.model.input_size();
        if face.dimensions() != expected {
            return Err(RecognizerError::InputSizeMismatch {
                expected,
                actual: face.dimensions(),
            });
        }

        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(RecognizerError::InferenceFailed("empty embedding output".into()));
        }

        Ok(Embedding {
            values: raw.to_vec(),
            model_version: Some(self.model.name().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_preprocess_output_shape() {
        let face = GrayImage::from_pixel(47, 55, Luma([128]));
        let tensor = FaceRecognizer::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 55, 47]);
    }

    #[test]
    fn test_preprocess_normalization_and_channels() {
        let face = GrayImage::from_pixel(4, 4, Luma([255]));
        let tensor = FaceRecognizer::preprocess(&face);
        let expected = (255.0 - INPUT_MEAN) / INPUT_STD;
        for c in 0..3 {
            assert!((tensor[[0, c, 2, 1]] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_prepare_face_resizes_to_target() {
        let frame = GrayImage::from_pixel(640, 480, Luma([90]));
        let bbox = BoundingBox::new(100.0, 80.0, 200.0, 240.0);
        let face = prepare_face(&frame, &bbox, (96, 96)).unwrap();
        assert_eq!(face.dimensions(), (96, 96));
        assert_eq!(face.get_pixel(10, 10).0[0], 90);
    }

    #[test]
    fn test_prepare_face_clips_partial_box() {
        let frame = GrayImage::new(100, 100);
        let bbox = BoundingBox::new(80.0, 80.0, 50.0, 50.0);
        assert_eq!(prepare_face(&frame, &bbox, (47, 55)).unwrap().dimensions(), (47, 55));
    }

    #[test]
    fn test_prepare_face_outside_frame() {
        let frame = GrayImage::new(100, 100);
        let bbox = BoundingBox::new(150.0, 0.0, 50.0, 50.0);
        assert!(prepare_face(&frame, &bbox, (96, 96)).is_none());
    }
}
