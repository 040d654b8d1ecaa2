//! Distance metrics between embeddings.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown distance metric: {0} (expected cosine, euclidean or euclidean_l2)")]
pub struct UnknownMetric(pub String);

/// Distance function used to compare embeddings, fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 − a·b / (‖a‖‖b‖)`.
    Cosine,
    /// L2 norm of the difference vector.
    Euclidean,
    /// Euclidean distance after L2-normalizing both vectors.
    EuclideanL2,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [Self::Cosine, Self::Euclidean, Self::EuclideanL2];

    /// Distance between two embeddings. Smaller = more similar.
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            Self::Cosine => 1.0 - a.similarity(b),
            Self::Euclidean => a.euclidean_distance(b),
            Self::EuclideanL2 => a.l2_normalized().euclidean_distance(&b.l2_normalized()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "euclidean_l2" => Ok(Self::EuclideanL2),
            _ => Err(UnknownMetric(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: &[f32]) -> Embedding {
        Embedding::new(v.to_vec())
    }

    #[test]
    fn test_self_distance_is_zero() {
        let a = emb(&[0.3, -1.2, 4.5, 0.01]);
        for metric in DistanceMetric::ALL {
            assert!(metric.distance(&a, &a).abs() < 1e-5, "{metric}: d(a,a) != 0");
        }
    }

    #[test]
    fn test_cosine_orthogonal_is_one() {
        let d = DistanceMetric::Cosine.distance(&emb(&[1.0, 0.0]), &emb(&[0.0, 1.0]));
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_one() {
        let d = DistanceMetric::Cosine.distance(&emb(&[0.0, 0.0]), &emb(&[1.0, 0.0]));
        assert!((d - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_known_value() {
        let d = DistanceMetric::Euclidean.distance(&emb(&[1.0, 0.0, 0.0]), &emb(&[5.0, 5.0, 5.0]));
        // sqrt(16 + 25 + 25)
        assert!((d - 66.0f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_euclidean_l2_ignores_scale() {
        let d = DistanceMetric::EuclideanL2.distance(&emb(&[1.0, 1.0]), &emb(&[10.0, 10.0]));
        assert!(d.abs() < 1e-6);
        // Opposite unit vectors are 2 apart.
        let d = DistanceMetric::EuclideanL2.distance(&emb(&[3.0, 0.0]), &emb(&[-1.0, 0.0]));
        assert!((d - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("Euclidean".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert_eq!("euclidean-l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::EuclideanL2);
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        for metric in DistanceMetric::ALL {
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{metric}\""));
        }
    }
}
