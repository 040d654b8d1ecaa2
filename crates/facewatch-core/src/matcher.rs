//! Nearest-identity matching against a gallery snapshot.

use crate::gallery::GallerySnapshot;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("probe has {actual} dimensions, gallery holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Outcome of matching one observation against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    /// Nearest identity within the accept threshold.
    Known { identity: String, distance: f32 },
    /// Nearest identity is farther than the threshold.
    Unknown,
    /// Nothing enrolled: recognition is not possible.
    NoGalleryAvailable,
}

impl MatchResult {
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Known { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known { .. })
    }
}

/// Best candidate in a snapshot, regardless of threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub identity: String,
    pub distance: f32,
}

/// Strategy for comparing a probe embedding against a gallery snapshot.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        snapshot: &GallerySnapshot,
    ) -> Result<MatchResult, MatchError>;
}

/// Nearest-mean matcher with a fixed accept threshold.
///
/// Uses the snapshot's metric. Always iterates every entry; ties resolve to
/// the first identity in snapshot order (identity name ascending).
#[derive(Debug, Clone, Copy)]
pub struct NearestMatcher {
    threshold: f32,
}

impl NearestMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Closest identity in `snapshot`, or `None` when it is empty.
    pub fn nearest(
        &self,
        probe: &Embedding,
        snapshot: &GallerySnapshot,
    ) -> Result<Option<Candidate>, MatchError> {
        if let Some(expected) = snapshot.dim {
            if probe.dim() != expected {
                return Err(MatchError::DimensionMismatch {
                    expected,
                    actual: probe.dim(),
                });
            }
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, (_, mean)) in snapshot.entries.iter().enumerate() {
            let distance = snapshot.metric.distance(probe, mean);
            // Strict `<` keeps the earliest identity on ties.
            let better = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if better {
                best = Some((i, distance));
            }
        }

        Ok(best.map(|(i, distance)| Candidate {
            identity: snapshot.entries[i].0.clone(),
            distance,
        }))
    }
}

impl Matcher for NearestMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        snapshot: &GallerySnapshot,
    ) -> Result<MatchResult, MatchError> {
        let Some(candidate) = self.nearest(probe, snapshot)? else {
            return Ok(MatchResult::NoGalleryAvailable);
        };

        let accepted = candidate.distance <= self.threshold;
        tracing::debug!(
            identity = %candidate.identity,
            distance = candidate.distance,
            threshold = self.threshold,
            metric = %snapshot.metric,
            accepted,
            "nearest gallery identity"
        );

        Ok(if accepted {
            MatchResult::Known {
                identity: candidate.identity,
                distance: candidate.distance,
            }
        } else {
            MatchResult::Unknown
        })
    }
}
