//! In-memory gallery of known identities.
//!
//! Each identity keeps every enrolled embedding plus their running mean.
//! The store is shared behind an `RwLock`: a mean is always recomputed
//! under the write lock, so a snapshot sees an identity either before or
//! after an `add_sample`, never in between.

use crate::metric::DistanceMetric;
use crate::types::Embedding;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GalleryError {
    #[error("embedding dimension mismatch: gallery holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("empty embedding")]
    EmptyEmbedding,
}

/// One known identity: all of its samples and their per-dimension mean.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    identity: String,
    samples: Vec<Embedding>,
    mean: Embedding,
}

impl GalleryEntry {
    fn new(identity: String, first: Embedding) -> Self {
        Self {
            identity,
            mean: first.clone(),
            samples: vec![first],
        }
    }

    fn push(&mut self, sample: Embedding) {
        self.samples.push(sample);
        if let Some(mean) = Embedding::mean_of(&self.samples) {
            self.mean = mean;
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn samples(&self) -> &[Embedding] {
        &self.samples
    }

    pub fn mean(&self) -> &Embedding {
        &self.mean
    }
}

/// Immutable view of every `(identity, mean)` pair, sorted by identity.
#[derive(Debug, Clone)]
pub struct GallerySnapshot {
    pub metric: DistanceMetric,
    /// Store revision this snapshot was taken at.
    pub revision: u64,
    /// Embedding length shared by all entries, if any are enrolled.
    pub dim: Option<usize>,
    pub entries: Vec<(String, Embedding)>,
}

impl GallerySnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

struct GalleryInner {
    entries: BTreeMap<String, GalleryEntry>,
    dim: Option<usize>,
    revision: u64,
}

/// Identity → samples/mean mapping for one session and one metric.
///
/// Thread-safe: share it as `Arc<GalleryStore>`.
pub struct GalleryStore {
    metric: DistanceMetric,
    inner: RwLock<GalleryInner>,
}

impl GalleryStore {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            inner: RwLock::new(GalleryInner {
                entries: BTreeMap::new(),
                dim: None,
                revision: 0,
            }),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Append `embedding` to `identity`, creating the entry if absent, and
    /// recompute its mean. Returns the identity's new sample count.
    ///
    /// The first sample fixes the gallery's embedding length; later samples
    /// of another length are rejected and leave the store untouched.
    pub fn add_sample(&self, identity: &str, embedding: Embedding) -> Result<usize, GalleryError> {
        if embedding.values.is_empty() {
            return Err(GalleryError::EmptyEmbedding);
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let dim = inner.dim;
        match dim {
            Some(expected) if expected != embedding.dim() => {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
            Some(_) => {}
            None => inner.dim = Some(embedding.dim()),
        }

        let count = match inner.entries.entry(identity.to_string()) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.push(embedding);
                entry.samples.len()
            }
            Entry::Vacant(slot) => {
                slot.insert(GalleryEntry::new(identity.to_string(), embedding));
                1
            }
        };
        inner.revision += 1;

        tracing::debug!(
            identity,
            samples = count,
            revision = inner.revision,
            "gallery sample added"
        );
        Ok(count)
    }

    /// Consistent view of all identity means, in identity order.
    pub fn snapshot(&self) -> GallerySnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        GallerySnapshot {
            metric: self.metric,
            revision: inner.revision,
            dim: inner.dim,
            entries: inner
                .entries
                .values()
                .map(|e| (e.identity.clone(), e.mean.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .is_empty()
    }

    /// Number of enrolled identities.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn revision(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).revision
    }

    pub fn identities(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .keys()
            .cloned()
            .collect()
    }

    /// Samples enrolled for `identity` (0 if unknown).
    pub fn sample_count(&self, identity: &str) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(identity)
            .map_or(0, |e| e.samples.len())
    }

    /// Clone of one identity's full entry.
    pub fn entry(&self, identity: &str) -> Option<GalleryEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(identity)
            .cloned()
    }
}
