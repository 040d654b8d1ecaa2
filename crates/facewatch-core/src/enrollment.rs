//! Online enrollment: count unrecognized observations per track and ask for
//! a name once a face has stayed unknown for long enough.
//!
//! Requests are resolved later through [`EnrollmentWorkflow::complete`], so
//! a caller may either block on the answer or keep processing frames and
//! apply it when it arrives. A supplied name is folded into the gallery as
//! an ordinary sample; a missing name skips the cycle.

use crate::gallery::{GalleryError, GalleryStore};
use crate::matcher::MatchResult;
use crate::storage::{validate_identity, SampleStore};
use crate::tracker::{Track, TrackId};
use crate::types::Embedding;
use image::GrayImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("no pending enrollment request {0}")]
    UnknownRequest(Uuid),
    #[error("gallery rejected sample: {0}")]
    Gallery(#[from] GalleryError),
}

#[derive(Debug, Clone)]
pub struct EnrollmentConfig {
    /// Unknown results tolerated before a name is requested. The request
    /// fires on the first result past this count.
    pub threshold: u32,
    /// Persist crops of recognized faces under their matched identity.
    pub collect_known_samples: bool,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            collect_known_samples: false,
        }
    }
}

/// A face that needs a human-supplied name.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub id: Uuid,
    pub track: TrackId,
    pub embedding: Embedding,
    /// The prepared crop that produced `embedding`.
    pub face: GrayImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentOutcome {
    Enrolled {
        identity: String,
        /// Samples held for the identity after this one was added.
        samples: usize,
        /// Where the crop was written; `None` if persisting failed.
        persisted: Option<PathBuf>,
    },
    Skipped,
}

struct Pending {
    track: TrackId,
    embedding: Embedding,
    face: GrayImage,
}

pub struct EnrollmentWorkflow {
    config: EnrollmentConfig,
    gallery: Arc<GalleryStore>,
    store: Box<dyn SampleStore>,
    pending: HashMap<Uuid, Pending>,
}

impl EnrollmentWorkflow {
    pub fn new(
        config: EnrollmentConfig,
        gallery: Arc<GalleryStore>,
        store: Box<dyn SampleStore>,
    ) -> Self {
        Self {
            config,
            gallery,
            store,
            pending: HashMap::new(),
        }
    }

    /// Number of requests still waiting for a name.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, track: TrackId) -> bool {
        self.pending.values().any(|p| p.track == track)
    }

    /// Feed one recognition result for `track`.
    ///
    /// `Unknown` and `NoGalleryAvailable` extend the track's unknown streak,
    /// `Known` resets it. When the streak exceeds the threshold it is reset
    /// and a request is returned, unless one is already open for the track.
    pub fn observe(
        &mut self,
        track: &mut Track,
        result: &MatchResult,
        embedding: &Embedding,
        face: &GrayImage,
    ) -> Option<EnrollmentRequest> {
        match result {
            MatchResult::Known { identity, .. } => {
                track.consecutive_unknown = 0;
                if self.config.collect_known_samples {
                    self.collect(identity, face);
                }
                None
            }
            MatchResult::Unknown | MatchResult::NoGalleryAvailable => {
                track.consecutive_unknown = track.consecutive_unknown.saturating_add(1);
                if track.consecutive_unknown <= self.config.threshold {
                    return None;
                }
                track.consecutive_unknown = 0;

                if self.is_pending(track.id()) {
                    tracing::debug!(
                        track = %track.id(),
                        "enrollment already pending, not re-requesting"
                    );
                    return None;
                }

                let request = EnrollmentRequest {
                    id: Uuid::new_v4(),
                    track: track.id(),
                    embedding: embedding.clone(),
                    face: face.clone(),
                };
                self.pending.insert(
                    request.id,
                    Pending {
                        track: request.track,
                        embedding: request.embedding.clone(),
                        face: request.face.clone(),
                    },
                );
                tracing::info!(
                    request = %request.id,
                    track = %request.track,
                    "face stayed unknown, requesting a name"
                );
                Some(request)
            }
        }
    }

    /// Resolve a request with the name a human supplied, if any.
    ///
    /// A rejected name leaves the request open so it can be answered again.
    /// The gallery is updated first; a failure to persist the crop is logged
    /// and reported as `persisted: None` but does not undo the enrollment.
    pub fn complete(
        &mut self,
        id: Uuid,
        name: Option<String>,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        if !self.pending.contains_key(&id) {
            return Err(EnrollmentError::UnknownRequest(id));
        }

        let identity = match name.filter(|n| !n.trim().is_empty()) {
            Some(name) => Some(
                validate_identity(&name)
                    .map_err(|_| EnrollmentError::InvalidName(name.clone()))?
                    .to_string(),
            ),
            None => None,
        };
        let pending = self
            .pending
            .remove(&id)
            .ok_or(EnrollmentError::UnknownRequest(id))?;
        let Some(identity) = identity else {
            tracing::info!(
                request = %id,
                track = %pending.track,
                "no name supplied, enrollment skipped"
            );
            return Ok(EnrollmentOutcome::Skipped);
        };

        let samples = self.gallery.add_sample(&identity, pending.embedding)?;
        let persisted = match self.store.persist(&identity, &pending.face) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "failed to persist enrolled face");
                None
            }
        };

        tracing::info!(request = %id, identity = %identity, samples, "face enrolled");
        Ok(EnrollmentOutcome::Enrolled {
            identity,
            samples,
            persisted,
        })
    }

    /// Drop every open request, e.g. when the prompt goes away.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    fn collect(&mut self, identity: &str, face: &GrayImage) {
        if let Err(e) = self.store.persist(identity, face) {
            tracing::warn!(identity, error = %e, "failed to persist known face sample");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::DistanceMetric;
    use crate::storage::StorageError;
    use crate::types::BoundingBox;
    use std::sync::Mutex;

    /// Records persisted identities instead of touching disk.
    #[derive(Clone, Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Vec<String>>>,
    }

    impl SampleStore for MemoryStore {
        fn persist(&mut self, identity: &str, _face: &GrayImage) -> Result<PathBuf, StorageError> {
            let mut saved = self.saved.lock().unwrap();
            saved.push(identity.to_string());
            Ok(PathBuf::from(format!("{identity}/{identity}{}.jpg", saved.len())))
        }
    }

    fn workflow(config: EnrollmentConfig) -> (EnrollmentWorkflow, Arc<GalleryStore>, MemoryStore) {
        let gallery = Arc::new(GalleryStore::new(DistanceMetric::Cosine));
        let store = MemoryStore::default();
        let wf = EnrollmentWorkflow::new(config, gallery.clone(), Box::new(store.clone()));
        (wf, gallery, store)
    }

    /// Requests a name on the first unknown result.
    fn eager() -> EnrollmentConfig {
        EnrollmentConfig {
            threshold: 0,
            ..Default::default()
        }
    }

    fn track() -> Track {
        Track::new(TrackId(7), BoundingBox::new(0.0, 0.0, 150.0, 150.0))
    }

    fn probe() -> Embedding {
        Embedding::new(vec![0.6, 0.8])
    }

    #[test]
    fn test_request_on_twenty_first_unknown() {
        let (mut wf, _, _) = workflow(EnrollmentConfig::default());
        let mut t = track();
        let face = GrayImage::new(4, 4);

        for i in 1..=20 {
            let request = wf.observe(&mut t, &MatchResult::Unknown, &probe(), &face);
            assert!(request.is_none(), "unknown #{i}");
        }
        assert_eq!(t.consecutive_unknown(), 20);

        let request = wf.observe(&mut t, &MatchResult::Unknown, &probe(), &face).unwrap();
        assert_eq!(request.track, TrackId(7));
        assert_eq!(t.consecutive_unknown(), 0);
        assert_eq!(wf.pending(), 1);
    }

    #[test]
    fn test_known_resets_streak() {
        let (mut wf, _, store) = workflow(EnrollmentConfig::default());
        let mut t = track();
        let face = GrayImage::new(4, 4);
        for _ in 0..15 {
            wf.observe(&mut t, &MatchResult::Unknown, &probe(), &face);
        }
        let known = MatchResult::Known { identity: "alice".into(), distance: 0.1 };
        wf.observe(&mut t, &known, &probe(), &face);
        assert_eq!(t.consecutive_unknown(), 0);
        // Known samples are not collected unless enabled.
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_no_gallery_counts_as_unknown() {
        let (mut wf, _, _) = workflow(EnrollmentConfig { threshold: 2, ..Default::default() });
        let mut t = track();
        let face = GrayImage::new(4, 4);
        assert!(wf.observe(&mut t, &MatchResult::NoGalleryAvailable, &probe(), &face).is_none());
        assert!(wf.observe(&mut t, &MatchResult::NoGalleryAvailable, &probe(), &face).is_none());
        assert!(wf.observe(&mut t, &MatchResult::NoGalleryAvailable, &probe(), &face).is_some());
    }

    #[test]
    fn test_single_request_per_track_while_pending() {
        let (mut wf, _, _) = workflow(EnrollmentConfig { threshold: 1, ..Default::default() });
        let mut t = track();
        let face = GrayImage::new(4, 4);
        wf.observe(&mut t, &MatchResult::Unknown, &probe(), &face);
        assert!(wf.observe(&mut t, &MatchResult::Unknown, &probe(), &face).is_some());
        wf.observe(&mut t, &MatchResult::Unknown, &probe(), &face);
        assert!(wf.observe(&mut t, &MatchResult::Unknown, &probe(), &face).is_none());
        assert_eq!(wf.pending(), 1);
    }

    #[test]
    fn test_complete_enrolls_and_persists() {
        let (mut wf, gallery, store) = workflow(eager());
        let mut t = track();
        let request = wf
            .observe(&mut t, &MatchResult::Unknown, &probe(), &GrayImage::new(4, 4))
            .unwrap();

        let outcome = wf.complete(request.id, Some(" carol ".into())).unwrap();
        assert_eq!(
            outcome,
            EnrollmentOutcome::Enrolled {
                identity: "carol".into(),
                samples: 1,
                persisted: Some(PathBuf::from("carol/carol1.jpg")),
            }
        );
        assert_eq!(gallery.identities(), vec!["carol"]);
        assert_eq!(*store.saved.lock().unwrap(), vec!["carol"]);
        assert_eq!(wf.pending(), 0);
    }

    #[test]
    fn test_complete_without_name_skips() {
        let (mut wf, gallery, store) = workflow(eager());
        let mut t = track();
        let request = wf
            .observe(&mut t, &MatchResult::Unknown, &probe(), &GrayImage::new(4, 4))
            .unwrap();

        let outcome = wf.complete(request.id, Some("   ".into())).unwrap();
        assert_eq!(outcome, EnrollmentOutcome::Skipped);
        assert!(gallery.is_empty());
        assert!(store.saved.lock().unwrap().is_empty());
        assert!(matches!(wf.complete(request.id, None), Err(EnrollmentError::UnknownRequest(_))));
    }

    #[test]
    fn test_complete_rejects_path_names() {
        let (mut wf, gallery, _) = workflow(eager());
        let mut t = track();
        let request = wf
            .observe(&mut t, &MatchResult::Unknown, &probe(), &GrayImage::new(4, 4))
            .unwrap();
        assert!(matches!(
            wf.complete(request.id, Some("../etc".into())),
            Err(EnrollmentError::InvalidName(_))
        ));
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_rejected_name_keeps_request_open() {
        let (mut wf, gallery, store) = workflow(eager());
        let mut t = track();
        let request = wf
            .observe(&mut t, &MatchResult::Unknown, &probe(), &GrayImage::new(4, 4))
            .unwrap();

        assert!(wf.complete(request.id, Some("a/b".into())).is_err());
        assert_eq!(wf.pending(), 1);
        assert!(wf.is_pending(TrackId(7)));

        let outcome = wf.complete(request.id, Some("erin".into())).unwrap();
        assert!(matches!(outcome, EnrollmentOutcome::Enrolled { samples: 1, .. }));
        assert_eq!(gallery.identities(), vec!["erin"]);
        assert_eq!(*store.saved.lock().unwrap(), vec!["erin"]);
        assert_eq!(wf.pending(), 0);
    }

    #[test]
    fn test_collect_known_samples() {
        let config = EnrollmentConfig { collect_known_samples: true, ..Default::default() };
        let (mut wf, gallery, store) = workflow(config);
        let mut t = track();
        let known = MatchResult::Known { identity: "dave".into(), distance: 0.2 };
        wf.observe(&mut t, &known, &probe(), &GrayImage::new(4, 4));
        assert_eq!(*store.saved.lock().unwrap(), vec!["dave"]);
        assert!(gallery.is_empty());
    }
}
