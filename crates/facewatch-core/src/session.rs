//! Per-frame orchestration: detection, tracking, recognition, enrollment.
//!
//! A [`Session`] owns everything one camera stream needs (gallery handle,
//! matcher, tracker, enrollment workflow) and processes exactly one frame
//! per [`Session::process_frame`] call. The localizer and extractor are
//! borrowed per call so the caller decides where models live.
//!
//! Failures inside a frame never abort it: they are logged and listed in
//! [`FrameReport::degradations`], and tracking carries on.

use crate::detector::FaceLocalizer;
use crate::enrollment::{
    EnrollmentConfig, EnrollmentError, EnrollmentOutcome, EnrollmentRequest, EnrollmentWorkflow,
};
use crate::gallery::GalleryStore;
use crate::matcher::{MatchResult, Matcher, NearestMatcher};
use crate::metric::DistanceMetric;
use crate::model::EmbeddingModel;
use crate::overlay::{self, OverlayAnchor, PIVOT_SIZE};
use crate::recognizer::{prepare_face, EmbeddingExtractor};
use crate::storage::SampleStore;
use crate::tracker::{FreezePolicy, TrackId, TrackState, Tracker, TrackerConfig};
use crate::types::BoundingBox;
use image::GrayImage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("gallery uses {gallery} but the session is configured for {configured}")]
    MetricMismatch {
        gallery: DistanceMetric,
        configured: DistanceMetric,
    },
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: EmbeddingModel,
    pub metric: DistanceMetric,
    /// Replaces the table threshold for `(model, metric)` when set.
    pub threshold_override: Option<f32>,
    /// Boxes must be strictly wider than this to be tracked.
    pub min_face_width: f32,
    pub tracker: TrackerConfig,
    pub enrollment: EnrollmentConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingModel::VggFace,
            metric: DistanceMetric::Cosine,
            threshold_override: None,
            min_face_width: 130.0,
            tracker: TrackerConfig::default(),
            enrollment: EnrollmentConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Accept threshold in effect for this configuration.
    pub fn threshold(&self) -> f32 {
        self.threshold_override
            .unwrap_or_else(|| self.model.threshold(self.metric))
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        let threshold = self.threshold();
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(SessionError::InvalidConfig(format!(
                "threshold must be finite and >= 0, got {threshold}"
            )));
        }
        if self.tracker.frame_threshold == 0 {
            return Err(SessionError::InvalidConfig("frame threshold must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.tracker.iou_threshold) {
            return Err(SessionError::InvalidConfig(format!(
                "iou threshold must be within [0, 1], got {}",
                self.tracker.iou_threshold
            )));
        }
        if !self.min_face_width.is_finite() || self.min_face_width < 0.0 {
            return Err(SessionError::InvalidConfig(format!(
                "min face width must be >= 0, got {}",
                self.min_face_width
            )));
        }
        Ok(())
    }
}

/// Something that went wrong for one face or one frame without stopping it.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    DetectorFailed(String),
    CropOutsideFrame { track: TrackId },
    CropSizeMismatch {
        track: TrackId,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    ExtractorFailed { track: TrackId, error: String },
    MatchFailed { track: TrackId, error: String },
    OverlayOutOfFrame { track: TrackId },
}

/// What the renderer needs to know about one tracked face.
#[derive(Debug, Clone)]
pub struct FaceReport {
    pub track: TrackId,
    pub bbox: BoundingBox,
    pub state: TrackState,
    pub countdown_secs: Option<u32>,
    pub result: Option<MatchResult>,
    pub label: Option<String>,
    pub overlay: Option<OverlayAnchor>,
    /// Whether recognition ran for this face in this frame.
    pub recognized_now: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub faces: Vec<FaceReport>,
    /// Whether the localizer ran this frame.
    pub detector_ran: bool,
    /// Boxes that passed the width filter.
    pub detections: usize,
    /// Frame-level countdown (first frozen track), whole seconds.
    pub countdown_secs: Option<u32>,
    /// The frozen reference to display instead of the live frame, if any.
    pub reference: Option<Arc<GrayImage>>,
    pub enrollment_requests: Vec<EnrollmentRequest>,
    pub degradations: Vec<Degradation>,
    pub gallery_revision: u64,
}

pub struct Session {
    config: SessionConfig,
    gallery: Arc<GalleryStore>,
    matcher: NearestMatcher,
    tracker: Tracker,
    enrollment: EnrollmentWorkflow,
    /// Frozen reference frame for every frozen track.
    references: HashMap<TrackId, Arc<GrayImage>>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        gallery: Arc<GalleryStore>,
        store: Box<dyn SampleStore>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        if gallery.metric() != config.metric {
            return Err(SessionError::MetricMismatch {
                gallery: gallery.metric(),
                configured: config.metric,
            });
        }

        let matcher = NearestMatcher::new(config.threshold());
        let tracker = Tracker::new(config.tracker.clone());
        let enrollment = EnrollmentWorkflow::new(config.enrollment.clone(), gallery.clone(), store);

        tracing::info!(
            model = %config.model,
            metric = %config.metric,
            threshold = matcher.threshold(),
            policy = ?config.tracker.policy,
            identities = gallery.len(),
            "session started"
        );

        Ok(Self {
            config,
            gallery,
            matcher,
            tracker,
            enrollment,
            references: HashMap::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn gallery(&self) -> &Arc<GalleryStore> {
        &self.gallery
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn pending_enrollments(&self) -> usize {
        self.enrollment.pending()
    }

    /// Apply the answer to an enrollment request issued by an earlier frame.
    pub fn complete_enrollment(
        &mut self,
        id: Uuid,
        name: Option<String>,
    ) -> Result<EnrollmentOutcome, SessionError> {
        Ok(self.enrollment.complete(id, name)?)
    }

    pub fn cancel_enrollments(&mut self) -> usize {
        self.enrollment.cancel_all()
    }

    /// Process one frame to completion.
    pub fn process_frame<L, E>(
        &mut self,
        frame: &GrayImage,
        now: Instant,
        localizer: &mut L,
        extractor: &mut E,
    ) -> FrameReport
    where
        L: FaceLocalizer + ?Sized,
        E: EmbeddingExtractor + ?Sized,
    {
        let mut report = FrameReport::default();

        for id in self.tracker.tick(now) {
            self.references.remove(&id);
        }

        if self.tracker.accepts_detections() {
            report.detector_ran = true;
            match localizer.detect(frame) {
                Ok(boxes) => {
                    let min_width = self.config.min_face_width;
                    let faces: Vec<BoundingBox> =
                        boxes.into_iter().filter(|b| b.width > min_width).collect();
                    report.detections = faces.len();

                    let stabilized = self.tracker.update(&faces);
                    if !stabilized.is_empty() {
                        let captured = Arc::new(frame.clone());
                        for id in stabilized {
                            if self.tracker.freeze(id, now) {
                                self.references.insert(id, Arc::clone(&captured));
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "face detection failed, keeping tracks as they are");
                    report.degradations.push(Degradation::DetectorFailed(e.to_string()));
                }
            }
        }
        let live: Vec<TrackId> = self.tracker.tracks().iter().map(|t| t.id()).collect();
        self.references.retain(|id, _| live.contains(id));

        let due: Vec<TrackId> = live
            .iter()
            .copied()
            .filter(|&id| self.tracker.recognition_due(id))
            .collect();
        for id in &due {
            self.recognize(*id, frame, now, extractor, &mut report);
        }

        self.describe(&due, frame, now, &mut report);
        report
    }

    fn recognize<E>(
        &mut self,
        id: TrackId,
        frame: &GrayImage,
        now: Instant,
        extractor: &mut E,
        report: &mut FrameReport,
    ) where
        E: EmbeddingExtractor + ?Sized,
    {
        let started = Instant::now();
        let Some(bbox) = self.tracker.track(id).map(|t| *t.bbox()) else {
            return;
        };
        let source = self.references.get(&id).map(|r| &**r).unwrap_or(frame);

        // Matches only ever see the gallery as it was when the crop was taken.
        let snapshot = self.gallery.snapshot();
        let target = self.config.model.input_size();

        let outcome = match prepare_face(source, &bbox, target) {
            None => Err(Degradation::CropOutsideFrame { track: id }),
            Some(_) if extractor.input_size() != target => Err(Degradation::CropSizeMismatch {
                track: id,
                expected: target,
                actual: extractor.input_size(),
            }),
            Some(face) => match extractor.embed(&face) {
                Err(e) => Err(Degradation::ExtractorFailed {
                    track: id,
                    error: e.to_string(),
                }),
                Ok(embedding) => match self.matcher.compare(&embedding, &snapshot) {
                    Err(e) => Err(Degradation::MatchFailed {
                        track: id,
                        error: e.to_string(),
                    }),
                    Ok(result) => Ok((result, embedding, face)),
                },
            },
        };

        let finished = now + started.elapsed();
        let Some(track) = self.tracker.track_mut(id) else {
            return;
        };
        match outcome {
            Ok((result, embedding, face)) => {
                tracing::debug!(
                    track = %id,
                    result = ?result,
                    revision = snapshot.revision,
                    "face recognized"
                );
                if let Some(request) = self.enrollment.observe(track, &result, &embedding, &face) {
                    report.enrollment_requests.push(request);
                }
                track.record_result(Some(result), finished);
            }
            Err(degradation) => {
                tracing::warn!(track = %id, problem = ?degradation, "recognition skipped for face");
                track.record_result(None, finished);
                report.degradations.push(degradation);
            }
        }
    }

    fn describe(&self, due: &[TrackId], frame: &GrayImage, now: Instant, report: &mut FrameReport) {
        for track in self.tracker.tracks() {
            let result = track.last_result().cloned();
            let overlay = match &result {
                Some(_) => {
                    match overlay::place(track.bbox(), frame.width(), frame.height(), PIVOT_SIZE) {
                        Ok(anchor) => Some(anchor),
                        Err(e) => {
                            tracing::debug!(track = %track.id(), error = %e, "overlay skipped");
                            report
                                .degradations
                                .push(Degradation::OverlayOutOfFrame { track: track.id() });
                            None
                        }
                    }
                }
                None => None,
            };

            report.faces.push(FaceReport {
                track: track.id(),
                bbox: *track.bbox(),
                state: track.state(),
                countdown_secs: track.countdown_secs(now),
                label: result.as_ref().map(overlay::display_label),
                result,
                overlay,
                recognized_now: due.contains(&track.id()),
            });
        }

        report.countdown_secs = self
            .tracker
            .countdown(now)
            .map(|left| left.as_secs_f32().ceil() as u32);
        if self.tracker.config().policy != FreezePolicy::Off {
            report.reference = self
                .tracker
                .tracks()
                .iter()
                .find(|t| t.is_frozen())
                .and_then(|t| self.references.get(&t.id()))
                .cloned();
        }
        report.gallery_revision = self.gallery.revision();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::recognizer::RecognizerError;
    use crate::storage::StorageError;
    use crate::types::Embedding;
    use image::Luma;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Returns the same boxes every call and counts calls.
    struct FixedLocalizer {
        boxes: Vec<BoundingBox>,
        calls: usize,
    }

    impl FixedLocalizer {
        fn new(boxes: Vec<BoundingBox>) -> Self {
            Self { boxes, calls: 0 }
        }
    }

    impl FaceLocalizer for FixedLocalizer {
        fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls += 1;
            Ok(self.boxes.clone())
        }
    }

    struct FailingLocalizer;

    impl FaceLocalizer for FailingLocalizer {
        fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    /// Returns a fixed embedding for any correctly sized crop.
    struct FixedExtractor {
        size: (u32, u32),
        embedding: Vec<f32>,
        calls: usize,
    }

    impl FixedExtractor {
        fn new(embedding: Vec<f32>) -> Self {
            Self {
                size: EmbeddingModel::VggFace.input_size(),
                embedding,
                calls: 0,
            }
        }
    }

    impl EmbeddingExtractor for FixedExtractor {
        fn input_size(&self) -> (u32, u32) {
            self.size
        }

        fn embed(&mut self, _face: &GrayImage) -> Result<Embedding, RecognizerError> {
            self.calls += 1;
            Ok(Embedding::new(self.embedding.clone()))
        }
    }

    struct NullStore;

    impl SampleStore for NullStore {
        fn persist(&mut self, identity: &str, _face: &GrayImage) -> Result<PathBuf, StorageError> {
            Ok(PathBuf::from(identity))
        }
    }

    fn face_box() -> BoundingBox {
        BoundingBox::new(200.0, 150.0, 160.0, 160.0)
    }

    fn frame() -> GrayImage {
        GrayImage::from_pixel(640, 480, Luma([120]))
    }

    fn session(config: SessionConfig, gallery: Arc<GalleryStore>) -> Session {
        Session::new(config, gallery, Box::new(NullStore)).unwrap()
    }

    fn gallery_with_alice() -> Arc<GalleryStore> {
        let gallery = Arc::new(GalleryStore::new(DistanceMetric::Cosine));
        gallery.add_sample("alice", Embedding::new(vec![1.0, 0.0])).unwrap();
        gallery
    }

    fn frames(n: u32) -> impl Iterator<Item = Duration> {
        (0..n).map(|i| Duration::from_millis(33 * u64::from(i)))
    }

    #[test]
    fn test_global_freeze_recognizes_on_fifth_frame() {
        let mut s = session(SessionConfig::default(), gallery_with_alice());
        let mut loc = FixedLocalizer::new(vec![face_box()]);
        let mut ext = FixedExtractor::new(vec![0.9, 0.1]);
        let t0 = Instant::now();
        let img = frame();

        let mut reports: Vec<FrameReport> = frames(5)
            .map(|dt| s.process_frame(&img, t0 + dt, &mut loc, &mut ext))
            .collect();
        let last = reports.pop().unwrap();

        assert!(reports
            .iter()
            .all(|r| r.faces[0].state == TrackState::Scanning && r.faces[0].result.is_none()));
        assert_eq!(ext.calls, 1);
        let face = &last.faces[0];
        assert_eq!(face.state, TrackState::Frozen);
        assert!(face.recognized_now);
        assert_eq!(face.result.as_ref().and_then(|r| r.identity()), Some("alice"));
        assert_eq!(face.label.as_deref(), Some("ALICE"));
        assert!(face.overlay.is_some());
        assert!(last.reference.is_some());
        assert_eq!(last.countdown_secs, Some(5));
    }

    #[test]
    fn test_detector_paused_while_globally_frozen() {
        let mut s = session(SessionConfig::default(), gallery_with_alice());
        let mut loc = FixedLocalizer::new(vec![face_box()]);
        let mut ext = FixedExtractor::new(vec![1.0, 0.0]);
        let t0 = Instant::now();
        let img = frame();

        for dt in frames(5) {
            s.process_frame(&img, t0 + dt, &mut loc, &mut ext);
        }
        assert_eq!(loc.calls, 5);

        let held = s.process_frame(&img, t0 + Duration::from_secs(2), &mut loc, &mut ext);
        assert!(!held.detector_ran);
        assert_eq!(loc.calls, 5);
        assert_eq!(ext.calls, 1, "recognition runs once per freeze");
        assert_eq!(held.faces[0].result.as_ref().and_then(|r| r.identity()), Some("alice"));

        let thawed = s.process_frame(&img, t0 + Duration::from_secs(7), &mut loc, &mut ext);
        assert!(thawed.detector_ran);
        assert_eq!(thawed.faces[0].state, TrackState::Scanning);
        assert!(thawed.faces[0].result.is_none());
        assert!(thawed.reference.is_none());
    }

    #[test]
    fn test_empty_gallery_reports_no_gallery() {
        let gallery = Arc::new(GalleryStore::new(DistanceMetric::Cosine));
        let mut s = session(SessionConfig::default(), gallery);
        let mut loc = FixedLocalizer::new(vec![face_box()]);
        let mut ext = FixedExtractor::new(vec![1.0, 0.0]);
        let t0 = Instant::now();
        let img = frame();

        let last = frames(5)
            .map(|dt| s.process_frame(&img, t0 + dt, &mut loc, &mut ext))
            .last()
            .unwrap();
        assert_eq!(last.faces[0].result, Some(MatchResult::NoGalleryAvailable));
        assert_eq!(last.faces[0].label.as_deref(), Some("NO GALLERY"));
    }

    #[test]
    fn test_narrow_faces_ignored() {
        let mut s = session(SessionConfig::default(), gallery_with_alice());
        let mut loc = FixedLocalizer::new(vec![BoundingBox::new(10.0, 10.0, 130.0, 130.0)]);
        let mut ext = FixedExtractor::new(vec![1.0, 0.0]);
        let report = s.process_frame(&frame(), Instant::now(), &mut loc, &mut ext);
        assert_eq!(report.detections, 0);
        assert!(report.faces.is_empty());
    }

    #[test]
    fn test_extractor_size_mismatch_degrades() {
        let mut s = session(SessionConfig::default(), gallery_with_alice());
        let mut loc = FixedLocalizer::new(vec![face_box()]);
        let mut ext = FixedExtractor::new(vec![1.0, 0.0]);
        ext.size = (96, 96);
        let t0 = Instant::now();
        let img = frame();

        let last = frames(5)
            .map(|dt| s.process_frame(&img, t0 + dt, &mut loc, &mut ext))
            .last()
            .unwrap();
        assert_eq!(ext.calls, 0);
        assert_eq!(last.faces[0].state, TrackState::Frozen);
        assert!(last.faces[0].result.is_none());
        assert!(matches!(
            last.degradations[0],
            Degradation::CropSizeMismatch {
                expected: (224, 224),
                actual: (96, 96),
                ..
            }
        ));
    }

    #[test]
    fn test_embedding_length_mismatch_degrades() {
        let mut s = session(SessionConfig::default(), gallery_with_alice());
        let mut loc = FixedLocalizer::new(vec![face_box()]);
        let mut ext = FixedExtractor::new(vec![1.0, 0.0, 0.0]);
        let t0 = Instant::now();
        let img = frame();

        let last = frames(5)
            .map(|dt| s.process_frame(&img, t0 + dt, &mut loc, &mut ext))
            .last()
            .unwrap();
        assert!(matches!(last.degradations[0], Degradation::MatchFailed { .. }));
        assert_eq!(last.faces.len(), 1);
    }

    #[test]
    fn test_detector_failure_keeps_tracks() {
        let mut s = session(SessionConfig::default(), gallery_with_alice());
        let mut ext = FixedExtractor::new(vec![1.0, 0.0]);
        let t0 = Instant::now();
        let img = frame();
        s.process_frame(&img, t0, &mut FixedLocalizer::new(vec![face_box()]), &mut ext);

        let later = t0 + Duration::from_millis(33);
        let report = s.process_frame(&img, later, &mut FailingLocalizer, &mut ext);
        assert_eq!(report.faces.len(), 1);
        assert!(matches!(report.degradations[0], Degradation::DetectorFailed(_)));
    }

    #[test]
    fn test_continuous_enrollment_round_trip() {
        let config = SessionConfig {
            tracker: TrackerConfig {
                policy: FreezePolicy::Off,
                ..TrackerConfig::default()
            },
            enrollment: EnrollmentConfig {
                threshold: 2,
                ..EnrollmentConfig::default()
            },
            ..SessionConfig::default()
        };
        let gallery = Arc::new(GalleryStore::new(DistanceMetric::Cosine));
        let mut s = session(config, gallery.clone());
        let mut loc = FixedLocalizer::new(vec![face_box()]);
        let mut ext = FixedExtractor::new(vec![0.0, 1.0]);
        let t0 = Instant::now();
        let img = frame();

        let reports: Vec<FrameReport> = frames(3)
            .map(|dt| s.process_frame(&img, t0 + dt, &mut loc, &mut ext))
            .collect();
        assert!(reports[0].enrollment_requests.is_empty());
        assert!(reports[1].enrollment_requests.is_empty());
        let request = reports[2].enrollment_requests[0].clone();
        assert_eq!(request.face.dimensions(), (224, 224));

        // Frames keep flowing while the name is outstanding.
        let waiting = s.process_frame(&img, t0 + Duration::from_millis(200), &mut loc, &mut ext);
        assert_eq!(waiting.faces[0].result, Some(MatchResult::NoGalleryAvailable));
        assert_eq!(s.pending_enrollments(), 1);

        let outcome = s.complete_enrollment(request.id, Some("zoe".into())).unwrap();
        assert!(matches!(outcome, EnrollmentOutcome::Enrolled { samples: 1, .. }));

        let after = s.process_frame(&img, t0 + Duration::from_millis(233), &mut loc, &mut ext);
        assert_eq!(after.faces[0].result.as_ref().and_then(|r| r.identity()), Some("zoe"));
        assert_eq!(after.gallery_revision, gallery.revision());
    }

    /// Feed five identical frames starting at `start`, the last one freezing
    /// and recognizing. Returns the final report.
    fn run_cycle(
        s: &mut Session,
        start: Instant,
        loc: &mut FixedLocalizer,
        ext: &mut FixedExtractor,
    ) -> FrameReport {
        let img = frame();
        frames(5)
            .map(|dt| s.process_frame(&img, start + dt, &mut *loc, &mut *ext))
            .last()
            .unwrap()
    }

    #[test]
    fn test_global_freeze_streak_survives_thaw() {
        let config = SessionConfig {
            enrollment: EnrollmentConfig {
                threshold: 2,
                ..EnrollmentConfig::default()
            },
            ..SessionConfig::default()
        };
        assert_eq!(config.tracker.policy, FreezePolicy::Global);
        let mut s = session(config, Arc::new(GalleryStore::new(DistanceMetric::Cosine)));
        let mut loc = FixedLocalizer::new(vec![face_box()]);
        let mut ext = FixedExtractor::new(vec![0.0, 1.0]);
        let mut start = Instant::now();

        let mut streaks = Vec::new();
        let mut requests = Vec::new();
        for _ in 0..4 {
            let last = run_cycle(&mut s, start, &mut loc, &mut ext);
            assert_eq!(last.faces.len(), 1);
            assert_eq!(last.faces[0].state, TrackState::Frozen);
            assert!(last.faces[0].recognized_now);
            streaks.push(s.tracker().tracks()[0].consecutive_unknown());
            requests.push(last.enrollment_requests.len());
            // Well past the freeze window so the next cycle starts thawed.
            start += Duration::from_secs(6);
        }

        assert_eq!(ext.calls, 4, "one recognition per freeze cycle");
        assert_eq!(streaks, vec![1, 2, 0, 1]);
        assert_eq!(requests, vec![0, 0, 1, 0]);
        assert_eq!(s.tracker().tracks()[0].id(), TrackId(0));
        assert_eq!(s.pending_enrollments(), 1);
    }

    #[test]
    fn test_per_face_timers_are_independent() {
        let config = SessionConfig {
            tracker: TrackerConfig {
                policy: FreezePolicy::PerFace,
                ..TrackerConfig::default()
            },
            ..SessionConfig::default()
        };
        let mut s = session(config, gallery_with_alice());
        let left = BoundingBox::new(20.0, 150.0, 160.0, 160.0);
        let right = BoundingBox::new(400.0, 150.0, 160.0, 160.0);
        let mut loc = FixedLocalizer::new(vec![left]);
        let mut ext = FixedExtractor::new(vec![1.0, 0.0]);
        let t0 = Instant::now();
        let img = frame();

        // The right face shows up two frames after the left one.
        let mut reports = Vec::new();
        for (i, dt) in frames(7).enumerate() {
            if i == 2 {
                loc.boxes = vec![left, right];
            }
            reports.push(s.process_frame(&img, t0 + dt, &mut loc, &mut ext));
        }

        let (l, r) = (TrackId(0), TrackId(1));
        let face = |report: &FrameReport, id: TrackId| {
            report.faces.iter().find(|f| f.track == id).cloned().unwrap()
        };

        assert_eq!(face(&reports[4], l).state, TrackState::Frozen);
        assert!(face(&reports[4], l).recognized_now);
        assert_eq!(face(&reports[4], r).state, TrackState::Scanning);
        assert!(reports[5].detector_ran, "detection continues while a face is frozen");
        assert_eq!(face(&reports[6], r).state, TrackState::Frozen);
        assert!(face(&reports[6], r).recognized_now);
        assert!(!face(&reports[6], l).recognized_now);
        assert_eq!(ext.calls, 2);

        // The left window closes first; the right one is still held.
        let partial = s.process_frame(&img, t0 + Duration::from_millis(5_170), &mut loc, &mut ext);
        assert_eq!(face(&partial, l).state, TrackState::Scanning);
        assert!(face(&partial, l).result.is_none());
        assert_eq!(face(&partial, r).state, TrackState::Frozen);
        assert_eq!(
            face(&partial, r).result.as_ref().and_then(|m| m.identity()),
            Some("alice")
        );

        let later = s.process_frame(&img, t0 + Duration::from_millis(5_400), &mut loc, &mut ext);
        assert!(later.faces.iter().all(|f| f.state == TrackState::Scanning));
        assert_eq!(ext.calls, 2);
    }

    #[test]
    fn test_metric_mismatch_rejected() {
        let gallery = Arc::new(GalleryStore::new(DistanceMetric::Euclidean));
        let err = Session::new(SessionConfig::default(), gallery, Box::new(NullStore))
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::MetricMismatch { .. }));
    }

    #[test]
    fn test_threshold_override() {
        let config = SessionConfig {
            threshold_override: Some(0.25),
            ..SessionConfig::default()
        };
        assert_eq!(config.threshold(), 0.25);
        assert_eq!(SessionConfig::default().threshold(), 0.40);

        let bad = SessionConfig {
            threshold_override: Some(f32::NAN),
            ..SessionConfig::default()
        };
        assert!(matches!(bad.validate(), Err(SessionError::InvalidConfig(_))));
    }
}
