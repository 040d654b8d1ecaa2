//! Per-face stabilization and freeze state machine.
//!
//! A track counts consecutive frames in which its face slot is detected.
//! Once the count reaches `frame_threshold` the track is *stabilizing*: the
//! caller captures the current frame as the frozen reference and calls
//! [`Tracker::freeze`]. A frozen track is recognized once against that
//! reference and held for `freeze_duration`, after which it returns to
//! scanning with its detection count reset.
//!
//! Detections are associated with tracks greedily by IoU. This is a slot
//! heuristic for a single camera, not multi-object tracking.

use crate::matcher::MatchResult;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown freeze policy: {0} (expected global, per_face or off)")]
pub struct UnknownPolicy(pub String);

/// Identifier of a track, unique for the tracker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How freezes are gated when several faces are in view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezePolicy {
    /// One gate for the whole frame, driven by the first detected face.
    /// While frozen the localizer is not consulted and every face in the
    /// reference frame is recognized.
    Global,
    /// Every track counts, freezes and expires on its own.
    PerFace,
    /// Tracks never freeze; every tracked face is recognized every frame.
    Off,
}

impl FromStr for FreezePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "global" => Ok(Self::Global),
            "per_face" => Ok(Self::PerFace),
            "off" | "none" | "continuous" => Ok(Self::Off),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Consecutive detections needed before a track stabilizes.
    pub frame_threshold: u32,
    /// How long a frozen track holds its reference.
    pub freeze_duration: Duration,
    pub policy: FreezePolicy,
    /// Minimum IoU for a detection to continue an existing track.
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frame_threshold: 5,
            freeze_duration: Duration::from_secs(5),
            policy: FreezePolicy::Global,
            iou_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Scanning,
    /// Detection count reached the threshold; waiting for the reference capture.
    Stabilizing,
    Frozen,
}

/// Transient record for one candidate face.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    bbox: BoundingBox,
    consecutive_detections: u32,
    state: TrackState,
    frozen_at: Option<Instant>,
    freeze_duration: Duration,
    recognized: bool,
    last_result: Option<MatchResult>,
    pub(crate) consecutive_unknown: u32,
}

impl Track {
    pub(crate) fn new(id: TrackId, bbox: BoundingBox) -> Self {
        Self {
            id,
            bbox,
            consecutive_detections: 1,
            state: TrackState::Scanning,
            frozen_at: None,
            freeze_duration: Duration::ZERO,
            recognized: false,
            last_result: None,
            consecutive_unknown: 0,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn consecutive_detections(&self) -> u32 {
        self.consecutive_detections
    }

    pub fn consecutive_unknown(&self) -> u32 {
        self.consecutive_unknown
    }

    pub fn last_result(&self) -> Option<&MatchResult> {
        self.last_result.as_ref()
    }

    pub fn is_frozen(&self) -> bool {
        self.state == TrackState::Frozen
    }

    /// Time left in the freeze window, `None` unless frozen.
    pub fn countdown(&self, now: Instant) -> Option<Duration> {
        let frozen_at = self.frozen_at?;
        Some(self.freeze_duration.saturating_sub(now.saturating_duration_since(frozen_at)))
    }

    /// Whole seconds left, rounded up, for display.
    pub fn countdown_secs(&self, now: Instant) -> Option<u32> {
        self.countdown(now).map(|left| left.as_secs_f32().ceil() as u32)
    }

    fn observe(&mut self, bbox: BoundingBox) {
        self.bbox = bbox;
        if self.state == TrackState::Scanning {
            self.consecutive_detections = self.consecutive_detections.saturating_add(1);
        }
    }

    fn stabilize(&mut self) {
        if self.state == TrackState::Scanning {
            self.state = TrackState::Stabilizing;
        }
    }

    fn freeze(&mut self, now: Instant, duration: Duration) -> bool {
        if self.state != TrackState::Stabilizing {
            return false;
        }
        self.state = TrackState::Frozen;
        self.frozen_at = Some(now);
        self.freeze_duration = duration;
        self.recognized = false;
        true
    }

    fn expired(&self, now: Instant) -> bool {
        self.countdown(now).is_some_and(|left| left.is_zero())
    }

    /// Leave the freeze: back to scanning with every frame counter reset.
    /// The unknown streak survives so enrollment can build up across cycles.
    fn thaw(&mut self) {
        self.state = TrackState::Scanning;
        self.consecutive_detections = 0;
        self.frozen_at = None;
        self.recognized = false;
        self.last_result = None;
    }

    pub(crate) fn record_result(&mut self, result: Option<MatchResult>, finished: Instant) {
        self.recognized = true;
        self.last_result = result;
        // Restart the window so the result stays up for the full duration.
        if self.state == TrackState::Frozen {
            self.frozen_at = Some(finished);
        }
    }
}

/// Owns every live track and applies the configured freeze policy.
pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub(crate) fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// Whether the localizer should run this frame. Under the global policy
    /// a frozen gate holds the reference and skips detection.
    pub fn accepts_detections(&self) -> bool {
        match self.config.policy {
            FreezePolicy::Global => !self.tracks.iter().any(Track::is_frozen),
            FreezePolicy::PerFace | FreezePolicy::Off => true,
        }
    }

    /// Expire freezes whose window has elapsed. Returns the thawed tracks.
    pub fn tick(&mut self, now: Instant) -> Vec<TrackId> {
        let mut thawed = Vec::new();
        for track in self.tracks.iter_mut().filter(|t| t.expired(now)) {
            track.thaw();
            thawed.push(track.id);
        }
        if !thawed.is_empty() {
            tracing::debug!(tracks = ?thawed, "freeze expired");
        }
        thawed
    }

    /// Associate this frame's detections with tracks.
    ///
    /// Matched tracks count one more detection, unmatched detections open
    /// new tracks, and non-frozen tracks that were not seen are dropped.
    /// Detections overlapping a frozen track belong to it and are ignored.
    /// Returns the tracks that entered `Stabilizing` this frame.
    pub fn update(&mut self, detections: &[BoundingBox]) -> Vec<TrackId> {
        let threshold = self.config.iou_threshold;
        let mut seen = vec![false; self.tracks.len()];
        let mut fresh = Vec::new();
        let mut primary: Option<TrackId> = None;

        for (det_idx, det) in detections.iter().enumerate() {
            let absorbed = self
                .tracks
                .iter()
                .any(|t| t.state == TrackState::Frozen && t.bbox.iou(det) > threshold);
            if absorbed {
                continue;
            }

            let mut best: Option<(usize, f32)> = None;
            for (i, track) in self.tracks.iter().enumerate() {
                if seen[i] || track.state == TrackState::Frozen {
                    continue;
                }
                let iou = track.bbox.iou(det);
                if iou > threshold && best.map_or(true, |(_, b)| iou > b) {
                    best = Some((i, iou));
                }
            }

            let id = match best {
                Some((i, _)) => {
                    seen[i] = true;
                    self.tracks[i].observe(*det);
                    self.tracks[i].id
                }
                None => {
                    let id = TrackId(self.next_id);
                    self.next_id += 1;
                    fresh.push(Track::new(id, *det));
                    id
                }
            };
            if det_idx == 0 {
                primary = Some(id);
            }
        }

        let mut kept = Vec::with_capacity(self.tracks.len() + fresh.len());
        for (track, seen) in self.tracks.drain(..).zip(seen) {
            if seen || track.state == TrackState::Frozen {
                kept.push(track);
            } else {
                tracing::trace!(track = %track.id, "track lost");
            }
        }
        kept.extend(fresh);
        self.tracks = kept;

        self.stabilize(primary)
    }

    fn stabilize(&mut self, primary: Option<TrackId>) -> Vec<TrackId> {
        let needed = self.config.frame_threshold;
        let ready =
            |t: &Track| t.state == TrackState::Scanning && t.consecutive_detections >= needed;

        let mut stabilized = Vec::new();
        match self.config.policy {
            FreezePolicy::Off => {}
            FreezePolicy::PerFace => {
                for track in self.tracks.iter_mut().filter(|t| ready(&**t)) {
                    track.stabilize();
                    stabilized.push(track.id);
                }
            }
            FreezePolicy::Global => {
                let gate_open = primary
                    .and_then(|id| self.track(id))
                    .is_some_and(|t| ready(t));
                if gate_open {
                    let scanning = self
                        .tracks
                        .iter_mut()
                        .filter(|t| t.state == TrackState::Scanning);
                    for track in scanning {
                        track.stabilize();
                        stabilized.push(track.id);
                    }
                }
            }
        }
        stabilized
    }

    /// Enter `Frozen` for a stabilizing track once its reference is captured.
    pub fn freeze(&mut self, id: TrackId, now: Instant) -> bool {
        let duration = self.config.freeze_duration;
        let frozen = self.track_mut(id).is_some_and(|t| t.freeze(now, duration));
        if frozen {
            tracing::debug!(track = %id, secs = duration.as_secs_f32(), "track frozen");
        }
        frozen
    }

    /// Whether `id` should run recognition this frame.
    pub fn recognition_due(&self, id: TrackId) -> bool {
        let Some(track) = self.track(id) else {
            return false;
        };
        match self.config.policy {
            FreezePolicy::Off => true,
            FreezePolicy::Global | FreezePolicy::PerFace => track.is_frozen() && !track.recognized,
        }
    }

    /// Countdown of the first frozen track, for a frame-level display.
    pub fn countdown(&self, now: Instant) -> Option<Duration> {
        self.tracks.iter().find_map(|t| t.countdown(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32) -> BoundingBox {
        BoundingBox::new(x, 50.0, 150.0, 150.0)
    }

    fn tracker(policy: FreezePolicy) -> Tracker {
        Tracker::new(TrackerConfig {
            policy,
            ..TrackerConfig::default()
        })
    }

    #[test]
    fn test_freezes_after_exactly_frame_threshold() {
        let mut t = tracker(FreezePolicy::PerFace);
        let now = Instant::now();

        for frame in 1..5 {
            assert!(t.update(&[face(100.0)]).is_empty(), "stabilized early at frame {frame}");
            assert_eq!(t.tracks()[0].state(), TrackState::Scanning);
            assert_eq!(t.tracks()[0].consecutive_detections(), frame);
        }

        let stabilized = t.update(&[face(100.0)]);
        assert_eq!(stabilized.len(), 1);
        assert_eq!(t.tracks()[0].state(), TrackState::Stabilizing);

        assert!(t.freeze(stabilized[0], now));
        assert_eq!(t.tracks()[0].state(), TrackState::Frozen);
        assert!(t.recognition_due(stabilized[0]));
    }

    #[test]
    fn test_gap_resets_counter() {
        let mut t = tracker(FreezePolicy::PerFace);
        for _ in 0..4 {
            t.update(&[face(100.0)]);
        }
        assert_eq!(t.tracks()[0].consecutive_detections(), 4);

        t.update(&[]);
        assert!(t.tracks().is_empty());

        // Counting restarts from one; four more frames are not enough.
        for _ in 0..4 {
            assert!(t.update(&[face(100.0)]).is_empty());
        }
        assert_eq!(t.tracks()[0].consecutive_detections(), 4);
        assert_eq!(t.tracks()[0].state(), TrackState::Scanning);
        assert_eq!(t.update(&[face(100.0)]).len(), 1);
    }

    #[test]
    fn test_small_motion_keeps_slot() {
        let mut t = tracker(FreezePolicy::PerFace);
        t.update(&[face(100.0)]);
        t.update(&[face(110.0)]);
        assert_eq!(t.tracks().len(), 1);
        assert_eq!(t.tracks()[0].consecutive_detections(), 2);
        assert_eq!(t.tracks()[0].bbox().x, 110.0);
    }

    #[test]
    fn test_jump_opens_new_track() {
        let mut t = tracker(FreezePolicy::PerFace);
        t.update(&[face(0.0)]);
        t.update(&[face(400.0)]);
        assert_eq!(t.tracks().len(), 1);
        assert_eq!(t.tracks()[0].id(), TrackId(1));
        assert_eq!(t.tracks()[0].consecutive_detections(), 1);
    }

    #[test]
    fn test_countdown_decreases_until_expiry() {
        let mut t = tracker(FreezePolicy::PerFace);
        let start = Instant::now();
        for _ in 0..5 {
            t.update(&[face(100.0)]);
        }
        let id = t.tracks()[0].id();
        t.freeze(id, start);

        let mut last = t.countdown(start).unwrap();
        assert_eq!(last, Duration::from_secs(5));
        for step in 1..50u64 {
            let now = start + Duration::from_millis(100 * step);
            assert!(t.tick(now).is_empty());
            let left = t.countdown(now).unwrap();
            assert!(left < last, "countdown did not decrease at step {step}");
            last = left;
        }

        // Still frozen just before the deadline, scanning at it.
        assert!(t.tick(start + Duration::from_millis(4_999)).is_empty());
        assert_eq!(t.tick(start + Duration::from_secs(5)), vec![id]);
        let track = t.track(id).unwrap();
        assert_eq!(track.state(), TrackState::Scanning);
        assert_eq!(track.consecutive_detections(), 0);
        assert!(t.countdown(start + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_countdown_secs_rounds_up() {
        let mut t = tracker(FreezePolicy::PerFace);
        let start = Instant::now();
        for _ in 0..5 {
            t.update(&[face(100.0)]);
        }
        let id = t.tracks()[0].id();
        t.freeze(id, start);
        let track = t.track(id).unwrap();
        assert_eq!(track.countdown_secs(start + Duration::from_millis(200)), Some(5));
        assert_eq!(track.countdown_secs(start + Duration::from_millis(4_100)), Some(1));
    }

    #[test]
    fn test_record_result_restarts_window() {
        let mut t = tracker(FreezePolicy::PerFace);
        let start = Instant::now();
        for _ in 0..5 {
            t.update(&[face(100.0)]);
        }
        let id = t.tracks()[0].id();
        t.freeze(id, start);

        let finished = start + Duration::from_secs(2);
        t.track_mut(id).unwrap().record_result(Some(MatchResult::Unknown), finished);
        assert!(!t.recognition_due(id));
        assert_eq!(t.countdown(finished), Some(Duration::from_secs(5)));
        assert!(t.tick(start + Duration::from_secs(6)).is_empty());
        assert_eq!(t.tick(finished + Duration::from_secs(5)), vec![id]);
    }

    #[test]
    fn test_global_gate_follows_first_face() {
        let mut t = tracker(FreezePolicy::Global);
        // Second face appears two frames late; the first face drives the gate.
        t.update(&[face(0.0)]);
        t.update(&[face(0.0)]);
        for _ in 0..2 {
            assert!(t.update(&[face(0.0), face(400.0)]).is_empty());
        }
        let stabilized = t.update(&[face(0.0), face(400.0)]);
        assert_eq!(stabilized.len(), 2);

        let now = Instant::now();
        for id in &stabilized {
            t.freeze(*id, now);
        }
        assert!(!t.accepts_detections());
        assert_eq!(t.tick(now + Duration::from_secs(5)).len(), 2);
        assert!(t.accepts_detections());
    }

    #[test]
    fn test_per_face_keeps_detecting_while_frozen() {
        let mut t = tracker(FreezePolicy::PerFace);
        let now = Instant::now();
        for _ in 0..5 {
            t.update(&[face(0.0)]);
        }
        let frozen = t.tracks()[0].id();
        t.freeze(frozen, now);
        assert!(t.accepts_detections());

        // The frozen face is absorbed; a new face starts its own count.
        t.update(&[face(0.0), face(400.0)]);
        assert_eq!(t.tracks().len(), 2);
        assert_eq!(t.track(frozen).unwrap().state(), TrackState::Frozen);
        let other = t.tracks().iter().find(|tr| tr.id() != frozen).unwrap();
        assert_eq!(other.consecutive_detections(), 1);

        // Frozen tracks survive frames without detections.
        t.update(&[]);
        assert_eq!(t.tracks().len(), 1);
        assert_eq!(t.tracks()[0].id(), frozen);
    }

    #[test]
    fn test_off_policy_recognizes_every_frame() {
        let mut t = tracker(FreezePolicy::Off);
        for _ in 0..10 {
            assert!(t.update(&[face(0.0)]).is_empty());
        }
        let id = t.tracks()[0].id();
        assert_eq!(t.tracks()[0].state(), TrackState::Scanning);
        assert!(t.recognition_due(id));
    }

    #[test]
    fn test_freeze_requires_stabilizing() {
        let mut t = tracker(FreezePolicy::PerFace);
        t.update(&[face(0.0)]);
        let id = t.tracks()[0].id();
        assert!(!t.freeze(id, Instant::now()));
        assert!(!t.freeze(TrackId(99), Instant::now()));
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("global".parse::<FreezePolicy>().unwrap(), FreezePolicy::Global);
        assert_eq!("per-face".parse::<FreezePolicy>().unwrap(), FreezePolicy::PerFace);
        assert_eq!("off".parse::<FreezePolicy>().unwrap(), FreezePolicy::Off);
        assert!("sometimes".parse::<FreezePolicy>().is_err());
    }
}
