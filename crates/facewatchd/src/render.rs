//! Headless renderer: reports what a display would show as log events.

use crate::engine::Renderer;
use facewatch_core::{FrameReport, MatchResult};
use facewatch_hw::Frame;

#[derive(Default)]
pub struct LogRenderer {
    last_countdown: Option<u32>,
}

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &Frame, report: &FrameReport) {
        for face in report.faces.iter().filter(|f| f.recognized_now) {
            let label = face.label.as_deref().unwrap_or("-");
            match &face.result {
                Some(MatchResult::Known { distance, .. }) => tracing::info!(
                    seq = frame.sequence,
                    track = %face.track,
                    label,
                    distance,
                    overlay = ?face.overlay.map(|a| a.corner),
                    "face recognized"
                ),
                Some(_) => tracing::info!(
                    seq = frame.sequence,
                    track = %face.track,
                    label,
                    "face not recognized"
                ),
                None => {}
            }
        }

        // One line per displayed second, not per frame.
        if report.countdown_secs != self.last_countdown {
            if let Some(secs) = report.countdown_secs {
                tracing::debug!(secs, frozen = report.reference.is_some(), "freeze countdown");
            }
            self.last_countdown = report.countdown_secs;
        }

        if !report.degradations.is_empty() {
            tracing::debug!(
                seq = frame.sequence,
                problems = ?report.degradations,
                "frame degraded"
            );
        }
    }
}
