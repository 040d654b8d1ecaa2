//! Where to put a result thumbnail next to a face, and what to label it.
//!
//! No pixels are drawn here. Placement tries the four corners around the box
//! in a fixed order and fails if none fits inside the frame; callers log the
//! failure and report the frame without that overlay.

use crate::matcher::MatchResult;
use crate::types::BoundingBox;
use serde::Serialize;
use thiserror::Error;

/// Side of the square result thumbnail, in pixels.
pub const PIVOT_SIZE: u32 = 112;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    #[error(
        "no room for a {size}px overlay around box at ({x}, {y}) \
         in a {frame_width}x{frame_height} frame"
    )]
    OutOfFrame {
        x: f32,
        y: f32,
        size: u32,
        frame_width: u32,
        frame_height: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopRight,
    BottomLeft,
    TopLeft,
    BottomRight,
}

/// Top-left pixel of the thumbnail plus the corner it was placed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlayAnchor {
    pub corner: Corner,
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

/// Place a `size`-pixel thumbnail beside `bbox`.
pub fn place(
    bbox: &BoundingBox,
    frame_width: u32,
    frame_height: u32,
    size: u32,
) -> Result<OverlayAnchor, OverlayError> {
    let (x, y) = (bbox.x.floor() as i64, bbox.y.floor() as i64);
    let (w, h) = (bbox.width.round() as i64, bbox.height.round() as i64);
    let (fw, fh, p) = (frame_width as i64, frame_height as i64, size as i64);

    let room_above = y - p > 0;
    let room_below = y + h + p < fh;
    let room_left = x - p > 0;
    let room_right = x + w + p < fw;

    let (corner, ax, ay) = if room_above && room_right {
        (Corner::TopRight, x + w, y - p)
    } else if room_below && room_left {
        (Corner::BottomLeft, x - p, y + h)
    } else if room_above && room_left {
        (Corner::TopLeft, x - p, y - p)
    } else if room_right && room_below {
        (Corner::BottomRight, x + w, y + h)
    } else {
        return Err(OverlayError::OutOfFrame {
            x: bbox.x,
            y: bbox.y,
            size,
            frame_width,
            frame_height,
        });
    };

    Ok(OverlayAnchor {
        corner,
        x: ax as u32,
        y: ay as u32,
        size,
    })
}

/// Text shown next to a face for a recognition result.
pub fn display_label(result: &MatchResult) -> String {
    match result {
        MatchResult::Known { identity, .. } => identity.to_uppercase(),
        MatchResult::Unknown => "UNKNOWN".to_string(),
        MatchResult::NoGalleryAvailable => "NO GALLERY".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_top_right() {
        let bbox = BoundingBox::new(200.0, 200.0, 150.0, 150.0);
        let anchor = place(&bbox, 640, 480, PIVOT_SIZE).unwrap();
        assert_eq!(anchor.corner, Corner::TopRight);
        assert_eq!((anchor.x, anchor.y), (350, 88));
    }

    #[test]
    fn test_falls_back_to_bottom_left() {
        // Touching the top edge and the right edge.
        let bbox = BoundingBox::new(400.0, 10.0, 200.0, 150.0);
        let anchor = place(&bbox, 640, 480, PIVOT_SIZE).unwrap();
        assert_eq!(anchor.corner, Corner::BottomLeft);
        assert_eq!((anchor.x, anchor.y), (288, 160));
    }

    #[test]
    fn test_top_left_when_bottom_and_right_blocked() {
        let bbox = BoundingBox::new(400.0, 300.0, 200.0, 150.0);
        let anchor = place(&bbox, 640, 480, PIVOT_SIZE).unwrap();
        assert_eq!(anchor.corner, Corner::TopLeft);
    }

    #[test]
    fn test_bottom_right_last() {
        let bbox = BoundingBox::new(20.0, 20.0, 150.0, 150.0);
        let anchor = place(&bbox, 640, 480, PIVOT_SIZE).unwrap();
        assert_eq!(anchor.corner, Corner::BottomRight);
    }

    #[test]
    fn test_face_filling_frame_has_no_room() {
        let bbox = BoundingBox::new(10.0, 10.0, 600.0, 440.0);
        assert!(matches!(place(&bbox, 640, 480, PIVOT_SIZE), Err(OverlayError::OutOfFrame { .. })));
    }

    #[test]
    fn test_display_labels() {
        let known = MatchResult::Known { identity: "alice".into(), distance: 0.1 };
        assert_eq!(display_label(&known), "ALICE");
        assert_eq!(display_label(&MatchResult::Unknown), "UNKNOWN");
        assert_eq!(display_label(&MatchResult::NoGalleryAvailable), "NO GALLERY");
    }
}
