//! facewatch-hw — V4L2 camera capture for the frame loop.
//!
//! Opens a capture device, keeps one mmap stream alive for the session, and
//! hands out grayscale frames as `image::GrayImage`.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
