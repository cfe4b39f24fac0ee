//! Stereo tag tracking pipeline.
//!
//! This module wires together mono detection, stereo fusion of per-camera
//! detections, per-camera temporal tracking, and the per-tag state machine.

mod error;
mod input;
mod observe;
mod params;
mod pipeline;
mod state;
mod stereo;
mod temporal;

pub use error::TrackError;
pub use input::{CameraView, StereoFrame};
pub use observe::{is_tag_visible, TagObserver};
pub use params::TrackerParams;
pub use pipeline::{StereoTagTracker, TrackOutput};
pub use state::{MotionType, TrackedTag, TrackingState};
