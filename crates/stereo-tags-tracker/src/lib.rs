//! Stereo detection and temporal tracking of square fiducial tags.
//!
//! The entry point is [`StereoTagTracker::track_tags_stereo`], called once
//! per synchronized stereo frame:
//! - known tags are tracked frame to frame in each camera,
//! - new tags are detected in both cameras and fused by triangulation,
//! - every tag keeps a bounded, outlier-pruned history of observations per
//!   camera that its pose is optimized over.
//!
//! Tag geometry, codec and decoding live in `stereo-tags-marker`.

mod history;
mod io;
mod tracker;

pub use history::{Observation, ObservationHistory, DEFAULT_MAX_OBSERVATIONS};
pub use io::{
    deserialize_tags, pose_from_matrix, pose_to_matrix, serialize_tags, DetectConfig,
    DetectReport, IoError, PoseMatrix, TagReport, TagSizeConfig, TrackerConfig,
};
pub use tracker::{
    is_tag_visible, CameraView, MotionType, StereoFrame, StereoTagTracker, TagObserver,
    TrackError, TrackOutput, TrackedTag, TrackerParams, TrackingState,
};
