//! High-level facade crate for the `stereo-tags-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometry, marker and tracker crates,
//! - (feature `image`) helpers that read frames through the `image` crate
//!   and run single-image detection,
//! - (feature `cli`) the `stereo-tags` command line tool.
//!
//! ## Quickstart
//!
//! ```no_run
//! use stereo_tags::core::{GrayImageView, PinholeCamera, Pose};
//! use stereo_tags::{StereoFrame, StereoTagTracker};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let camera_a = PinholeCamera::new(640, 480, 500.0, 500.0, 319.5, 239.5);
//! let camera_b = camera_a;
//! let (left, right) = (vec![0u8; 640 * 480], vec![0u8; 640 * 480]);
//!
//! let mut tracker = StereoTagTracker::default();
//! let frame = StereoFrame {
//!     camera_a: &camera_a,
//!     camera_b: &camera_b,
//!     frame_a: GrayImageView { width: 640, height: 480, data: &left },
//!     frame_b: GrayImageView { width: 640, height: 480, data: &right },
//!     world_t_device: Pose::identity(),
//!     device_t_camera_a: Pose::identity(),
//!     device_t_camera_b: Pose::translation(0.1, 0.0, 0.0),
//! };
//! let out = tracker.track_tags_stereo(&frame)?;
//! println!("visible tags: {}", out.tags.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `stereo_tags::core`: cameras, poses, images, homographies, optimizers.
//! - `stereo_tags::marker`: tag codec, module layout, quad detection, decoding.
//! - `stereo_tags::tracker`: observation histories, stereo fusion, tracking.
//! - `stereo_tags::detect` (feature `image`): helpers over `image::GrayImage`.

pub use stereo_tags_core as core;
pub use stereo_tags_marker as marker;
pub use stereo_tags_tracker as tracker;

pub use stereo_tags_marker::{Reflectance, Tag, TagSizeMap};
pub use stereo_tags_tracker::{
    CameraView, MotionType, StereoFrame, StereoTagTracker, TrackError, TrackOutput, TrackedTag,
    TrackerParams, TrackingState,
};

#[cfg(feature = "image")]
pub mod detect;
