//! Core geometry and image utilities for stereo fiducial tag tracking.
//!
//! This crate holds the building blocks the detector and tracker are
//! assembled from:
//! - grayscale image views, bilinear sampling and frame pyramids,
//! - the [`Camera`] projection trait and a [`PinholeCamera`],
//! - planar homographies, pose solving and robust pose refinement,
//! - two-view triangulation, pyramidal point tracking and sub-pixel
//!   corner refinement.
//!
//! Every collaborator is exposed as a trait with a default implementation
//! so callers can inject their own.

mod camera;
mod homography;
mod image;
mod klt;
mod logger;
mod optimize;
mod pose;
mod refine;
mod triangulate;

pub use camera::{Camera, PinholeCamera};
pub use homography::{
    estimate_homography, homography_from_4pt, warp_perspective_gray, Homography,
};
pub use image::{
    sample_bilinear, sample_bilinear_clamped, sample_bilinear_u8, FramePyramid, GrayImage,
    GrayImageView,
};
pub use klt::{LucasKanadeParams, PointTracker, PyramidalLucasKanade};
pub use optimize::{LevenbergMarquardt, OptimizerParams, PoseOptimizer, PoseView, RobustLoss};
pub use pose::{is_finite_pose, PlanarPoseSolver, Pose, PoseSolver, PoseSolverParams};
pub use refine::{CornerRefiner, GradientCornerRefiner};
pub use triangulate::{MidpointTriangulator, Triangulator};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
