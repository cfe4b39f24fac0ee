use crate::history::DEFAULT_MAX_OBSERVATIONS;
use serde::{Deserialize, Serialize};
use stereo_tags_core::{LucasKanadeParams, OptimizerParams};
use stereo_tags_marker::{QuadDetectorParams, ReaderParams};

/// Configuration of the stereo tag tracker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Minimum distance in pixels between tag corners and the image edge.
    pub frame_border: usize,
    /// History length from which a tracked tag counts as static.
    pub required_observations_for_static: usize,
    /// Observations retained per tag and camera.
    pub max_observations: usize,
    /// Full detection runs on every `detection_cadence`-th call, and on any
    /// call where no tag is tracked.
    pub detection_cadence: u64,
    /// Reprojection error in pixels above which a history point is an outlier.
    pub max_projection_error: f64,
    /// Fraction of outlier points tolerated per observation.
    pub max_outlier_fraction: f64,
    pub pyramid_layers: usize,
    /// Corner refinement window for temporally tracked corners.
    pub tracking_refine_window: usize,
    /// Corner refinement window when locating a known tag.
    pub locate_refine_window: usize,
    pub reader: ReaderParams,
    pub quad_detector: QuadDetectorParams,
    pub optimizer: OptimizerParams,
    pub tracker: LucasKanadeParams,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            frame_border: 10,
            required_observations_for_static: 5,
            max_observations: DEFAULT_MAX_OBSERVATIONS,
            detection_cadence: 15,
            max_projection_error: 0.5,
            max_outlier_fraction: 0.1,
            pyramid_layers: 6,
            tracking_refine_window: 3,
            locate_refine_window: 2,
            reader: ReaderParams::default(),
            quad_detector: QuadDetectorParams::default(),
            optimizer: OptimizerParams::default(),
            tracker: LucasKanadeParams::default(),
        }
    }
}
