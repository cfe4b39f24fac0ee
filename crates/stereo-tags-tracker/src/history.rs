//! Per-tag, per-camera correspondence log.

use nalgebra::{Point2, Point3};
use std::collections::VecDeque;
use stereo_tags_core::{Camera, Pose, PoseOptimizer, PoseView};

/// Retained observations per history unless configured otherwise.
pub const DEFAULT_MAX_OBSERVATIONS: usize = 15;

/// Correspondences of one tag in one camera frame.
///
/// The full point set drives pose optimization; the 4-point tracking set
/// (the outer corners) seeds next-frame prediction.
#[derive(Clone, Debug)]
pub struct Observation {
    world_t_camera: Pose,
    object_points: Vec<Point3<f64>>,
    image_points: Vec<Point2<f64>>,
    tracking_object_points: Vec<Point3<f64>>,
    tracking_image_points: Vec<Point2<f64>>,
}

impl Observation {
    /// Returns `None` if object and image point counts differ in either set.
    pub fn new(
        world_t_camera: Pose,
        object_points: Vec<Point3<f64>>,
        image_points: Vec<Point2<f64>>,
        tracking_object_points: Vec<Point3<f64>>,
        tracking_image_points: Vec<Point2<f64>>,
    ) -> Option<Self> {
        if object_points.len() != image_points.len()
            || tracking_object_points.len() != tracking_image_points.len()
        {
            return None;
        }
        Some(Self {
            world_t_camera,
            object_points,
            image_points,
            tracking_object_points,
            tracking_image_points,
        })
    }

    #[inline]
    pub fn world_t_camera(&self) -> &Pose {
        &self.world_t_camera
    }

    #[inline]
    pub fn object_points(&self) -> &[Point3<f64>] {
        &self.object_points
    }

    #[inline]
    pub fn image_points(&self) -> &[Point2<f64>] {
        &self.image_points
    }

    #[inline]
    pub fn tracking_object_points(&self) -> &[Point3<f64>] {
        &self.tracking_object_points
    }

    #[inline]
    pub fn tracking_image_points(&self) -> &[Point2<f64>] {
        &self.tracking_image_points
    }

    fn view<'a>(&'a self, camera: &'a dyn Camera) -> PoseView<'a> {
        PoseView {
            camera,
            world_t_camera: self.world_t_camera,
            object_points: &self.object_points,
            image_points: &self.image_points,
        }
    }

    /// True if more than `max_outliers` points reproject farther than the
    /// error bound under `world_t_tag`. Points behind the camera count as
    /// outliers.
    fn violates(
        &self,
        camera: &dyn Camera,
        world_t_tag: &Pose,
        max_sqr_error: f64,
        max_outlier_fraction: f64,
    ) -> bool {
        let camera_t_tag = self.world_t_camera.inverse() * world_t_tag;
        let max_outliers =
            (self.object_points.len() as f64 * max_outlier_fraction + 0.5).floor() as usize;

        let mut outliers = 0usize;
        for (p, u) in self.object_points.iter().zip(&self.image_points) {
            let is_outlier = camera
                .project(&camera_t_tag.transform_point(p))
                .is_none_or(|projected| (projected - u).norm_squared() > max_sqr_error);
            if is_outlier {
                outliers += 1;
                if outliers > max_outliers {
                    return true;
                }
            }
        }
        false
    }
}

/// Time-ordered, bounded sequence of [`Observation`]s of one tag in one
/// camera.
#[derive(Clone, Debug)]
pub struct ObservationHistory {
    observations: VecDeque<Observation>,
    max_observations: usize,
}

impl Default for ObservationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OBSERVATIONS)
    }
}

impl ObservationHistory {
    /// Empty history retaining at most `max_observations` entries (at least one).
    pub fn new(max_observations: usize) -> Self {
        Self {
            observations: VecDeque::new(),
            max_observations: max_observations.max(1),
        }
    }

    #[inline]
    pub fn max_observations(&self) -> usize {
        self.max_observations
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn clear(&mut self) {
        self.observations.clear();
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    #[inline]
    pub fn latest(&self) -> Option<&Observation> {
        self.observations.back()
    }

    /// Append an observation, dropping the oldest ones beyond the cap.
    pub fn add_observation(&mut self, observation: Observation) {
        self.observations.push_back(observation);
        while self.observations.len() > self.max_observations {
            self.observations.pop_front();
        }
    }

    /// Append every observation of `other`, oldest first, under this cap.
    pub fn append(&mut self, other: ObservationHistory) {
        for observation in other.observations {
            self.add_observation(observation);
        }
    }

    /// Drop observations inconsistent with `world_t_tag`.
    ///
    /// Observations are checked from newest to oldest. The first one with
    /// more than `round(n * max_outlier_fraction)` points farther than
    /// `max_error` pixels from their reprojection ends the scan, and it is
    /// removed together with everything older. Returns the removed count.
    pub fn remove_observations(
        &mut self,
        camera: &dyn Camera,
        world_t_tag: &Pose,
        max_error: f64,
        max_outlier_fraction: f64,
    ) -> usize {
        let max_sqr_error = max_error * max_error;
        let Some(violator) = self
            .observations
            .iter()
            .rposition(|o| o.violates(camera, world_t_tag, max_sqr_error, max_outlier_fraction))
        else {
            return 0;
        };

        let removed = violator + 1;
        self.observations.drain(..removed);
        removed
    }

    /// Refine `world_T_tag` over all retained observations of this camera.
    pub fn optimize_pose(
        &self,
        camera: &dyn Camera,
        optimizer: &dyn PoseOptimizer,
        initial_world_t_tag: &Pose,
    ) -> Option<Pose> {
        if self.is_empty() {
            return None;
        }
        let views: Vec<PoseView<'_>> = self.iter().map(|o| o.view(camera)).collect();
        optimizer.optimize(&views, initial_world_t_tag)
    }

    /// Refine `world_T_tag` jointly over the histories of two cameras.
    pub fn optimize_pose_stereo(
        camera_a: &dyn Camera,
        history_a: &ObservationHistory,
        camera_b: &dyn Camera,
        history_b: &ObservationHistory,
        optimizer: &dyn PoseOptimizer,
        initial_world_t_tag: &Pose,
    ) -> Option<Pose> {
        if history_a.is_empty() || history_b.is_empty() {
            return None;
        }
        let views: Vec<PoseView<'_>> = history_a
            .iter()
            .map(|o| o.view(camera_a))
            .chain(history_b.iter().map(|o| o.view(camera_b)))
            .collect();
        optimizer.optimize(&views, initial_world_t_tag)
    }

    /// Image points of the latest 4-point tracking set.
    pub fn latest_tracking_image_points(&self) -> Option<&[Point2<f64>]> {
        self.latest().map(Observation::tracking_image_points)
    }

    /// Object points of the latest 4-point tracking set.
    pub fn latest_tracking_object_points(&self) -> Option<&[Point3<f64>]> {
        self.latest().map(Observation::tracking_object_points)
    }
}
