//! Single-camera detection and observation building.

use super::{CameraView, TrackerParams};
use crate::history::{Observation, ObservationHistory};
use nalgebra::Point2;
use stereo_tags_core::{
    Camera, CornerRefiner, GradientCornerRefiner, LevenbergMarquardt, Pose, PoseOptimizer,
    PoseSolver,
};
use stereo_tags_marker::layout::{
    data_matrix_corners, inner_corners, module_values, outer_corners,
};
use stereo_tags_marker::{
    min_edge_length, ContourQuadDetector, Quad, QuadDetector, ReadError, Tag, TagReader,
    TagSizeMap,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// True if all four outer corners of a tag at `camera_T_tag` project at
/// least `border` pixels inside the image. Corners behind the camera fail.
pub fn is_tag_visible(camera: &dyn Camera, camera_t_tag: &Pose, size: f64, border: f64) -> bool {
    outer_corners(size).iter().all(|p| {
        camera
            .project(&camera_t_tag.transform_point(p))
            .is_some_and(|pixel| camera.is_inside(&pixel, border))
    })
}

/// Refinement window for tag corners, from the shortest quad edge in pixels.
fn refine_window(quad: &Quad) -> usize {
    let edge = min_edge_length(quad);
    if edge < 50.0 {
        2
    } else if edge < 100.0 {
        3
    } else {
        4
    }
}

/// Reads tags in single frames and turns them into observations.
///
/// Owns the collaborators shared by mono detection, stereo fusion and
/// temporal tracking: the quad detector, the tag reader, the corner
/// refiner and the pose optimizer.
pub struct TagObserver {
    params: TrackerParams,
    reader: TagReader,
    quad_detector: Box<dyn QuadDetector>,
    refiner: Box<dyn CornerRefiner>,
    optimizer: Box<dyn PoseOptimizer>,
}

impl std::fmt::Debug for TagObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagObserver")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Default for TagObserver {
    fn default() -> Self {
        Self::new(TrackerParams::default())
    }
}

impl TagObserver {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            reader: TagReader::new(params.reader.clone()),
            quad_detector: Box::new(ContourQuadDetector::new(params.quad_detector.clone())),
            refiner: Box::new(GradientCornerRefiner::default()),
            optimizer: Box::new(LevenbergMarquardt::new(params.optimizer.clone())),
            params,
        }
    }

    pub fn with_quad_detector(mut self, detector: Box<dyn QuadDetector>) -> Self {
        self.quad_detector = detector;
        self
    }

    pub fn with_corner_refiner(mut self, refiner: Box<dyn CornerRefiner>) -> Self {
        self.refiner = refiner;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn PoseOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_pose_solver(mut self, solver: Box<dyn PoseSolver>) -> Self {
        self.reader = self.reader.with_pose_solver(solver);
        self
    }

    #[inline]
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    #[inline]
    pub fn reader(&self) -> &TagReader {
        &self.reader
    }

    #[inline]
    pub fn refiner(&self) -> &dyn CornerRefiner {
        self.refiner.as_ref()
    }

    #[inline]
    pub fn optimizer(&self) -> &dyn PoseOptimizer {
        self.optimizer.as_ref()
    }

    #[inline]
    pub(crate) fn border(&self) -> f64 {
        self.params.frame_border as f64
    }

    /// Empty history with the configured cap.
    pub fn new_history(&self) -> ObservationHistory {
        ObservationHistory::new(self.params.max_observations)
    }

    /// Run the decode pipeline on `quad` in this view.
    pub fn read_tag(
        &self,
        view: &CameraView<'_>,
        quad: &Quad,
        size: f64,
        size_map: &TagSizeMap,
    ) -> Result<(Tag, Quad), ReadError> {
        self.reader.read(
            view.camera,
            &view.image,
            quad,
            &view.world_t_camera(),
            size,
            size_map,
        )
    }

    /// Append one observation of `tag` seen at `quad`.
    ///
    /// The observation holds the four outer corners at `quad` plus every
    /// inner and data-matrix corner the refiner accepts. Fails if the tag
    /// is not fully inside the frame border.
    pub fn add_tag_observation(
        &self,
        view: &CameraView<'_>,
        tag: &Tag,
        quad: &Quad,
        history: &mut ObservationHistory,
    ) -> bool {
        let world_t_camera = view.world_t_camera();
        let camera_t_tag = world_t_camera.inverse() * tag.world_t_tag;
        if !is_tag_visible(view.camera, &camera_t_tag, tag.size, self.border()) {
            return false;
        }
        let Some(pattern) = self.reader.codec().encode(tag.id) else {
            return false;
        };

        let corners = outer_corners(tag.size);
        let mut object_points = corners.to_vec();
        let mut image_points = quad.to_vec();

        let window = refine_window(quad);
        let modules = module_values(pattern);
        let extra = inner_corners(tag.size)
            .into_iter()
            .chain(data_matrix_corners(&modules, tag.size, true));
        for p in extra {
            let refined = view
                .camera
                .project(&camera_t_tag.transform_point(&p))
                .filter(|pixel| view.camera.is_inside(pixel, 0.0))
                .and_then(|pixel| self.refiner.refine(&view.image, pixel, window));
            if let Some(pixel) = refined {
                object_points.push(p);
                image_points.push(pixel);
            }
        }

        let Some(observation) = Observation::new(
            world_t_camera,
            object_points,
            image_points,
            corners.to_vec(),
            quad.to_vec(),
        ) else {
            return false;
        };
        history.add_observation(observation);
        true
    }

    /// [`TagObserver::add_tag_observation`], then refine the tag pose over
    /// the whole history.
    pub fn add_tag_observation_and_optimize(
        &self,
        view: &CameraView<'_>,
        tag: &mut Tag,
        quad: &Quad,
        history: &mut ObservationHistory,
    ) -> bool {
        if !self.add_tag_observation(view, tag, quad, history) {
            return false;
        }
        match history.optimize_pose(view.camera, self.optimizer.as_ref(), &tag.world_t_tag) {
            Some(world_t_tag) => {
                tag.world_t_tag = world_t_tag;
                true
            }
            None => false,
        }
    }

    /// Detect and decode every tag in one frame.
    ///
    /// Tags of unknown size are assumed to be `default_size` wide. Each
    /// result carries a one-entry history.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, view, size_map))
    )]
    pub fn detect_tags_mono(
        &self,
        view: &CameraView<'_>,
        default_size: f64,
        size_map: &TagSizeMap,
    ) -> Vec<(Tag, ObservationHistory)> {
        let quads = self.quad_detector.detect(&view.image, self.params.frame_border);
        let mut out = Vec::new();
        for candidate in &quads {
            let (mut tag, quad) = match self.read_tag(view, candidate, default_size, size_map) {
                Ok(read) => read,
                Err(err) => {
                    log::trace!("quad rejected: {err}");
                    continue;
                }
            };
            let mut history = self.new_history();
            if self.add_tag_observation_and_optimize(view, &mut tag, &quad, &mut history) {
                out.push((tag, history));
            } else {
                log::debug!("tag {} decoded but its observation failed", tag.id);
            }
        }
        log::trace!("mono detection: {} quads, {} tags", quads.len(), out.len());
        out
    }

    /// Find a known tag in a camera that did not detect it.
    ///
    /// The outer corners are predicted from the tag pose, refined, and read
    /// again at the tag's size. Returns a one-entry history if the same id
    /// decodes.
    pub fn locate_tag_in_camera(
        &self,
        view: &CameraView<'_>,
        tag: &Tag,
    ) -> Option<ObservationHistory> {
        let camera_t_tag = view.world_t_camera().inverse() * tag.world_t_tag;
        if !is_tag_visible(view.camera, &camera_t_tag, tag.size, self.border()) {
            return None;
        }

        let mut predicted: Quad = [Point2::origin(); 4];
        for (pixel, p) in predicted.iter_mut().zip(outer_corners(tag.size).iter()) {
            let projected = view.camera.project(&camera_t_tag.transform_point(p))?;
            *pixel = self.refiner.refine(
                &view.image,
                projected,
                self.params.locate_refine_window,
            )?;
        }

        let (mut located, quad) = self
            .read_tag(view, &predicted, tag.size, &TagSizeMap::new())
            .ok()?;
        if located.id != tag.id {
            return None;
        }
        let mut history = self.new_history();
        self.add_tag_observation_and_optimize(view, &mut located, &quad, &mut history)
            .then_some(history)
    }

    /// True if the tag is fully visible and its payload still decodes to
    /// its id at the known pose and threshold.
    pub fn confirm_detection_in_frame(&self, view: &CameraView<'_>, tag: &Tag) -> bool {
        if !tag.is_valid() {
            return false;
        }
        let world_t_camera = view.world_t_camera();
        let camera_t_tag = world_t_camera.inverse() * tag.world_t_tag;
        is_tag_visible(view.camera, &camera_t_tag, tag.size, self.border())
            && self
                .reader
                .verify(view.camera, &view.image, &world_t_camera, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};
    use stereo_tags_core::PinholeCamera;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(320, 240, 300.0, 300.0, 159.5, 119.5)
    }

    fn facing(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        )
    }

    #[test]
    fn visibility_respects_border_and_depth() {
        let cam = camera();
        assert!(is_tag_visible(&cam, &facing(-0.05, -0.05, 0.5), 0.1, 10.0));
        // Left corners at x = -0.3 m project outside the image.
        assert!(!is_tag_visible(&cam, &facing(-0.3, -0.05, 0.5), 0.1, 10.0));
        // Behind the camera.
        assert!(!is_tag_visible(&cam, &facing(-0.05, -0.05, -0.5), 0.1, 0.0));
    }

    #[test]
    fn window_grows_with_tag_size() {
        let square = |s: f64| -> Quad {
            [
                Point2::new(0.0, 0.0),
                Point2::new(0.0, s),
                Point2::new(s, s),
                Point2::new(s, 0.0),
            ]
        };
        assert_eq!(refine_window(&square(30.0)), 2);
        assert_eq!(refine_window(&square(60.0)), 3);
        assert_eq!(refine_window(&square(150.0)), 4);
    }
}
