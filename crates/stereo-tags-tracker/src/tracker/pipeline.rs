use super::observe::is_tag_visible;
use super::stereo::detect_tags_stereo;
use super::temporal::{track_tag_in_camera, PyramidPair};
use super::{
    CameraView, MotionType, StereoFrame, TagObserver, TrackError, TrackedTag, TrackerParams,
    TrackingState,
};
use crate::history::ObservationHistory;
use nalgebra::Point2;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use stereo_tags_core::{
    estimate_homography, warp_perspective_gray, CornerRefiner, FramePyramid, GrayImage,
    GrayImageView, MidpointTriangulator, PointTracker, Pose, PoseOptimizer, PoseSolver,
    PyramidalLucasKanade, Triangulator,
};
use stereo_tags_marker::layout::{center, outer_corners};
use stereo_tags_marker::{QuadDetector, Tag};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Visible tags of one tracker call, sorted by id.
#[derive(Clone, Debug, Default)]
pub struct TrackOutput {
    pub tags: Vec<Tag>,
}

impl TrackOutput {
    #[inline]
    pub fn found_any(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// What the tracker keeps of the last call.
#[derive(Clone, Debug)]
struct PreviousFrame {
    pyramids: [FramePyramid; 2],
    world_t_device: Pose,
    device_t_cameras: [Pose; 2],
}

/// Stereo fiducial tag tracker.
///
/// Each call to [`StereoTagTracker::track_tags_stereo`] advances known tags
/// with temporal tracking, runs full stereo detection when nothing is
/// tracked or on the detection cadence, and reports the visible tags.
pub struct StereoTagTracker {
    observer: TagObserver,
    point_tracker: Box<dyn PointTracker>,
    triangulator: Box<dyn Triangulator>,
    tracked: BTreeMap<u32, TrackedTag>,
    previous: Option<PreviousFrame>,
    frame_counter: u64,
}

impl std::fmt::Debug for StereoTagTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StereoTagTracker")
            .field("observer", &self.observer)
            .field("tracked", &self.tracked.len())
            .field("frame_counter", &self.frame_counter)
            .finish_non_exhaustive()
    }
}

impl Default for StereoTagTracker {
    fn default() -> Self {
        Self::new(TrackerParams::default())
    }
}

impl StereoTagTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            point_tracker: Box::new(PyramidalLucasKanade::new(params.tracker.clone())),
            triangulator: Box::new(MidpointTriangulator),
            observer: TagObserver::new(params),
            tracked: BTreeMap::new(),
            previous: None,
            frame_counter: 0,
        }
    }

    pub fn with_quad_detector(mut self, detector: Box<dyn QuadDetector>) -> Self {
        self.observer = self.observer.with_quad_detector(detector);
        self
    }

    pub fn with_corner_refiner(mut self, refiner: Box<dyn CornerRefiner>) -> Self {
        self.observer = self.observer.with_corner_refiner(refiner);
        self
    }

    pub fn with_pose_solver(mut self, solver: Box<dyn PoseSolver>) -> Self {
        self.observer = self.observer.with_pose_solver(solver);
        self
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn PoseOptimizer>) -> Self {
        self.observer = self.observer.with_optimizer(optimizer);
        self
    }

    pub fn with_point_tracker(mut self, tracker: Box<dyn PointTracker>) -> Self {
        self.point_tracker = tracker;
        self
    }

    pub fn with_triangulator(mut self, triangulator: Box<dyn Triangulator>) -> Self {
        self.triangulator = triangulator;
        self
    }

    #[inline]
    pub fn params(&self) -> &TrackerParams {
        self.observer.params()
    }

    /// Single-camera operations sharing this tracker's collaborators.
    #[inline]
    pub fn observer(&self) -> &TagObserver {
        &self.observer
    }

    /// Every tag seen so far, including dormant ones, keyed by id.
    #[inline]
    pub fn tracked_tags(&self) -> &BTreeMap<u32, TrackedTag> {
        &self.tracked
    }

    #[inline]
    pub fn tracked_tag(&self, id: u32) -> Option<&TrackedTag> {
        self.tracked.get(&id)
    }

    /// Number of completed calls since construction or the last reset.
    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Full-resolution frame of camera `index` (0 = A) from the last call.
    pub fn previous_frame(&self, index: usize) -> Option<GrayImageView<'_>> {
        self.previous
            .as_ref()
            .and_then(|p| p.pyramids.get(index))
            .map(FramePyramid::finest)
    }

    /// Device pose and camera extrinsics of the last call.
    pub fn previous_poses(&self) -> Option<(Pose, [Pose; 2])> {
        self.previous
            .as_ref()
            .map(|p| (p.world_t_device, p.device_t_cameras))
    }

    /// Forget all tags and the previous frame.
    pub fn reset(&mut self) {
        self.tracked.clear();
        self.previous = None;
        self.frame_counter = 0;
    }

    /// Process one synchronized stereo frame.
    ///
    /// Only invalid inputs are errors. Tags that fail to track or decode are
    /// left un-updated and reported as not visible.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(frame = self.frame_counter))
    )]
    pub fn track_tags_stereo(
        &mut self,
        frame: &StereoFrame<'_>,
    ) -> Result<TrackOutput, TrackError> {
        let params = self.observer.params().clone();
        let views = frame.views();
        for (index, view) in views.iter().enumerate() {
            view.validate(index, params.frame_border)?;
        }
        let pyramids = views
            .each_ref()
            .map(|v| FramePyramid::new(&v.image, params.pyramid_layers));

        let mut visible = BTreeSet::new();
        self.track_known_tags(&views, &pyramids, &mut visible);

        let cadence = params.detection_cadence.max(1);
        if visible.is_empty() || self.frame_counter % cadence == 0 {
            self.merge_detections(&views, &mut visible);
        }

        let tags: Vec<Tag> = visible
            .iter()
            .filter_map(|id| self.tracked.get(id))
            .map(|t| t.tag)
            .collect();

        log::trace!(
            "frame {}: {} visible of {} known tags",
            self.frame_counter,
            tags.len(),
            self.tracked.len()
        );

        self.previous = Some(PreviousFrame {
            pyramids,
            world_t_device: frame.world_t_device,
            device_t_cameras: [frame.device_t_camera_a, frame.device_t_camera_b],
        });
        self.frame_counter += 1;

        Ok(TrackOutput { tags })
    }

    fn track_known_tags(
        &mut self,
        views: &[CameraView<'_>; 2],
        pyramids: &[FramePyramid; 2],
        visible: &mut BTreeSet<u32>,
    ) {
        let required_for_static = self.observer.params().required_observations_for_static;

        for (&id, tracked) in self.tracked.iter_mut() {
            if !tracked.state.is_active() {
                continue;
            }

            let mut results: [Option<Tag>; 2] = [None, None];
            if let Some(previous) = &self.previous {
                for (i, result) in results.iter_mut().enumerate() {
                    if !previous.pyramids[i].is_compatible(&pyramids[i]) {
                        continue;
                    }
                    let pair = PyramidPair {
                        previous: &previous.pyramids[i],
                        current: &pyramids[i],
                    };
                    *result = track_tag_in_camera(
                        &self.observer,
                        self.point_tracker.as_ref(),
                        &views[i],
                        pair,
                        &tracked.tag,
                        &mut tracked.histories[i],
                    );
                }
            }

            let previous_state = tracked.state;
            tracked.state = TrackingState::NotTracking;
            tracked.motion = MotionType::Unknown;

            let updated = match results {
                [Some(mut tag_a), Some(_)] => {
                    if let Some(pose) = ObservationHistory::optimize_pose_stereo(
                        views[0].camera,
                        &tracked.histories[0],
                        views[1].camera,
                        &tracked.histories[1],
                        self.observer.optimizer(),
                        &tag_a.world_t_tag,
                    ) {
                        tag_a.world_t_tag = pose;
                    }
                    tag_a
                }
                [Some(tag), None] | [None, Some(tag)] => tag,
                [None, None] => {
                    log::debug!("tag {id}: {previous_state:?} -> NotTracking");
                    continue;
                }
            };

            tracked.tag = updated;
            tracked.state = TrackingState::Tracking;
            tracked.motion = if tracked.max_history_len() < required_for_static {
                MotionType::Dynamic
            } else {
                MotionType::Static
            };
            if previous_state != TrackingState::Tracking {
                log::debug!("tag {id}: {previous_state:?} -> Tracking");
            }
            visible.insert(id);
        }
    }

    fn merge_detections(&mut self, views: &[CameraView<'_>; 2], visible: &mut BTreeSet<u32>) {
        let params = self.observer.params();
        let detections = detect_tags_stereo(&self.observer, self.triangulator.as_ref(), views);

        for detected in detections {
            let id = detected.tag.id;
            match self.tracked.entry(id) {
                Entry::Vacant(entry) => {
                    log::debug!("tag {id}: new detection");
                    entry.insert(detected);
                    visible.insert(id);
                }
                Entry::Occupied(mut entry) => {
                    let tracked = entry.get_mut();
                    if tracked.state == TrackingState::Tracking {
                        continue;
                    }

                    tracked.tag = detected.tag;
                    let mut removed = 0;
                    for ((history, fresh), view) in tracked
                        .histories
                        .iter_mut()
                        .zip(detected.histories)
                        .zip(views.iter())
                    {
                        removed += history.remove_observations(
                            view.camera,
                            &tracked.tag.world_t_tag,
                            params.max_projection_error,
                            params.max_outlier_fraction,
                        );
                        history.append(fresh);
                    }

                    log::debug!("tag {id}: {:?} -> NewDetection", tracked.state);
                    tracked.state = TrackingState::NewDetection;
                    tracked.motion = if removed == 0 {
                        MotionType::Static
                    } else {
                        MotionType::Dynamic
                    };
                    visible.insert(id);
                }
            }
        }
    }

    /// Square `size × size` image of a tag, warped from the camera that
    /// sees it fully, or from the one seeing it nearer its image center if
    /// both do.
    pub fn extract_rectified_tag_image(
        &self,
        frame: &StereoFrame<'_>,
        tag: &Tag,
        size: usize,
    ) -> Option<GrayImage> {
        if !tag.is_valid() || size == 0 {
            return None;
        }
        let border = self.observer.params().frame_border as f64;
        let views = frame.views();
        let camera_t_tags = views
            .each_ref()
            .map(|v| v.world_t_camera().inverse() * tag.world_t_tag);
        let visible = [0, 1].map(|i| {
            is_tag_visible(views[i].camera, &camera_t_tags[i], tag.size, border)
        });

        let index = match visible {
            [true, true] => {
                let distance = |i: usize| {
                    let view = &views[i];
                    let image_center = Point2::new(
                        0.5 * view.image.width as f64,
                        0.5 * view.image.height as f64,
                    );
                    view.camera
                        .project(&camera_t_tags[i].transform_point(&center(tag.size)))
                        .map_or(f64::INFINITY, |p| (p - image_center).norm_squared())
                };
                if distance(0) < distance(1) {
                    0
                } else {
                    1
                }
            }
            [true, false] => 0,
            [false, true] => 1,
            [false, false] => return None,
        };

        let view = &views[index];
        let mut image_corners = Vec::with_capacity(4);
        for p in outer_corners(tag.size) {
            image_corners.push(view.camera.project(&camera_t_tags[index].transform_point(&p))?);
        }
        // Outer edges of the rectified image, in pixel-center coordinates.
        let far = size as f64 - 0.5;
        let rectified_corners = [
            Point2::new(-0.5, -0.5),
            Point2::new(-0.5, far),
            Point2::new(far, far),
            Point2::new(far, -0.5),
        ];
        let h = estimate_homography(&rectified_corners, &image_corners)?;
        Some(warp_perspective_gray(&view.image, h, size, size))
    }
}
