//! Frame-to-frame tracking of one known tag in one camera.

use super::observe::is_tag_visible;
use super::{CameraView, TagObserver};
use crate::history::ObservationHistory;
use nalgebra::Point2;
use stereo_tags_core::{FramePyramid, PointTracker};
use stereo_tags_marker::{Quad, Tag, TagSizeMap};

/// Pyramids of the previous and the current frame of one camera.
#[derive(Clone, Copy)]
pub(crate) struct PyramidPair<'a> {
    pub previous: &'a FramePyramid,
    pub current: &'a FramePyramid,
}

/// Advance `tag` by one frame in one camera.
///
/// The tag is assumed static in the world: its stored pose is projected
/// through the current camera pose to predict the outer corners, which are
/// then tracked from the previous frame, refined and decoded again. On
/// success the history is pruned against the new pose, the new observation
/// is appended, and the re-read tag is returned.
pub(crate) fn track_tag_in_camera(
    observer: &TagObserver,
    point_tracker: &dyn PointTracker,
    view: &CameraView<'_>,
    pyramids: PyramidPair<'_>,
    tag: &Tag,
    history: &mut ObservationHistory,
) -> Option<Tag> {
    if history.is_empty() {
        return None;
    }
    let params = observer.params();
    let border = observer.border();
    let world_t_camera = view.world_t_camera();
    let camera_t_tag = world_t_camera.inverse() * tag.world_t_tag;
    if !is_tag_visible(view.camera, &camera_t_tag, tag.size, border) {
        log::trace!("tag {} out of view", tag.id);
        return None;
    }

    let object_points = history.latest_tracking_object_points()?;
    let previous_points = history.latest_tracking_image_points()?;
    let predicted = object_points
        .iter()
        .map(|p| {
            view.camera
                .project(&camera_t_tag.transform_point(p))
                .filter(|pixel| view.camera.is_inside(pixel, border))
        })
        .collect::<Option<Vec<Point2<f64>>>>()?;

    let Some(tracked) =
        point_tracker.track(pyramids.previous, pyramids.current, previous_points, &predicted)
    else {
        log::debug!("tag {}: point tracking failed", tag.id);
        return None;
    };
    if tracked.len() < 4 {
        return None;
    }

    let mut quad: Quad = [Point2::origin(); 4];
    for (corner, point) in quad.iter_mut().zip(&tracked) {
        *corner = observer
            .refiner()
            .refine(&view.image, *point, params.tracking_refine_window)?;
    }

    let (mut current, quad) = match observer.read_tag(view, &quad, tag.size, &TagSizeMap::new()) {
        Ok(read) => read,
        Err(err) => {
            log::debug!("tag {}: re-read failed: {err}", tag.id);
            return None;
        }
    };
    if current.id != tag.id {
        log::debug!("tag {}: tracked quad decodes as {}", tag.id, current.id);
        return None;
    }

    let mut fresh = observer.new_history();
    if !observer.add_tag_observation_and_optimize(view, &mut current, &quad, &mut fresh) {
        return None;
    }

    let removed = history.remove_observations(
        view.camera,
        &current.world_t_tag,
        params.max_projection_error,
        params.max_outlier_fraction,
    );
    if removed > 0 {
        log::trace!("tag {}: pruned {removed} observations", tag.id);
    }
    history.append(fresh);
    Some(current)
}
