//! Fusion of independent per-camera detections into metric tags.

use super::{CameraView, TagObserver, TrackedTag};
use crate::history::ObservationHistory;
use nalgebra::Point2;
use stereo_tags_core::{is_finite_pose, Triangulator};
use stereo_tags_marker::layout::outer_corners;
use stereo_tags_marker::{Quad, Tag, TagSizeMap};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Mono detection runs at this size; the true scale comes from triangulation.
const PLACEHOLDER_SIZE: f64 = 1.0;

/// Projected outer corners of a mono detection.
fn projected_quad(view: &CameraView<'_>, tag: &Tag) -> Option<Quad> {
    let camera_t_tag = view.world_t_camera().inverse() * tag.world_t_tag;
    let corners = outer_corners(tag.size);
    let mut quad: Quad = [Point2::origin(); 4];
    for (pixel, p) in quad.iter_mut().zip(corners.iter()) {
        *pixel = view.camera.project(&camera_t_tag.transform_point(p))?;
    }
    Some(quad)
}

/// Build a metric tag from one detection per camera with equal id and
/// reflectance. Returns `None` if triangulation, pose estimation or
/// observation building fails.
fn fuse(
    observer: &TagObserver,
    triangulator: &dyn Triangulator,
    views: &[CameraView<'_>; 2],
    tag_a: &Tag,
    tag_b: &Tag,
) -> Option<TrackedTag> {
    let quads = [projected_quad(&views[0], tag_a)?, projected_quad(&views[1], tag_b)?];
    let world_t_cameras = [views[0].world_t_camera(), views[1].world_t_camera()];

    let corners = triangulator
        .triangulate(
            views[0].camera,
            views[1].camera,
            &world_t_cameras[0],
            &world_t_cameras[1],
            &quads[0],
            &quads[1],
        )
        .into_iter()
        .collect::<Option<Vec<_>>>()?;
    if corners.len() != 4 {
        return None;
    }

    let perimeter: f64 = (0..4)
        .map(|i| (corners[(i + 1) % 4] - corners[i]).norm())
        .sum();
    let size = perimeter / 4.0;
    if !(size.is_finite() && size > 0.0) {
        return None;
    }

    let world_t_tag = (0..2).find_map(|i| {
        observer
            .reader()
            .solve_pose(views[i].camera, &quads[i], size)
            .ok()
            .filter(is_finite_pose)
            .map(|camera_t_tag| world_t_cameras[i] * camera_t_tag)
    })?;

    let threshold =
        ((tag_a.intensity_threshold as u16 + tag_b.intensity_threshold as u16 + 1) / 2) as u8;
    let mut tag = Tag::new(tag_a.id, tag_a.reflectance, threshold, world_t_tag, size);

    let mut histories = [observer.new_history(), observer.new_history()];
    for ((view, quad), history) in views.iter().zip(&quads).zip(histories.iter_mut()) {
        if !observer.add_tag_observation(view, &tag, quad, history) {
            log::debug!("tag {}: stereo observation failed", tag.id);
            return None;
        }
    }

    if let Some(optimized) = ObservationHistory::optimize_pose_stereo(
        views[0].camera,
        &histories[0],
        views[1].camera,
        &histories[1],
        observer.optimizer(),
        &tag.world_t_tag,
    )
    .filter(is_finite_pose)
    {
        tag.world_t_tag = optimized;
    }

    log::debug!("tag {}: fused, size {size:.4}", tag.id);
    Some(TrackedTag::new(tag, histories))
}

/// Detect tags in both cameras and pair them by id and reflectance.
///
/// Each detection is consumed by at most one pair; the pairs become new
/// tracked tags in the new-detection state.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub(crate) fn detect_tags_stereo(
    observer: &TagObserver,
    triangulator: &dyn Triangulator,
    views: &[CameraView<'_>; 2],
) -> Vec<TrackedTag> {
    let no_sizes = TagSizeMap::new();
    let detections_a = observer.detect_tags_mono(&views[0], PLACEHOLDER_SIZE, &no_sizes);
    let detections_b = observer.detect_tags_mono(&views[1], PLACEHOLDER_SIZE, &no_sizes);

    let mut used_b = vec![false; detections_b.len()];
    let mut fused = Vec::new();

    for (tag_a, _) in &detections_a {
        for (j, (tag_b, _)) in detections_b.iter().enumerate() {
            if used_b[j] || tag_a.id != tag_b.id || tag_a.reflectance != tag_b.reflectance {
                continue;
            }
            if let Some(tracked) = fuse(observer, triangulator, views, tag_a, tag_b) {
                used_b[j] = true;
                fused.push(tracked);
                break;
            }
        }
    }

    log::trace!(
        "stereo detection: {} + {} mono tags, {} fused",
        detections_a.len(),
        detections_b.len(),
        fused.len()
    );
    fused
}
