use nalgebra::{Point2, Translation3, UnitQuaternion};
use std::collections::HashMap;
use stereo_tags_core::{Camera, CornerRefiner, GrayImage, GrayImageView, PinholeCamera, Pose};
use stereo_tags_marker::layout::{module_values, outer_corners, ModuleGrid, MODULES_PER_SIDE};
use stereo_tags_marker::{
    render_modules, Quad, QuadDetector, ReadError, Reflectance, TagCodec, TagSizeMap,
};
use stereo_tags_tracker::{
    CameraView, MotionType, StereoFrame, StereoTagTracker, TagObserver, TrackError,
    TrackerParams, TrackingState,
};

const SIZE: f64 = 0.1;
const BACKGROUND: u8 = 128;

/// Ground-truth quads, keyed by frame width. The two cameras differ in
/// width so each frame gets its own quads.
#[derive(Default)]
struct OracleQuads {
    by_width: HashMap<usize, Vec<Quad>>,
}

impl QuadDetector for OracleQuads {
    fn detect(&self, image: &GrayImageView<'_>, _border: usize) -> Vec<Quad> {
        self.by_width.get(&image.width).cloned().unwrap_or_default()
    }
}

/// Leaves every corner where it was predicted.
struct ExactCorners;

impl CornerRefiner for ExactCorners {
    fn refine(
        &self,
        _image: &GrayImageView<'_>,
        point: Point2<f64>,
        _window: usize,
    ) -> Option<Point2<f64>> {
        Some(point)
    }
}

struct Rig {
    camera_a: PinholeCamera,
    camera_b: PinholeCamera,
    world_t_device: Pose,
    device_t_camera_b: Pose,
}

impl Rig {
    fn new() -> Self {
        Self {
            camera_a: PinholeCamera::new(640, 480, 500.0, 500.0, 319.5, 239.5),
            camera_b: PinholeCamera::new(648, 480, 500.0, 500.0, 323.5, 239.5),
            world_t_device: Pose::from_parts(
                Translation3::new(0.3, -0.1, 0.05),
                UnitQuaternion::from_euler_angles(0.0, 0.0, 0.1),
            ),
            device_t_camera_b: Pose::translation(0.1, 0.0, 0.0),
        }
    }

    fn world_t_cameras(&self) -> [Pose; 2] {
        [self.world_t_device, self.world_t_device * self.device_t_camera_b]
    }

    fn cameras(&self) -> [&PinholeCamera; 2] {
        [&self.camera_a, &self.camera_b]
    }

    /// World pose of a tag given in the frame of camera A.
    fn world_t_tag(&self, device_t_tag: &Pose) -> Pose {
        self.world_t_device * device_t_tag
    }

    fn frame<'a>(&'a self, a: &'a GrayImage, b: &'a GrayImage) -> StereoFrame<'a> {
        StereoFrame {
            camera_a: &self.camera_a,
            camera_b: &self.camera_b,
            frame_a: a.view(),
            frame_b: b.view(),
            world_t_device: self.world_t_device,
            device_t_camera_a: Pose::identity(),
            device_t_camera_b: self.device_t_camera_b,
        }
    }

    fn render(&self, index: usize, tags: &[(&Pose, &ModuleGrid)]) -> GrayImage {
        let camera = self.cameras()[index];
        let mut image = GrayImage::new(camera.width(), camera.height(), BACKGROUND);
        for (world_t_tag, modules) in tags {
            render_modules(
                &mut image,
                camera,
                &self.world_t_cameras()[index],
                world_t_tag,
                SIZE,
                modules,
                Reflectance::Normal,
            );
        }
        image
    }

    fn quad(&self, index: usize, world_t_tag: &Pose) -> Quad {
        let camera = self.cameras()[index];
        let world_t_camera = self.world_t_cameras()[index];
        outer_corners(SIZE).map(|p| {
            camera
                .project_world(&world_t_camera, &world_t_tag.transform_point(&p))
                .expect("in front of camera")
        })
    }

    fn oracle(&self, quads_a: Vec<Quad>, quads_b: Vec<Quad>) -> OracleQuads {
        OracleQuads {
            by_width: HashMap::from([
                (self.camera_a.width(), quads_a),
                (self.camera_b.width(), quads_b),
            ]),
        }
    }
}

fn facing_tag(x: f64, y: f64, z: f64, roll: f64) -> Pose {
    Pose::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, roll),
    )
}

fn modules_of(id: u32) -> ModuleGrid {
    module_values(TagCodec::new().encode(id).expect("valid id"))
}

fn exact_tracker(oracle: OracleQuads) -> StereoTagTracker {
    StereoTagTracker::new(TrackerParams::default())
        .with_quad_detector(Box::new(oracle))
        .with_corner_refiner(Box::new(ExactCorners))
}

fn exact_observer(oracle: OracleQuads) -> TagObserver {
    TagObserver::new(TrackerParams::default())
        .with_quad_detector(Box::new(oracle))
        .with_corner_refiner(Box::new(ExactCorners))
}

fn assert_pose_close(actual: &Pose, expected: &Pose, tolerance: f64) {
    let dt = (actual.translation.vector - expected.translation.vector).norm();
    let dr = actual.rotation.angle_to(&expected.rotation);
    assert!(dt < tolerance, "translation off by {dt}");
    assert!(dr < tolerance, "rotation off by {dr}");
}

/// One tag seen by both cameras.
struct SingleTagScene {
    rig: Rig,
    world_t_tag: Pose,
    images: [GrayImage; 2],
    blank: [GrayImage; 2],
}

impl SingleTagScene {
    const ID: u32 = 321;

    fn new() -> Self {
        let rig = Rig::new();
        let world_t_tag = rig.world_t_tag(&facing_tag(-0.02, -0.05, 0.6, 0.25));
        let modules = modules_of(Self::ID);
        let images = [0, 1].map(|i| rig.render(i, &[(&world_t_tag, &modules)]));
        let blank = [0, 1].map(|i| rig.render(i, &[]));
        Self {
            rig,
            world_t_tag,
            images,
            blank,
        }
    }

    fn tracker(&self) -> StereoTagTracker {
        let oracle = self.rig.oracle(
            vec![self.rig.quad(0, &self.world_t_tag)],
            vec![self.rig.quad(1, &self.world_t_tag)],
        );
        exact_tracker(oracle)
    }

    fn frame(&self) -> StereoFrame<'_> {
        self.rig.frame(&self.images[0], &self.images[1])
    }

    fn blank_frame(&self) -> StereoFrame<'_> {
        self.rig.frame(&self.blank[0], &self.blank[1])
    }
}

#[test]
fn first_frame_fuses_metric_tag() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();

    let out = tracker.track_tags_stereo(&scene.frame()).expect("valid frame");
    assert_eq!(out.tags.len(), 1);
    let tag = out.tags[0];
    assert_eq!(tag.id, SingleTagScene::ID);
    assert_eq!(tag.reflectance, Reflectance::Normal);
    assert!((tag.size - SIZE).abs() < 1e-4, "size {}", tag.size);
    assert_pose_close(&tag.world_t_tag, &scene.world_t_tag, 1e-4);
    assert!(tag.intensity_threshold > 64 && tag.intensity_threshold < 192);

    let tracked = tracker.tracked_tag(SingleTagScene::ID).expect("tracked");
    assert_eq!(tracked.state, TrackingState::NewDetection);
    assert_eq!(tracked.motion, MotionType::Unknown);
    assert_eq!(tracked.histories[0].len(), 1);
    assert_eq!(tracked.histories[1].len(), 1);
    assert_eq!(tracker.frame_counter(), 1);
    assert!(tracker.previous_frame(0).is_some());
}

#[test]
fn static_scene_keeps_tracking() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();
    let first = tracker.track_tags_stereo(&scene.frame()).expect("first");
    let second = tracker.track_tags_stereo(&scene.frame()).expect("second");

    assert_eq!(second.tags.len(), 1);
    assert_pose_close(&second.tags[0].world_t_tag, &first.tags[0].world_t_tag, 1e-4);

    let tracked = tracker.tracked_tag(SingleTagScene::ID).expect("tracked");
    assert_eq!(tracked.state, TrackingState::Tracking);
    assert_eq!(tracked.motion, MotionType::Dynamic);
    assert_eq!(tracked.histories[0].len(), 2);

    for _ in 0..4 {
        tracker.track_tags_stereo(&scene.frame()).expect("frame");
    }
    let tracked = tracker.tracked_tag(SingleTagScene::ID).expect("tracked");
    assert_eq!(tracked.state, TrackingState::Tracking);
    assert_eq!(tracked.motion, MotionType::Static);
}

#[test]
fn tracking_survives_periodic_detection() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();
    let cadence = tracker.params().detection_cadence as usize;
    let cap = tracker.params().max_observations;

    for call in 1..=cadence + 4 {
        let out = tracker.track_tags_stereo(&scene.frame()).expect("frame");
        assert_eq!(out.tags.len(), 1, "call {call}");
        if call == 1 {
            continue;
        }
        let tracked = tracker.tracked_tag(SingleTagScene::ID).expect("tracked");
        assert_eq!(tracked.state, TrackingState::Tracking, "call {call}");
        for history in &tracked.histories {
            assert_eq!(history.len(), call.min(cap), "call {call}");
        }
    }
}

#[test]
fn single_camera_keeps_tag_tracked() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();
    tracker.track_tags_stereo(&scene.frame()).expect("stereo");

    let out = tracker
        .track_tags_stereo(&scene.rig.frame(&scene.images[0], &scene.blank[1]))
        .expect("camera b blank");
    assert_eq!(out.tags.len(), 1);
    assert_pose_close(&out.tags[0].world_t_tag, &scene.world_t_tag, 1e-3);

    let tracked = tracker.tracked_tag(SingleTagScene::ID).expect("tracked");
    assert_eq!(tracked.state, TrackingState::Tracking);
    assert_eq!(tracked.histories[0].len(), 2);
    assert_eq!(tracked.histories[1].len(), 1);
}

#[test]
fn occluded_tag_is_redetected() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();
    tracker.track_tags_stereo(&scene.frame()).expect("first");

    let cadence = tracker.params().detection_cadence;
    for _ in 0..cadence + 2 {
        let out = tracker.track_tags_stereo(&scene.blank_frame()).expect("blank");
        assert!(!out.found_any());
    }
    let dormant = tracker.tracked_tag(SingleTagScene::ID).expect("kept");
    assert_eq!(dormant.state, TrackingState::NotTracking);

    let out = tracker.track_tags_stereo(&scene.frame()).expect("reappear");
    assert_eq!(out.tags.len(), 1);
    let tracked = tracker.tracked_tag(SingleTagScene::ID).expect("tracked");
    assert_eq!(tracked.state, TrackingState::NewDetection);
    assert_eq!(tracked.motion, MotionType::Static);
    assert_eq!(tracked.histories[0].len(), 2);
}

#[test]
fn corrupted_payload_is_not_reported() {
    let rig = Rig::new();
    let codec = TagCodec::new();
    let pattern = (0..=u16::MAX)
        .find(|&p| p.count_ones() == 8 && codec.decode(p).is_none())
        .expect("undecodable pattern");
    let world_t_tag = rig.world_t_tag(&facing_tag(-0.02, -0.05, 0.6, 0.25));
    let modules = module_values(pattern);
    let images = [0, 1].map(|i| rig.render(i, &[(&world_t_tag, &modules)]));
    let quads = [0, 1].map(|i| vec![rig.quad(i, &world_t_tag)]);
    let [quads_a, quads_b] = quads.clone();

    let observer = exact_observer(rig.oracle(quads_a, quads_b));
    let view = CameraView::new(
        &rig.camera_a,
        images[0].view(),
        rig.world_t_device,
        Pose::identity(),
    );
    assert!(observer.detect_tags_mono(&view, SIZE, &TagSizeMap::new()).is_empty());
    let err = observer
        .read_tag(&view, &quads[0][0], SIZE, &TagSizeMap::new())
        .unwrap_err();
    assert!(matches!(err, ReadError::DecodeFailed { .. }), "{err:?}");

    let [quads_a, quads_b] = quads;
    let mut tracker = exact_tracker(rig.oracle(quads_a, quads_b));
    let out = tracker
        .track_tags_stereo(&rig.frame(&images[0], &images[1]))
        .expect("valid frame");
    assert!(!out.found_any());
    assert!(tracker.tracked_tags().is_empty());
}

#[test]
fn two_background_orientation_modules_are_rejected() {
    let rig = Rig::new();
    let world_t_tag = rig.world_t_tag(&facing_tag(-0.02, -0.05, 0.6, 0.0));
    let mut modules = modules_of(7);
    // Clear the bottom-left orientation module as well.
    modules[6 * MODULES_PER_SIDE + 1] = 0;
    let image = rig.render(0, &[(&world_t_tag, &modules)]);
    let quad = rig.quad(0, &world_t_tag);

    let observer = exact_observer(OracleQuads::default());
    let view = CameraView::new(&rig.camera_a, image.view(), rig.world_t_device, Pose::identity());
    let err = observer
        .read_tag(&view, &quad, SIZE, &TagSizeMap::new())
        .unwrap_err();
    assert!(
        matches!(err, ReadError::AmbiguousOrientation { background_modules: 2 }),
        "{err:?}"
    );
}

#[test]
fn tag_seen_by_one_camera_is_not_fused() {
    let rig = Rig::new();
    let shared = rig.world_t_tag(&facing_tag(-0.02, -0.05, 0.6, 0.25));
    let only_a = rig.world_t_tag(&facing_tag(-0.33, -0.05, 0.6, 0.0));
    let (modules_shared, modules_a) = (modules_of(5), modules_of(6));
    let scene = [(&shared, &modules_shared), (&only_a, &modules_a)];
    let image_a = rig.render(0, &scene);
    let image_b = rig.render(1, &scene);

    let oracle = rig.oracle(
        vec![rig.quad(0, &shared), rig.quad(0, &only_a)],
        vec![rig.quad(1, &shared)],
    );
    let mut tracker = exact_tracker(oracle);
    let out = tracker
        .track_tags_stereo(&rig.frame(&image_a, &image_b))
        .expect("valid frame");
    assert_eq!(out.tags.len(), 1);
    assert_eq!(out.tags[0].id, 5);
    assert!(tracker.tracked_tag(6).is_none());
}

#[test]
fn rectified_image_shows_module_grid() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();
    let out = tracker.track_tags_stereo(&scene.frame()).expect("frame");
    let tag = out.tags[0];

    let rectified = tracker
        .extract_rectified_tag_image(&scene.frame(), &tag, 80)
        .expect("visible tag");
    assert_eq!((rectified.width, rectified.height), (80, 80));

    let modules = modules_of(SingleTagScene::ID);
    for row in 0..MODULES_PER_SIDE {
        for col in 0..MODULES_PER_SIDE {
            let value = rectified.data[(row * 10 + 5) * 80 + col * 10 + 5];
            if modules[row * MODULES_PER_SIDE + col] == 1 {
                assert!(value < 64, "module ({row}, {col}) = {value}");
            } else {
                assert!(value > 192, "module ({row}, {col}) = {value}");
            }
        }
    }

    let mut hidden = tag;
    hidden.world_t_tag = Pose::translation(0.0, 0.0, -5.0) * hidden.world_t_tag;
    assert!(tracker
        .extract_rectified_tag_image(&scene.frame(), &hidden, 80)
        .is_none());
}

#[test]
fn known_tag_is_located_and_confirmed() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();
    let out = tracker.track_tags_stereo(&scene.frame()).expect("frame");
    let tag = out.tags[0];

    let [_, view_b] = scene.frame().views();
    let history = tracker
        .observer()
        .locate_tag_in_camera(&view_b, &tag)
        .expect("located");
    assert_eq!(history.len(), 1);
    assert!(tracker.observer().confirm_detection_in_frame(&view_b, &tag));

    let mut wrong = tag;
    wrong.id = (tag.id + 1) % 1024;
    assert!(!tracker.observer().confirm_detection_in_frame(&view_b, &wrong));

    let [blank_a, _] = scene.blank_frame().views();
    assert!(tracker.observer().locate_tag_in_camera(&blank_a, &tag).is_none());
}

#[test]
fn reset_forgets_everything() {
    let scene = SingleTagScene::new();
    let mut tracker = scene.tracker();
    tracker.track_tags_stereo(&scene.frame()).expect("frame");
    assert!(!tracker.tracked_tags().is_empty());

    tracker.reset();
    assert!(tracker.tracked_tags().is_empty());
    assert_eq!(tracker.frame_counter(), 0);
    assert!(tracker.previous_frame(0).is_none());
    assert!(tracker.previous_poses().is_none());
}

#[test]
fn mismatched_frame_is_an_error() {
    let rig = Rig::new();
    let small = GrayImage::new(320, 240, BACKGROUND);
    let good = GrayImage::new(648, 480, BACKGROUND);
    let mut tracker = StereoTagTracker::default();

    let err = tracker
        .track_tags_stereo(&rig.frame(&small, &good))
        .unwrap_err();
    assert!(
        matches!(err, TrackError::FrameSizeMismatch { camera: 0, frame_width: 320, .. }),
        "{err:?}"
    );
    assert_eq!(tracker.frame_counter(), 0);
}

#[test]
fn default_pipeline_finds_rendered_tag() {
    let rig = Rig::new();
    let world_t_tag = rig.world_t_tag(&facing_tag(-0.04, -0.05, 0.5, 0.25));
    let modules = modules_of(99);
    let image_a = rig.render(0, &[(&world_t_tag, &modules)]);
    let image_b = rig.render(1, &[(&world_t_tag, &modules)]);

    let mut tracker = StereoTagTracker::default();
    let out = tracker
        .track_tags_stereo(&rig.frame(&image_a, &image_b))
        .expect("valid frame");
    let tag = out.tags.iter().find(|t| t.id == 99).expect("tag 99");
    assert!((tag.size - SIZE).abs() < 0.005, "size {}", tag.size);
    let dt = (tag.world_t_tag.translation.vector - world_t_tag.translation.vector).norm();
    assert!(dt < 0.01, "translation off by {dt}");
}
