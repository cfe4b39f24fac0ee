use crate::{Camera, Pose};
use nalgebra::{Point2, Point3};

/// Two-view triangulation of matching image points.
pub trait Triangulator: Send + Sync {
    /// One entry per input pair; `None` marks an invalid point (parallel
    /// rays or a point behind either camera).
    fn triangulate(
        &self,
        camera_a: &dyn Camera,
        camera_b: &dyn Camera,
        world_t_camera_a: &Pose,
        world_t_camera_b: &Pose,
        points_a: &[Point2<f64>],
        points_b: &[Point2<f64>],
    ) -> Vec<Option<Point3<f64>>>;
}

/// Midpoint of the shortest segment between the two viewing rays.
#[derive(Clone, Copy, Debug, Default)]
pub struct MidpointTriangulator;

impl MidpointTriangulator {
    fn triangulate_one(
        camera_a: &dyn Camera,
        camera_b: &dyn Camera,
        world_t_camera_a: &Pose,
        world_t_camera_b: &Pose,
        point_a: &Point2<f64>,
        point_b: &Point2<f64>,
    ) -> Option<Point3<f64>> {
        let origin_a = world_t_camera_a.translation.vector;
        let origin_b = world_t_camera_b.translation.vector;
        let dir_a = world_t_camera_a.rotation * camera_a.ray(point_a);
        let dir_b = world_t_camera_b.rotation * camera_b.ray(point_b);

        let w0 = origin_a - origin_b;
        let a = dir_a.dot(&dir_a);
        let b = dir_a.dot(&dir_b);
        let c = dir_b.dot(&dir_b);
        let d = dir_a.dot(&w0);
        let e = dir_b.dot(&w0);

        let denom = a * c - b * b;
        if denom.abs() < 1e-12 {
            return None;
        }
        let s = (b * e - c * d) / denom;
        let t = (a * e - b * d) / denom;

        let closest_a = origin_a + dir_a * s;
        let closest_b = origin_b + dir_b * t;
        let world = Point3::from((closest_a + closest_b) * 0.5);

        let in_front = camera_a.is_in_front(&world_t_camera_a.inverse_transform_point(&world))
            && camera_b.is_in_front(&world_t_camera_b.inverse_transform_point(&world));
        (in_front && world.coords.iter().all(|v| v.is_finite())).then_some(world)
    }
}

impl Triangulator for MidpointTriangulator {
    fn triangulate(
        &self,
        camera_a: &dyn Camera,
        camera_b: &dyn Camera,
        world_t_camera_a: &Pose,
        world_t_camera_b: &Pose,
        points_a: &[Point2<f64>],
        points_b: &[Point2<f64>],
    ) -> Vec<Option<Point3<f64>>> {
        points_a
            .iter()
            .zip(points_b)
            .map(|(a, b)| {
                Self::triangulate_one(
                    camera_a,
                    camera_b,
                    world_t_camera_a,
                    world_t_camera_b,
                    a,
                    b,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PinholeCamera;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn recovers_point_seen_by_two_cameras() {
        let cam = PinholeCamera::new(640, 480, 500.0, 500.0, 319.5, 239.5);
        let pose_a = Pose::identity();
        let pose_b = Pose::from_parts(
            Translation3::new(0.12, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, -0.05, 0.0),
        );
        let world = Point3::new(0.05, -0.02, 1.2);
        let a = cam.project_world(&pose_a, &world).expect("a");
        let b = cam.project_world(&pose_b, &world).expect("b");

        let out = MidpointTriangulator.triangulate(&cam, &cam, &pose_a, &pose_b, &[a], &[b]);
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].expect("valid"), world, epsilon = 1e-9);
    }

    #[test]
    fn parallel_rays_are_invalid() {
        let cam = PinholeCamera::new(640, 480, 500.0, 500.0, 319.5, 239.5);
        let pose_a = Pose::identity();
        let pose_b = Pose::translation(0.1, 0.0, 0.0);
        let p = Point2::new(319.5, 239.5);
        let out = MidpointTriangulator.triangulate(&cam, &cam, &pose_a, &pose_b, &[p], &[p]);
        assert!(out[0].is_none());
    }

    #[test]
    fn points_behind_are_invalid() {
        let cam = PinholeCamera::new(640, 480, 500.0, 500.0, 319.5, 239.5);
        let pose_a = Pose::identity();
        let pose_b = Pose::translation(0.1, 0.0, 0.0);
        // Rays diverge: the closest approach lies behind both cameras.
        let a = Point2::new(300.0, 239.5);
        let b = Point2::new(340.0, 239.5);
        let out = MidpointTriangulator.triangulate(&cam, &cam, &pose_a, &pose_b, &[a], &[b]);
        assert!(out[0].is_none());
    }
}
