//! Camera projection models.
//!
//! Camera frame convention: x right, y down, z forward. Pixel centers are
//! at integer coordinates.

use crate::Pose;
use nalgebra::{Matrix2x3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

const MIN_DEPTH: f64 = 1e-9;

/// Projection model shared by detection, tracking and optimization.
pub trait Camera: Send + Sync + std::fmt::Debug {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Project a point given in camera coordinates.
    ///
    /// Returns `None` for points that are not in front of the camera.
    fn project(&self, p_camera: &Point3<f64>) -> Option<Point2<f64>>;

    /// Unit viewing ray through `pixel`, in camera coordinates.
    fn ray(&self, pixel: &Point2<f64>) -> Vector3<f64>;

    /// Jacobian of [`Camera::project`] with respect to the camera-frame point.
    ///
    /// The default uses central differences.
    fn project_jacobian(&self, p_camera: &Point3<f64>) -> Option<Matrix2x3<f64>> {
        let h = 1e-6 * p_camera.z.abs().max(1.0);
        let mut jac = Matrix2x3::zeros();
        for axis in 0..3 {
            let mut plus = *p_camera;
            let mut minus = *p_camera;
            plus[axis] += h;
            minus[axis] -= h;
            let d = (self.project(&plus)? - self.project(&minus)?) / (2.0 * h);
            jac[(0, axis)] = d.x;
            jac[(1, axis)] = d.y;
        }
        Some(jac)
    }

    /// True if `pixel` lies at least `border` pixels inside the image.
    ///
    /// A negative border accepts points slightly outside the image.
    fn is_inside(&self, pixel: &Point2<f64>, border: f64) -> bool {
        pixel.x >= border
            && pixel.y >= border
            && pixel.x < self.width() as f64 - border
            && pixel.y < self.height() as f64 - border
    }

    fn is_in_front(&self, p_camera: &Point3<f64>) -> bool {
        p_camera.z > MIN_DEPTH
    }

    /// Project a world point with the camera pose `world_T_camera`.
    fn project_world(&self, world_t_camera: &Pose, p_world: &Point3<f64>) -> Option<Point2<f64>> {
        self.project(&world_t_camera.inverse_transform_point(p_world))
    }

    /// Project a point with the inverted pose `camera_T_world`.
    fn project_inverted(
        &self,
        camera_t_world: &Pose,
        p_world: &Point3<f64>,
    ) -> Option<Point2<f64>> {
        self.project(&camera_t_world.transform_point(p_world))
    }
}

/// Distortion-free pinhole camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub width: usize,
    pub height: usize,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl PinholeCamera {
    pub fn new(width: usize, height: usize, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
        }
    }
}

impl Camera for PinholeCamera {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn project(&self, p_camera: &Point3<f64>) -> Option<Point2<f64>> {
        if !self.is_in_front(p_camera) {
            return None;
        }
        let inv_z = 1.0 / p_camera.z;
        Some(Point2::new(
            self.fx * p_camera.x * inv_z + self.cx,
            self.fy * p_camera.y * inv_z + self.cy,
        ))
    }

    fn ray(&self, pixel: &Point2<f64>) -> Vector3<f64> {
        Vector3::new(
            (pixel.x - self.cx) / self.fx,
            (pixel.y - self.cy) / self.fy,
            1.0,
        )
        .normalize()
    }

    fn project_jacobian(&self, p_camera: &Point3<f64>) -> Option<Matrix2x3<f64>> {
        if !self.is_in_front(p_camera) {
            return None;
        }
        let inv_z = 1.0 / p_camera.z;
        let inv_z2 = inv_z * inv_z;
        Some(Matrix2x3::new(
            self.fx * inv_z,
            0.0,
            -self.fx * p_camera.x * inv_z2,
            0.0,
            self.fy * inv_z,
            -self.fy * p_camera.y * inv_z2,
        ))
    }
}
