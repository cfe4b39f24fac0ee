//! Robust Levenberg-Marquardt refinement of a rigid object pose.
//!
//! The unknown is `world_T_object`. Every [`PoseView`] contributes the
//! reprojection residuals of one set of object/image correspondences
//! observed by one camera at one `world_T_camera` pose, so the same solver
//! covers single-camera histories and joint stereo refinement.

use crate::{is_finite_pose, Camera, Pose};
use nalgebra::{
    Matrix3, Matrix6, Point2, Point3, SMatrix, Translation3, UnitQuaternion, Vector3, Vector6,
};
use serde::{Deserialize, Serialize};

/// Robust loss applied to the per-point reprojection error (pixels).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    Square,
    Huber { width: f64 },
    Tukey { width: f64 },
}

impl RobustLoss {
    /// Loss of a residual with squared norm `sqr`.
    pub fn cost(&self, sqr: f64) -> f64 {
        match *self {
            Self::Square => sqr,
            Self::Huber { width } => {
                let r = sqr.sqrt();
                if r <= width {
                    sqr
                } else {
                    2.0 * width * r - width * width
                }
            }
            Self::Tukey { width } => {
                let c2 = width * width;
                if sqr >= c2 {
                    c2 / 3.0
                } else {
                    let u = 1.0 - sqr / c2;
                    c2 / 3.0 * (1.0 - u * u * u)
                }
            }
        }
    }

    /// IRLS weight of a residual with squared norm `sqr`.
    pub fn weight(&self, sqr: f64) -> f64 {
        match *self {
            Self::Square => 1.0,
            Self::Huber { width } => {
                let r = sqr.sqrt();
                if r <= width {
                    1.0
                } else {
                    width / r
                }
            }
            Self::Tukey { width } => {
                let c2 = width * width;
                if sqr >= c2 {
                    0.0
                } else {
                    let u = 1.0 - sqr / c2;
                    u * u
                }
            }
        }
    }
}

/// Parameters of [`LevenbergMarquardt`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    pub iterations: usize,
    pub initial_lambda: f64,
    /// Damping is divided by this factor after an accepted step and
    /// multiplied by it after a rejected one.
    pub lambda_factor: f64,
    pub loss: RobustLoss,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            iterations: 50,
            initial_lambda: 0.001,
            lambda_factor: 5.0,
            loss: RobustLoss::Square,
        }
    }
}

/// Correspondences observed by one camera at one pose.
#[derive(Clone, Copy, Debug)]
pub struct PoseView<'a> {
    pub camera: &'a dyn Camera,
    pub world_t_camera: Pose,
    pub object_points: &'a [Point3<f64>],
    pub image_points: &'a [Point2<f64>],
}

impl PoseView<'_> {
    fn len(&self) -> usize {
        self.object_points.len().min(self.image_points.len())
    }
}

/// Nonlinear refinement of `world_T_object` over one or more views.
pub trait PoseOptimizer: Send + Sync {
    /// Returns `None` when the problem is underdetermined or diverges.
    fn optimize(&self, views: &[PoseView<'_>], initial_world_t_object: &Pose) -> Option<Pose>;
}

/// Damped Gauss-Newton on SE(3) with a right-multiplied perturbation.
#[derive(Clone, Debug, Default)]
pub struct LevenbergMarquardt {
    params: OptimizerParams,
}

const MIN_CORRESPONDENCES: usize = 3;
const MAX_LAMBDA: f64 = 1e12;

impl LevenbergMarquardt {
    pub fn new(params: OptimizerParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &OptimizerParams {
        &self.params
    }

    /// Total robust cost, or `None` if any point leaves the front of a camera.
    fn cost(&self, views: &[PoseView<'_>], world_t_object: &Pose) -> Option<f64> {
        let mut total = 0.0;
        for view in views {
            let camera_t_object = view.world_t_camera.inverse() * world_t_object;
            for (p, u) in view.object_points.iter().zip(view.image_points) {
                let projected = view.camera.project(&camera_t_object.transform_point(p))?;
                total += self.params.loss.cost((projected - u).norm_squared());
            }
        }
        total.is_finite().then_some(total)
    }

    /// Weighted normal equations `(JᵀWJ, JᵀWr)` at the current estimate.
    fn normal_equations(
        &self,
        views: &[PoseView<'_>],
        world_t_object: &Pose,
    ) -> Option<(Matrix6<f64>, Vector6<f64>)> {
        let mut jtj = Matrix6::zeros();
        let mut jtr = Vector6::zeros();
        for view in views {
            let camera_t_object = view.world_t_camera.inverse() * world_t_object;
            let rot: Matrix3<f64> = camera_t_object.rotation.to_rotation_matrix().into_inner();
            for (p, u) in view.object_points.iter().zip(view.image_points) {
                let p_cam = camera_t_object.transform_point(p);
                let residual = view.camera.project(&p_cam)? - u;
                let proj_jac = view.camera.project_jacobian(&p_cam)?;

                // d p_cam / d [v, w] = [R, -R [p]x]
                let mut point_jac = SMatrix::<f64, 3, 6>::zeros();
                point_jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot);
                point_jac
                    .fixed_view_mut::<3, 3>(0, 3)
                    .copy_from(&(-rot * p.coords.cross_matrix()));

                let jac = proj_jac * point_jac;
                let w = self.params.loss.weight(residual.norm_squared());
                jtj += w * jac.transpose() * jac;
                jtr += w * jac.transpose() * residual;
            }
        }
        Some((jtj, jtr))
    }
}

fn retract(pose: &Pose, delta: &Vector6<f64>) -> Pose {
    let step = Pose::from_parts(
        Translation3::new(delta[0], delta[1], delta[2]),
        UnitQuaternion::from_scaled_axis(Vector3::new(delta[3], delta[4], delta[5])),
    );
    pose * step
}

impl PoseOptimizer for LevenbergMarquardt {
    fn optimize(&self, views: &[PoseView<'_>], initial_world_t_object: &Pose) -> Option<Pose> {
        let total: usize = views.iter().map(PoseView::len).sum();
        if total < MIN_CORRESPONDENCES {
            return None;
        }

        let mut pose = *initial_world_t_object;
        let mut cost = self.cost(views, &pose)?;
        let mut lambda = self.params.initial_lambda;

        for _ in 0..self.params.iterations {
            if cost <= f64::EPSILON {
                break;
            }
            let (jtj, jtr) = self.normal_equations(views, &pose)?;

            let mut improved = false;
            while lambda < MAX_LAMBDA {
                let mut damped = jtj;
                for i in 0..6 {
                    damped[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
                }
                let Some(delta) = damped.cholesky().map(|c| -c.solve(&jtr)) else {
                    lambda *= self.params.lambda_factor;
                    continue;
                };
                let candidate = retract(&pose, &delta);
                match self.cost(views, &candidate) {
                    Some(candidate_cost) if candidate_cost < cost => {
                        let relative = (cost - candidate_cost) / cost;
                        pose = candidate;
                        cost = candidate_cost;
                        lambda /= self.params.lambda_factor;
                        improved = relative > 1e-12 && delta.norm() > 1e-12;
                        break;
                    }
                    _ => lambda *= self.params.lambda_factor,
                }
            }
            if !improved {
                break;
            }
        }

        is_finite_pose(&pose).then_some(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PinholeCamera;
    use approx::assert_relative_eq;

    fn square_points() -> Vec<Point3<f64>> {
        let mut pts = Vec::new();
        for y in 0..4 {
            for x in 0..4 {
                pts.push(Point3::new(x as f64 * 0.05, -(y as f64) * 0.05, 0.0));
            }
        }
        pts
    }

    fn truth() -> Pose {
        Pose::from_parts(
            Translation3::new(-0.05, 0.08, 0.9),
            UnitQuaternion::from_euler_angles(2.9, 0.2, -0.1),
        )
    }

    #[test]
    fn recovers_pose_from_perturbed_start() {
        let cam = PinholeCamera::new(640, 480, 600.0, 600.0, 319.5, 239.5);
        let object = square_points();
        let image: Vec<Point2<f64>> = object
            .iter()
            .map(|p| cam.project(&truth().transform_point(p)).expect("visible"))
            .collect();

        let view = PoseView {
            camera: &cam,
            world_t_camera: Pose::identity(),
            object_points: &object,
            image_points: &image,
        };
        let start = truth()
            * Pose::from_parts(
                Translation3::new(0.01, -0.01, 0.02),
                UnitQuaternion::from_euler_angles(0.03, -0.02, 0.04),
            );

        let lm = LevenbergMarquardt::default();
        let refined = lm.optimize(&[view], &start).expect("converges");
        assert_relative_eq!(
            refined.translation.vector,
            truth().translation.vector,
            epsilon = 1e-6
        );
        assert!(refined.rotation.angle_to(&truth().rotation) < 1e-6);
    }

    #[test]
    fn too_few_points_fail() {
        let cam = PinholeCamera::new(640, 480, 600.0, 600.0, 319.5, 239.5);
        let object = vec![Point3::origin(), Point3::new(0.1, 0.0, 0.0)];
        let image = vec![Point2::new(320.0, 240.0), Point2::new(380.0, 240.0)];
        let view = PoseView {
            camera: &cam,
            world_t_camera: Pose::identity(),
            object_points: &object,
            image_points: &image,
        };
        assert!(LevenbergMarquardt::default()
            .optimize(&[view], &truth())
            .is_none());
    }

    #[test]
    fn tukey_ignores_far_outliers() {
        let loss = RobustLoss::Tukey { width: 2.0 };
        assert_eq!(loss.weight(100.0), 0.0);
        assert_relative_eq!(loss.cost(100.0), 4.0 / 3.0);
        let huber = RobustLoss::Huber { width: 1.0 };
        assert_relative_eq!(huber.weight(4.0), 0.5);
    }
}
