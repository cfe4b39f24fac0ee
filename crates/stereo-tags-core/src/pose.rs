//! Planar pose estimation from 2D-3D correspondences.

use crate::{
    estimate_homography, Camera, LevenbergMarquardt, OptimizerParams, PoseOptimizer, PoseView,
};
use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Rigid 6-DOF transform. `a_T_b` maps points from frame `b` to frame `a`.
pub type Pose = Isometry3<f64>;

/// True if every component of the transform is finite.
pub fn is_finite_pose(pose: &Pose) -> bool {
    pose.translation.vector.iter().all(|v| v.is_finite())
        && pose.rotation.coords.iter().all(|v| v.is_finite())
}

/// Parameters of [`PlanarPoseSolver`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSolverParams {
    /// Maximum reprojection error (pixels) of an inlier.
    pub inlier_threshold: f64,
    /// Number of 4-point hypotheses evaluated.
    pub iterations: usize,
    /// Minimum number of inliers of an accepted pose.
    pub min_points: usize,
    /// Refine the best hypothesis on its inliers.
    pub refine: bool,
}

impl Default for PoseSolverParams {
    fn default() -> Self {
        Self {
            inlier_threshold: 2.5,
            iterations: 10,
            min_points: 4,
            refine: true,
        }
    }
}

/// Outlier-tolerant pose from correspondences.
pub trait PoseSolver: Send + Sync {
    /// Estimate `camera_T_object`. Returns `None` if no hypothesis gathers
    /// enough inliers.
    fn solve(
        &self,
        camera: &dyn Camera,
        object_points: &[Point3<f64>],
        image_points: &[Point2<f64>],
    ) -> Option<Pose>;
}

/// Homography-based solver for points on the object plane `z = 0`.
#[derive(Clone, Debug, Default)]
pub struct PlanarPoseSolver {
    params: PoseSolverParams,
    optimizer: LevenbergMarquardt,
}

struct Hypothesis {
    pose: Pose,
    inliers: Vec<usize>,
    error: f64,
}

impl PlanarPoseSolver {
    pub fn new(params: PoseSolverParams) -> Self {
        Self {
            params,
            optimizer: LevenbergMarquardt::new(OptimizerParams::default()),
        }
    }

    #[inline]
    pub fn params(&self) -> &PoseSolverParams {
        &self.params
    }

    fn score(
        &self,
        camera: &dyn Camera,
        pose: Pose,
        object_points: &[Point3<f64>],
        image_points: &[Point2<f64>],
    ) -> Hypothesis {
        let sqr_threshold = self.params.inlier_threshold * self.params.inlier_threshold;
        let mut inliers = Vec::new();
        let mut error = 0.0;
        for (i, (p, u)) in object_points.iter().zip(image_points).enumerate() {
            let Some(projected) = camera.project(&pose.transform_point(p)) else {
                continue;
            };
            let sqr = (projected - u).norm_squared();
            if sqr <= sqr_threshold {
                inliers.push(i);
                error += sqr;
            }
        }
        Hypothesis {
            pose,
            inliers,
            error,
        }
    }
}

/// Decompose `H ~ [r1 r2 t]` between the object plane and normalized image
/// coordinates into a rigid pose in front of the camera.
fn pose_from_homography(h: &Matrix3<f64>) -> Option<Pose> {
    let h1 = h.column(0);
    let h2 = h.column(1);
    let h3 = h.column(2);

    let norm = h1.norm() + h2.norm();
    if norm < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / norm;
    if h3[2] * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = approx.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        r = -r;
    }

    let t = h3 * lambda;
    if t.z <= 0.0 || !t.iter().all(|v| v.is_finite()) {
        return None;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Some(Pose::from_parts(Translation3::from(t), rotation))
}

/// Lexicographic 4-subsets of `0..n`, at most `limit` of them.
fn four_subsets(n: usize, limit: usize) -> Vec<[usize; 4]> {
    let mut out = Vec::new();
    'outer: for a in 0..n {
        for b in a + 1..n {
            for c in b + 1..n {
                for d in c + 1..n {
                    if out.len() >= limit {
                        break 'outer;
                    }
                    out.push([a, b, c, d]);
                }
            }
        }
    }
    out
}

impl PoseSolver for PlanarPoseSolver {
    fn solve(
        &self,
        camera: &dyn Camera,
        object_points: &[Point3<f64>],
        image_points: &[Point2<f64>],
    ) -> Option<Pose> {
        let n = object_points.len();
        if n < 4 || n != image_points.len() {
            return None;
        }

        let plane: Vec<Point2<f64>> = object_points.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let mut normalized = Vec::with_capacity(n);
        for u in image_points {
            let ray = camera.ray(u);
            if ray.z <= 1e-12 {
                return None;
            }
            normalized.push(Point2::new(ray.x / ray.z, ray.y / ray.z));
        }

        // Minimal 4-point hypotheses, plus the full DLT when over-determined.
        let hypotheses = four_subsets(n, self.params.iterations.max(1))
            .into_iter()
            .map(|subset| {
                let src = subset.map(|i| plane[i]);
                let dst = subset.map(|i| normalized[i]);
                estimate_homography(&src, &dst)
            })
            .chain((n > 4).then(|| estimate_homography(&plane, &normalized)));

        let mut best: Option<Hypothesis> = None;
        for homography in hypotheses {
            let Some(pose) = homography.and_then(|h| pose_from_homography(&h.h)) else {
                continue;
            };
            let candidate = self.score(camera, pose, object_points, image_points);
            let better = best.as_ref().is_none_or(|b| {
                candidate.inliers.len() > b.inliers.len()
                    || (candidate.inliers.len() == b.inliers.len() && candidate.error < b.error)
            });
            if better {
                best = Some(candidate);
            }
        }

        let best = best?;
        if best.inliers.len() < self.params.min_points.max(3) {
            log::trace!("pose rejected: {} of {} inliers", best.inliers.len(), n);
            return None;
        }

        if !self.params.refine {
            return Some(best.pose);
        }

        let object: Vec<Point3<f64>> = best.inliers.iter().map(|&i| object_points[i]).collect();
        let image: Vec<Point2<f64>> = best.inliers.iter().map(|&i| image_points[i]).collect();
        let view = PoseView {
            camera,
            world_t_camera: Pose::identity(),
            object_points: &object,
            image_points: &image,
        };
        Some(
            self.optimizer
                .optimize(&[view], &best.pose)
                .unwrap_or(best.pose),
        )
    }
}
