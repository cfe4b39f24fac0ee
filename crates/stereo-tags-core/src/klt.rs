//! Pyramidal Lucas-Kanade point tracking between two frame pyramids.
//!
//! Tracking is seeded with predicted positions: the coarsest layer runs a
//! small zero-mean SSD search around the prediction, and each finer layer
//! refines the displacement with inverse-compositional Lucas-Kanade.

use crate::image::{sample_bilinear_clamped, FramePyramid, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Parameters of [`PyramidalLucasKanade`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LucasKanadeParams {
    /// Patch half size; the patch is `(2 * patch_radius + 1)²` pixels.
    pub patch_radius: usize,
    /// Integer search radius of the coarsest-layer SSD search.
    pub coarsest_radius: usize,
    /// Gauss-Newton iterations per layer.
    pub iterations: usize,
    /// Convergence threshold in layer pixels.
    pub epsilon: f64,
}

impl Default for LucasKanadeParams {
    fn default() -> Self {
        Self {
            patch_radius: 3,
            coarsest_radius: 2,
            iterations: 20,
            epsilon: 0.01,
        }
    }
}

/// Frame-to-frame tracking of sparse points.
pub trait PointTracker: Send + Sync {
    /// Track `previous_points` from `previous` into `current`, starting at
    /// `predicted_points`. Fails as a whole if any point is lost.
    fn track(
        &self,
        previous: &FramePyramid,
        current: &FramePyramid,
        previous_points: &[Point2<f64>],
        predicted_points: &[Point2<f64>],
    ) -> Option<Vec<Point2<f64>>>;
}

#[derive(Clone, Debug, Default)]
pub struct PyramidalLucasKanade {
    params: LucasKanadeParams,
}

// Layer `l` pixel centers sit at `(p0 + 0.5) / 2^l - 0.5` of layer 0.
#[inline]
fn to_layer(p: Point2<f64>, layer: usize) -> Point2<f64> {
    let s = (1u64 << layer) as f64;
    Point2::new((p.x + 0.5) / s - 0.5, (p.y + 0.5) / s - 0.5)
}

enum LayerStep {
    Converged(f64, f64),
    Singular,
}

impl PyramidalLucasKanade {
    pub fn new(params: LucasKanadeParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &LucasKanadeParams {
        &self.params
    }

    fn patch_offsets(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let r = self.params.patch_radius as i64;
        (-r..=r).flat_map(move |y| (-r..=r).map(move |x| (x as f64, y as f64)))
    }

    fn zero_mean_patch(&self, img: &GrayImageView<'_>, x: f64, y: f64) -> Vec<f64> {
        let mut patch: Vec<f64> = self
            .patch_offsets()
            .map(|(dx, dy)| sample_bilinear_clamped(img, x + dx, y + dy))
            .collect();
        let mean = patch.iter().sum::<f64>() / patch.len() as f64;
        patch.iter_mut().for_each(|v| *v -= mean);
        patch
    }

    /// Integer search of the zero-mean SSD minimum around `(dx, dy)`.
    ///
    /// The unshifted offset is evaluated first and only strictly better
    /// offsets replace it.
    fn coarse_search(
        &self,
        prev: &GrayImageView<'_>,
        curr: &GrayImageView<'_>,
        p: Point2<f64>,
        dx: f64,
        dy: f64,
    ) -> (f64, f64) {
        let template = self.zero_mean_patch(prev, p.x, p.y);
        let ssd = |ox: f64, oy: f64| -> f64 {
            self.zero_mean_patch(curr, p.x + ox, p.y + oy)
                .iter()
                .zip(&template)
                .map(|(a, b)| (a - b) * (a - b))
                .sum()
        };

        let mut best = (dx, dy);
        let mut best_ssd = ssd(dx, dy);
        let r = self.params.coarsest_radius as i64;
        for sy in -r..=r {
            for sx in -r..=r {
                if sx == 0 && sy == 0 {
                    continue;
                }
                let (ox, oy) = (dx + sx as f64, dy + sy as f64);
                let value = ssd(ox, oy);
                if value < best_ssd {
                    best_ssd = value;
                    best = (ox, oy);
                }
            }
        }
        best
    }

    /// Inverse-compositional refinement of a translation at one layer.
    fn refine_layer(
        &self,
        prev: &GrayImageView<'_>,
        curr: &GrayImageView<'_>,
        p: Point2<f64>,
        mut dx: f64,
        mut dy: f64,
    ) -> LayerStep {
        let offsets: Vec<(f64, f64)> = self.patch_offsets().collect();
        let mut template = Vec::with_capacity(offsets.len());
        let mut gradients = Vec::with_capacity(offsets.len());
        let (mut h00, mut h01, mut h11) = (0.0, 0.0, 0.0);
        for &(ox, oy) in &offsets {
            let (tx, ty) = (p.x + ox, p.y + oy);
            let gx = 0.5
                * (sample_bilinear_clamped(prev, tx + 1.0, ty)
                    - sample_bilinear_clamped(prev, tx - 1.0, ty));
            let gy = 0.5
                * (sample_bilinear_clamped(prev, tx, ty + 1.0)
                    - sample_bilinear_clamped(prev, tx, ty - 1.0));
            template.push(sample_bilinear_clamped(prev, tx, ty));
            gradients.push((gx, gy));
            h00 += gx * gx;
            h01 += gx * gy;
            h11 += gy * gy;
        }

        let det = h00 * h11 - h01 * h01;
        if det.abs() < 1e-6 {
            return LayerStep::Singular;
        }
        let inv_det = 1.0 / det;
        let (i00, i01, i11) = (inv_det * h11, -inv_det * h01, inv_det * h00);

        for _ in 0..self.params.iterations {
            let (mut b0, mut b1) = (0.0, 0.0);
            for ((&(ox, oy), &t), &(gx, gy)) in offsets.iter().zip(&template).zip(&gradients) {
                let e = sample_bilinear_clamped(curr, p.x + dx + ox, p.y + dy + oy) - t;
                b0 += gx * e;
                b1 += gy * e;
            }
            let step_x = i00 * b0 + i01 * b1;
            let step_y = i01 * b0 + i11 * b1;
            dx -= step_x;
            dy -= step_y;
            if step_x * step_x + step_y * step_y < self.params.epsilon * self.params.epsilon {
                break;
            }
        }
        LayerStep::Converged(dx, dy)
    }

    fn track_point(
        &self,
        previous: &FramePyramid,
        current: &FramePyramid,
        previous_point: Point2<f64>,
        predicted_point: Point2<f64>,
    ) -> Option<Point2<f64>> {
        let layers = previous.layers().min(current.layers());
        let coarsest = layers.checked_sub(1)?;
        let scale = (1u64 << coarsest) as f64;
        let mut dx = (predicted_point.x - previous_point.x) / scale;
        let mut dy = (predicted_point.y - previous_point.y) / scale;

        for layer in (0..layers).rev() {
            let prev = previous.layer(layer)?;
            let curr = current.layer(layer)?;
            let p = to_layer(previous_point, layer);

            if layer == coarsest {
                (dx, dy) = self.coarse_search(&prev, &curr, p, dx, dy);
            }

            match self.refine_layer(&prev, &curr, p, dx, dy) {
                LayerStep::Converged(x, y) => (dx, dy) = (x, y),
                LayerStep::Singular if layer == 0 => return None,
                LayerStep::Singular => {}
            }

            if layer > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let tracked = Point2::new(previous_point.x + dx, previous_point.y + dy);
        let finest = current.finest();
        let inside = tracked.x.is_finite()
            && tracked.y.is_finite()
            && finest.contains(tracked.x, tracked.y, 0.0);
        inside.then_some(tracked)
    }
}

impl PointTracker for PyramidalLucasKanade {
    fn track(
        &self,
        previous: &FramePyramid,
        current: &FramePyramid,
        previous_points: &[Point2<f64>],
        predicted_points: &[Point2<f64>],
    ) -> Option<Vec<Point2<f64>>> {
        if previous_points.len() != predicted_points.len() || !previous.is_compatible(current) {
            return None;
        }
        previous_points
            .iter()
            .zip(predicted_points)
            .map(|(&prev, &pred)| self.track_point(previous, current, prev, pred))
            .collect()
    }
}
