use crate::image::{sample_bilinear, GrayImageView};
use nalgebra::{Matrix2, Point2, Vector2};

/// Sub-pixel corner refinement.
pub trait CornerRefiner: Send + Sync {
    /// Refine `point` within a `(2 * window + 1)²` neighbourhood.
    fn refine(&self, image: &GrayImageView<'_>, point: Point2<f64>, window: usize)
        -> Option<Point2<f64>>;
}

/// Gradient-orthogonality refiner.
///
/// For a true corner `c`, every image gradient `g` at a nearby point `q`
/// is orthogonal to `q - c`. The refiner solves the Gaussian-weighted least
/// squares problem `Σ w (gᵀ (q - c))²` for `c` and iterates.
#[derive(Clone, Copy, Debug)]
pub struct GradientCornerRefiner {
    pub max_iterations: usize,
    pub epsilon: f64,
}

impl Default for GradientCornerRefiner {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            epsilon: 1e-3,
        }
    }
}

impl CornerRefiner for GradientCornerRefiner {
    fn refine(
        &self,
        image: &GrayImageView<'_>,
        point: Point2<f64>,
        window: usize,
    ) -> Option<Point2<f64>> {
        if window == 0 {
            return None;
        }
        let n = window as f64;
        let max_sqr_shift = (0.9 * n) * (0.9 * n);
        let margin = n + 2.0;
        let r = window as i64;

        let mut c = point;
        for _ in 0..self.max_iterations {
            if !image.contains(c.x, c.y, margin) {
                return None;
            }

            let mut a = Matrix2::zeros();
            let mut b = Vector2::zeros();
            for oy in -r..=r {
                let wy = (-(oy as f64 / n).powi(2)).exp();
                for ox in -r..=r {
                    let w = wy * (-(ox as f64 / n).powi(2)).exp();
                    let q = Vector2::new(c.x + ox as f64, c.y + oy as f64);
                    let g = Vector2::new(
                        0.5 * (sample_bilinear(image, q.x + 1.0, q.y)
                            - sample_bilinear(image, q.x - 1.0, q.y)),
                        0.5 * (sample_bilinear(image, q.x, q.y + 1.0)
                            - sample_bilinear(image, q.x, q.y - 1.0)),
                    );
                    let ggt = g * g.transpose() * w;
                    a += ggt;
                    b += ggt * q;
                }
            }

            let next = a.try_inverse().map(|inv| inv * b)?;
            let next = Point2::from(next);
            if (next - point).norm_squared() > max_sqr_shift {
                return None;
            }
            let step = (next - c).norm_squared();
            c = next;
            if step < self.epsilon * self.epsilon {
                break;
            }
        }

        c.coords.iter().all(|v| v.is_finite()).then_some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GrayImage;

    // Dark quadrant below-right of the corner at pixel boundary (40.5, 30.5).
    fn corner_image() -> GrayImage {
        let mut img = GrayImage::new(80, 60, 220);
        for y in 31..60 {
            for x in 41..80 {
                img.set(x, y, 20);
            }
        }
        img
    }

    #[test]
    fn converges_to_edge_intersection() {
        let img = corner_image();
        let refined = GradientCornerRefiner::default()
            .refine(&img.view(), Point2::new(42.0, 32.0), 4)
            .expect("refined");
        assert!(
            (refined - Point2::new(40.5, 30.5)).norm() < 0.1,
            "refined to {refined}"
        );
    }

    #[test]
    fn fails_near_border() {
        let img = corner_image();
        assert!(GradientCornerRefiner::default()
            .refine(&img.view(), Point2::new(2.0, 2.0), 4)
            .is_none());
    }

    #[test]
    fn fails_on_flat_patch() {
        let img = GrayImage::new(60, 60, 100);
        assert!(GradientCornerRefiner::default()
            .refine(&img.view(), Point2::new(30.0, 30.0), 3)
            .is_none());
    }
}
