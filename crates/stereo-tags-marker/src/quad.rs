//! Candidate quadrilateral detection.

use crate::threshold::otsu_threshold;
use crate::types::{min_edge_length, signed_area, Quad};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use stereo_tags_core::GrayImageView;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Finds tag outlines in a frame.
pub trait QuadDetector: Send + Sync {
    /// Candidate quads in canonical cyclic order (negative signed area),
    /// with every corner at least `border` pixels inside the image.
    fn detect(&self, image: &GrayImageView<'_>, border: usize) -> Vec<Quad>;
}

/// Parameters of [`ContourQuadDetector`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadDetectorParams {
    /// Minimum component size in pixels.
    pub min_area: usize,
    /// Maximum component size as a fraction of the image area.
    pub max_area_fraction: f64,
    /// Minimum quad edge length in pixels.
    pub min_edge: f64,
}

impl Default for QuadDetectorParams {
    fn default() -> Self {
        Self {
            min_area: 64,
            max_area_fraction: 0.5,
            min_edge: 10.0,
        }
    }
}

/// Quads from the extreme points of binarized connected components.
///
/// Both dark and light components are considered, so tags of either
/// reflectance are found.
#[derive(Clone, Debug, Default)]
pub struct ContourQuadDetector {
    params: QuadDetectorParams,
}

struct Component {
    boundary: Vec<Point2<f64>>,
    area: usize,
    touches_border: bool,
}

impl ContourQuadDetector {
    pub fn new(params: QuadDetectorParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &QuadDetectorParams {
        &self.params
    }

    fn components(image: &GrayImageView<'_>, border: usize) -> Vec<Component> {
        let (w, h) = (image.width, image.height);
        let threshold = otsu_threshold(image);
        let dark: Vec<bool> = image.data.iter().map(|&v| v <= threshold).collect();
        let mut visited = vec![false; w * h];
        let mut queue = VecDeque::new();
        let mut out = Vec::new();

        for start in 0..w * h {
            if visited[start] {
                continue;
            }
            let class = dark[start];
            visited[start] = true;
            queue.push_back(start);

            let mut component = Component {
                boundary: Vec::new(),
                area: 0,
                touches_border: false,
            };
            while let Some(idx) = queue.pop_front() {
                let (x, y) = (idx % w, idx / w);
                component.area += 1;
                if x < border || y < border || x + border >= w || y + border >= h {
                    component.touches_border = true;
                }

                let mut on_boundary = false;
                let neighbours = [
                    (x > 0).then(|| idx - 1),
                    (x + 1 < w).then(|| idx + 1),
                    (y > 0).then(|| idx - w),
                    (y + 1 < h).then(|| idx + w),
                ];
                for n in neighbours {
                    match n {
                        Some(n) if dark[n] == class => {
                            if !visited[n] {
                                visited[n] = true;
                                queue.push_back(n);
                            }
                        }
                        _ => on_boundary = true,
                    }
                }
                if on_boundary {
                    component.boundary.push(Point2::new(x as f64, y as f64));
                }
            }
            out.push(component);
        }
        out
    }

    fn fit_quad(&self, boundary: &[Point2<f64>]) -> Option<Quad> {
        let n = boundary.len() as f64;
        let centroid = Point2::from(
            boundary
                .iter()
                .fold(Vector2::zeros(), |acc, p| acc + p.coords)
                / n,
        );

        let farthest_from = |q: Point2<f64>| {
            boundary
                .iter()
                .copied()
                .max_by(|a, b| (a - q).norm_squared().total_cmp(&(b - q).norm_squared()))
        };
        let p0 = farthest_from(centroid)?;
        let p2 = farthest_from(p0)?;

        let axis = p2 - p0;
        let side = |p: &Point2<f64>| axis.x * (p.y - p0.y) - axis.y * (p.x - p0.x);
        let p1 = boundary
            .iter()
            .copied()
            .max_by(|a, b| side(a).total_cmp(&side(b)))?;
        let p3 = boundary
            .iter()
            .copied()
            .min_by(|a, b| side(a).total_cmp(&side(b)))?;
        if side(&p1) <= 0.0 || side(&p3) >= 0.0 {
            return None;
        }

        let mut quad: Quad = [p0, p1, p2, p3];

        // Extreme pixel centers sit half a pixel inside the outline.
        let center = Point2::from(
            quad.iter()
                .fold(Vector2::zeros(), |acc, p| acc + p.coords)
                / 4.0,
        );
        for corner in &mut quad {
            let dir = *corner - center;
            let len = dir.norm();
            if len > 0.0 {
                *corner += dir * (std::f64::consts::FRAC_1_SQRT_2 / len);
            }
        }

        if signed_area(&quad) > 0.0 {
            quad = [quad[0], quad[3], quad[2], quad[1]];
        }
        Some(quad)
    }

    fn is_convex(quad: &Quad) -> bool {
        (0..4).all(|i| {
            let a = quad[(i + 1) % 4] - quad[i];
            let b = quad[(i + 2) % 4] - quad[(i + 1) % 4];
            a.x * b.y - a.y * b.x < 0.0
        })
    }
}

impl QuadDetector for ContourQuadDetector {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, image),
            fields(width = image.width, height = image.height)
        )
    )]
    fn detect(&self, image: &GrayImageView<'_>, border: usize) -> Vec<Quad> {
        if image.width <= 2 * border || image.height <= 2 * border {
            return Vec::new();
        }
        let pixels = (image.width * image.height) as f64;
        let max_area = (self.params.max_area_fraction * pixels) as usize;
        let b = border as f64;

        let quads: Vec<Quad> = Self::components(image, border)
            .into_iter()
            .filter(|c| !c.touches_border && c.area >= self.params.min_area && c.area <= max_area)
            .filter_map(|c| self.fit_quad(&c.boundary))
            .filter(|q| Self::is_convex(q) && min_edge_length(q) >= self.params.min_edge)
            .filter(|q| q.iter().all(|p| image.contains(p.x, p.y, b)))
            .collect();

        log::trace!("quad detector: {} candidates", quads.len());
        quads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_tags_core::GrayImage;

    fn filled_square(x0: usize, y0: usize, side: usize, value: u8, background: u8) -> GrayImage {
        let mut img = GrayImage::new(120, 100, background);
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                img.set(x, y, value);
            }
        }
        img
    }

    #[test]
    fn finds_dark_square_in_canonical_order() {
        let img = filled_square(30, 20, 40, 20, 230);
        let quads = ContourQuadDetector::default().detect(&img.view(), 5);
        assert_eq!(quads.len(), 1);
        let q = quads[0];
        assert!(signed_area(&q) < 0.0);
        for expected in [
            Point2::new(29.5, 19.5),
            Point2::new(29.5, 59.5),
            Point2::new(69.5, 59.5),
            Point2::new(69.5, 19.5),
        ] {
            assert!(
                q.iter().any(|p| (p - expected).norm() < 1.0),
                "no corner near {expected} in {q:?}"
            );
        }
    }

    #[test]
    fn finds_light_square_on_dark_background() {
        let img = filled_square(30, 20, 40, 230, 20);
        let quads = ContourQuadDetector::default().detect(&img.view(), 5);
        assert_eq!(quads.len(), 1);
    }

    #[test]
    fn ignores_components_touching_the_border() {
        let img = filled_square(2, 20, 40, 20, 230);
        assert!(ContourQuadDetector::default().detect(&img.view(), 5).is_empty());
    }
}
