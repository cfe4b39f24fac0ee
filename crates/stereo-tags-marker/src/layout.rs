//! Module grid and tag-local object points.
//!
//! A tag is an 8×8 grid of square modules. The tag frame has its origin at
//! the top-left outer corner, x to the right, y up and z towards the
//! viewer, so the whole tag lies in `[0, s] × [-s, 0]`.
//!
//! Module value 1 is foreground, 0 is background. Rows 0 and 7 and
//! columns 0 and 7 form the foreground frame, the inner light ring carries
//! the orientation marks, and the central 4×4 block holds the 16 data bits.

use nalgebra::{Point2, Point3};

pub const MODULES_PER_SIDE: usize = 8;
pub const MODULE_COUNT: usize = MODULES_PER_SIDE * MODULES_PER_SIDE;

/// Row-major module values, `modules[row * 8 + col]`.
pub type ModuleGrid = [u8; MODULE_COUNT];

/// Module values of a tag carrying `pattern` (bit 15 is the first data module).
pub fn module_values(pattern: u16) -> ModuleGrid {
    const FIXED: [[u8; MODULES_PER_SIDE]; MODULES_PER_SIDE] = [
        [1, 1, 1, 1, 1, 1, 1, 1],
        [1, 0, 0, 0, 0, 0, 1, 1],
        [1, 0, 0, 0, 0, 0, 0, 1],
        [1, 0, 0, 0, 0, 0, 0, 1],
        [1, 0, 0, 0, 0, 0, 0, 1],
        [1, 0, 0, 0, 0, 0, 0, 1],
        [1, 1, 0, 0, 0, 0, 1, 1],
        [1, 1, 1, 1, 1, 1, 1, 1],
    ];

    let mut modules = [0u8; MODULE_COUNT];
    for (row, values) in FIXED.iter().enumerate() {
        modules[row * MODULES_PER_SIDE..(row + 1) * MODULES_PER_SIDE].copy_from_slice(values);
    }
    for bit in 0..16 {
        let (row, col) = (2 + bit / 4, 2 + bit % 4);
        modules[row * MODULES_PER_SIDE + col] = ((pattern >> (15 - bit)) & 1) as u8;
    }
    modules
}

#[inline]
fn tag_point(x: f64, y: f64, module: f64) -> Point3<f64> {
    Point3::new(x * module, -y * module, 0.0)
}

fn scaled(points: &[(f64, f64)], size: f64) -> Vec<Point3<f64>> {
    let module = size / MODULES_PER_SIDE as f64;
    points.iter().map(|&(x, y)| tag_point(x, y, module)).collect()
}

/// Outer corners: top-left, bottom-left, bottom-right, top-right.
pub fn outer_corners(size: f64) -> [Point3<f64>; 4] {
    [
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(0.0, -size, 0.0),
        Point3::new(size, -size, 0.0),
        Point3::new(size, 0.0, 0.0),
    ]
}

/// Outer corners projected onto the tag plane.
pub fn outer_corners_2d(size: f64) -> [Point2<f64>; 4] {
    outer_corners(size).map(|p| Point2::new(p.x, p.y))
}

/// Tag center in the tag frame.
pub fn center(size: f64) -> Point3<f64> {
    Point3::new(0.5 * size, -0.5 * size, 0.0)
}

/// The ten corners of the inner light ring, independent of the data bits.
pub fn inner_corners(size: f64) -> Vec<Point3<f64>> {
    const POINTS: [(f64, f64); 10] = [
        (1.0, 1.0),
        (1.0, 6.0),
        (2.0, 6.0),
        (2.0, 7.0),
        (6.0, 7.0),
        (6.0, 6.0),
        (7.0, 6.0),
        (7.0, 2.0),
        (6.0, 2.0),
        (6.0, 1.0),
    ];
    scaled(&POINTS, size)
}

/// Grid vertices around the data block whose 2×2 module neighbourhood
/// forms a corner.
///
/// A vertex is a corner if one or three of its neighbours are foreground,
/// or if two diagonal neighbours are. With `skip_inner_corners`, vertices
/// that coincide with [`inner_corners`] are left out.
pub fn data_matrix_corners(
    modules: &ModuleGrid,
    size: f64,
    skip_inner_corners: bool,
) -> Vec<Point3<f64>> {
    const SKIP_BEGIN: [usize; 5] = [2, 2, 2, 2, 3];
    const SKIP_END: [usize; 5] = [6, 7, 7, 7, 6];

    let module = size / MODULES_PER_SIDE as f64;
    let mut out = Vec::new();
    for (i, y) in (2..7).enumerate() {
        let (begin, end) = if skip_inner_corners {
            (SKIP_BEGIN[i], SKIP_END[i])
        } else {
            (2, 7)
        };
        for x in begin..end {
            let top_left = modules[(y - 1) * MODULES_PER_SIDE + x - 1];
            let top_right = modules[(y - 1) * MODULES_PER_SIDE + x];
            let bottom_left = modules[y * MODULES_PER_SIDE + x - 1];
            let bottom_right = modules[y * MODULES_PER_SIDE + x];
            let sum = top_left + top_right + bottom_left + bottom_right;
            if sum == 1 || sum == 3 || (sum == 2 && top_left == bottom_right) {
                out.push(tag_point(x as f64, y as f64, module));
            }
        }
    }
    out
}

/// Centers of the 16 data modules in bit order.
pub fn data_module_centers(size: f64) -> Vec<Point3<f64>> {
    let module = size / MODULES_PER_SIDE as f64;
    (0..16)
        .map(|bit| tag_point(2.5 + (bit % 4) as f64, 2.5 + (bit / 4) as f64, module))
        .collect()
}

/// Centers of 20 foreground modules of the outer frame.
pub fn foreground_centers(size: f64) -> Vec<Point3<f64>> {
    const POINTS: [(f64, f64); 20] = [
        (0.5, 0.5),
        (0.5, 1.5),
        (0.5, 2.5),
        (0.5, 5.5),
        (0.5, 6.5),
        (0.5, 7.5),
        (1.5, 7.5),
        (2.5, 7.5),
        (5.5, 7.5),
        (6.5, 7.5),
        (7.5, 7.5),
        (7.5, 6.5),
        (7.5, 5.5),
        (7.5, 2.5),
        (7.5, 1.5),
        (7.5, 0.5),
        (6.5, 0.5),
        (5.5, 0.5),
        (2.5, 0.5),
        (1.5, 0.5),
    ];
    scaled(&POINTS, size)
}

/// Centers of 16 background modules of the inner ring.
pub fn background_centers(size: f64) -> Vec<Point3<f64>> {
    const POINTS: [(f64, f64); 16] = [
        (1.5, 2.5),
        (1.5, 3.5),
        (1.5, 4.5),
        (1.5, 5.5),
        (2.5, 6.5),
        (3.5, 6.5),
        (4.5, 6.5),
        (5.5, 6.5),
        (6.5, 5.5),
        (6.5, 4.5),
        (6.5, 3.5),
        (6.5, 2.5),
        (5.5, 1.5),
        (4.5, 1.5),
        (3.5, 1.5),
        (2.5, 1.5),
    ];
    scaled(&POINTS, size)
}

/// Centers of the orientation modules next to each outer corner, in corner
/// order. Only the top-left one is background.
pub fn orientation_centers(size: f64) -> [Point3<f64>; 4] {
    let module = size / MODULES_PER_SIDE as f64;
    [
        tag_point(1.5, 1.5, module),
        tag_point(1.5, 6.5, module),
        tag_point(6.5, 6.5, module),
        tag_point(6.5, 1.5, module),
    ]
}

/// Value of the module containing the tag-plane point `(x, y)`, or `None`
/// outside the tag.
pub fn module_at(modules: &ModuleGrid, size: f64, x: f64, y: f64) -> Option<u8> {
    if !(0.0..size).contains(&x) || !(0.0..size).contains(&-y) {
        return None;
    }
    let module = size / MODULES_PER_SIDE as f64;
    let col = ((x / module) as usize).min(MODULES_PER_SIDE - 1);
    let row = ((-y / module) as usize).min(MODULES_PER_SIDE - 1);
    Some(modules[row * MODULES_PER_SIDE + col])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_at(modules: &ModuleGrid, p: &Point3<f64>, size: f64) -> u8 {
        module_at(modules, size, p.x, p.y).expect("inside tag")
    }

    #[test]
    fn sample_groups_hit_expected_module_values() {
        let modules = module_values(0xA5C3);
        let size = 0.16;
        assert!(foreground_centers(size).iter().all(|p| value_at(&modules, p, size) == 1));
        assert!(background_centers(size).iter().all(|p| value_at(&modules, p, size) == 0));
        let orientation: Vec<u8> = orientation_centers(size)
            .iter()
            .map(|p| value_at(&modules, p, size))
            .collect();
        assert_eq!(orientation, vec![0, 1, 1, 1]);
    }

    #[test]
    fn data_centers_follow_bit_order() {
        let pattern = 0b1000_0000_0000_0001u16;
        let modules = module_values(pattern);
        let size = 8.0;
        let values: Vec<u8> = data_module_centers(size)
            .iter()
            .map(|p| value_at(&modules, p, size))
            .collect();
        assert_eq!(values[0], 1);
        assert_eq!(values[15], 1);
        assert!(values[1..15].iter().all(|&v| v == 0));
    }

    #[test]
    fn inner_corners_are_data_independent_corners() {
        let size = 8.0;
        for pattern in [0u16, 0xFFFF, 0x1234] {
            let all = data_matrix_corners(&module_values(pattern), size, false);
            for corner in [(2.0, -6.0), (6.0, -6.0), (6.0, -2.0)] {
                assert!(
                    all.iter().any(|p| p.x == corner.0 && p.y == corner.1),
                    "missing {corner:?} for {pattern:#x}"
                );
            }
            let skipped = data_matrix_corners(&module_values(pattern), size, true);
            assert_eq!(skipped.len() + 3, all.len());
        }
    }

    #[test]
    fn empty_data_block_has_no_interior_corners() {
        let corners = data_matrix_corners(&module_values(0), 8.0, true);
        assert!(corners.is_empty(), "{corners:?}");
    }
}
