use crate::MAX_TAG_ID;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stereo_tags_core::{is_finite_pose, Pose};

/// Four image corners in tag order: top-left, bottom-left, bottom-right,
/// top-right.
pub type Quad = [Point2<f64>; 4];

/// Known physical edge lengths keyed by tag id.
pub type TagSizeMap = HashMap<u32, f64>;

/// Photometric polarity of a tag in the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reflectance {
    #[default]
    Undefined,
    /// Foreground modules are darker than background modules.
    Normal,
    /// Foreground modules are lighter than background modules.
    Inverted,
}

impl Reflectance {
    /// Module value assigned to pixels darker than the threshold.
    #[inline]
    pub fn dark_value(self) -> u8 {
        match self {
            Self::Inverted => 0,
            _ => 1,
        }
    }

    /// Module value assigned to pixels at or above the threshold.
    #[inline]
    pub fn light_value(self) -> u8 {
        1 - self.dark_value()
    }

    /// Gray level painted for a module value.
    #[inline]
    pub fn module_color(self, value: u8) -> u8 {
        let foreground = match self {
            Self::Inverted => 255,
            _ => 0,
        };
        if value == 1 {
            foreground
        } else {
            255 - foreground
        }
    }
}

/// A decoded tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tag {
    pub id: u32,
    pub reflectance: Reflectance,
    /// Gray level separating foreground and background modules.
    pub intensity_threshold: u8,
    pub world_t_tag: Pose,
    /// Edge length of the outer square, in world units.
    pub size: f64,
}

impl Tag {
    pub fn new(
        id: u32,
        reflectance: Reflectance,
        intensity_threshold: u8,
        world_t_tag: Pose,
        size: f64,
    ) -> Self {
        Self {
            id,
            reflectance,
            intensity_threshold,
            world_t_tag,
            size,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id <= MAX_TAG_ID
            && self.reflectance != Reflectance::Undefined
            && self.size.is_finite()
            && self.size > 0.0
            && is_finite_pose(&self.world_t_tag)
    }
}

/// Signed area of a polygon in image coordinates.
///
/// Tag quads in canonical order have negative area.
pub fn signed_area(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

/// Length of the shortest quad edge.
pub fn min_edge_length(quad: &Quad) -> f64 {
    (0..4)
        .map(|i| (quad[(i + 1) % 4] - quad[i]).norm())
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_has_negative_area() {
        let quad: Quad = [
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 1.0),
            Point2::new(1.0, 0.0),
        ];
        assert_eq!(signed_area(&quad), -1.0);
        assert_eq!(min_edge_length(&quad), 1.0);
    }

    #[test]
    fn validity_requires_all_fields() {
        let tag = Tag::new(3, Reflectance::Normal, 120, Pose::identity(), 0.1);
        assert!(tag.is_valid());
        assert!(!Tag { size: 0.0, ..tag }.is_valid());
        assert!(!Tag {
            reflectance: Reflectance::Undefined,
            ..tag
        }
        .is_valid());
        assert!(!Tag { id: 1024, ..tag }.is_valid());
    }

    #[test]
    fn colors_follow_reflectance() {
        assert_eq!(Reflectance::Normal.module_color(1), 0);
        assert_eq!(Reflectance::Inverted.module_color(1), 255);
        assert_eq!(Reflectance::Normal.light_value(), 0);
        assert_eq!(Reflectance::Inverted.dark_value(), 0);
    }
}
