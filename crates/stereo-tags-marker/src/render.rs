//! Tag image generation and synthetic camera rendering.

use crate::layout::{module_at, module_values, ModuleGrid, MODULES_PER_SIDE};
use crate::{Reflectance, TagCodec};
use nalgebra::Point2;
use stereo_tags_core::{Camera, GrayImage, Pose};

/// Printable image of tag `id`: an 8×8 module grid `width` pixels wide,
/// padded on every side by `border_modules` modules of background.
///
/// Returns `None` for invalid ids, an undefined reflectance, or a width
/// smaller than one pixel per module.
pub fn generate_tag_image(
    id: u32,
    reflectance: Reflectance,
    width: usize,
    border_modules: usize,
) -> Option<GrayImage> {
    if reflectance == Reflectance::Undefined || width < MODULES_PER_SIDE {
        return None;
    }
    let pattern = TagCodec::new().encode(id)?;
    let modules = module_values(pattern);

    let module = width as f64 / MODULES_PER_SIDE as f64;
    let offset = (border_modules as f64 * module).round() as usize;
    let side = width + 2 * offset;
    let mut image = GrayImage::new(side, side, reflectance.module_color(0));

    for y in 0..width {
        let row = ((y as f64 / module) as usize).min(MODULES_PER_SIDE - 1);
        for x in 0..width {
            let col = ((x as f64 / module) as usize).min(MODULES_PER_SIDE - 1);
            let value = modules[row * MODULES_PER_SIDE + col];
            image.set(offset + x, offset + y, reflectance.module_color(value));
        }
    }
    Some(image)
}

/// Paint `modules` of a tag at `world_t_tag` into a camera image.
///
/// Each pixel center is cast as a ray and intersected with the tag plane;
/// pixels whose ray misses the tag are left untouched.
pub fn render_modules(
    image: &mut GrayImage,
    camera: &dyn Camera,
    world_t_camera: &Pose,
    world_t_tag: &Pose,
    size: f64,
    modules: &ModuleGrid,
    reflectance: Reflectance,
) {
    let tag_t_camera = world_t_tag.inverse() * world_t_camera;
    let origin = tag_t_camera.translation.vector;

    for y in 0..image.height.min(camera.height()) {
        for x in 0..image.width.min(camera.width()) {
            let dir = tag_t_camera.rotation * camera.ray(&Point2::new(x as f64, y as f64));
            if dir.z.abs() < 1e-12 {
                continue;
            }
            let t = -origin.z / dir.z;
            if t <= 0.0 {
                continue;
            }
            let hit = origin + dir * t;
            if let Some(value) = module_at(modules, size, hit.x, hit.y) {
                image.set(x, y, reflectance.module_color(value));
            }
        }
    }
}

/// Paint tag `id` into a camera image. Returns `false` for invalid ids.
pub fn render_tag(
    image: &mut GrayImage,
    camera: &dyn Camera,
    world_t_camera: &Pose,
    world_t_tag: &Pose,
    size: f64,
    id: u32,
    reflectance: Reflectance,
) -> bool {
    let Some(pattern) = TagCodec::new().encode(id) else {
        return false;
    };
    render_modules(
        image,
        camera,
        world_t_camera,
        world_t_tag,
        size,
        &module_values(pattern),
        reflectance,
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};
    use stereo_tags_core::PinholeCamera;

    #[test]
    fn generated_image_has_border_and_frame() {
        let img = generate_tag_image(5, Reflectance::Normal, 80, 1).expect("image");
        assert_eq!((img.width, img.height), (100, 100));
        // Border is background, the outer module ring is foreground.
        assert_eq!(img.data[0], 255);
        assert_eq!(img.data[12 * 100 + 12], 0);
        // Top-left orientation module is background.
        assert_eq!(img.data[25 * 100 + 25], 255);
    }

    #[test]
    fn inverted_image_swaps_colors() {
        let normal = generate_tag_image(9, Reflectance::Normal, 64, 0).expect("normal");
        let inverted = generate_tag_image(9, Reflectance::Inverted, 64, 0).expect("inverted");
        assert!(normal
            .data
            .iter()
            .zip(&inverted.data)
            .all(|(a, b)| *a == 255 - *b));
    }

    #[test]
    fn invalid_requests_are_rejected() {
        assert!(generate_tag_image(1024, Reflectance::Normal, 64, 0).is_none());
        assert!(generate_tag_image(3, Reflectance::Undefined, 64, 0).is_none());
    }

    #[test]
    fn rendered_tag_covers_projected_center() {
        let camera = PinholeCamera::new(320, 240, 300.0, 300.0, 159.5, 119.5);
        let size = 0.1;
        // Tag facing the camera: tag z points towards -z of the camera.
        let world_t_tag = Pose::from_parts(
            Translation3::new(-0.05, -0.05, 0.5),
            UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        );
        let mut img = GrayImage::new(320, 240, 128);
        assert!(render_tag(
            &mut img,
            &camera,
            &Pose::identity(),
            &world_t_tag,
            size,
            77,
            Reflectance::Normal
        ));
        // The top-left outer corner module is foreground.
        let near_corner = world_t_tag * nalgebra::Point3::new(0.004, -0.004, 0.0);
        let corner = camera
            .project_world(&Pose::identity(), &near_corner)
            .expect("visible");
        let (x, y) = (corner.x.round() as usize, corner.y.round() as usize);
        assert_eq!(img.data[y * 320 + x], 0);
        assert_eq!(img.data[0], 128);
    }
}
