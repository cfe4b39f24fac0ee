use crate::{core, marker, tracker};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced by the high-level facade helpers.
#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidGrayBuffer { expected: usize, got: usize },

    #[error("invalid grayscale image dimensions (width={width}, height={height})")]
    InvalidGrayDimensions { width: u32, height: u32 },

    #[error("image is {width}x{height} but the camera expects {camera_width}x{camera_height}")]
    CameraMismatch {
        width: usize,
        height: usize,
        camera_width: usize,
        camera_height: usize,
    },

    #[error("cannot render tag {id}")]
    InvalidTag { id: u32 },

    #[error(transparent)]
    Image(#[from] ::image::ImageError),

    #[error(transparent)]
    Io(#[from] tracker::IoError),
}

/// Convert an `image::GrayImage` into the lightweight `stereo-tags-core` view type.
pub fn gray_view(img: &::image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Build an `image::GrayImage` from a raw grayscale buffer.
pub fn gray_image_from_slice(
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<::image::GrayImage, DetectError> {
    let w = usize::try_from(width).ok();
    let h = usize::try_from(height).ok();
    let Some((w, h)) = w.zip(h) else {
        return Err(DetectError::InvalidGrayDimensions { width, height });
    };
    let Some(expected) = w.checked_mul(h) else {
        return Err(DetectError::InvalidGrayDimensions { width, height });
    };
    if pixels.len() != expected {
        return Err(DetectError::InvalidGrayBuffer {
            expected,
            got: pixels.len(),
        });
    }
    ::image::GrayImage::from_raw(width, height, pixels.to_vec())
        .ok_or(DetectError::InvalidGrayDimensions { width, height })
}

/// Convert a `stereo-tags-core` image into an `image::GrayImage`.
pub fn to_image(img: &core::GrayImage) -> Result<::image::GrayImage, DetectError> {
    let width = u32::try_from(img.width).unwrap_or(u32::MAX);
    let height = u32::try_from(img.height).unwrap_or(u32::MAX);
    gray_image_from_slice(width, height, &img.data)
}

/// Load an image from disk as 8-bit grayscale.
pub fn load_gray(path: impl AsRef<Path>) -> Result<::image::GrayImage, DetectError> {
    Ok(::image::ImageReader::open(path)
        .map_err(tracker::IoError::from)?
        .decode()?
        .to_luma8())
}

/// Render a printable tag and save it, e.g. as PNG.
pub fn save_tag_image(
    path: impl AsRef<Path>,
    id: u32,
    reflectance: marker::Reflectance,
    width: usize,
    border_modules: usize,
) -> Result<(), DetectError> {
    let tag = marker::generate_tag_image(id, reflectance, width, border_modules)
        .ok_or(DetectError::InvalidTag { id })?;
    to_image(&tag)?.save(path)?;
    Ok(())
}

/// Detect every tag in a single image.
///
/// Tags listed in `sizes` get their configured size, all others the
/// default size. Poses are expressed in the world frame given by
/// `world_t_camera`.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(img, camera, world_t_camera, sizes, params),
        fields(width = img.width(), height = img.height())
    )
)]
pub fn detect_tags(
    img: &::image::GrayImage,
    camera: &dyn core::Camera,
    world_t_camera: &core::Pose,
    sizes: &tracker::TagSizeConfig,
    params: tracker::TrackerParams,
) -> Result<Vec<marker::Tag>, DetectError> {
    let view = gray_view(img);
    if view.width != camera.width() || view.height != camera.height() {
        return Err(DetectError::CameraMismatch {
            width: view.width,
            height: view.height,
            camera_width: camera.width(),
            camera_height: camera.height(),
        });
    }
    let camera_view = tracker::CameraView::new(
        camera,
        view,
        *world_t_camera,
        core::Pose::identity(),
    );
    let observer = tracker::TagObserver::new(params);
    let tags = observer
        .detect_tags_mono(&camera_view, sizes.default_size, &sizes.size_map())
        .into_iter()
        .map(|(tag, _)| tag)
        .collect();
    Ok(tags)
}

pub fn detect_tags_from_gray_u8(
    width: u32,
    height: u32,
    pixels: &[u8],
    camera: &dyn core::Camera,
    world_t_camera: &core::Pose,
    sizes: &tracker::TagSizeConfig,
    params: tracker::TrackerParams,
) -> Result<Vec<marker::Tag>, DetectError> {
    let img = gray_image_from_slice(width, height, pixels)?;
    detect_tags(&img, camera, world_t_camera, sizes, params)
}

/// Run a detection job described by a config file.
///
/// The report always comes back; failures are recorded in its `error`
/// field so the caller can still write it out.
pub fn run_detect_config(
    cfg: &tracker::DetectConfig,
    config_path: &Path,
) -> tracker::DetectReport {
    let mut report = tracker::DetectReport::new(cfg, config_path);
    let result = cfg
        .world_t_camera()
        .map_err(DetectError::from)
        .and_then(|world_t_camera| {
            let img = load_gray(&cfg.image_path)?;
            detect_tags(
                &img,
                &cfg.camera,
                &world_t_camera,
                &cfg.tag_sizes,
                cfg.params.clone(),
            )
        });
    match result {
        Ok(tags) => {
            log::info!("{}: {} tags", cfg.image_path, tags.len());
            report.set_tags(&tags);
        }
        Err(err) => {
            log::warn!("{}: {err}", cfg.image_path);
            report.set_error(err);
        }
    }
    report
}
