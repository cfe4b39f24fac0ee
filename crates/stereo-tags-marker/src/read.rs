//! Reading a tag from a candidate quad: pose, polarity, orientation, payload.

use crate::layout::{
    background_centers, center, data_module_centers, foreground_centers, orientation_centers,
    outer_corners,
};
use crate::types::{Quad, Reflectance, Tag, TagSizeMap};
use crate::TagCodec;
use nalgebra::{Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use stereo_tags_core::{
    is_finite_pose, sample_bilinear_u8, Camera, GrayImageView, PlanarPoseSolver, Pose,
    PoseSolver, PoseSolverParams,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Why a quad did not yield a tag.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("no pose fits the quad corners")]
    PoseFailed,
    #[error("a sample point projects outside the image")]
    OutOfView,
    #[error("contrast too low (foreground {foreground}, background {background})")]
    LowContrast { foreground: u8, background: u8 },
    #[error(
        "inconsistent binarization (foreground {foreground_ratio:.2}, \
         background {background_ratio:.2})"
    )]
    InconsistentBinarization {
        foreground_ratio: f64,
        background_ratio: f64,
    },
    #[error("expected exactly one background orientation module, found {background_modules}")]
    AmbiguousOrientation { background_modules: usize },
    #[error("pattern {pattern:#06x} is not a codeword")]
    DecodeFailed { pattern: u16 },
}

/// Parameters of [`TagReader`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderParams {
    /// Minimum difference of the mean foreground and background levels.
    pub min_contrast: u8,
    /// Minimum fraction of frame and ring samples on the expected side of
    /// the threshold.
    pub min_vote_ratio: f64,
    pub pose_solver: PoseSolverParams,
}

impl Default for ReaderParams {
    fn default() -> Self {
        Self {
            min_contrast: 10,
            min_vote_ratio: 0.9,
            pose_solver: PoseSolverParams::default(),
        }
    }
}

/// Polarity and threshold used to turn gray levels into module values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binarization {
    pub reflectance: Reflectance,
    pub threshold: u8,
}

impl Binarization {
    #[inline]
    pub fn module_value(&self, gray: u8) -> u8 {
        if gray < self.threshold {
            self.reflectance.dark_value()
        } else {
            self.reflectance.light_value()
        }
    }
}

/// Decodes tags from quads.
pub struct TagReader {
    params: ReaderParams,
    codec: TagCodec,
    solver: Box<dyn PoseSolver>,
}

impl std::fmt::Debug for TagReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagReader")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Default for TagReader {
    fn default() -> Self {
        Self::new(ReaderParams::default())
    }
}

fn sample(
    camera: &dyn Camera,
    image: &GrayImageView<'_>,
    camera_t_tag: &Pose,
    p_tag: &Point3<f64>,
) -> Result<u8, ReadError> {
    let pixel = camera
        .project(&camera_t_tag.transform_point(p_tag))
        .ok_or(ReadError::OutOfView)?;
    if !image.contains(pixel.x, pixel.y, 0.0) {
        return Err(ReadError::OutOfView);
    }
    Ok(sample_bilinear_u8(image, pixel.x, pixel.y))
}

fn rounded_mean(values: &[u8]) -> u8 {
    let n = values.len().max(1) as u32;
    let sum: u32 = values.iter().map(|&v| v as u32).sum();
    ((sum + n / 2) / n) as u8
}

impl TagReader {
    pub fn new(params: ReaderParams) -> Self {
        let solver = Box::new(PlanarPoseSolver::new(params.pose_solver.clone()));
        Self {
            params,
            codec: TagCodec::new(),
            solver,
        }
    }

    pub fn with_pose_solver(mut self, solver: Box<dyn PoseSolver>) -> Self {
        self.solver = solver;
        self
    }

    #[inline]
    pub fn params(&self) -> &ReaderParams {
        &self.params
    }

    #[inline]
    pub fn codec(&self) -> &TagCodec {
        &self.codec
    }

    /// Pose of the outer square `quad` at edge length `size`, as `camera_T_tag`.
    pub fn solve_pose(
        &self,
        camera: &dyn Camera,
        quad: &Quad,
        size: f64,
    ) -> Result<Pose, ReadError> {
        self.solver
            .solve(camera, &outer_corners(size), quad)
            .ok_or(ReadError::PoseFailed)
    }

    /// Decode a tag from a quad in canonical order.
    ///
    /// The pose is first estimated at edge length `size`. If `size_map`
    /// knows a different size for the decoded id, the translation is
    /// rescaled and the known size reported. Returns the tag and its quad
    /// rotated so that corner 0 is the tag's top-left corner.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, camera, image, quad, world_t_camera, size_map))
    )]
    pub fn read(
        &self,
        camera: &dyn Camera,
        image: &GrayImageView<'_>,
        quad: &Quad,
        world_t_camera: &Pose,
        size: f64,
        size_map: &TagSizeMap,
    ) -> Result<(Tag, Quad), ReadError> {
        let unoriented = self.solve_pose(camera, quad, size)?;
        let binarization = self.determine_reflectance(camera, image, &unoriented, size)?;
        let (oriented_quad, mut camera_t_tag) =
            Self::determine_orientation(camera, image, quad, &unoriented, size, &binarization)?;

        let pattern = Self::read_data_matrix(camera, image, &camera_t_tag, size, &binarization)?;
        let id = self
            .codec
            .decode(pattern)
            .ok_or(ReadError::DecodeFailed { pattern })?;

        let mut tag_size = size;
        if let Some(&known) = size_map.get(&id) {
            if (known - size).abs() > 1e-9 * known.abs().max(1.0) {
                camera_t_tag.translation.vector *= known / size;
                tag_size = known;
            }
        }

        let tag = Tag::new(
            id,
            binarization.reflectance,
            binarization.threshold,
            world_t_camera * camera_t_tag,
            tag_size,
        );
        if !tag.is_valid() {
            return Err(ReadError::PoseFailed);
        }
        log::debug!("read tag {id} ({:?})", tag.reflectance);
        Ok((tag, oriented_quad))
    }

    /// Polarity and threshold from the outer frame and the inner ring.
    pub fn determine_reflectance(
        &self,
        camera: &dyn Camera,
        image: &GrayImageView<'_>,
        camera_t_tag: &Pose,
        size: f64,
    ) -> Result<Binarization, ReadError> {
        let collect = |points: Vec<Point3<f64>>| {
            points
                .iter()
                .map(|p| sample(camera, image, camera_t_tag, p))
                .collect::<Result<Vec<u8>, _>>()
        };
        let foreground = collect(foreground_centers(size))?;
        let background = collect(background_centers(size))?;

        let fg = rounded_mean(&foreground);
        let bg = rounded_mean(&background);
        if fg.abs_diff(bg) < self.params.min_contrast {
            return Err(ReadError::LowContrast {
                foreground: fg,
                background: bg,
            });
        }

        let threshold = ((fg as u16 + bg as u16 + 1) / 2) as u8;
        let reflectance = if fg < bg {
            Reflectance::Normal
        } else {
            Reflectance::Inverted
        };
        let is_dark = |v: &&u8| **v < threshold;
        let (fg_votes, bg_votes) = match reflectance {
            Reflectance::Normal => (
                foreground.iter().filter(is_dark).count(),
                background.iter().filter(|v| !is_dark(v)).count(),
            ),
            _ => (
                foreground.iter().filter(|v| !is_dark(v)).count(),
                background.iter().filter(is_dark).count(),
            ),
        };

        let foreground_ratio = fg_votes as f64 / foreground.len() as f64;
        let background_ratio = bg_votes as f64 / background.len() as f64;
        if foreground_ratio < self.params.min_vote_ratio
            || background_ratio < self.params.min_vote_ratio
        {
            return Err(ReadError::InconsistentBinarization {
                foreground_ratio,
                background_ratio,
            });
        }

        Ok(Binarization {
            reflectance,
            threshold,
        })
    }

    /// Rotate the quad and pose so the single background orientation module
    /// sits at the top-left corner.
    pub fn determine_orientation(
        camera: &dyn Camera,
        image: &GrayImageView<'_>,
        quad: &Quad,
        camera_t_tag: &Pose,
        size: f64,
        binarization: &Binarization,
    ) -> Result<(Quad, Pose), ReadError> {
        let mut values = [0u8; 4];
        for (value, p) in values.iter_mut().zip(orientation_centers(size).iter()) {
            *value = binarization.module_value(sample(camera, image, camera_t_tag, p)?);
        }
        let background_modules = values.iter().filter(|&&v| v == 0).count();
        if background_modules != 1 {
            return Err(ReadError::AmbiguousOrientation { background_modules });
        }
        let k = values.iter().position(|&v| v == 0).unwrap_or(0);

        let oriented: Quad = std::array::from_fn(|i| quad[(k + i) & 3]);

        // Rotation about the tag center taking corner i to corner i + k.
        let rotation = UnitQuaternion::from_axis_angle(
            &Vector3::z_axis(),
            k as f64 * std::f64::consts::FRAC_PI_2,
        );
        let c = center(size).coords;
        let shift = Translation3::from(c - rotation * c);
        let unoriented_t_oriented = Pose::from_parts(shift, rotation);

        Ok((oriented, camera_t_tag * unoriented_t_oriented))
    }

    /// The 16 data bits, first module in the most significant bit.
    pub fn read_data_matrix(
        camera: &dyn Camera,
        image: &GrayImageView<'_>,
        camera_t_tag: &Pose,
        size: f64,
        binarization: &Binarization,
    ) -> Result<u16, ReadError> {
        let mut pattern = 0u16;
        for (bit, p) in data_module_centers(size).iter().enumerate() {
            let value = binarization.module_value(sample(camera, image, camera_t_tag, p)?);
            pattern |= (value as u16) << (15 - bit);
        }
        Ok(pattern)
    }

    /// True if the data matrix of a known tag still decodes to its id in
    /// `image` under `world_t_camera`.
    pub fn verify(
        &self,
        camera: &dyn Camera,
        image: &GrayImageView<'_>,
        world_t_camera: &Pose,
        tag: &Tag,
    ) -> bool {
        if !tag.is_valid() {
            return false;
        }
        let camera_t_tag = world_t_camera.inverse() * tag.world_t_tag;
        if !is_finite_pose(&camera_t_tag) {
            return false;
        }
        let binarization = Binarization {
            reflectance: tag.reflectance,
            threshold: tag.intensity_threshold,
        };
        Self::read_data_matrix(camera, image, &camera_t_tag, tag.size, &binarization)
            .ok()
            .and_then(|pattern| self.codec.decode(pattern))
            == Some(tag.id)
    }
}
