//! JSON configuration and report helpers.

use crate::{StereoTagTracker, TrackerParams};
use nalgebra::{Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{
    fs,
    path::{Path, PathBuf},
};
use stereo_tags_core::{is_finite_pose, PinholeCamera, Pose};
use stereo_tags_marker::{Reflectance, Tag, TagSizeMap};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid tag record {id}")]
    InvalidTag { id: u32 },
    #[error("invalid pose matrix in {field}")]
    InvalidPose { field: &'static str },
}

/// Row-major 4×4 homogeneous matrix.
pub type PoseMatrix = [[f64; 4]; 4];

fn identity_matrix() -> PoseMatrix {
    pose_to_matrix(&Pose::identity())
}

pub fn pose_to_matrix(pose: &Pose) -> PoseMatrix {
    let m = pose.to_homogeneous();
    std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]))
}

/// Rigid pose from a homogeneous matrix. The rotation block is
/// re-orthonormalized; non-finite or degenerate matrices are rejected.
pub fn pose_from_matrix(matrix: &PoseMatrix) -> Option<Pose> {
    let m = Matrix4::from_fn(|r, c| matrix[r][c]);
    if !m.iter().all(|v| v.is_finite()) {
        return None;
    }
    let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
    if r.determinant() <= 0.0 {
        return None;
    }
    let rotation = Rotation3::from_matrix(&r);
    let t = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    let pose = Pose::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_rotation_matrix(&rotation),
    );
    is_finite_pose(&pose).then_some(pose)
}

fn default_tag_size() -> f64 {
    0.1
}

/// Default and per-id physical tag sizes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagSizeConfig {
    #[serde(default = "default_tag_size")]
    pub default_size: f64,
    #[serde(default)]
    pub sizes: BTreeMap<u32, f64>,
}

impl Default for TagSizeConfig {
    fn default() -> Self {
        Self {
            default_size: default_tag_size(),
            sizes: BTreeMap::new(),
        }
    }
}

impl TagSizeConfig {
    pub fn size_map(&self) -> TagSizeMap {
        self.sizes.iter().map(|(&id, &size)| (id, size)).collect()
    }
}

/// Serializable form of a [`Tag`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagReport {
    pub id: u32,
    pub reflectance: Reflectance,
    pub intensity_threshold: u8,
    pub world_t_tag: PoseMatrix,
    pub size: f64,
}

impl From<&Tag> for TagReport {
    fn from(tag: &Tag) -> Self {
        Self {
            id: tag.id,
            reflectance: tag.reflectance,
            intensity_threshold: tag.intensity_threshold,
            world_t_tag: pose_to_matrix(&tag.world_t_tag),
            size: tag.size,
        }
    }
}

impl TagReport {
    /// Back to a tag; `None` if the record does not describe a valid tag.
    pub fn to_tag(&self) -> Option<Tag> {
        let tag = Tag::new(
            self.id,
            self.reflectance,
            self.intensity_threshold,
            pose_from_matrix(&self.world_t_tag)?,
            self.size,
        );
        tag.is_valid().then_some(tag)
    }
}

/// Pretty JSON array of tag records.
pub fn serialize_tags(tags: &[Tag]) -> Result<String, IoError> {
    let reports: Vec<TagReport> = tags.iter().map(TagReport::from).collect();
    Ok(serde_json::to_string_pretty(&reports)?)
}

/// Parse a JSON array of tag records. Fails on the first invalid record.
pub fn deserialize_tags(json: &str) -> Result<Vec<Tag>, IoError> {
    let reports: Vec<TagReport> = serde_json::from_str(json)?;
    reports
        .iter()
        .map(|r| r.to_tag().ok_or(IoError::InvalidTag { id: r.id }))
        .collect()
}

/// Stereo rig and tracker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub params: TrackerParams,
    pub camera_a: PinholeCamera,
    pub camera_b: PinholeCamera,
    #[serde(default = "identity_matrix")]
    pub device_t_camera_a: PoseMatrix,
    #[serde(default = "identity_matrix")]
    pub device_t_camera_b: PoseMatrix,
    #[serde(default)]
    pub tag_sizes: Option<TagSizeConfig>,
}

impl TrackerConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Camera extrinsics, A first.
    pub fn device_t_cameras(&self) -> Result<[Pose; 2], IoError> {
        let a = pose_from_matrix(&self.device_t_camera_a).ok_or(IoError::InvalidPose {
            field: "device_t_camera_a",
        })?;
        let b = pose_from_matrix(&self.device_t_camera_b).ok_or(IoError::InvalidPose {
            field: "device_t_camera_b",
        })?;
        Ok([a, b])
    }

    pub fn build_tracker(&self) -> StereoTagTracker {
        StereoTagTracker::new(self.params.clone())
    }
}

/// Single-image detection job for the command line tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectConfig {
    pub image_path: String,
    pub camera: PinholeCamera,
    #[serde(default = "identity_matrix")]
    pub world_t_camera: PoseMatrix,
    #[serde(default)]
    pub tag_sizes: TagSizeConfig,
    #[serde(default)]
    pub params: TrackerParams,
    #[serde(default)]
    pub output_path: Option<String>,
}

impl DetectConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Resolve the output report path.
    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("stereo_tags_report.json"))
    }

    pub fn world_t_camera(&self) -> Result<Pose, IoError> {
        pose_from_matrix(&self.world_t_camera).ok_or(IoError::InvalidPose {
            field: "world_t_camera",
        })
    }
}

/// Result of a single-image detection run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectReport {
    pub image_path: String,
    pub config_path: String,
    #[serde(default)]
    pub tags: Vec<TagReport>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DetectReport {
    pub fn new(cfg: &DetectConfig, config_path: &Path) -> Self {
        Self {
            image_path: cfg.image_path.clone(),
            config_path: config_path.to_string_lossy().into_owned(),
            tags: Vec::new(),
            error: None,
        }
    }

    pub fn set_tags(&mut self, tags: &[Tag]) {
        self.tags = tags.iter().map(TagReport::from).collect();
        self.error = None;
    }

    pub fn set_error(&mut self, err: impl std::fmt::Display) {
        self.error = Some(err.to_string());
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
