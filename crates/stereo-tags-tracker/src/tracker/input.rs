use super::TrackError;
use stereo_tags_core::{Camera, GrayImageView, Pose};

/// One camera's frame together with where the camera was.
#[derive(Clone, Copy, Debug)]
pub struct CameraView<'a> {
    pub camera: &'a dyn Camera,
    pub image: GrayImageView<'a>,
    pub world_t_device: Pose,
    pub device_t_camera: Pose,
}

impl<'a> CameraView<'a> {
    pub fn new(
        camera: &'a dyn Camera,
        image: GrayImageView<'a>,
        world_t_device: Pose,
        device_t_camera: Pose,
    ) -> Self {
        Self {
            camera,
            image,
            world_t_device,
            device_t_camera,
        }
    }

    #[inline]
    pub fn world_t_camera(&self) -> Pose {
        self.world_t_device * self.device_t_camera
    }

    pub(crate) fn validate(&self, index: usize, border: usize) -> Result<(), TrackError> {
        let (width, height) = (self.image.width, self.image.height);
        if width != self.camera.width() || height != self.camera.height() {
            return Err(TrackError::FrameSizeMismatch {
                camera: index,
                frame_width: width,
                frame_height: height,
                camera_width: self.camera.width(),
                camera_height: self.camera.height(),
            });
        }
        let expected = width * height;
        if self.image.data.len() != expected {
            return Err(TrackError::InvalidBuffer {
                camera: index,
                len: self.image.data.len(),
                expected,
            });
        }
        if width <= 2 * border || height <= 2 * border {
            return Err(TrackError::FrameTooSmall {
                camera: index,
                width,
                height,
                border,
            });
        }
        Ok(())
    }
}

/// Synchronized input of both cameras for one tracker call.
#[derive(Clone, Copy, Debug)]
pub struct StereoFrame<'a> {
    pub camera_a: &'a dyn Camera,
    pub camera_b: &'a dyn Camera,
    pub frame_a: GrayImageView<'a>,
    pub frame_b: GrayImageView<'a>,
    pub world_t_device: Pose,
    pub device_t_camera_a: Pose,
    pub device_t_camera_b: Pose,
}

impl<'a> StereoFrame<'a> {
    /// Per-camera views, camera A first.
    pub fn views(&self) -> [CameraView<'a>; 2] {
        [
            CameraView::new(
                self.camera_a,
                self.frame_a,
                self.world_t_device,
                self.device_t_camera_a,
            ),
            CameraView::new(
                self.camera_b,
                self.frame_b,
                self.world_t_device,
                self.device_t_camera_b,
            ),
        ]
    }
}
