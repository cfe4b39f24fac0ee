/// Invalid inputs to the stereo tracker.
///
/// Failures of individual tags never surface here; they leave the tag
/// un-updated for the frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error(
        "camera {camera}: frame is {frame_width}x{frame_height}, \
         camera expects {camera_width}x{camera_height}"
    )]
    FrameSizeMismatch {
        camera: usize,
        frame_width: usize,
        frame_height: usize,
        camera_width: usize,
        camera_height: usize,
    },
    #[error("camera {camera}: buffer holds {len} bytes, expected {expected}")]
    InvalidBuffer {
        camera: usize,
        len: usize,
        expected: usize,
    },
    #[error("camera {camera}: {width}x{height} frame leaves nothing inside a {border} px border")]
    FrameTooSmall {
        camera: usize,
        width: usize,
        height: usize,
        border: usize,
    },
}
