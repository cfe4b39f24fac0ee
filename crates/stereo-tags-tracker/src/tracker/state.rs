use crate::history::ObservationHistory;
use serde::{Deserialize, Serialize};
use stereo_tags_marker::Tag;

/// Lifecycle of a tracked tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// Initial or dormant.
    #[default]
    NotTracking,
    /// Confirmed by full detection this frame.
    NewDetection,
    /// Maintained by temporal tracking.
    Tracking,
}

impl TrackingState {
    /// True for states reported as visible.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, Self::NewDetection | Self::Tracking)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionType {
    #[default]
    Unknown,
    /// Short history, e.g. right after pruning.
    Dynamic,
    /// Long enough history without inconsistencies.
    Static,
}

/// A tag with its per-camera histories and state.
#[derive(Clone, Debug)]
pub struct TrackedTag {
    pub tag: Tag,
    /// Histories of camera A and camera B.
    pub histories: [ObservationHistory; 2],
    pub state: TrackingState,
    pub motion: MotionType,
}

impl TrackedTag {
    /// A freshly detected tag.
    pub fn new(tag: Tag, histories: [ObservationHistory; 2]) -> Self {
        Self {
            tag,
            histories,
            state: TrackingState::NewDetection,
            motion: MotionType::Unknown,
        }
    }

    /// Length of the longer of the two histories.
    pub fn max_history_len(&self) -> usize {
        self.histories.iter().map(ObservationHistory::len).max().unwrap_or(0)
    }
}
