//! Source metadata reported by a metadata probe.

use serde::{Deserialize, Serialize};

use crate::geometry::{Resolution, Rotation};

/// What a probe learned about a source before any codec is allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Coded frame size, before rotation.
    pub resolution: Resolution,
    /// Display rotation stored in the container.
    pub rotation: Rotation,
    /// Total duration; `None` when the container does not declare it.
    pub duration_us: Option<i64>,
    pub has_audio: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

impl SourceMetadata {
    /// Duration usable for percentage progress.
    pub fn known_duration_us(&self) -> Option<i64> {
        self.duration_us.filter(|&d| d > 0)
    }

    /// Frame size as displayed, after applying the container rotation.
    pub fn display_resolution(&self) -> Resolution {
        if self.rotation.swaps_axes() {
            self.resolution.swapped()
        } else {
            self.resolution
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_positive_duration_is_unknown() {
        let mut meta = SourceMetadata {
            resolution: Resolution::new(1920, 1080),
            rotation: Rotation::Rotation90,
            duration_us: Some(0),
            has_audio: false,
            video_codec: None,
            audio_codec: None,
        };
        assert_eq!(meta.known_duration_us(), None);
        meta.duration_us = Some(2_000_000);
        assert_eq!(meta.known_duration_us(), Some(2_000_000));
        assert_eq!(meta.display_resolution(), Resolution::new(1080, 1920));
    }
}
