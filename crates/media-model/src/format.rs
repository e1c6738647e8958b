//! Track formats negotiated between demuxer, codecs, and muxer.

use serde::{Deserialize, Serialize};

pub const MIME_VIDEO_AVC: &str = "video/avc";
pub const MIME_VIDEO_HEVC: &str = "video/hevc";
pub const MIME_VIDEO_MPEG4: &str = "video/mp4v-es";
pub const MIME_VIDEO_H263: &str = "video/3gpp";
pub const MIME_VIDEO_RAW: &str = "video/raw";
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// Kind of elementary stream carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Video,
    Audio,
}

impl TrackType {
    /// Classify a mime type. Anything that is not `video/*` or `audio/*` is
    /// not a track we can compose.
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("video/") {
            Some(Self::Video)
        } else if mime.starts_with("audio/") {
            Some(Self::Audio)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How raw frames reach an encoder, or leave a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    /// Frames travel through a surface (renderer output / decoder target).
    Surface,
    /// Y plane followed by interleaved U/V (NV12).
    Yuv420SemiPlanar,
    /// Y plane followed by U plane and V plane (I420).
    Yuv420Planar,
    /// Packed 8-bit RGBA.
    Rgba,
}

/// Output video codec selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    /// HEVC when the backend can encode it, otherwise AVC.
    #[default]
    Auto,
    Hevc,
    Avc,
    Mpeg4,
    H263,
}

impl VideoCodec {
    /// Mime types to try, in preference order.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::Auto => &[MIME_VIDEO_HEVC, MIME_VIDEO_AVC],
            Self::Hevc => &[MIME_VIDEO_HEVC],
            Self::Avc => &[MIME_VIDEO_AVC],
            Self::Mpeg4 => &[MIME_VIDEO_MPEG4],
            Self::H263 => &[MIME_VIDEO_H263],
        }
    }
}

/// Format description of one track or codec port.
///
/// Only the keys relevant to the track type are populated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_frame_interval_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_format: Option<ColorFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_degrees: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aac_profile: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<i64>,

    /// Codec-specific data (e.g. SPS/PPS, AudioSpecificConfig).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codec_specific_data: Vec<Vec<u8>>,
}

impl MediaFormat {
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    pub fn track_type(&self) -> Option<TrackType> {
        TrackType::from_mime(&self.mime)
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_i_frame_interval(mut self, secs: u32) -> Self {
        self.i_frame_interval_secs = Some(secs);
        self
    }

    pub fn with_color_format(mut self, color_format: ColorFormat) -> Self {
        self.color_format = Some(color_format);
        self
    }

    pub fn with_aac_profile(mut self, profile: u32) -> Self {
        self.aac_profile = Some(profile);
        self
    }

    pub fn with_duration(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_type_from_mime() {
        assert_eq!(TrackType::from_mime(MIME_VIDEO_AVC), Some(TrackType::Video));
        assert_eq!(TrackType::from_mime(MIME_AUDIO_AAC), Some(TrackType::Audio));
        assert_eq!(TrackType::from_mime("text/vtt"), None);
    }

    #[test]
    fn test_auto_codec_prefers_hevc() {
        assert_eq!(VideoCodec::Auto.candidates()[0], MIME_VIDEO_HEVC);
        assert_eq!(VideoCodec::Avc.candidates(), &[MIME_VIDEO_AVC]);
    }

    #[test]
    fn test_format_serialization_skips_unset_keys() {
        let format = MediaFormat::video(MIME_VIDEO_AVC, 1280, 720).with_bit_rate(6_912_000);
        let json = serde_json::to_string(&format).unwrap();
        assert!(json.contains("\"width\":1280"));
        assert!(!json.contains("sample_rate"));

        let parsed: MediaFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, format);
    }
}
