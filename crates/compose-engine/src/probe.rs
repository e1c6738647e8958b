//! Metadata probe backed by the `ffprobe` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::{
    Resolution, Rotation, SourceMetadata, MIME_AUDIO_AAC, MIME_VIDEO_AVC, MIME_VIDEO_H263,
    MIME_VIDEO_HEVC, MIME_VIDEO_MPEG4,
};
use serde::Deserialize;

use crate::backend::MetadataProbe;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn codec_mime(codec_type: &str, codec_name: &str) -> String {
    match codec_name {
        "h264" => MIME_VIDEO_AVC.to_string(),
        "hevc" => MIME_VIDEO_HEVC.to_string(),
        "mpeg4" => MIME_VIDEO_MPEG4.to_string(),
        "h263" => MIME_VIDEO_H263.to_string(),
        "aac" => MIME_AUDIO_AAC.to_string(),
        other => format!("{codec_type}/{other}"),
    }
}

fn parse_seconds_us(value: Option<&String>) -> Option<i64> {
    let secs = value?.parse::<f64>().ok()?;
    (secs.is_finite() && secs > 0.0).then(|| (secs * 1_000_000.0).round() as i64)
}

/// Turn `ffprobe -print_format json -show_streams -show_format` output
/// into source metadata.
pub fn parse_ffprobe_json(json: &[u8]) -> ComposeResult<SourceMetadata> {
    let parsed: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| ComposeError::unsupported_source(format!("ffprobe json parse failed: {e}")))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ComposeError::unsupported_source("no video stream found"))?;
    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(ComposeError::unsupported_source("video stream has no frame size"));
    };
    if width == 0 || height == 0 {
        return Err(ComposeError::unsupported_source("video stream has an empty frame size"));
    }

    // The rotate tag is clockwise; display-matrix rotation is counter-clockwise.
    let rotation = video
        .tags
        .rotate
        .as_deref()
        .and_then(|r| r.trim().parse::<i32>().ok())
        .or_else(|| {
            video
                .side_data_list
                .iter()
                .find_map(|d| d.rotation)
                .map(|r| -(r.round() as i32))
        })
        .map(Rotation::from_degrees)
        .unwrap_or_default();

    let duration_us = parsed
        .format
        .as_ref()
        .and_then(|f| parse_seconds_us(f.duration.as_ref()))
        .or_else(|| parse_seconds_us(video.duration.as_ref()));

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(SourceMetadata {
        resolution: Resolution::new(width, height),
        rotation,
        duration_us,
        has_audio: audio.is_some(),
        video_codec: video.codec_name.as_deref().map(|n| codec_mime("video", n)),
        audio_codec: audio
            .and_then(|a| a.codec_name.as_deref())
            .map(|n| codec_mime("audio", n)),
    })
}

/// Whether an `ffprobe` binary is on the PATH.
pub fn ffprobe_available() -> bool {
    Command::new("sh")
        .arg("-c")
        .arg("command -v ffprobe >/dev/null 2>&1")
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

pub struct FfprobeProbe {
    path: PathBuf,
}

impl FfprobeProbe {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl MetadataProbe for FfprobeProbe {
    fn probe(&mut self) -> ComposeResult<SourceMetadata> {
        if !self.path.exists() {
            return Err(ComposeError::FileNotFound {
                path: self.path.clone(),
            });
        }
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(&self.path)
            .output()
            .map_err(|e| ComposeError::unsupported_source(format!("failed to run ffprobe: {e}")))?;
        if !output.status.success() {
            return Err(ComposeError::unsupported_source(format!(
                "ffprobe failed for '{}': {}",
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let metadata = parse_ffprobe_json(&output.stdout)?;
        tracing::debug!(
            path = %self.path.display(),
            resolution = %metadata.resolution,
            rotation = metadata.rotation.degrees(),
            duration_us = ?metadata.duration_us,
            has_audio = metadata.has_audio,
            "Probed source"
        );
        Ok(metadata)
    }

    fn release(&mut self) -> ComposeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTRAIT_PHONE_CLIP: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "duration": "12.480000",
                "tags": { "rotate": "90" }
            },
            { "codec_type": "audio", "codec_name": "aac" }
        ],
        "format": { "duration": "12.500000" }
    }"#;

    #[test]
    fn test_parse_rotated_clip() {
        let metadata = parse_ffprobe_json(PORTRAIT_PHONE_CLIP.as_bytes()).unwrap();
        assert_eq!(metadata.resolution, Resolution::new(1920, 1080));
        assert_eq!(metadata.rotation, Rotation::Rotation90);
        assert_eq!(metadata.duration_us, Some(12_500_000));
        assert!(metadata.has_audio);
        assert_eq!(metadata.video_codec.as_deref(), Some(MIME_VIDEO_AVC));
        assert_eq!(metadata.audio_codec.as_deref(), Some(MIME_AUDIO_AAC));
        assert_eq!(metadata.display_resolution(), Resolution::new(1080, 1920));
    }

    #[test]
    fn test_display_matrix_rotation() {
        let json = r#"{"streams":[{"codec_type":"video","codec_name":"hevc","width":64,"height":32,
            "side_data_list":[{"rotation":-90}]}]}"#;
        let metadata = parse_ffprobe_json(json.as_bytes()).unwrap();
        assert_eq!(metadata.rotation, Rotation::Rotation90);
        assert_eq!(metadata.duration_us, None);
        assert!(!metadata.has_audio);
    }

    #[test]
    fn test_audio_only_is_unsupported() {
        let json = r#"{"streams":[{"codec_type":"audio","codec_name":"aac"}]}"#;
        let err = parse_ffprobe_json(json.as_bytes()).unwrap_err();
        assert!(matches!(err, ComposeError::UnsupportedSource { .. }));
    }

    #[test]
    fn test_missing_file() {
        let mut probe = FfprobeProbe::new(Path::new("/nonexistent/recompose/clip.mp4"));
        assert!(matches!(
            probe.probe(),
            Err(ComposeError::FileNotFound { .. })
        ));
    }
}
