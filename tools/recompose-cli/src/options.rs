//! Command-line options shared by several commands.

use std::path::PathBuf;

use clap::Args;
use recompose_common::CompositionDefaults;
use recompose_engine::synthetic::SyntheticSource;
use recompose_media_model::{
    FillMode, MediaSource, PipelineConfiguration, Rotation, VideoCodec,
};

/// Output settings applied on top of the configured defaults.
#[derive(Args, Debug, Clone)]
pub struct CompositionArgs {
    /// Output width (derived from the source when omitted)
    #[arg(long, requires = "height")]
    pub width: Option<u32>,

    /// Output height (derived from the source when omitted)
    #[arg(long, requires = "width")]
    pub height: Option<u32>,

    /// Video bitrate in bits per second
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Output frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Drop the audio track
    #[arg(long)]
    pub mute: bool,

    /// Extra clockwise rotation in degrees: 0, 90, 180 or 270
    #[arg(long, default_value = "0")]
    pub rotate: i32,

    /// Mirror left to right
    #[arg(long)]
    pub flip_horizontal: bool,

    /// Mirror top to bottom
    #[arg(long)]
    pub flip_vertical: bool,

    /// Placement of the source in the output: fit|crop
    #[arg(long, default_value = "fit")]
    pub fill: String,

    /// Playback speed divisor (2.0 plays twice as fast), clamped to [0.125, 8]
    #[arg(long, default_value = "1.0")]
    pub time_scale: f64,

    /// Let pitch follow speed when audio is remixed
    #[arg(long)]
    pub pitch_change: bool,

    /// Re-encode audio even when it could be copied unchanged
    #[arg(long)]
    pub force_audio_encoding: bool,

    /// Trim start in milliseconds
    #[arg(long, default_value = "0")]
    pub trim_start_ms: u64,

    /// Trim end in milliseconds
    #[arg(long)]
    pub trim_end_ms: Option<u64>,

    /// Output codec: auto|hevc|avc|mpeg4|h263
    #[arg(long, default_value = "auto")]
    pub codec: String,

    /// Clip length for still-image sources, in milliseconds
    #[arg(long)]
    pub still_duration_ms: Option<u64>,

    /// Frame rate for still-image sources
    #[arg(long)]
    pub still_fps: Option<u32>,
}

impl CompositionArgs {
    pub fn to_configuration(
        &self,
        source: MediaSource,
        destination: PathBuf,
        defaults: &CompositionDefaults,
    ) -> anyhow::Result<PipelineConfiguration> {
        let fill_mode = match self.fill.as_str() {
            "fit" => FillMode::PreserveAspectFit,
            "crop" => FillMode::PreserveAspectCrop,
            other => anyhow::bail!("Unknown fill mode: {other}. Use: fit, crop"),
        };
        let codec = match self.codec.as_str() {
            "auto" => VideoCodec::Auto,
            "hevc" | "h265" => VideoCodec::Hevc,
            "avc" | "h264" => VideoCodec::Avc,
            "mpeg4" => VideoCodec::Mpeg4,
            "h263" => VideoCodec::H263,
            other => anyhow::bail!("Unknown codec: {other}. Use: auto, hevc, avc, mpeg4, h263"),
        };
        if self.rotate.rem_euclid(90) != 0 {
            anyhow::bail!("Rotation must be a multiple of 90 degrees, got {}", self.rotate);
        }

        let mut builder = PipelineConfiguration::builder_with_defaults(source, destination, defaults)
            .mute(self.mute)
            .rotation(Rotation::from_degrees(self.rotate))
            .flip_horizontal(self.flip_horizontal)
            .flip_vertical(self.flip_vertical)
            .fill_mode(fill_mode)
            .time_scale(self.time_scale)
            .pitch_change(self.pitch_change)
            .force_audio_encoding(self.force_audio_encoding)
            .trim(self.trim_start_ms, self.trim_end_ms)
            .video_codec(codec);
        if let (Some(width), Some(height)) = (self.width, self.height) {
            builder = builder.size(width, height);
        }
        if let Some(bitrate) = self.bitrate {
            builder = builder.video_bitrate(bitrate);
        }
        if let Some(fps) = self.fps {
            builder = builder.frame_rate(fps);
        }
        if let Some(duration_ms) = self.still_duration_ms {
            builder = builder.still_image_duration_ms(duration_ms);
        }
        if let Some(fps) = self.still_fps {
            builder = builder.still_image_frame_rate(fps);
        }
        Ok(builder.build())
    }
}

/// Shape of the generated source for `simulate`.
#[derive(Args, Debug, Clone)]
pub struct SyntheticArgs {
    /// Source frame width
    #[arg(long, default_value = "640")]
    pub source_width: u32,

    /// Source frame height
    #[arg(long, default_value = "360")]
    pub source_height: u32,

    /// Source frame rate
    #[arg(long, default_value = "30")]
    pub source_fps: u32,

    /// Source length in seconds
    #[arg(long, default_value = "3.0")]
    pub source_secs: f64,

    /// Rotation stored in the source container, in degrees
    #[arg(long, default_value = "0")]
    pub source_rotation: i32,

    /// Add an AAC track with this sample rate
    #[arg(long)]
    pub audio_rate: Option<u32>,

    /// Channel count of the audio track
    #[arg(long, default_value = "2")]
    pub audio_channels: u32,

    /// Put the audio track before the video track
    #[arg(long)]
    pub audio_first: bool,

    /// Do not declare a duration in the container
    #[arg(long)]
    pub unknown_duration: bool,
}

const AUDIO_FRAMES_PER_PACKET: u32 = 1024;

impl SyntheticArgs {
    pub fn to_source(&self) -> anyhow::Result<SyntheticSource> {
        if self.source_fps == 0 {
            anyhow::bail!("Source frame rate must be positive");
        }
        if !(self.source_secs.is_finite() && self.source_secs > 0.0) {
            anyhow::bail!("Source length must be positive, got {}", self.source_secs);
        }
        let frame_count = (self.source_secs * f64::from(self.source_fps)).round().max(1.0) as u32;
        let frame_interval_us = 1_000_000 / i64::from(self.source_fps);

        let mut source = SyntheticSource::video(
            self.source_width,
            self.source_height,
            frame_interval_us,
            frame_count,
        )
        .with_rotation(Rotation::from_degrees(self.source_rotation));
        if let Some(rate) = self.audio_rate {
            let packets = (self.source_secs * f64::from(rate) / f64::from(AUDIO_FRAMES_PER_PACKET))
                .ceil()
                .max(1.0) as u32;
            source = source.with_audio(rate, self.audio_channels, AUDIO_FRAMES_PER_PACKET, packets);
            if self.audio_first {
                source = source.audio_first();
            }
        }
        if self.unknown_duration {
            source = source.with_declared_duration(0);
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use recompose_media_model::AudioMode;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        composition: CompositionArgs,
        #[command(flatten)]
        synthetic: SyntheticArgs,
    }

    fn parse(args: &[&str]) -> Harness {
        Harness::try_parse_from(std::iter::once("recompose").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_composition_flags_reach_the_configuration() {
        let harness = parse(&[
            "--width", "1280", "--height", "720", "--fill", "crop", "--rotate", "270",
            "--time-scale", "2", "--codec", "h264", "--trim-end-ms", "900",
        ]);
        let config = harness
            .composition
            .to_configuration(
                MediaSource::Video("in.mp4".into()),
                "out.mp4".into(),
                &CompositionDefaults::default(),
            )
            .unwrap();
        assert_eq!(config.fill_mode, FillMode::PreserveAspectCrop);
        assert_eq!(config.rotation, Rotation::Rotation270);
        assert_eq!(config.video_codec, VideoCodec::Avc);
        assert_eq!(config.trim.end_ms, Some(900));
        assert_eq!(config.time_scale.value(), 2.0);
    }

    #[test]
    fn test_unknown_fill_mode_is_rejected() {
        let harness = parse(&["--fill", "stretch"]);
        assert!(harness
            .composition
            .to_configuration(
                MediaSource::Video("in.mp4".into()),
                "out.mp4".into(),
                &CompositionDefaults::default(),
            )
            .is_err());
    }

    #[test]
    fn test_width_requires_height() {
        let result = Harness::try_parse_from(["recompose", "--width", "640"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_synthetic_source_shape() {
        let harness = parse(&["--source-secs", "2", "--source-fps", "25", "--audio-rate", "48000"]);
        let source = harness.synthetic.to_source().unwrap();
        let metadata = source.metadata();
        assert!(metadata.has_audio);
        assert_eq!(source.video.as_ref().map(|v| v.frame_count), Some(50));

        let config = harness
            .composition
            .to_configuration(
                MediaSource::Video("in.mp4".into()),
                "out.mp4".into(),
                &CompositionDefaults::default(),
            )
            .unwrap();
        let plan = config
            .resolve(&recompose_media_model::SourceFacts::Video(metadata))
            .unwrap();
        assert_eq!(plan.audio, AudioMode::Passthrough);

        let forced = parse(&["--audio-rate", "48000", "--force-audio-encoding"]);
        let plan = forced
            .composition
            .to_configuration(
                MediaSource::Video("in.mp4".into()),
                "out.mp4".into(),
                &CompositionDefaults::default(),
            )
            .unwrap()
            .resolve(&recompose_media_model::SourceFacts::Video(
                forced.synthetic.to_source().unwrap().metadata(),
            ))
            .unwrap();
        assert_eq!(plan.audio, AudioMode::Remix);
    }
}
