//! Pipeline configuration and its resolved plan.
//!
//! A [`PipelineConfiguration`] is assembled with chainable setters and is not
//! validated until a run starts. Validation is split in two phases:
//! [`PipelineConfiguration::validate`] checks everything that does not depend
//! on the source, and [`PipelineConfiguration::resolve`] fills in defaults
//! (output size, bitrate, audio mode) once the source has been probed.

use std::path::PathBuf;

use recompose_common::{ms_to_us, ComposeError, ComposeResult, CompositionDefaults, TimeScale};
use serde::{Deserialize, Serialize};

use crate::format::VideoCodec;
use crate::geometry::{FillMode, FillModeCustomItem, Flip, Resolution, Rotation};
use crate::metadata::SourceMetadata;

/// Encoder bitrate used when none is configured: 0.25 bits per pixel at 30 fps.
pub fn default_bitrate(resolution: Resolution) -> u32 {
    (0.25 * 30.0 * resolution.pixel_count() as f64).round() as u32
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// A container with one video track and at most one audio track.
    Video(PathBuf),
    /// A single picture turned into a fixed-length clip.
    StillImage(StillImage),
}

/// Still-image source.
#[derive(Debug, Clone, PartialEq)]
pub enum StillImage {
    /// Encoded image file (PNG, JPEG).
    File(PathBuf),
    /// Already decoded pixels.
    Rgba(RgbaPixels),
}

/// Packed 8-bit RGBA pixels, row-major, no padding.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaPixels {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaPixels {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> ComposeResult<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ComposeError::configuration(format!(
                "RGBA buffer for {width}x{height} must hold {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Single-colour image.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl std::fmt::Debug for RgbaPixels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbaPixels")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Portion of the source to keep, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrimRange {
    pub start_ms: u64,
    pub end_ms: Option<u64>,
}

impl TrimRange {
    pub fn is_full(&self) -> bool {
        self.start_ms == 0 && self.end_ms.is_none()
    }
}

/// Timing of a clip generated from a still image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillImageTiming {
    pub duration_ms: u64,
    pub frame_rate: u32,
    pub bitrate: u32,
    pub key_frame_interval_secs: u32,
}

impl From<&CompositionDefaults> for StillImageTiming {
    fn from(defaults: &CompositionDefaults) -> Self {
        Self {
            duration_ms: defaults.still_image_duration_ms,
            frame_rate: defaults.still_image_frame_rate,
            bitrate: defaults.still_image_bitrate,
            key_frame_interval_secs: defaults.still_image_key_frame_interval_secs,
        }
    }
}

impl Default for StillImageTiming {
    fn default() -> Self {
        Self::from(&CompositionDefaults::default())
    }
}

/// Everything a run needs to know. Immutable once the run has started.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfiguration {
    pub source: MediaSource,
    pub destination: PathBuf,
    /// Output size; derived from the source when unset.
    pub output_resolution: Option<Resolution>,
    /// Video bitrate; [`default_bitrate`] of the output size when unset.
    pub bitrate: Option<u32>,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    pub audio_bitrate: u32,
    pub aac_profile: u32,
    pub mute: bool,
    /// Rotation applied on top of the source's own rotation.
    pub rotation: Rotation,
    pub flip: Flip,
    pub fill_mode: FillMode,
    pub custom_fill: Option<FillModeCustomItem>,
    pub time_scale: TimeScale,
    /// Let pitch follow speed when audio is remixed.
    pub pitch_change: bool,
    /// Decode and re-encode audio even when it could be copied.
    pub force_audio_encoding: bool,
    pub trim: TrimRange,
    pub video_codec: VideoCodec,
    pub still_image: StillImageTiming,
    /// Output size of still-image clips when none is set.
    pub fallback_resolution: Resolution,
}

impl PipelineConfiguration {
    pub fn builder(
        source: MediaSource,
        destination: impl Into<PathBuf>,
    ) -> PipelineConfigurationBuilder {
        PipelineConfigurationBuilder::new(source, destination, &CompositionDefaults::default())
    }

    /// Builder seeded from user configuration rather than built-in defaults.
    pub fn builder_with_defaults(
        source: MediaSource,
        destination: impl Into<PathBuf>,
        defaults: &CompositionDefaults,
    ) -> PipelineConfigurationBuilder {
        PipelineConfigurationBuilder::new(source, destination, defaults)
    }

    /// Source-independent checks. Runs before any resource is allocated.
    pub fn validate(&self) -> ComposeResult<()> {
        if self.destination.as_os_str().is_empty() {
            return Err(ComposeError::configuration("destination path is empty"));
        }
        if self.fill_mode == FillMode::Custom {
            match &self.custom_fill {
                None => {
                    return Err(ComposeError::configuration(
                        "custom fill mode requires a custom fill item",
                    ))
                }
                Some(item) => item.validate().map_err(ComposeError::configuration)?,
            }
        }
        if let Some(resolution) = self.output_resolution {
            if resolution.is_empty() {
                return Err(ComposeError::configuration(format!(
                    "output resolution must be non-zero, got {resolution}"
                )));
            }
        }
        if self.bitrate == Some(0) {
            return Err(ComposeError::configuration("video bitrate must be positive"));
        }
        if self.frame_rate == 0 {
            return Err(ComposeError::configuration("frame rate must be positive"));
        }
        if self.audio_bitrate == 0 {
            return Err(ComposeError::configuration("audio bitrate must be positive"));
        }
        if let Some(end_ms) = self.trim.end_ms {
            if end_ms <= self.trim.start_ms {
                return Err(ComposeError::configuration(format!(
                    "trim end ({end_ms} ms) must be after trim start ({} ms)",
                    self.trim.start_ms
                )));
            }
        }
        if let MediaSource::StillImage(image) = &self.source {
            if self.still_image.duration_ms == 0 || self.still_image.frame_rate == 0 {
                return Err(ComposeError::configuration(
                    "still-image duration and frame rate must be positive",
                ));
            }
            if self.output_resolution.is_none() && self.fallback_resolution.is_empty() {
                return Err(ComposeError::configuration(
                    "still image needs an output size or a non-zero fallback size",
                ));
            }
            if let StillImage::Rgba(pixels) = image {
                if pixels.resolution().is_empty() {
                    return Err(ComposeError::configuration("still image has no pixels"));
                }
            }
        }
        Ok(())
    }

    /// Resolve defaults against what is known about the source.
    pub fn resolve(&self, facts: &SourceFacts) -> ComposeResult<ResolvedPipeline> {
        self.validate()?;
        match facts {
            SourceFacts::Video(metadata) => self.resolve_video(metadata),
            SourceFacts::StillImage(resolution) => Ok(self.resolve_still_image(*resolution)),
        }
    }

    fn resolve_video(&self, metadata: &SourceMetadata) -> ComposeResult<ResolvedPipeline> {
        if metadata.resolution.is_empty() {
            return Err(ComposeError::unsupported_source(
                "source reports an empty video frame size",
            ));
        }
        let input = metadata.resolution;
        let rotation = self.rotation.combine(metadata.rotation);

        let output = match (self.output_resolution, self.fill_mode) {
            (Some(resolution), _) => resolution,
            (None, FillMode::Custom) => input,
            (None, _) if rotation.swaps_axes() => input.swapped(),
            (None, _) => input,
        };

        let trim_start_us = ms_to_us(self.trim.start_ms);
        let trim_end_us = self.trim.end_ms.map(ms_to_us);
        let duration_us = match (metadata.known_duration_us(), trim_end_us) {
            (Some(total), end) => {
                if trim_start_us >= total {
                    return Err(ComposeError::configuration(format!(
                        "trim start ({trim_start_us} us) is past the end of the source ({total} us)"
                    )));
                }
                Some(end.map_or(total, |e| e.min(total)) - trim_start_us)
            }
            (None, Some(end)) => Some(end - trim_start_us),
            (None, None) => None,
        };

        let audio = if self.mute || !metadata.has_audio {
            AudioMode::None
        } else if self.force_audio_encoding || self.time_scale.requires_audio_remix() {
            AudioMode::Remix
        } else {
            AudioMode::Passthrough
        };

        Ok(ResolvedPipeline {
            mode: SourceMode::Video,
            input_resolution: input,
            output_resolution: output,
            rotation,
            flip: self.flip,
            fill_mode: self.fill_mode,
            custom_fill: self.custom_fill,
            bitrate: self.bitrate.unwrap_or_else(|| default_bitrate(output)),
            frame_rate: self.frame_rate,
            key_frame_interval_secs: self.key_frame_interval_secs,
            time_scale: self.time_scale,
            pitch_change: self.pitch_change,
            audio,
            audio_bitrate: self.audio_bitrate,
            aac_profile: self.aac_profile,
            video_codec: self.video_codec,
            trim_start_us,
            trim_end_us,
            duration_us,
        })
    }

    fn resolve_still_image(&self, image: Resolution) -> ResolvedPipeline {
        let output = self
            .output_resolution
            .unwrap_or(self.fallback_resolution)
            .even_aligned();
        ResolvedPipeline {
            mode: SourceMode::StillImage,
            input_resolution: image,
            output_resolution: output,
            rotation: self.rotation,
            flip: self.flip,
            fill_mode: self.fill_mode,
            custom_fill: self.custom_fill,
            bitrate: self.bitrate.unwrap_or(self.still_image.bitrate),
            frame_rate: self.still_image.frame_rate,
            key_frame_interval_secs: self.still_image.key_frame_interval_secs,
            time_scale: TimeScale::NORMAL,
            pitch_change: false,
            audio: AudioMode::None,
            audio_bitrate: self.audio_bitrate,
            aac_profile: self.aac_profile,
            video_codec: self.video_codec,
            trim_start_us: 0,
            trim_end_us: None,
            duration_us: Some(ms_to_us(self.still_image.duration_ms)),
        }
    }
}

/// Chainable setters for [`PipelineConfiguration`].
#[derive(Debug, Clone)]
pub struct PipelineConfigurationBuilder {
    config: PipelineConfiguration,
}

impl PipelineConfigurationBuilder {
    fn new(
        source: MediaSource,
        destination: impl Into<PathBuf>,
        defaults: &CompositionDefaults,
    ) -> Self {
        Self {
            config: PipelineConfiguration {
                source,
                destination: destination.into(),
                output_resolution: None,
                bitrate: None,
                frame_rate: defaults.frame_rate,
                key_frame_interval_secs: defaults.key_frame_interval_secs,
                audio_bitrate: defaults.audio_bitrate,
                aac_profile: defaults.aac_profile,
                mute: false,
                rotation: Rotation::Normal,
                flip: Flip::default(),
                fill_mode: FillMode::PreserveAspectFit,
                custom_fill: None,
                time_scale: TimeScale::NORMAL,
                pitch_change: false,
                force_audio_encoding: false,
                trim: TrimRange::default(),
                video_codec: VideoCodec::Auto,
                still_image: StillImageTiming::from(defaults),
                fallback_resolution: Resolution::new(
                    defaults.fallback_width,
                    defaults.fallback_height,
                ),
            },
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.config.output_resolution = Some(Resolution::new(width, height));
        self
    }

    pub fn video_bitrate(mut self, bitrate: u32) -> Self {
        self.config.bitrate = Some(bitrate);
        self
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.config.frame_rate = frame_rate;
        self
    }

    pub fn key_frame_interval(mut self, secs: u32) -> Self {
        self.config.key_frame_interval_secs = secs;
        self
    }

    pub fn audio_bitrate(mut self, bitrate: u32) -> Self {
        self.config.audio_bitrate = bitrate;
        self
    }

    pub fn aac_profile(mut self, profile: u32) -> Self {
        self.config.aac_profile = profile;
        self
    }

    pub fn mute(mut self, mute: bool) -> Self {
        self.config.mute = mute;
        self
    }

    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.config.rotation = rotation;
        self
    }

    pub fn flip_horizontal(mut self, flip: bool) -> Self {
        self.config.flip.horizontal = flip;
        self
    }

    pub fn flip_vertical(mut self, flip: bool) -> Self {
        self.config.flip.vertical = flip;
        self
    }

    pub fn fill_mode(mut self, fill_mode: FillMode) -> Self {
        self.config.fill_mode = fill_mode;
        self
    }

    /// Switches to [`FillMode::Custom`] with the given placement.
    pub fn custom_fill(mut self, item: FillModeCustomItem) -> Self {
        self.config.fill_mode = FillMode::Custom;
        self.config.custom_fill = Some(item);
        self
    }

    /// Clamped to `[0.125, 8.0]`.
    pub fn time_scale(mut self, scale: f64) -> Self {
        self.config.time_scale = TimeScale::new(scale);
        self
    }

    pub fn pitch_change(mut self, pitch_change: bool) -> Self {
        self.config.pitch_change = pitch_change;
        self
    }

    /// Remix audio even at speeds where it would be copied unchanged.
    pub fn force_audio_encoding(mut self, force: bool) -> Self {
        self.config.force_audio_encoding = force;
        self
    }

    pub fn trim(mut self, start_ms: u64, end_ms: Option<u64>) -> Self {
        self.config.trim = TrimRange { start_ms, end_ms };
        self
    }

    pub fn video_codec(mut self, codec: VideoCodec) -> Self {
        self.config.video_codec = codec;
        self
    }

    pub fn still_image_duration_ms(mut self, duration_ms: u64) -> Self {
        self.config.still_image.duration_ms = duration_ms;
        self
    }

    pub fn still_image_frame_rate(mut self, frame_rate: u32) -> Self {
        self.config.still_image.frame_rate = frame_rate;
        self
    }

    /// Still-image output size used when [`size`](Self::size) is not set.
    pub fn fallback_resolution(mut self, width: u32, height: u32) -> Self {
        self.config.fallback_resolution = Resolution::new(width, height);
        self
    }

    pub fn build(self) -> PipelineConfiguration {
        self.config
    }
}

/// Facts about the source needed to resolve defaults.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceFacts {
    Video(SourceMetadata),
    StillImage(Resolution),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Video,
    StillImage,
}

/// What happens to the source's audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    /// No audio in the output.
    None,
    /// Compressed samples copied unchanged.
    Passthrough,
    /// Decoded, resampled to the time-scale, and re-encoded.
    Remix,
}

/// A configuration with every default resolved against the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPipeline {
    pub mode: SourceMode,
    pub input_resolution: Resolution,
    pub output_resolution: Resolution,
    /// Configured rotation combined with the source rotation.
    pub rotation: Rotation,
    pub flip: Flip,
    pub fill_mode: FillMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fill: Option<FillModeCustomItem>,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    pub time_scale: TimeScale,
    pub pitch_change: bool,
    pub audio: AudioMode,
    pub audio_bitrate: u32,
    pub aac_profile: u32,
    pub video_codec: VideoCodec,
    pub trim_start_us: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_end_us: Option<i64>,
    /// Source-timeline duration after trimming; `None` when unknown.
    pub duration_us: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_config() -> PipelineConfigurationBuilder {
        PipelineConfiguration::builder(MediaSource::Video("in.mp4".into()), "out.mp4")
    }

    fn metadata(width: u32, height: u32, rotation: Rotation, has_audio: bool) -> SourceMetadata {
        SourceMetadata {
            resolution: Resolution::new(width, height),
            rotation,
            duration_us: Some(10_000_000),
            has_audio,
            video_codec: None,
            audio_codec: None,
        }
    }

    #[test]
    fn test_default_bitrate_720p() {
        assert_eq!(default_bitrate(Resolution::new(1280, 720)), 6_912_000);
        let resolved = video_config()
            .build()
            .resolve(&SourceFacts::Video(metadata(1280, 720, Rotation::Normal, false)))
            .unwrap();
        assert_eq!(resolved.bitrate, 6_912_000);
    }

    #[test]
    fn test_output_swaps_for_quarter_turn() {
        let resolved = video_config()
            .rotation(Rotation::Rotation180)
            .build()
            .resolve(&SourceFacts::Video(metadata(1920, 1080, Rotation::Rotation270, false)))
            .unwrap();
        assert_eq!(resolved.rotation, Rotation::Rotation90);
        assert_eq!(resolved.output_resolution, Resolution::new(1080, 1920));
    }

    #[test]
    fn test_explicit_size_wins() {
        let resolved = video_config()
            .size(640, 360)
            .build()
            .resolve(&SourceFacts::Video(metadata(1920, 1080, Rotation::Rotation90, false)))
            .unwrap();
        assert_eq!(resolved.output_resolution, Resolution::new(640, 360));
        assert_eq!(resolved.bitrate, default_bitrate(Resolution::new(640, 360)));
    }

    #[test]
    fn test_custom_fill_without_item_is_rejected() {
        let config = video_config().fill_mode(FillMode::Custom).build();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ComposeError::Configuration { .. }));
    }

    #[test]
    fn test_custom_fill_keeps_source_size() {
        let item = FillModeCustomItem {
            scale: 1.5,
            rotate: 90.0,
            translate_x: 0.1,
            translate_y: 0.0,
            video_width: 1920.0,
            video_height: 1080.0,
        };
        let resolved = video_config()
            .custom_fill(item)
            .build()
            .resolve(&SourceFacts::Video(metadata(1920, 1080, Rotation::Rotation90, false)))
            .unwrap();
        assert_eq!(resolved.output_resolution, Resolution::new(1920, 1080));
    }

    #[test]
    fn test_audio_mode_selection() {
        let with_audio = SourceFacts::Video(metadata(640, 480, Rotation::Normal, true));
        let pick = |builder: PipelineConfigurationBuilder| {
            builder.build().resolve(&with_audio).unwrap().audio
        };
        assert_eq!(pick(video_config()), AudioMode::Passthrough);
        assert_eq!(pick(video_config().time_scale(1.5)), AudioMode::Passthrough);
        assert_eq!(pick(video_config().time_scale(2.0)), AudioMode::Remix);
        assert_eq!(pick(video_config().time_scale(2.0).mute(true)), AudioMode::None);
        assert_eq!(pick(video_config().force_audio_encoding(true)), AudioMode::Remix);
        assert_eq!(
            pick(video_config().force_audio_encoding(true).mute(true)),
            AudioMode::None
        );

        let silent = SourceFacts::Video(metadata(640, 480, Rotation::Normal, false));
        assert_eq!(
            video_config().build().resolve(&silent).unwrap().audio,
            AudioMode::None
        );
        assert_eq!(
            video_config()
                .force_audio_encoding(true)
                .build()
                .resolve(&silent)
                .unwrap()
                .audio,
            AudioMode::None
        );
    }

    #[test]
    fn test_time_scale_is_clamped_by_setter() {
        assert_eq!(video_config().time_scale(20.0).build().time_scale.value(), 8.0);
        assert_eq!(video_config().time_scale(0.0).build().time_scale.value(), 0.125);
    }

    #[test]
    fn test_trim_shortens_duration() {
        let resolved = video_config()
            .trim(2_000, Some(4_500))
            .build()
            .resolve(&SourceFacts::Video(metadata(640, 480, Rotation::Normal, false)))
            .unwrap();
        assert_eq!(resolved.trim_start_us, 2_000_000);
        assert_eq!(resolved.duration_us, Some(2_500_000));

        let past_end = video_config()
            .trim(20_000, None)
            .build()
            .resolve(&SourceFacts::Video(metadata(640, 480, Rotation::Normal, false)));
        assert!(matches!(past_end, Err(ComposeError::Configuration { .. })));
    }

    #[test]
    fn test_trim_end_before_start_is_rejected() {
        let config = video_config().trim(3_000, Some(1_000)).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_still_image_defaults() {
        let pixels = RgbaPixels::solid(321, 240, [255, 0, 0, 255]);
        let config = PipelineConfiguration::builder(
            MediaSource::StillImage(StillImage::Rgba(pixels)),
            "still.mp4",
        )
        .time_scale(4.0)
        .build();
        let resolved = config
            .resolve(&SourceFacts::StillImage(Resolution::new(321, 240)))
            .unwrap();
        assert_eq!(resolved.mode, SourceMode::StillImage);
        assert_eq!(resolved.input_resolution, Resolution::new(321, 240));
        assert_eq!(resolved.output_resolution, Resolution::new(480, 720));
        assert_eq!(resolved.frame_rate, 20);
        assert_eq!(resolved.bitrate, 2_000_000);
        assert_eq!(resolved.duration_us, Some(5_000_000));
        assert_eq!(resolved.time_scale, TimeScale::NORMAL);
        assert_eq!(resolved.audio, AudioMode::None);
    }

    #[test]
    fn test_still_image_output_size() {
        let still = || {
            PipelineConfiguration::builder(
                MediaSource::StillImage(StillImage::Rgba(RgbaPixels::solid(
                    64,
                    48,
                    [0, 0, 0, 255],
                ))),
                "still.mp4",
            )
        };
        let facts = SourceFacts::StillImage(Resolution::new(64, 48));

        let sized = still().size(641, 360).build().resolve(&facts).unwrap();
        assert_eq!(sized.output_resolution, Resolution::new(640, 360));

        let fallback = still().fallback_resolution(1280, 721).build().resolve(&facts).unwrap();
        assert_eq!(fallback.output_resolution, Resolution::new(1280, 720));
        assert_eq!(fallback.bitrate, 2_000_000);

        let no_size = still().fallback_resolution(0, 0).build();
        assert!(matches!(
            no_size.validate(),
            Err(ComposeError::Configuration { .. })
        ));
    }

    #[test]
    fn test_rgba_length_is_checked() {
        assert!(RgbaPixels::new(2, 2, vec![0; 15]).is_err());
        assert!(RgbaPixels::new(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn test_resolved_plan_serializes() {
        let resolved = video_config()
            .build()
            .resolve(&SourceFacts::Video(metadata(1280, 720, Rotation::Normal, true)))
            .unwrap();
        let json = serde_json::to_value(&resolved).unwrap();
        assert_eq!(json["audio"], "passthrough");
        assert_eq!(json["rotation"], 0);
        assert_eq!(json["output_resolution"]["width"], 1280);
    }
}
