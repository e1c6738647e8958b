//! Composition run loop.
//!
//! [`ComposerEngine::compose`] acquires every resource of one run, steps
//! the composers until all are finished (or the run is canceled), and then
//! releases everything in a fixed order. Release happens whether the run
//! succeeded, failed, or unwound.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use recompose_common::{
    ComposeError, ComposeResult, CompositionDefaults, DriftMeasurement, RunClock,
};
use recompose_media_model::{
    AudioMode, ColorFormat, MediaFormat, ResolvedPipeline, RgbaPixels, TrackType, VideoCodec,
    MIME_AUDIO_AAC,
};
use serde::Serialize;

use crate::audio::{AudioComposer, PassthroughAudioComposer, RemixAudioComposer, RemixAudioSettings};
use crate::backend::{Demuxer, FrameFilter, MediaBackend, MetadataProbe, PixelFormat, VideoFrame};
use crate::drain::{StepContext, TrackComposer};
use crate::mux::{MuxRender, MuxStats};
use crate::pixel::frame_for_color_format;
use crate::transform::TransformParams;
use crate::video::{SourceVideoComposer, SourceVideoSettings, StillImageComposer, VideoComposer};

/// Drift between expected and written duration worth a warning.
const DRIFT_WARN_THRESHOLD_MS: f64 = 100.0;

/// Pacing of the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Sleep after a loop iteration in which no composer made progress.
    pub idle_sleep: Duration,
    /// Loop iterations between two progress reports.
    pub progress_interval_steps: u64,
}

impl From<&CompositionDefaults> for EngineSettings {
    fn from(defaults: &CompositionDefaults) -> Self {
        Self {
            idle_sleep: Duration::from_millis(defaults.idle_sleep_ms),
            progress_interval_steps: u64::from(defaults.progress_interval_steps.max(1)),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&CompositionDefaults::default())
    }
}

/// Cooperative cancellation flag shared between a caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Source of one run, already prepared by the caller.
#[derive(Debug, Clone)]
pub enum EngineSource {
    Video(PathBuf),
    /// Decoded still image.
    StillImage(RgbaPixels),
}

pub struct ComposeJob {
    pub source: EngineSource,
    pub destination: PathBuf,
    pub plan: ResolvedPipeline,
    pub filter: Box<dyn FrameFilter>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeReport {
    pub started_at: String,
    pub elapsed_ms: u64,
    pub steps: u64,
    pub idle_steps: u64,
    pub video_frames: u64,
    pub video_written_us: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_written_us: Option<i64>,
    /// Output-timeline duration the run aimed for, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration_us: Option<i64>,
    pub mux: MuxStats,
}

#[derive(Debug, Clone)]
pub enum ComposeOutcome {
    Completed(ComposeReport),
    Canceled,
}

/// Everything a run owns, released in declaration order.
#[derive(Default)]
struct Resources {
    video: Option<VideoComposer>,
    audio: Option<AudioComposer>,
    demuxer: Option<Box<dyn Demuxer>>,
    muxer: Option<MuxRender>,
    probe: Option<Box<dyn MetadataProbe>>,
}

impl Resources {
    /// Release in fixed order, each step independent of the others.
    /// Composer and demuxer failures are fatal; muxer and probe failures
    /// are only logged.
    fn release_all(&mut self) -> ComposeResult<()> {
        let mut fatal: Option<ComposeError> = None;
        let mut escalate = |resource: &str, error: ComposeError| {
            tracing::error!(resource, error = %error, "Failed to release resource");
            fatal.get_or_insert(ComposeError::resource_release(
                resource,
                error.to_string(),
                true,
            ));
        };

        if let Some(mut video) = self.video.take() {
            if let Err(e) = video.release() {
                escalate("video composer", e);
            }
        }
        if let Some(mut audio) = self.audio.take() {
            if let Err(e) = audio.release() {
                escalate("audio composer", e);
            }
        }
        if let Some(mut demuxer) = self.demuxer.take() {
            if let Err(e) = demuxer.release() {
                escalate("demuxer", e);
            }
        }
        if let Some(mut muxer) = self.muxer.take() {
            if let Err(e) = muxer.stop() {
                tracing::warn!(error = %e, "Failed to stop muxer");
            }
            if let Err(e) = muxer.release() {
                tracing::warn!(error = %e, "Failed to release muxer");
            }
        }
        if let Some(mut probe) = self.probe.take() {
            if let Err(e) = probe.release() {
                tracing::warn!(error = %e, "Failed to release metadata probe");
            }
        }

        fatal.map_or(Ok(()), Err)
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        if let Err(e) = self.release_all() {
            tracing::error!(error = %e, "Resources released during unwind");
        }
    }
}

/// Pick the first encoder mime the backend supports.
pub fn select_video_mime(backend: &dyn MediaBackend, codec: VideoCodec) -> ComposeResult<&'static str> {
    codec
        .candidates()
        .iter()
        .copied()
        .find(|mime| backend.supports_encoder(mime))
        .ok_or_else(|| {
            ComposeError::codec_configuration(format!(
                "no {} encoder available for {codec:?}",
                backend.name()
            ))
        })
}

/// Fraction of one composer's output written so far.
fn composer_progress(composer: &dyn TrackComposer, duration_us: i64) -> f64 {
    if composer.is_finished() {
        return 1.0;
    }
    let scaled = duration_us as f64 / composer.timeline_scale().value();
    if scaled <= 0.0 {
        return 0.0;
    }
    (composer.written_presentation_time_us() as f64 / scaled).clamp(0.0, 1.0)
}

pub struct ComposerEngine {
    backend: Arc<dyn MediaBackend>,
    settings: EngineSettings,
    cancel: CancelToken,
    resources_leaked: bool,
}

impl ComposerEngine {
    pub fn new(backend: Arc<dyn MediaBackend>, settings: EngineSettings, cancel: CancelToken) -> Self {
        Self {
            backend,
            settings,
            cancel,
            resources_leaked: false,
        }
    }

    /// Whether the last run failed to release a composer or the demuxer.
    pub fn resources_leaked(&self) -> bool {
        self.resources_leaked
    }

    /// Run one composition to completion or cancellation.
    ///
    /// `progress` receives values in `0.0..=1.0`, or `-1.0` once when the
    /// duration is unknown.
    pub fn compose(
        &mut self,
        job: ComposeJob,
        progress: &mut dyn FnMut(f64),
    ) -> ComposeResult<ComposeOutcome> {
        let clock = RunClock::start();
        let mut resources = Resources::default();

        let result = self.run(job, &mut resources, progress, &clock);
        let released = resources.release_all();
        self.resources_leaked = released.is_err();

        match (result, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(release_error)) => Err(release_error),
            (Err(error), Err(release_error)) => {
                tracing::error!(
                    error = %release_error,
                    "Release also failed after the run failed"
                );
                Err(error)
            }
            (Err(error), Ok(())) => Err(error),
        }
    }

    fn run(
        &mut self,
        job: ComposeJob,
        resources: &mut Resources,
        progress: &mut dyn FnMut(f64),
        clock: &RunClock,
    ) -> ComposeResult<ComposeOutcome> {
        let ComposeJob {
            source,
            destination,
            plan,
            filter,
        } = job;

        tracing::info!(
            backend = self.backend.name(),
            destination = %destination.display(),
            output = %plan.output_resolution,
            bitrate = plan.bitrate,
            time_scale = plan.time_scale.value(),
            audio = ?plan.audio,
            "Starting composition"
        );

        match source {
            EngineSource::Video(path) => {
                self.set_up_video(&path, &destination, &plan, filter, resources)?
            }
            EngineSource::StillImage(pixels) => {
                self.set_up_still_image(&pixels, &destination, &plan, filter, resources)?
            }
        }

        let expected_duration_us = plan
            .duration_us
            .filter(|&d| d > 0)
            .map(|d| plan.time_scale.remap_us(d));
        let outcome = self.run_loop(resources, plan.duration_us.filter(|&d| d > 0), progress)?;
        let (steps, idle_steps) = match outcome {
            LoopOutcome::Finished { steps, idle_steps } => (steps, idle_steps),
            LoopOutcome::Canceled => return Ok(ComposeOutcome::Canceled),
        };

        let muxer = resources
            .muxer
            .as_mut()
            .ok_or_else(|| ComposeError::muxer_protocol("muxer missing at end of run"))?;
        muxer.stop()?;
        let mux = muxer.stats();

        let (video_frames, video_written_us) = resources
            .video
            .as_ref()
            .map(|v| (v.frames_submitted(), v.written_presentation_time_us()))
            .unwrap_or_default();
        let audio_written_us = resources
            .audio
            .as_ref()
            .map(|a| a.written_presentation_time_us());

        if let Some(expected) = expected_duration_us {
            let drift = DriftMeasurement {
                reference_us: expected,
                measured_us: video_written_us,
            };
            if drift.exceeds_threshold_ms(DRIFT_WARN_THRESHOLD_MS) {
                tracing::warn!(
                    expected_us = expected,
                    written_us = video_written_us,
                    drift_ms = drift.drift_ms(),
                    "Written video duration differs from expected"
                );
            } else {
                tracing::debug!(drift_ms = drift.drift_ms(), "Video duration within tolerance");
            }
        }
        if let Some(audio_us) = audio_written_us {
            let av = DriftMeasurement {
                reference_us: video_written_us,
                measured_us: audio_us,
            };
            tracing::debug!(drift_ms = av.drift_ms(), "Audio/video end drift");
        }

        progress(1.0);
        let report = ComposeReport {
            started_at: clock.epoch_wall().to_string(),
            elapsed_ms: clock.elapsed_ms(),
            steps,
            idle_steps,
            video_frames,
            video_written_us,
            audio_written_us,
            expected_duration_us,
            mux,
        };
        tracing::info!(
            elapsed_ms = report.elapsed_ms,
            steps,
            frames = video_frames,
            video_samples = mux.video.samples,
            audio_samples = mux.audio.samples,
            "Composition finished"
        );
        Ok(ComposeOutcome::Completed(report))
    }

    fn set_up_video(
        &self,
        path: &Path,
        destination: &Path,
        plan: &ResolvedPipeline,
        filter: Box<dyn FrameFilter>,
        resources: &mut Resources,
    ) -> ComposeResult<()> {
        let probe = resources.probe.insert(self.backend.open_probe(path)?);
        let metadata = probe.probe().map_err(|e| match e {
            ComposeError::FileNotFound { .. } | ComposeError::UnsupportedSource { .. } => e,
            other => ComposeError::unsupported_source(other.to_string()),
        })?;
        tracing::debug!(
            resolution = %metadata.resolution,
            rotation = metadata.rotation.degrees(),
            duration_us = ?metadata.duration_us,
            has_audio = metadata.has_audio,
            "Source metadata"
        );

        let demuxer = resources.demuxer.insert(self.backend.open_demuxer(path)?);
        let mut video_track = None;
        let mut audio_track = None;
        for index in 0..demuxer.track_count() {
            let format = demuxer.track_format(index)?;
            match format.track_type() {
                Some(TrackType::Video) if video_track.is_none() => video_track = Some((index, format)),
                Some(TrackType::Audio) if audio_track.is_none() => audio_track = Some((index, format)),
                _ => {}
            }
        }
        let (video_index, video_format) = video_track
            .ok_or_else(|| ComposeError::unsupported_source("source has no video track"))?;

        let audio_track = match (plan.audio, audio_track) {
            (AudioMode::None, _) => None,
            (mode, Some(track)) => Some((mode, track)),
            (mode, None) => {
                tracing::warn!(?mode, "Source has no audio track; output will be silent");
                None
            }
        };

        let mut expected = vec![TrackType::Video];
        if audio_track.is_some() {
            expected.push(TrackType::Audio);
        }
        resources.muxer = Some(MuxRender::new(
            self.backend.create_muxer(destination)?,
            &expected,
        ));

        let mime = select_video_mime(self.backend.as_ref(), plan.video_codec)?;
        let output = plan.output_resolution;
        let settings = SourceVideoSettings {
            track_index: video_index,
            output_format: MediaFormat::video(mime, output.width, output.height)
                .with_bit_rate(plan.bitrate)
                .with_frame_rate(plan.frame_rate)
                .with_i_frame_interval(plan.key_frame_interval_secs)
                .with_color_format(ColorFormat::Surface),
            transform: TransformParams {
                rotation: plan.rotation,
                input: plan.input_resolution,
                output,
                fill_mode: plan.fill_mode,
                custom: plan.custom_fill,
                flip: plan.flip,
            },
            time_scale: plan.time_scale,
            trim_start_us: plan.trim_start_us,
            trim_end_us: plan.trim_end_us,
        };
        resources.video = Some(VideoComposer::Source(SourceVideoComposer::new(
            settings,
            self.backend.create_decoder(&video_format.mime)?,
            self.backend.create_encoder(mime)?,
            self.backend.create_renderer()?,
            filter,
        )));

        if let Some((mode, (audio_index, audio_format))) = audio_track {
            resources.audio = Some(match mode {
                AudioMode::Remix => AudioComposer::Remix(RemixAudioComposer::new(
                    RemixAudioSettings {
                        track_index: audio_index,
                        bitrate: plan.audio_bitrate,
                        aac_profile: plan.aac_profile,
                        time_scale: plan.time_scale,
                        pitch_change: plan.pitch_change,
                        trim_start_us: plan.trim_start_us,
                        trim_end_us: plan.trim_end_us,
                    },
                    self.backend.create_decoder(&audio_format.mime)?,
                    self.backend.create_encoder(MIME_AUDIO_AAC)?,
                )),
                _ => AudioComposer::Passthrough(PassthroughAudioComposer::new(
                    audio_index,
                    plan.trim_start_us,
                    plan.trim_end_us,
                )),
            });
        }

        let Resources {
            video,
            audio,
            demuxer,
            muxer,
            ..
        } = resources;
        let (Some(video), Some(muxer)) = (video.as_mut(), muxer.as_mut()) else {
            return Err(ComposeError::configuration("video run is missing a composer or muxer"));
        };
        let mut ctx = StepContext {
            demuxer: demuxer.as_deref_mut(),
            muxer,
        };
        video.set_up(&mut ctx)?;
        if let Some(audio) = audio.as_mut() {
            audio.set_up(&mut ctx)?;
        }
        if plan.trim_start_us > 0 {
            if let Some(demuxer) = ctx.demuxer.as_deref_mut() {
                demuxer.seek_to(plan.trim_start_us)?;
            }
        }
        Ok(())
    }

    fn set_up_still_image(
        &self,
        pixels: &RgbaPixels,
        destination: &Path,
        plan: &ResolvedPipeline,
        mut filter: Box<dyn FrameFilter>,
        resources: &mut Resources,
    ) -> ComposeResult<()> {
        let output = plan.output_resolution;
        let mut renderer = self.backend.create_renderer()?;
        let source = VideoFrame {
            width: pixels.width,
            height: pixels.height,
            format: PixelFormat::Rgba,
            data: pixels.data.clone(),
        };
        let placement = TransformParams {
            rotation: plan.rotation,
            input: plan.input_resolution,
            output,
            fill_mode: plan.fill_mode,
            custom: plan.custom_fill,
            flip: plan.flip,
        }
        .placement();

        filter.setup(output)?;
        let placed = renderer.render(&source, &placement, output, filter.clear_color())?;
        let filtered = filter.apply(placed, 0)?;
        filter.release();
        renderer.release()?;

        let mime = select_video_mime(self.backend.as_ref(), plan.video_codec)?;
        let color_format = self.backend.encoder_color_format(mime);
        let frame = frame_for_color_format(
            &RgbaPixels::new(filtered.width, filtered.height, filtered.data)?,
            color_format,
        )?;
        tracing::debug!(?color_format, mime, "Still frame converted");

        resources.muxer = Some(MuxRender::new(
            self.backend.create_muxer(destination)?,
            &[TrackType::Video],
        ));
        let format = MediaFormat::video(mime, output.width, output.height)
            .with_bit_rate(plan.bitrate)
            .with_frame_rate(plan.frame_rate)
            .with_i_frame_interval(plan.key_frame_interval_secs)
            .with_color_format(color_format);
        let duration_us = plan
            .duration_us
            .ok_or_else(|| ComposeError::configuration("still-image clip has no duration"))?;

        let video = resources.video.insert(VideoComposer::StillImage(StillImageComposer::new(
            self.backend.create_encoder(mime)?,
            format,
            frame,
            plan.frame_rate,
            duration_us,
        )));
        let muxer = resources
            .muxer
            .as_mut()
            .ok_or_else(|| ComposeError::configuration("still-image run has no muxer"))?;
        video.set_up(&mut StepContext {
            demuxer: None,
            muxer,
        })
    }

    fn run_loop(
        &self,
        resources: &mut Resources,
        duration_us: Option<i64>,
        progress: &mut dyn FnMut(f64),
    ) -> ComposeResult<LoopOutcome> {
        let Resources {
            video,
            audio,
            demuxer,
            muxer,
            ..
        } = resources;
        let (Some(video), Some(muxer)) = (video.as_mut(), muxer.as_mut()) else {
            return Err(ComposeError::configuration("run loop started without a composer or muxer"));
        };

        if duration_us.is_none() {
            tracing::warn!("Source duration unknown; progress is indeterminate");
            progress(-1.0);
        }

        let mut steps: u64 = 0;
        let mut idle_steps: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(steps, "Composition canceled");
                return Ok(LoopOutcome::Canceled);
            }
            let audio_finished = audio.as_ref().map_or(true, |a| a.is_finished());
            if video.is_finished() && audio_finished {
                return Ok(LoopOutcome::Finished { steps, idle_steps });
            }

            let mut ctx = StepContext {
                demuxer: demuxer.as_deref_mut(),
                muxer: &mut *muxer,
            };
            let mut busy = video.step_pipeline(&mut ctx)?;
            if let Some(audio) = audio.as_mut() {
                busy |= audio.step_pipeline(&mut ctx)?;
            }
            steps += 1;

            if let Some(duration) = duration_us {
                if steps % self.settings.progress_interval_steps == 0 {
                    let mut total = composer_progress(&*video, duration);
                    let mut count = 1.0;
                    if let Some(audio) = audio.as_ref() {
                        total += composer_progress(audio, duration);
                        count += 1.0;
                    }
                    progress(total / count);
                }
            }

            if !busy {
                idle_steps += 1;
                std::thread::sleep(self.settings.idle_sleep);
            }
        }
    }
}

enum LoopOutcome {
    Finished { steps: u64, idle_steps: u64 },
    Canceled,
}
