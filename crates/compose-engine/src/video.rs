//! Video track composers.
//!
//! A [`VideoComposer`] is either fed by a demuxed video track
//! (demux, decode, place/filter, encode) or by one still image
//! submitted to the encoder at a fixed frame rate.

use recompose_common::{frame_presentation_time_us, ComposeError, ComposeResult, TimeScale};
use recompose_media_model::{MediaFormat, SampleFlags, TrackType};

use crate::backend::{CodecOutput, Demuxer, FrameFilter, FrameRenderer, MediaCodec, VideoFrame};
use crate::drain::{DrainState, EncoderDrain, StepContext, TrackComposer};
use crate::surface::{DecoderSurface, EncoderSurface};
use crate::transform::TransformParams;

/// Run `release` on a resource and keep the first failure.
pub(crate) fn release_into(
    first_error: &mut Option<ComposeError>,
    what: &str,
    result: ComposeResult<()>,
) {
    if let Err(e) = result {
        tracing::error!(resource = what, error = %e, "Release failed");
        first_error.get_or_insert(e);
    }
}

/// Settings of a video-source composer.
#[derive(Debug, Clone)]
pub struct SourceVideoSettings {
    pub track_index: usize,
    /// Encoder format (mime, size, bitrate, frame rate, key-frame interval).
    pub output_format: MediaFormat,
    pub transform: TransformParams,
    pub time_scale: TimeScale,
    pub trim_start_us: i64,
    pub trim_end_us: Option<i64>,
}

/// Demux, decode, transform, encode.
pub struct SourceVideoComposer {
    settings: SourceVideoSettings,
    decoder: Box<dyn MediaCodec>,
    encoder: Box<dyn MediaCodec>,
    renderer: Option<Box<dyn FrameRenderer>>,
    filter: Option<Box<dyn FrameFilter>>,
    decoder_surface: Option<DecoderSurface>,
    encoder_surface: Option<EncoderSurface>,
    sample_buffer: Vec<u8>,
    extractor_eos: bool,
    decoder_eos: bool,
    drain: EncoderDrain,
    frames_rendered: u64,
    released: bool,
}

impl SourceVideoComposer {
    pub fn new(
        settings: SourceVideoSettings,
        decoder: Box<dyn MediaCodec>,
        encoder: Box<dyn MediaCodec>,
        renderer: Box<dyn FrameRenderer>,
        filter: Box<dyn FrameFilter>,
    ) -> Self {
        Self {
            settings,
            decoder,
            encoder,
            renderer: Some(renderer),
            filter: Some(filter),
            decoder_surface: None,
            encoder_surface: None,
            sample_buffer: Vec::new(),
            extractor_eos: false,
            decoder_eos: false,
            drain: EncoderDrain::new(TrackType::Video),
            frames_rendered: 0,
            released: false,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Map a demuxed timestamp onto the output timeline.
    pub fn remap_presentation_time(&self, sample_time_us: i64) -> i64 {
        self.settings
            .time_scale
            .remap_us(sample_time_us - self.settings.trim_start_us)
    }

    fn set_up(&mut self, demuxer: &mut dyn Demuxer) -> ComposeResult<()> {
        let track = self.settings.track_index;
        demuxer.select_track(track)?;

        self.encoder
            .configure(&self.settings.output_format, None)
            .map_err(into_codec_configuration)?;
        let input_surface = self.encoder.create_input_surface()?;
        self.encoder_surface = Some(EncoderSurface::new(input_surface));
        self.encoder.start()?;

        let renderer = self
            .renderer
            .take()
            .ok_or_else(|| ComposeError::configuration("video composer set up twice"))?;
        let filter = self
            .filter
            .take()
            .ok_or_else(|| ComposeError::configuration("video composer set up twice"))?;
        let decoder_surface = DecoderSurface::new(renderer, filter, &self.settings.transform)?;

        // Rotation is applied by the renderer, not by the decoder.
        let mut input_format = demuxer.track_format(track)?;
        input_format.rotation_degrees = Some(0);
        self.sample_buffer
            .reserve(input_format.max_input_size.unwrap_or(1 << 16));
        self.decoder
            .configure(&input_format, Some(decoder_surface.surface()))
            .map_err(into_codec_configuration)?;
        self.decoder.start()?;
        self.decoder_surface = Some(decoder_surface);

        tracing::info!(
            track,
            decoder = self.decoder.name(),
            encoder = self.encoder.name(),
            output = %self.settings.transform.output,
            time_scale = self.settings.time_scale.value(),
            "Video composer ready"
        );
        Ok(())
    }

    fn step(&mut self, demuxer: &mut dyn Demuxer, muxer: &mut crate::mux::MuxRender) -> ComposeResult<bool> {
        let mut busy = false;

        while self.drain.drain(self.encoder.as_mut(), muxer)? != DrainState::None {
            busy = true;
        }

        loop {
            let status = self.drain_decoder()?;
            if status != DrainState::None {
                busy = true;
            }
            if status != DrainState::RetryImmediately {
                break;
            }
        }

        while self.drain_extractor(demuxer)? != DrainState::None {
            busy = true;
        }

        Ok(busy)
    }

    fn drain_extractor(&mut self, demuxer: &mut dyn Demuxer) -> ComposeResult<DrainState> {
        let track = self.settings.track_index;
        let head = demuxer.sample_track_index();

        if self.extractor_eos {
            // Samples past the trim end must not block other tracks.
            if head == Some(track) {
                demuxer.advance();
                return Ok(DrainState::Consumed);
            }
            return Ok(DrainState::None);
        }
        if matches!(head, Some(index) if index != track) {
            return Ok(DrainState::None);
        }

        let Some(slot) = self.decoder.dequeue_input_buffer()? else {
            return Ok(DrainState::None);
        };

        let sample_time = demuxer.sample_time_us().unwrap_or(0);
        let past_trim_end = self
            .settings
            .trim_end_us
            .is_some_and(|end| sample_time > end);
        if head.is_none() || past_trim_end {
            self.extractor_eos = true;
            self.decoder
                .queue_input_buffer(slot.index, &[], 0, SampleFlags::END_OF_STREAM)?;
            tracing::debug!(track, past_trim_end, "Video extractor reached end of stream");
            return Ok(DrainState::None);
        }

        let size = demuxer.read_sample_data(&mut self.sample_buffer)?;
        if size > slot.capacity {
            return Err(ComposeError::codec(
                self.decoder.name(),
                format!("sample of {size} bytes exceeds input buffer of {}", slot.capacity),
            ));
        }
        let flags = demuxer.sample_flags() & SampleFlags::SYNC;
        let presentation_time = self.remap_presentation_time(sample_time);
        self.decoder.queue_input_buffer(
            slot.index,
            &self.sample_buffer[..size],
            presentation_time,
            flags,
        )?;
        demuxer.advance();
        Ok(DrainState::Consumed)
    }

    fn drain_decoder(&mut self) -> ComposeResult<DrainState> {
        if self.decoder_eos {
            return Ok(DrainState::None);
        }

        let (index, info) = match self.decoder.dequeue_output_buffer()? {
            CodecOutput::TryAgainLater => return Ok(DrainState::None),
            CodecOutput::FormatChanged | CodecOutput::BuffersChanged => {
                return Ok(DrainState::RetryImmediately)
            }
            CodecOutput::Buffer { index, info } => (index, info),
        };

        if info.flags.is_end_of_stream() {
            self.encoder.signal_end_of_input_stream()?;
            self.decoder_eos = true;
        }

        // Frames before the trim start are decoded only as references.
        let render = info.size > 0 && info.presentation_time_us >= 0;
        self.decoder.release_output_buffer(index, render)?;
        if render {
            let (Some(decoder_surface), Some(encoder_surface)) =
                (self.decoder_surface.as_mut(), self.encoder_surface.as_mut())
            else {
                return Err(ComposeError::configuration("video composer not set up"));
            };
            decoder_surface.await_new_image()?;
            let frame = decoder_surface.draw_image(info.presentation_time_us)?;
            encoder_surface.set_presentation_time(info.presentation_time_us);
            encoder_surface.swap_buffers(frame);
            self.frames_rendered += 1;
        }
        Ok(DrainState::Consumed)
    }

    fn release(&mut self) -> ComposeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        if let Some(mut surface) = self.decoder_surface.take() {
            release_into(&mut first_error, "decoder surface", surface.release());
        }
        if let Some(mut surface) = self.encoder_surface.take() {
            surface.release();
        }
        release_into(&mut first_error, "video decoder", stop_and_release(self.decoder.as_mut()));
        release_into(&mut first_error, "video encoder", stop_and_release(self.encoder.as_mut()));
        first_error.map_or(Ok(()), Err)
    }
}

/// Still image encoded as a constant-rate clip.
pub struct StillImageComposer {
    encoder: Box<dyn MediaCodec>,
    output_format: MediaFormat,
    frame: VideoFrame,
    frame_rate: u32,
    duration_us: i64,
    frame_index: u64,
    input_eos: bool,
    drain: EncoderDrain,
    released: bool,
}

impl StillImageComposer {
    /// `frame` must already be in the encoder's buffer color format.
    pub fn new(
        encoder: Box<dyn MediaCodec>,
        output_format: MediaFormat,
        frame: VideoFrame,
        frame_rate: u32,
        duration_us: i64,
    ) -> Self {
        Self {
            encoder,
            output_format,
            frame,
            frame_rate,
            duration_us,
            frame_index: 0,
            input_eos: false,
            drain: EncoderDrain::new(TrackType::Video),
            released: false,
        }
    }

    /// Frames handed to the encoder so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frame_index
    }

    fn set_up(&mut self) -> ComposeResult<()> {
        self.encoder
            .configure(&self.output_format, None)
            .map_err(into_codec_configuration)?;
        self.encoder.start()?;
        tracing::info!(
            encoder = self.encoder.name(),
            width = self.frame.width,
            height = self.frame.height,
            frame_rate = self.frame_rate,
            duration_us = self.duration_us,
            "Still-image composer ready"
        );
        Ok(())
    }

    fn step(&mut self, muxer: &mut crate::mux::MuxRender) -> ComposeResult<bool> {
        let mut busy = false;

        if !self.input_eos {
            if let Some(slot) = self.encoder.dequeue_input_buffer()? {
                let presentation_time = frame_presentation_time_us(self.frame_index, self.frame_rate);
                if presentation_time >= self.duration_us {
                    self.encoder.queue_input_buffer(
                        slot.index,
                        &[],
                        presentation_time,
                        SampleFlags::END_OF_STREAM,
                    )?;
                    self.input_eos = true;
                    tracing::debug!(frames = self.frame_index, "Still image reached end of stream");
                } else {
                    if self.frame.data.len() > slot.capacity {
                        return Err(ComposeError::codec_configuration(format!(
                            "still frame of {} bytes exceeds encoder input buffer of {}",
                            self.frame.data.len(),
                            slot.capacity
                        )));
                    }
                    self.encoder.queue_input_buffer(
                        slot.index,
                        &self.frame.data,
                        presentation_time,
                        SampleFlags::empty(),
                    )?;
                    self.frame_index += 1;
                }
                busy = true;
            }
        }

        while self.drain.drain(self.encoder.as_mut(), muxer)? != DrainState::None {
            busy = true;
        }
        Ok(busy)
    }

    fn release(&mut self) -> ComposeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        stop_and_release(self.encoder.as_mut())
    }
}

pub(crate) fn stop_and_release(codec: &mut dyn MediaCodec) -> ComposeResult<()> {
    if let Err(e) = codec.stop() {
        tracing::debug!(codec = codec.name(), error = %e, "Codec stop failed before release");
    }
    codec.release()
}

pub(crate) fn into_codec_configuration(error: ComposeError) -> ComposeError {
    match error {
        ComposeError::Codec { codec, message } => {
            ComposeError::codec_configuration(format!("{codec}: {message}"))
        }
        other => other,
    }
}

/// Video pipeline of one run.
pub enum VideoComposer {
    Source(SourceVideoComposer),
    StillImage(StillImageComposer),
}

impl VideoComposer {
    pub fn frames_submitted(&self) -> u64 {
        match self {
            Self::Source(composer) => composer.frames_rendered(),
            Self::StillImage(composer) => composer.frames_submitted(),
        }
    }
}

impl TrackComposer for VideoComposer {
    fn track_type(&self) -> TrackType {
        TrackType::Video
    }

    fn set_up(&mut self, ctx: &mut StepContext<'_>) -> ComposeResult<()> {
        match self {
            Self::Source(composer) => {
                let (demuxer, _) = ctx.split()?;
                composer.set_up(demuxer)
            }
            Self::StillImage(composer) => composer.set_up(),
        }
    }

    fn step_pipeline(&mut self, ctx: &mut StepContext<'_>) -> ComposeResult<bool> {
        match self {
            Self::Source(composer) => {
                let (demuxer, muxer) = ctx.split()?;
                composer.step(demuxer, muxer)
            }
            Self::StillImage(composer) => composer.step(ctx.muxer),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Source(composer) => composer.drain.is_finished(),
            Self::StillImage(composer) => composer.drain.is_finished(),
        }
    }

    fn written_presentation_time_us(&self) -> i64 {
        match self {
            Self::Source(composer) => composer.drain.written_presentation_time_us(),
            Self::StillImage(composer) => composer.drain.written_presentation_time_us(),
        }
    }

    fn timeline_scale(&self) -> TimeScale {
        match self {
            Self::Source(composer) => composer.settings.time_scale,
            Self::StillImage(_) => TimeScale::NORMAL,
        }
    }

    fn release(&mut self) -> ComposeResult<()> {
        match self {
            Self::Source(composer) => composer.release(),
            Self::StillImage(composer) => composer.release(),
        }
    }
}
