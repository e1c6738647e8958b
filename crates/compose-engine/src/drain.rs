//! Stepping contract shared by every track composer.

use recompose_common::{ComposeError, ComposeResult, TimeScale};
use recompose_media_model::{MediaFormat, TrackType};

use crate::backend::{CodecOutput, Demuxer, MediaCodec};
use crate::mux::MuxRender;

/// Outcome of one non-blocking poll of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Nothing available right now.
    None,
    /// A one-time format or buffer-set change; poll again in the same step.
    RetryImmediately,
    /// One unit of work was done.
    Consumed,
}

/// Shared resources a composer may touch during one step.
pub struct StepContext<'a> {
    /// `None` for still-image runs.
    pub demuxer: Option<&'a mut (dyn Demuxer + 'static)>,
    pub muxer: &'a mut MuxRender,
}

impl StepContext<'_> {
    /// Demuxer and muxer borrowed together.
    pub(crate) fn split(&mut self) -> ComposeResult<(&mut (dyn Demuxer + 'static), &mut MuxRender)> {
        let demuxer = self
            .demuxer
            .as_deref_mut()
            .ok_or_else(|| ComposeError::configuration("this composer needs a demuxer"))?;
        Ok((demuxer, &mut *self.muxer))
    }
}

/// One track's pipeline, stepped by the engine until finished.
pub trait TrackComposer {
    fn track_type(&self) -> TrackType;

    /// Configure codecs and register with the muxer.
    fn set_up(&mut self, ctx: &mut StepContext<'_>) -> ComposeResult<()>;

    /// Do as much non-blocking work as is available. Returns `true` iff any
    /// stage made progress.
    fn step_pipeline(&mut self, ctx: &mut StepContext<'_>) -> ComposeResult<bool>;

    fn is_finished(&self) -> bool;

    /// Presentation time of the last sample handed to the muxer, on the
    /// output timeline.
    fn written_presentation_time_us(&self) -> i64;

    /// Factor between source time and this composer's written timeline.
    fn timeline_scale(&self) -> TimeScale {
        TimeScale::NORMAL
    }

    /// Release codecs and surfaces. Safe to call more than once.
    fn release(&mut self) -> ComposeResult<()>;
}

/// Drains an encoder into the muxer. Shared by the video and remix-audio
/// composers.
#[derive(Debug)]
pub(crate) struct EncoderDrain {
    track: TrackType,
    actual_output_format: Option<MediaFormat>,
    finished: bool,
    written_presentation_time_us: i64,
}

impl EncoderDrain {
    pub fn new(track: TrackType) -> Self {
        Self {
            track,
            actual_output_format: None,
            finished: false,
            written_presentation_time_us: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn written_presentation_time_us(&self) -> i64 {
        self.written_presentation_time_us
    }

    pub fn drain(
        &mut self,
        encoder: &mut dyn MediaCodec,
        muxer: &mut MuxRender,
    ) -> ComposeResult<DrainState> {
        if self.finished {
            return Ok(DrainState::None);
        }

        let (index, mut info) = match encoder.dequeue_output_buffer()? {
            CodecOutput::TryAgainLater => return Ok(DrainState::None),
            CodecOutput::FormatChanged => {
                if self.actual_output_format.is_some() {
                    return Err(ComposeError::muxer_protocol(format!(
                        "{} output format changed twice",
                        self.track
                    )));
                }
                let format = encoder.output_format()?;
                tracing::debug!(track = %self.track, mime = %format.mime, "Encoder output format resolved");
                muxer.set_output_format(self.track, format.clone())?;
                self.actual_output_format = Some(format);
                return Ok(DrainState::RetryImmediately);
            }
            CodecOutput::BuffersChanged => return Ok(DrainState::RetryImmediately),
            CodecOutput::Buffer { index, info } => (index, info),
        };

        if self.actual_output_format.is_none() {
            return Err(ComposeError::muxer_protocol(format!(
                "could not determine actual {} output format",
                self.track
            )));
        }

        if info.flags.is_end_of_stream() {
            self.finished = true;
            info.size = 0;
            info.offset = 0;
        }
        if info.flags.is_codec_config() {
            // Already carried by the output format.
            encoder.release_output_buffer(index, false)?;
            return Ok(DrainState::RetryImmediately);
        }

        if info.size > 0 {
            let data = encoder.output_buffer(index).ok_or_else(|| {
                ComposeError::codec(encoder.name(), format!("output buffer {index} missing"))
            })?;
            let payload = data.get(info.range()).ok_or_else(|| {
                ComposeError::codec(encoder.name(), format!("output buffer {index} too short"))
            })?;
            muxer.write_sample_data(self.track, payload, &info)?;
            self.written_presentation_time_us = info.presentation_time_us;
        } else {
            muxer.write_sample_data(self.track, &[], &info)?;
        }
        encoder.release_output_buffer(index, false)?;
        Ok(DrainState::Consumed)
    }
}
