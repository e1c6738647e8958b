//! Audio track composers.
//!
//! Audio is copied unchanged unless the time scale is large enough to
//! require decoding and re-encoding.

pub mod channel;
pub mod passthrough;
pub mod remix;

pub use channel::AudioChannel;
pub use passthrough::PassthroughAudioComposer;
pub use remix::{RemixAudioComposer, RemixAudioSettings};

use recompose_common::{ComposeResult, TimeScale};
use recompose_media_model::TrackType;

use crate::drain::{StepContext, TrackComposer};

/// Audio pipeline of one run.
pub enum AudioComposer {
    Passthrough(PassthroughAudioComposer),
    Remix(RemixAudioComposer),
}

impl TrackComposer for AudioComposer {
    fn track_type(&self) -> TrackType {
        TrackType::Audio
    }

    fn set_up(&mut self, ctx: &mut StepContext<'_>) -> ComposeResult<()> {
        let (demuxer, muxer) = ctx.split()?;
        match self {
            Self::Passthrough(composer) => composer.set_up(demuxer, muxer),
            Self::Remix(composer) => composer.set_up(demuxer),
        }
    }

    fn step_pipeline(&mut self, ctx: &mut StepContext<'_>) -> ComposeResult<bool> {
        let (demuxer, muxer) = ctx.split()?;
        match self {
            Self::Passthrough(composer) => composer.step(demuxer, muxer),
            Self::Remix(composer) => composer.step(demuxer, muxer),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Passthrough(composer) => composer.is_finished(),
            Self::Remix(composer) => composer.is_finished(),
        }
    }

    fn written_presentation_time_us(&self) -> i64 {
        match self {
            Self::Passthrough(composer) => composer.written_presentation_time_us(),
            Self::Remix(composer) => composer.written_presentation_time_us(),
        }
    }

    fn timeline_scale(&self) -> TimeScale {
        match self {
            Self::Passthrough(_) => TimeScale::NORMAL,
            Self::Remix(composer) => composer.time_scale(),
        }
    }

    fn release(&mut self) -> ComposeResult<()> {
        match self {
            Self::Passthrough(_) => Ok(()),
            Self::Remix(composer) => composer.release(),
        }
    }
}
