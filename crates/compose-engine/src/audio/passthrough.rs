//! Compressed audio copied from the demuxer to the muxer unchanged.

use recompose_common::ComposeResult;
use recompose_media_model::{BufferInfo, SampleFlags, TrackType};

use crate::backend::Demuxer;
use crate::mux::MuxRender;

pub struct PassthroughAudioComposer {
    track_index: usize,
    trim_start_us: i64,
    trim_end_us: Option<i64>,
    buffer: Vec<u8>,
    finished: bool,
    written_presentation_time_us: i64,
    samples_copied: u64,
}

impl PassthroughAudioComposer {
    pub fn new(track_index: usize, trim_start_us: i64, trim_end_us: Option<i64>) -> Self {
        Self {
            track_index,
            trim_start_us,
            trim_end_us,
            buffer: Vec::new(),
            finished: false,
            written_presentation_time_us: 0,
            samples_copied: 0,
        }
    }

    pub fn samples_copied(&self) -> u64 {
        self.samples_copied
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn written_presentation_time_us(&self) -> i64 {
        self.written_presentation_time_us
    }

    pub(crate) fn set_up(&mut self, demuxer: &mut dyn Demuxer, muxer: &mut MuxRender) -> ComposeResult<()> {
        demuxer.select_track(self.track_index)?;
        let format = demuxer.track_format(self.track_index)?;
        self.buffer
            .reserve(format.max_input_size.unwrap_or(1 << 14));
        tracing::info!(
            track = self.track_index,
            mime = %format.mime,
            "Audio passthrough ready"
        );
        muxer.set_output_format(TrackType::Audio, format)
    }

    pub(crate) fn step(&mut self, demuxer: &mut dyn Demuxer, muxer: &mut MuxRender) -> ComposeResult<bool> {
        let head = demuxer.sample_track_index();

        if self.finished {
            if head == Some(self.track_index) {
                demuxer.advance();
                return Ok(true);
            }
            return Ok(false);
        }
        if matches!(head, Some(index) if index != self.track_index) {
            return Ok(false);
        }

        let sample_time = demuxer.sample_time_us().unwrap_or(0);
        let past_trim_end = self.trim_end_us.is_some_and(|end| sample_time > end);
        if head.is_none() || past_trim_end {
            muxer.write_sample_data(
                TrackType::Audio,
                &[],
                &BufferInfo::end_of_stream(self.written_presentation_time_us),
            )?;
            self.finished = true;
            tracing::debug!(
                samples = self.samples_copied,
                past_trim_end,
                "Audio passthrough reached end of stream"
            );
            return Ok(true);
        }

        if sample_time < self.trim_start_us {
            demuxer.advance();
            return Ok(true);
        }

        let size = demuxer.read_sample_data(&mut self.buffer)?;
        let flags = demuxer.sample_flags() & SampleFlags::SYNC;
        let info = BufferInfo::new(size, sample_time - self.trim_start_us, flags);
        muxer.write_sample_data(TrackType::Audio, &self.buffer[..size], &info)?;
        self.written_presentation_time_us = info.presentation_time_us;
        self.samples_copied += 1;

        demuxer.advance();
        Ok(true)
    }
}
