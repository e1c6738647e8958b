//! Decode, time-scale and re-encode audio.
//!
//! Stages are polled in the same order as the video composer: encoder
//! output first, then decoder output into the [`AudioChannel`], then the
//! channel into encoder input, then demuxed samples into the decoder.

use recompose_common::{ComposeError, ComposeResult, TimeScale};
use recompose_media_model::{MediaFormat, SampleFlags, TrackType};

use super::channel::AudioChannel;
use crate::backend::{CodecOutput, Demuxer, MediaCodec};
use crate::drain::{DrainState, EncoderDrain};
use crate::mux::MuxRender;
use crate::video::{into_codec_configuration, release_into, stop_and_release};

#[derive(Debug, Clone)]
pub struct RemixAudioSettings {
    pub track_index: usize,
    pub bitrate: u32,
    pub aac_profile: u32,
    pub time_scale: TimeScale,
    /// Let pitch follow speed instead of keeping it.
    pub pitch_change: bool,
    pub trim_start_us: i64,
    pub trim_end_us: Option<i64>,
}

pub struct RemixAudioComposer {
    settings: RemixAudioSettings,
    decoder: Box<dyn MediaCodec>,
    encoder: Box<dyn MediaCodec>,
    channel: Option<AudioChannel>,
    sample_buffer: Vec<u8>,
    extractor_eos: bool,
    decoder_eos: bool,
    encoder_input_eos: bool,
    drain: EncoderDrain,
    released: bool,
}

impl RemixAudioComposer {
    pub fn new(
        settings: RemixAudioSettings,
        decoder: Box<dyn MediaCodec>,
        encoder: Box<dyn MediaCodec>,
    ) -> Self {
        Self {
            settings,
            decoder,
            encoder,
            channel: None,
            sample_buffer: Vec::new(),
            extractor_eos: false,
            decoder_eos: false,
            encoder_input_eos: false,
            drain: EncoderDrain::new(TrackType::Audio),
            released: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.drain.is_finished()
    }

    pub fn written_presentation_time_us(&self) -> i64 {
        self.drain.written_presentation_time_us()
    }

    pub fn time_scale(&self) -> TimeScale {
        self.settings.time_scale
    }

    fn remap_presentation_time(&self, sample_time_us: i64) -> i64 {
        self.settings
            .time_scale
            .remap_us(sample_time_us - self.settings.trim_start_us)
    }

    pub(crate) fn set_up(&mut self, demuxer: &mut dyn Demuxer) -> ComposeResult<()> {
        let track = self.settings.track_index;
        demuxer.select_track(track)?;

        let input_format = demuxer.track_format(track)?;
        let sample_rate = input_format
            .sample_rate
            .ok_or_else(|| ComposeError::unsupported_source("audio track has no sample rate"))?;
        let channels = input_format
            .channel_count
            .ok_or_else(|| ComposeError::unsupported_source("audio track has no channel count"))?;
        let channel = AudioChannel::new(
            sample_rate,
            channels,
            channels,
            self.settings.time_scale,
            self.settings.pitch_change,
        )?;

        self.sample_buffer
            .reserve(input_format.max_input_size.unwrap_or(1 << 14));
        self.decoder
            .configure(&input_format, None)
            .map_err(into_codec_configuration)?;
        self.decoder.start()?;

        let output_format = MediaFormat::audio(
            recompose_media_model::MIME_AUDIO_AAC,
            sample_rate,
            channels,
        )
        .with_bit_rate(self.settings.bitrate)
        .with_aac_profile(self.settings.aac_profile);
        self.encoder
            .configure(&output_format, None)
            .map_err(into_codec_configuration)?;
        self.encoder.start()?;
        self.channel = Some(channel);

        tracing::info!(
            track,
            sample_rate,
            channels,
            time_scale = self.settings.time_scale.value(),
            pitch_change = self.settings.pitch_change,
            "Audio remix ready"
        );
        Ok(())
    }

    pub(crate) fn step(&mut self, demuxer: &mut dyn Demuxer, muxer: &mut MuxRender) -> ComposeResult<bool> {
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

        while self.feed_encoder()? != DrainState::None {
            busy = true;
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
            tracing::debug!(track, past_trim_end, "Audio extractor reached end of stream");
            return Ok(DrainState::None);
        }

        let size = demuxer.read_sample_data(&mut self.sample_buffer)?;
        if size > slot.capacity {
            return Err(ComposeError::codec(
                self.decoder.name(),
                format!("sample of {size} bytes exceeds input buffer of {}", slot.capacity),
            ));
        }
        let presentation_time = self.remap_presentation_time(sample_time);
        self.decoder.queue_input_buffer(
            slot.index,
            &self.sample_buffer[..size],
            presentation_time,
            demuxer.sample_flags() & SampleFlags::SYNC,
        )?;
        demuxer.advance();
        Ok(DrainState::Consumed)
    }

    fn drain_decoder(&mut self) -> ComposeResult<DrainState> {
        if self.decoder_eos {
            return Ok(DrainState::None);
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(ComposeError::configuration("audio remix not set up"));
        };

        let (index, info) = match self.decoder.dequeue_output_buffer()? {
            CodecOutput::TryAgainLater => return Ok(DrainState::None),
            CodecOutput::FormatChanged => {
                let format = self.decoder.output_format()?;
                channel.set_input_format(format.sample_rate, format.channel_count)?;
                return Ok(DrainState::RetryImmediately);
            }
            CodecOutput::BuffersChanged => return Ok(DrainState::RetryImmediately),
            CodecOutput::Buffer { index, info } => (index, info),
        };

        // Audio before the trim start decodes to negative timestamps.
        if info.size > 0 && info.presentation_time_us >= 0 {
            let data = self.decoder.output_buffer(index).ok_or_else(|| {
                ComposeError::codec(self.decoder.name(), format!("output buffer {index} missing"))
            })?;
            let pcm = data.get(info.range()).ok_or_else(|| {
                ComposeError::codec(self.decoder.name(), format!("output buffer {index} too short"))
            })?;
            channel.push(pcm, info.presentation_time_us);
        }
        if info.flags.is_end_of_stream() {
            channel.finish_input();
            self.decoder_eos = true;
        }
        self.decoder.release_output_buffer(index, false)?;
        Ok(DrainState::Consumed)
    }

    fn feed_encoder(&mut self) -> ComposeResult<DrainState> {
        if self.encoder_input_eos {
            return Ok(DrainState::None);
        }
        let Some(channel) = self.channel.as_mut() else {
            return Ok(DrainState::None);
        };
        if !channel.has_pending() && !channel.is_input_done() {
            return Ok(DrainState::None);
        }

        let Some(slot) = self.encoder.dequeue_input_buffer()? else {
            return Ok(DrainState::None);
        };
        if let Some((pcm, presentation_time)) = channel.take_chunk(slot.capacity) {
            self.encoder
                .queue_input_buffer(slot.index, &pcm, presentation_time, SampleFlags::empty())?;
            return Ok(DrainState::Consumed);
        }
        if channel.has_pending() {
            return Err(ComposeError::codec(
                self.encoder.name(),
                format!(
                    "input buffer of {} bytes cannot hold one {}-byte frame",
                    slot.capacity,
                    channel.frame_bytes()
                ),
            ));
        }

        self.encoder.queue_input_buffer(
            slot.index,
            &[],
            channel.next_presentation_time_us(),
            SampleFlags::END_OF_STREAM,
        )?;
        self.encoder_input_eos = true;
        tracing::debug!("Audio remix signalled end of input");
        Ok(DrainState::Consumed)
    }

    pub(crate) fn release(&mut self) -> ComposeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        release_into(&mut first_error, "audio decoder", stop_and_release(self.decoder.as_mut()));
        release_into(&mut first_error, "audio encoder", stop_and_release(self.encoder.as_mut()));
        first_error.map_or(Ok(()), Err)
    }
}
