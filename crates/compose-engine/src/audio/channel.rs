//! PCM staging between the audio decoder and encoder.
//!
//! Decoded 16-bit interleaved PCM is remixed to the encoder channel count,
//! then time-scaled by selecting whole units of audio: a unit is one frame
//! when pitch may follow speed, or a short grain when pitch is kept. Unit
//! `k` is emitted once for every pick position in `[k, k + 1)`, with pick
//! positions spaced `time_scale` units apart. The result is queued and cut
//! into encoder-sized chunks with continuous timestamps.

use std::collections::VecDeque;

use recompose_common::{ComposeError, ComposeResult, TimeScale, MICROS_PER_SECOND};

/// Grain length used when pitch is preserved.
pub const GRAIN_MS: u32 = 20;

const BYTES_PER_SAMPLE: usize = 2;

fn check_channels(channels: u32) -> ComposeResult<()> {
    if channels == 1 || channels == 2 {
        Ok(())
    } else {
        Err(ComposeError::unsupported(format!(
            "only mono and stereo audio can be remixed, got {channels} channels"
        )))
    }
}

#[derive(Debug)]
pub struct AudioChannel {
    sample_rate: u32,
    input_channels: u32,
    output_channels: u32,
    time_scale: TimeScale,
    unit_frames: usize,
    unit: Vec<i16>,
    units_seen: u64,
    next_pick: f64,
    pending: VecDeque<i16>,
    base_presentation_time_us: Option<i64>,
    frames_emitted: u64,
    input_done: bool,
}

impl AudioChannel {
    pub fn new(
        sample_rate: u32,
        input_channels: u32,
        output_channels: u32,
        time_scale: TimeScale,
        pitch_change: bool,
    ) -> ComposeResult<Self> {
        if sample_rate == 0 {
            return Err(ComposeError::unsupported_source("audio sample rate is zero"));
        }
        check_channels(input_channels)?;
        check_channels(output_channels)?;
        let unit_frames = if pitch_change {
            1
        } else {
            ((sample_rate * GRAIN_MS) / 1000).max(1) as usize
        };
        Ok(Self {
            sample_rate,
            input_channels,
            output_channels,
            time_scale,
            unit_frames,
            unit: Vec::with_capacity(unit_frames * output_channels as usize),
            units_seen: 0,
            next_pick: 0.0,
            pending: VecDeque::new(),
            base_presentation_time_us: None,
            frames_emitted: 0,
            input_done: false,
        })
    }

    /// Apply the format the decoder actually produces.
    pub fn set_input_format(
        &mut self,
        sample_rate: Option<u32>,
        channels: Option<u32>,
    ) -> ComposeResult<()> {
        if let Some(rate) = sample_rate {
            if rate != self.sample_rate {
                return Err(ComposeError::unsupported(format!(
                    "audio sample rate conversion is not supported ({rate} Hz decoded, {} Hz encoded)",
                    self.sample_rate
                )));
            }
        }
        if let Some(channels) = channels {
            check_channels(channels)?;
            if channels != self.input_channels {
                tracing::debug!(
                    from = self.input_channels,
                    to = channels,
                    "Decoder changed channel count"
                );
            }
            self.input_channels = channels;
        }
        Ok(())
    }

    /// Queue one decoded buffer. `presentation_time_us` is already on the
    /// output timeline.
    pub fn push(&mut self, pcm: &[u8], presentation_time_us: i64) {
        self.base_presentation_time_us
            .get_or_insert(presentation_time_us);

        let in_channels = self.input_channels as usize;
        let frame_bytes = in_channels * BYTES_PER_SAMPLE;
        for frame in pcm.chunks_exact(frame_bytes) {
            let sample = |c: usize| {
                i16::from_le_bytes([frame[c * BYTES_PER_SAMPLE], frame[c * BYTES_PER_SAMPLE + 1]])
            };
            match (in_channels, self.output_channels) {
                (1, 2) => {
                    let s = sample(0);
                    self.unit.extend_from_slice(&[s, s]);
                }
                (2, 1) => {
                    let mixed = (sample(0) as i32 + sample(1) as i32) / 2;
                    self.unit.push(mixed as i16);
                }
                _ => {
                    for c in 0..in_channels {
                        self.unit.push(sample(c));
                    }
                }
            }
            if self.unit.len() >= self.unit_frames * self.output_channels as usize {
                self.emit_unit();
            }
        }
    }

    fn emit_unit(&mut self) {
        let upper = (self.units_seen + 1) as f64;
        while self.next_pick < upper {
            self.pending.extend(self.unit.iter().copied());
            self.next_pick += self.time_scale.value();
        }
        self.units_seen += 1;
        self.unit.clear();
    }

    /// No more decoded input will arrive.
    pub fn finish_input(&mut self) {
        if !self.unit.is_empty() {
            self.emit_unit();
        }
        self.input_done = true;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_input_done(&self) -> bool {
        self.input_done
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.output_channels as usize
    }

    /// Timestamp the next chunk will carry.
    pub fn next_presentation_time_us(&self) -> i64 {
        self.base_presentation_time_us.unwrap_or(0)
            + (self.frames_emitted as i64 * MICROS_PER_SECOND) / self.sample_rate as i64
    }

    /// Take up to `capacity_bytes` of whole frames for one encoder input
    /// buffer, with the presentation time of its first frame.
    pub fn take_chunk(&mut self, capacity_bytes: usize) -> Option<(Vec<u8>, i64)> {
        let frame_bytes = self.output_channels as usize * BYTES_PER_SAMPLE;
        let frames = (capacity_bytes / frame_bytes).min(self.pending_frames());
        if frames == 0 {
            return None;
        }
        let presentation_time = self.next_presentation_time_us();
        let samples = frames * self.output_channels as usize;
        let mut bytes = Vec::with_capacity(samples * BYTES_PER_SAMPLE);
        for sample in self.pending.drain(..samples) {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.frames_emitted += frames as u64;
        Some((bytes, presentation_time))
    }

    pub fn frame_bytes(&self) -> usize {
        self.output_channels as usize * BYTES_PER_SAMPLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn drain_all(channel: &mut AudioChannel) -> Vec<i16> {
        let mut out = Vec::new();
        while let Some((bytes, _)) = channel.take_chunk(4096) {
            out.extend(
                bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]])),
            );
        }
        out
    }

    #[test]
    fn test_pitch_change_halves_samples() {
        let mut channel = AudioChannel::new(8_000, 1, 1, TimeScale::new(2.0), true).unwrap();
        channel.push(&pcm(&[0, 1, 2, 3, 4, 5, 6, 7]), 0);
        channel.finish_input();
        assert_eq!(drain_all(&mut channel), vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_slow_motion_repeats_samples() {
        let mut channel = AudioChannel::new(8_000, 1, 1, TimeScale::new(0.5), true).unwrap();
        channel.push(&pcm(&[10, 20]), 0);
        channel.finish_input();
        assert_eq!(drain_all(&mut channel), vec![10, 10, 20, 20]);
    }

    #[test]
    fn test_grains_keep_pitch() {
        // 1 kHz: a 20 ms grain is 20 frames.
        let mut channel = AudioChannel::new(1_000, 1, 1, TimeScale::new(2.0), false).unwrap();
        let input: Vec<i16> = (0..80).collect();
        channel.push(&pcm(&input), 0);
        channel.finish_input();
        let out = drain_all(&mut channel);
        let expected: Vec<i16> = (0..20).chain(40..60).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_mono_to_stereo() {
        let mut channel = AudioChannel::new(8_000, 1, 2, TimeScale::NORMAL, true).unwrap();
        channel.push(&pcm(&[5, -5]), 0);
        channel.finish_input();
        assert_eq!(drain_all(&mut channel), vec![5, 5, -5, -5]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let mut channel = AudioChannel::new(8_000, 2, 1, TimeScale::NORMAL, true).unwrap();
        channel.push(&pcm(&[100, 300, -100, -300]), 0);
        channel.finish_input();
        assert_eq!(drain_all(&mut channel), vec![200, -200]);
    }

    #[test]
    fn test_chunk_timestamps_are_continuous() {
        let mut channel = AudioChannel::new(1_000, 1, 1, TimeScale::NORMAL, true).unwrap();
        channel.push(&pcm(&[0; 10]), 500_000);
        let (first, t0) = channel.take_chunk(8).unwrap();
        assert_eq!(first.len(), 8);
        assert_eq!(t0, 500_000);
        let (_, t1) = channel.take_chunk(8).unwrap();
        assert_eq!(t1, 504_000);
    }

    #[test]
    fn test_sample_rate_mismatch_unsupported() {
        let mut channel = AudioChannel::new(44_100, 2, 2, TimeScale::NORMAL, true).unwrap();
        assert!(channel.set_input_format(Some(48_000), Some(2)).is_err());
        assert!(channel.set_input_format(Some(44_100), Some(6)).is_err());
        assert!(channel.set_input_format(Some(44_100), Some(1)).is_ok());
    }

    #[test]
    fn test_surround_rejected() {
        assert!(AudioChannel::new(48_000, 6, 2, TimeScale::NORMAL, true).is_err());
    }
}
