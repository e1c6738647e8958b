//! Loopback codecs with scripted latency and faults.
//!
//! Decoders turn synthetic samples back into frames or PCM. Encoders turn
//! frames or PCM into short checksummed packets. Both follow the buffer
//! queue protocol: a format change is announced before the first output
//! buffer, outputs trail inputs by `latency` buffers, and end of stream is
//! an empty buffer flagged `END_OF_STREAM`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::{
    BufferInfo, MediaFormat, Resolution, SampleFlags, MIME_AUDIO_RAW, MIME_VIDEO_RAW,
};
use serde::{Deserialize, Serialize};

use crate::backend::{
    CodecOutput, FrameSurface, InputSlot, MediaCodec, PixelFormat, TimedFrame, VideoFrame,
};

use super::source::decode_video_payload;
use super::ReleaseLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecRole {
    VideoDecoder,
    VideoEncoder,
    AudioDecoder,
    AudioEncoder,
}

impl CodecRole {
    pub fn label(self) -> &'static str {
        match self {
            Self::VideoDecoder => "video decoder",
            Self::VideoEncoder => "video encoder",
            Self::AudioDecoder => "audio decoder",
            Self::AudioEncoder => "audio encoder",
        }
    }

    fn is_encoder(self) -> bool {
        matches!(self, Self::VideoEncoder | Self::AudioEncoder)
    }
}

/// Scripted behaviour of one loopback codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecBehavior {
    /// Inputs held back before the first output appears.
    pub latency: usize,
    /// Input buffers that may be queued at once.
    pub input_slots: usize,
    /// Input buffer capacity. `None` sizes it from the configured format.
    pub input_capacity: Option<usize>,
    /// Emit a codec-config buffer before the first media buffer.
    pub emit_codec_config: bool,
    /// Report a buffer-set change after the format change.
    pub emit_buffers_changed: bool,
    /// Announce the output format a second time after the first buffer.
    pub format_change_twice: bool,
    pub fail_configure: bool,
    pub fail_release: bool,
    /// Channel count reported by an audio decoder's output format.
    pub output_channels: Option<u32>,
}

impl Default for CodecBehavior {
    fn default() -> Self {
        Self {
            latency: 2,
            input_slots: 4,
            input_capacity: None,
            emit_codec_config: true,
            emit_buffers_changed: false,
            format_change_twice: false,
            fail_configure: false,
            fail_release: false,
            output_channels: None,
        }
    }
}

enum Payload {
    Bytes(Vec<u8>),
    Frame(VideoFrame),
}

struct PendingInput {
    payload: Payload,
    presentation_time_us: i64,
}

struct ReadyOutput {
    data: Vec<u8>,
    frame: Option<VideoFrame>,
    info: BufferInfo,
}

pub struct LoopbackCodec {
    name: String,
    role: CodecRole,
    behavior: CodecBehavior,
    ledger: ReleaseLedger,
    frame_tap: Option<Arc<Mutex<Vec<TimedFrame>>>>,

    input_format: Option<MediaFormat>,
    output_surface: Option<FrameSurface>,
    input_surface: Option<FrameSurface>,
    started: bool,
    released: bool,

    next_input_index: usize,
    dequeued_inputs: Vec<usize>,
    inputs: VecDeque<PendingInput>,
    input_eos: bool,
    last_presentation_time_us: i64,

    outputs: VecDeque<ReadyOutput>,
    held: HashMap<usize, ReadyOutput>,
    next_output_index: usize,
    format_announcements: u32,
    buffers_changed_sent: bool,
    codec_config_sent: bool,
    media_buffers_sent: u64,
    output_eos: bool,
}

impl LoopbackCodec {
    pub fn new(role: CodecRole, behavior: CodecBehavior, ledger: ReleaseLedger) -> Self {
        Self {
            name: format!("loopback-{}", role.label().replace(' ', "-")),
            role,
            behavior,
            ledger,
            frame_tap: None,
            input_format: None,
            output_surface: None,
            input_surface: None,
            started: false,
            released: false,
            next_input_index: 0,
            dequeued_inputs: Vec::new(),
            inputs: VecDeque::new(),
            input_eos: false,
            last_presentation_time_us: 0,
            outputs: VecDeque::new(),
            held: HashMap::new(),
            next_output_index: 0,
            format_announcements: 0,
            buffers_changed_sent: false,
            codec_config_sent: false,
            media_buffers_sent: 0,
            output_eos: false,
        }
    }

    /// Record every frame a video encoder consumes.
    pub fn with_frame_tap(mut self, tap: Arc<Mutex<Vec<TimedFrame>>>) -> Self {
        self.frame_tap = Some(tap);
        self
    }

    fn error(&self, message: impl Into<String>) -> ComposeError {
        ComposeError::codec(self.name.clone(), message)
    }

    fn ensure_running(&self) -> ComposeResult<()> {
        if self.released {
            return Err(self.error("codec already released"));
        }
        if !self.started {
            return Err(self.error("codec not started"));
        }
        Ok(())
    }

    fn configured(&self) -> ComposeResult<&MediaFormat> {
        self.input_format
            .as_ref()
            .ok_or_else(|| self.error("codec not configured"))
    }

    fn input_capacity(&self) -> usize {
        if let Some(capacity) = self.behavior.input_capacity {
            return capacity;
        }
        match (self.role, &self.input_format) {
            (CodecRole::VideoEncoder, Some(format)) => {
                let pixels = format.width.unwrap_or(0) as usize * format.height.unwrap_or(0) as usize;
                pixels * 4 + 64
            }
            (_, Some(format)) => format.max_input_size.unwrap_or(1 << 16).max(64),
            (_, None) => 1 << 16,
        }
    }

    fn pull_input_surface(&mut self) {
        let Some(surface) = self.input_surface.as_ref() else {
            return;
        };
        while let Some(frame) = surface.pop() {
            self.inputs.push_back(PendingInput {
                presentation_time_us: frame.presentation_time_us,
                payload: Payload::Frame(frame.frame),
            });
        }
    }

    fn process(&mut self, input: PendingInput) -> ComposeResult<ReadyOutput> {
        let pts = input.presentation_time_us;
        let media = |data: Vec<u8>, frame: Option<VideoFrame>, flags: SampleFlags| ReadyOutput {
            info: BufferInfo::new(data.len(), pts, flags),
            data,
            frame,
        };
        match (self.role, input.payload) {
            (CodecRole::VideoDecoder, Payload::Bytes(bytes)) => {
                let (resolution, color) = decode_video_payload(&bytes)
                    .ok_or_else(|| self.error("sample is not a synthetic video frame"))?;
                let data = color
                    .iter()
                    .copied()
                    .cycle()
                    .take(resolution.pixel_count() as usize * 4)
                    .collect();
                let frame = VideoFrame {
                    width: resolution.width,
                    height: resolution.height,
                    format: PixelFormat::Rgba,
                    data,
                };
                // The frame travels to the output surface; the buffer itself is opaque.
                Ok(ReadyOutput {
                    info: BufferInfo::new(frame.data.len(), pts, SampleFlags::empty()),
                    data: Vec::new(),
                    frame: Some(frame),
                })
            }
            (CodecRole::VideoEncoder, payload) => {
                let (resolution, bytes) = match payload {
                    Payload::Frame(frame) => {
                        if let Some(tap) = &self.frame_tap {
                            if let Ok(mut frames) = tap.lock() {
                                frames.push(TimedFrame {
                                    frame: frame.clone(),
                                    presentation_time_us: pts,
                                });
                            }
                        }
                        (frame.resolution(), frame.data)
                    }
                    Payload::Bytes(bytes) => {
                        let format = self.configured()?;
                        let resolution =
                            Resolution::new(format.width.unwrap_or(0), format.height.unwrap_or(0));
                        (resolution, bytes)
                    }
                };
                let flags = if self.media_buffers_sent == 0 {
                    SampleFlags::SYNC
                } else {
                    SampleFlags::empty()
                };
                Ok(media(encode_packet(b"V", resolution.width, resolution.height, &bytes), None, flags))
            }
            (CodecRole::AudioDecoder, Payload::Bytes(bytes)) => Ok(media(bytes, None, SampleFlags::empty())),
            (CodecRole::AudioEncoder, Payload::Bytes(bytes)) => {
                let len = bytes.len() as u32;
                Ok(media(encode_packet(b"A", len, 0, &bytes), None, SampleFlags::SYNC))
            }
            (_, Payload::Frame(_)) => Err(self.error("frame input on a buffer-fed codec")),
        }
    }

    fn announced_format(&self) -> ComposeResult<MediaFormat> {
        let input = self.configured()?.clone();
        let format = match self.role {
            CodecRole::VideoEncoder | CodecRole::AudioEncoder => {
                let mut format = input;
                format.codec_specific_data = vec![vec![0, 0, 0, 1]];
                format.color_format = None;
                format
            }
            CodecRole::VideoDecoder => MediaFormat::video(
                MIME_VIDEO_RAW,
                input.width.unwrap_or(0),
                input.height.unwrap_or(0),
            ),
            CodecRole::AudioDecoder => MediaFormat::audio(
                MIME_AUDIO_RAW,
                input.sample_rate.unwrap_or(0),
                self.behavior
                    .output_channels
                    .or(input.channel_count)
                    .unwrap_or(0),
            ),
        };
        Ok(format)
    }

    fn hand_out(&mut self, output: ReadyOutput) -> CodecOutput {
        let index = self.next_output_index;
        self.next_output_index += 1;
        let info = output.info;
        self.held.insert(index, output);
        CodecOutput::Buffer { index, info }
    }
}

/// `magic`, two header words and a checksum of the payload.
pub fn encode_packet(magic: &[u8; 1], a: u32, b: u32, payload: &[u8]) -> Vec<u8> {
    let checksum = payload
        .iter()
        .fold(0u32, |acc, &byte| acc.wrapping_mul(31).wrapping_add(byte as u32));
    let mut packet = Vec::with_capacity(13);
    packet.extend_from_slice(magic);
    packet.extend_from_slice(&a.to_le_bytes());
    packet.extend_from_slice(&b.to_le_bytes());
    packet.extend_from_slice(&checksum.to_le_bytes());
    packet
}

impl MediaCodec for LoopbackCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &MediaFormat, surface: Option<FrameSurface>) -> ComposeResult<()> {
        if self.behavior.fail_configure {
            return Err(self.error(format!("rejected format {}", format.mime)));
        }
        if self.role.is_encoder() && format.bit_rate == Some(0) {
            return Err(self.error("bitrate must be positive"));
        }
        if self.role == CodecRole::VideoDecoder && surface.is_none() {
            return Err(self.error("video decoder needs an output surface"));
        }
        self.input_format = Some(format.clone());
        self.output_surface = surface;
        Ok(())
    }

    fn create_input_surface(&mut self) -> ComposeResult<FrameSurface> {
        if self.role != CodecRole::VideoEncoder || self.input_format.is_none() {
            return Err(self.error("input surface requires a configured video encoder"));
        }
        let surface = FrameSurface::new();
        self.input_surface = Some(surface.clone());
        Ok(surface)
    }

    fn start(&mut self) -> ComposeResult<()> {
        self.configured()?;
        self.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self) -> ComposeResult<Option<InputSlot>> {
        self.ensure_running()?;
        if self.input_surface.is_some() {
            return Err(self.error("input is fed through the input surface"));
        }
        if self.input_eos || self.inputs.len() + self.dequeued_inputs.len() >= self.behavior.input_slots {
            return Ok(None);
        }
        let index = self.next_input_index;
        self.next_input_index += 1;
        self.dequeued_inputs.push(index);
        Ok(Some(InputSlot {
            index,
            capacity: self.input_capacity(),
        }))
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> ComposeResult<()> {
        self.ensure_running()?;
        let position = self
            .dequeued_inputs
            .iter()
            .position(|&i| i == index)
            .ok_or_else(|| self.error(format!("input buffer {index} was not dequeued")))?;
        self.dequeued_inputs.swap_remove(position);
        if data.len() > self.input_capacity() {
            return Err(self.error(format!("{} bytes overflow input buffer {index}", data.len())));
        }
        if flags.is_end_of_stream() {
            self.input_eos = true;
        }
        if !data.is_empty() {
            self.last_presentation_time_us = presentation_time_us;
            self.inputs.push_back(PendingInput {
                payload: Payload::Bytes(data.to_vec()),
                presentation_time_us,
            });
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> ComposeResult<()> {
        self.ensure_running()?;
        if self.input_surface.is_none() {
            return Err(self.error("end of input signalled without an input surface"));
        }
        self.pull_input_surface();
        self.input_eos = true;
        Ok(())
    }

    fn dequeue_output_buffer(&mut self) -> ComposeResult<CodecOutput> {
        self.ensure_running()?;
        if self.output_eos {
            return Ok(CodecOutput::TryAgainLater);
        }
        if !self.input_eos {
            self.pull_input_surface();
        }

        while self.inputs.len() > self.behavior.latency
            || (self.input_eos && !self.inputs.is_empty())
        {
            let Some(input) = self.inputs.pop_front() else {
                break;
            };
            self.last_presentation_time_us =
                self.last_presentation_time_us.max(input.presentation_time_us);
            let output = self.process(input)?;
            self.outputs.push_back(output);
        }

        let has_output = !self.outputs.is_empty() || self.input_eos;
        if !has_output {
            return Ok(CodecOutput::TryAgainLater);
        }

        if self.format_announcements == 0 {
            self.format_announcements = 1;
            return Ok(CodecOutput::FormatChanged);
        }
        if self.behavior.emit_buffers_changed && !self.buffers_changed_sent {
            self.buffers_changed_sent = true;
            return Ok(CodecOutput::BuffersChanged);
        }
        if self.behavior.format_change_twice
            && self.format_announcements == 1
            && self.media_buffers_sent > 0
        {
            self.format_announcements = 2;
            return Ok(CodecOutput::FormatChanged);
        }
        if self.role.is_encoder() && self.behavior.emit_codec_config && !self.codec_config_sent {
            self.codec_config_sent = true;
            let data = vec![0, 0, 0, 1];
            return Ok(self.hand_out(ReadyOutput {
                info: BufferInfo::new(data.len(), 0, SampleFlags::CODEC_CONFIG),
                data,
                frame: None,
            }));
        }

        if let Some(output) = self.outputs.pop_front() {
            self.media_buffers_sent += 1;
            return Ok(self.hand_out(output));
        }

        self.output_eos = true;
        Ok(self.hand_out(ReadyOutput {
            data: Vec::new(),
            frame: None,
            info: BufferInfo::end_of_stream(self.last_presentation_time_us),
        }))
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.held.get(&index).map(|output| output.data.as_slice())
    }

    fn output_format(&self) -> ComposeResult<MediaFormat> {
        if self.format_announcements == 0 {
            return Err(self.error("output format requested before it was announced"));
        }
        self.announced_format()
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> ComposeResult<()> {
        let output = self
            .held
            .remove(&index)
            .ok_or_else(|| self.error(format!("output buffer {index} is not held")))?;
        if render {
            let (Some(surface), Some(frame)) = (self.output_surface.as_ref(), output.frame) else {
                return Err(self.error(format!("output buffer {index} has nothing to render")));
            };
            surface.push(TimedFrame {
                frame,
                presentation_time_us: output.info.presentation_time_us,
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> ComposeResult<()> {
        if !self.started {
            return Err(self.error("codec not started"));
        }
        self.started = false;
        Ok(())
    }

    fn release(&mut self) -> ComposeResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.started = false;
        self.held.clear();
        self.inputs.clear();
        self.ledger.record(self.role.label());
        if self.behavior.fail_release {
            return Err(self.error("release failed"));
        }
        Ok(())
    }
}
