//! Collaborator contracts: demuxer, metadata probe, codecs, muxer, renderer.
//!
//! Codecs follow an asynchronous buffer-queue model. Every call is
//! non-blocking: "nothing available" is reported as a value, never by
//! waiting. Frames travel between the decoder, the renderer and the encoder
//! through [`FrameSurface`] queues.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use recompose_common::ComposeResult;
use recompose_media_model::{
    BufferInfo, ColorFormat, MediaFormat, Resolution, SampleFlags, SourceMetadata,
};

use crate::transform::PlaneTransform;

/// Pixel layout of a [`VideoFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Nv12,
    I420,
}

impl PixelFormat {
    /// Bytes needed for a frame of the given size.
    pub fn frame_size(self, resolution: Resolution) -> usize {
        let pixels = resolution.pixel_count() as usize;
        match self {
            Self::Rgba => pixels * 4,
            Self::Nv12 | Self::I420 => pixels * 3 / 2,
        }
    }
}

/// One uncompressed picture.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// RGBA pixel at `(x, y)`, if this is an RGBA frame and in bounds.
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.format != PixelFormat::Rgba || x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A frame queued on a surface together with its presentation time.
#[derive(Debug, Clone)]
pub struct TimedFrame {
    pub frame: VideoFrame,
    pub presentation_time_us: i64,
}

/// Shared frame queue connecting a producer (decoder, renderer) with a
/// consumer (renderer, encoder).
#[derive(Debug, Clone, Default)]
pub struct FrameSurface {
    queue: Arc<Mutex<VecDeque<TimedFrame>>>,
}

impl FrameSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TimedFrame>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, frame: TimedFrame) {
        self.lock().push_back(frame);
    }

    pub fn pop(&self) -> Option<TimedFrame> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Input buffer handed out by [`MediaCodec::dequeue_input_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    pub index: usize,
    pub capacity: usize,
}

/// Result of one non-blocking output poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOutput {
    /// Nothing ready yet.
    TryAgainLater,
    /// [`MediaCodec::output_format`] has a new value.
    FormatChanged,
    /// Output buffers were reallocated; previously seen indices are stale.
    BuffersChanged,
    /// An output buffer is ready and owned by the caller until released.
    Buffer { index: usize, info: BufferInfo },
}

/// A decoder or encoder.
pub trait MediaCodec: Send {
    fn name(&self) -> &str;

    /// Configure for `format`. A decoder given `output_surface` renders
    /// released buffers into it instead of exposing pixels.
    fn configure(
        &mut self,
        format: &MediaFormat,
        output_surface: Option<FrameSurface>,
    ) -> ComposeResult<()>;

    /// Surface an encoder reads its input frames from. Valid between
    /// `configure` and `start`.
    fn create_input_surface(&mut self) -> ComposeResult<FrameSurface>;

    fn start(&mut self) -> ComposeResult<()>;

    fn dequeue_input_buffer(&mut self) -> ComposeResult<Option<InputSlot>>;

    fn queue_input_buffer(
        &mut self,
        index: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> ComposeResult<()>;

    /// End of input for surface-fed encoders.
    fn signal_end_of_input_stream(&mut self) -> ComposeResult<()>;

    fn dequeue_output_buffer(&mut self) -> ComposeResult<CodecOutput>;

    /// Payload of a dequeued output buffer.
    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    fn output_format(&self) -> ComposeResult<MediaFormat>;

    /// Return an output buffer. `render` sends a decoded frame to the
    /// configured output surface.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> ComposeResult<()>;

    fn stop(&mut self) -> ComposeResult<()>;

    fn release(&mut self) -> ComposeResult<()>;
}

/// Reads interleaved compressed samples from a container.
pub trait Demuxer: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> ComposeResult<MediaFormat>;

    fn select_track(&mut self, index: usize) -> ComposeResult<()>;

    /// Position at the last sync sample at or before `time_us`.
    fn seek_to(&mut self, time_us: i64) -> ComposeResult<()>;

    /// Track of the current sample; `None` once every selected track is
    /// exhausted.
    fn sample_track_index(&self) -> Option<usize>;

    fn sample_time_us(&self) -> Option<i64>;

    fn sample_flags(&self) -> SampleFlags;

    /// Copy the current sample into `buf`, returning its size.
    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> ComposeResult<usize>;

    /// Move to the next sample. Returns `false` when nothing is left.
    fn advance(&mut self) -> bool;

    fn release(&mut self) -> ComposeResult<()>;
}

/// Reports source metadata without allocating codecs.
pub trait MetadataProbe: Send {
    fn probe(&mut self) -> ComposeResult<SourceMetadata>;

    fn release(&mut self) -> ComposeResult<()>;
}

/// Container writer.
pub trait ContainerMuxer: Send {
    fn add_track(&mut self, format: &MediaFormat) -> ComposeResult<usize>;

    fn start(&mut self) -> ComposeResult<()>;

    fn write_sample_data(
        &mut self,
        track_index: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> ComposeResult<()>;

    fn stop(&mut self) -> ComposeResult<()>;

    fn release(&mut self) -> ComposeResult<()>;
}

/// Draws a decoded frame into an output-sized frame using a placement
/// matrix in normalized device coordinates.
pub trait FrameRenderer: Send {
    fn name(&self) -> &str;

    fn render(
        &mut self,
        source: &VideoFrame,
        placement: &PlaneTransform,
        output: Resolution,
        clear_color: [u8; 4],
    ) -> ComposeResult<VideoFrame>;

    fn release(&mut self) -> ComposeResult<()> {
        Ok(())
    }
}

/// Per-frame effect applied after placement.
pub trait FrameFilter: Send {
    fn name(&self) -> &str;

    /// Colour of pixels not covered by the placed frame.
    fn clear_color(&self) -> [u8; 4] {
        [0, 0, 0, 255]
    }

    fn setup(&mut self, _output: Resolution) -> ComposeResult<()> {
        Ok(())
    }

    fn apply(&mut self, frame: VideoFrame, presentation_time_us: i64)
        -> ComposeResult<VideoFrame>;

    fn release(&mut self) {}
}

/// Filter that leaves frames untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl FrameFilter for IdentityFilter {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&mut self, frame: VideoFrame, _presentation_time_us: i64) -> ComposeResult<VideoFrame> {
        Ok(frame)
    }
}

/// Factory for every platform collaborator a run needs.
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Check if this backend can run on the current system.
    fn is_available(&self) -> bool;

    fn open_probe(&self, source: &Path) -> ComposeResult<Box<dyn MetadataProbe>>;

    fn open_demuxer(&self, source: &Path) -> ComposeResult<Box<dyn Demuxer>>;

    fn supports_encoder(&self, mime: &str) -> bool;

    fn create_decoder(&self, mime: &str) -> ComposeResult<Box<dyn MediaCodec>>;

    fn create_encoder(&self, mime: &str) -> ComposeResult<Box<dyn MediaCodec>>;

    /// Buffer layout the encoder for `mime` takes when fed raw frames
    /// instead of an input surface.
    fn encoder_color_format(&self, _mime: &str) -> ColorFormat {
        ColorFormat::Yuv420SemiPlanar
    }

    fn create_muxer(&self, destination: &Path) -> ComposeResult<Box<dyn ContainerMuxer>>;

    fn create_renderer(&self) -> ComposeResult<Box<dyn FrameRenderer>>;
}
