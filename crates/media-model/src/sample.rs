//! Compressed samples and buffer metadata.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-buffer flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SampleFlags: u32 {
        /// Sync sample (key frame).
        const SYNC = 1;
        /// Codec initialization data rather than media.
        const CODEC_CONFIG = 1 << 1;
        /// Last buffer of the stream.
        const END_OF_STREAM = 1 << 2;
    }
}

impl SampleFlags {
    pub fn is_sync(self) -> bool {
        self.contains(Self::SYNC)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

/// Metadata describing the valid region of a codec or muxer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl BufferInfo {
    pub fn new(size: usize, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            offset: 0,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Empty end-of-stream marker.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, presentation_time_us, SampleFlags::END_OF_STREAM)
    }

    /// Byte range of the payload inside its backing buffer.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// One compressed sample read from a demuxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub track_index: usize,
    pub data: Vec<u8>,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl Sample {
    pub fn info(&self) -> BufferInfo {
        BufferInfo::new(self.data.len(), self.presentation_time_us, self.flags)
    }
}
