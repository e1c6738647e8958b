//! Deterministic in-process media backend.
//!
//! Generates sources from a [`SyntheticSource`] description, decodes and
//! encodes through [`LoopbackCodec`]s and records muxed output in a
//! [`RecordingMuxer`]. Faults can be scripted per run through a
//! [`FaultPlan`], and every release is written to a [`ReleaseLedger`] so
//! teardown order can be asserted.

pub mod codec;
pub mod muxer;
pub mod source;

use std::path::Path;
use std::sync::{Arc, Mutex};

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::{ColorFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use serde::{Deserialize, Serialize};

use crate::backend::{
    ContainerMuxer, Demuxer, FrameRenderer, MediaBackend, MediaCodec, MetadataProbe, TimedFrame,
};
use crate::software::SoftwareRenderer;

pub use codec::{CodecBehavior, CodecRole, LoopbackCodec};
pub use muxer::{MuxedSample, MuxerLog, RecordingMuxer};
pub use source::{SyntheticAudio, SyntheticDemuxer, SyntheticProbe, SyntheticSource, SyntheticVideo};

/// Names of released resources, in release order.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLedger(Arc<Mutex<Vec<String>>>);

impl ReleaseLedger {
    pub fn record(&self, resource: &str) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(resource.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Faults injected into the next run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPlan {
    /// The probe reports the source as unsupported.
    pub unsupported_source: bool,
    pub video_encoder: CodecBehavior,
    pub video_decoder: CodecBehavior,
    pub audio_encoder: CodecBehavior,
    pub audio_decoder: CodecBehavior,
    pub demuxer_release_fails: bool,
    pub muxer_release_fails: bool,
    /// Encoder mimes reported as unavailable.
    pub missing_encoders: Vec<String>,
}

impl FaultPlan {
    fn behavior(&self, role: CodecRole) -> CodecBehavior {
        match role {
            CodecRole::VideoDecoder => self.video_decoder.clone(),
            CodecRole::VideoEncoder => self.video_encoder.clone(),
            CodecRole::AudioDecoder => self.audio_decoder.clone(),
            CodecRole::AudioEncoder => self.audio_encoder.clone(),
        }
    }
}

pub struct SyntheticBackend {
    source: SyntheticSource,
    faults: FaultPlan,
    ledger: ReleaseLedger,
    muxer_log: Arc<Mutex<MuxerLog>>,
    frame_tap: Arc<Mutex<Vec<TimedFrame>>>,
    journal: bool,
    encoder_color_format: ColorFormat,
}

impl SyntheticBackend {
    pub fn new(source: SyntheticSource) -> Self {
        Self {
            source,
            faults: FaultPlan::default(),
            ledger: ReleaseLedger::default(),
            muxer_log: Arc::new(Mutex::new(MuxerLog::default())),
            frame_tap: Arc::new(Mutex::new(Vec::new())),
            journal: false,
            encoder_color_format: ColorFormat::Yuv420SemiPlanar,
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Write a JSONL journal of muxed samples at the destination.
    pub fn with_journal(mut self) -> Self {
        self.journal = true;
        self
    }

    /// Raw-frame layout reported for every video encoder.
    pub fn with_encoder_color_format(mut self, color_format: ColorFormat) -> Self {
        self.encoder_color_format = color_format;
        self
    }

    pub fn source(&self) -> &SyntheticSource {
        &self.source
    }

    pub fn ledger(&self) -> ReleaseLedger {
        self.ledger.clone()
    }

    /// Snapshot of what the last muxer recorded.
    pub fn muxer_log(&self) -> MuxerLog {
        self.muxer_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Frames consumed by video encoders through their input surface.
    pub fn encoded_frames(&self) -> Vec<TimedFrame> {
        self.frame_tap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn codec(&self, role: CodecRole, mime: &str) -> Box<dyn MediaCodec> {
        tracing::trace!(role = role.label(), mime, "Creating loopback codec");
        let codec = LoopbackCodec::new(role, self.faults.behavior(role), self.ledger.clone());
        if role == CodecRole::VideoEncoder {
            Box::new(codec.with_frame_tap(Arc::clone(&self.frame_tap)))
        } else {
            Box::new(codec)
        }
    }
}

fn is_video(mime: &str) -> bool {
    mime.starts_with("video/")
}

impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn open_probe(&self, _source: &Path) -> ComposeResult<Box<dyn MetadataProbe>> {
        Ok(Box::new(SyntheticProbe::new(
            self.source.clone(),
            self.faults.unsupported_source,
            self.ledger.clone(),
        )))
    }

    fn open_demuxer(&self, _source: &Path) -> ComposeResult<Box<dyn Demuxer>> {
        Ok(Box::new(SyntheticDemuxer::new(
            self.source.clone(),
            self.ledger.clone(),
            self.faults.demuxer_release_fails,
        )))
    }

    fn supports_encoder(&self, mime: &str) -> bool {
        (mime == MIME_VIDEO_AVC || mime == MIME_AUDIO_AAC)
            && !self.faults.missing_encoders.iter().any(|m| m == mime)
    }

    fn create_decoder(&self, mime: &str) -> ComposeResult<Box<dyn MediaCodec>> {
        let role = if is_video(mime) {
            CodecRole::VideoDecoder
        } else {
            CodecRole::AudioDecoder
        };
        Ok(self.codec(role, mime))
    }

    fn create_encoder(&self, mime: &str) -> ComposeResult<Box<dyn MediaCodec>> {
        if !self.supports_encoder(mime) {
            return Err(ComposeError::unsupported(format!("no synthetic encoder for {mime}")));
        }
        let role = if is_video(mime) {
            CodecRole::VideoEncoder
        } else {
            CodecRole::AudioEncoder
        };
        Ok(self.codec(role, mime))
    }

    fn encoder_color_format(&self, _mime: &str) -> ColorFormat {
        self.encoder_color_format
    }

    fn create_muxer(&self, destination: &Path) -> ComposeResult<Box<dyn ContainerMuxer>> {
        if let Ok(mut log) = self.muxer_log.lock() {
            *log = MuxerLog::default();
        }
        let mut muxer = RecordingMuxer::new()
            .with_log(Arc::clone(&self.muxer_log))
            .with_ledger(self.ledger.clone(), self.faults.muxer_release_fails);
        if self.journal {
            muxer = muxer.with_journal(destination)?;
        }
        Ok(Box::new(muxer))
    }

    fn create_renderer(&self) -> ComposeResult<Box<dyn FrameRenderer>> {
        Ok(Box::new(SoftwareRenderer::new()))
    }
}
