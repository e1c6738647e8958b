//! Single mux sink shared by all composers.
//!
//! The container can only start once every expected track has a format.
//! Samples written before that are copied into a queue and flushed in
//! arrival order when the last format arrives.

use std::collections::VecDeque;

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::{BufferInfo, MediaFormat, TrackType};
use serde::Serialize;

use crate::backend::ContainerMuxer;

#[derive(Debug)]
struct PendingSample {
    track: TrackType,
    data: Vec<u8>,
    info: BufferInfo,
}

#[derive(Debug)]
struct TrackSlot {
    track: TrackType,
    format: Option<MediaFormat>,
    container_index: Option<usize>,
}

/// Per-track counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackStats {
    pub samples: u64,
    pub bytes: u64,
    pub last_presentation_time_us: i64,
}

/// Mux totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MuxStats {
    pub video: TrackStats,
    pub audio: TrackStats,
    /// Samples that waited for a format before the container started.
    pub buffered_before_start: u64,
}

pub struct MuxRender {
    muxer: Option<Box<dyn ContainerMuxer>>,
    tracks: Vec<TrackSlot>,
    pending: VecDeque<PendingSample>,
    started: bool,
    stopped: bool,
    stats: MuxStats,
}

impl MuxRender {
    /// `expected` lists the tracks that must have a format before the
    /// container starts. Tracks are added to the container in this order.
    pub fn new(muxer: Box<dyn ContainerMuxer>, expected: &[TrackType]) -> Self {
        let mut tracks: Vec<TrackSlot> = Vec::new();
        for &track in expected {
            if !tracks.iter().any(|slot| slot.track == track) {
                tracks.push(TrackSlot {
                    track,
                    format: None,
                    container_index: None,
                });
            }
        }
        Self {
            muxer: Some(muxer),
            tracks,
            pending: VecDeque::new(),
            started: false,
            stopped: false,
            stats: MuxStats::default(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> MuxStats {
        self.stats
    }

    fn slot_mut(&mut self, track: TrackType) -> ComposeResult<&mut TrackSlot> {
        self.tracks
            .iter_mut()
            .find(|slot| slot.track == track)
            .ok_or_else(|| {
                ComposeError::muxer_protocol(format!("{track} is not an expected track"))
            })
    }

    fn container(&mut self) -> ComposeResult<&mut Box<dyn ContainerMuxer>> {
        self.muxer
            .as_mut()
            .ok_or_else(|| ComposeError::muxer_protocol("muxer already released"))
    }

    /// Record the final format of `track`. Allowed once per track.
    pub fn set_output_format(&mut self, track: TrackType, format: MediaFormat) -> ComposeResult<()> {
        let slot = self.slot_mut(track)?;
        if slot.format.is_some() {
            return Err(ComposeError::muxer_protocol(format!(
                "output format for {track} already set"
            )));
        }
        tracing::debug!(track = %track, mime = %format.mime, "Track format set");
        slot.format = Some(format);
        self.start_if_ready()
    }

    fn start_if_ready(&mut self) -> ComposeResult<()> {
        if self.started || self.tracks.iter().any(|slot| slot.format.is_none()) {
            return Ok(());
        }

        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| ComposeError::muxer_protocol("muxer already released"))?;
        for slot in &mut self.tracks {
            if let Some(format) = &slot.format {
                let index = muxer.add_track(format)?;
                tracing::debug!(track = %slot.track, index, "Added container track");
                slot.container_index = Some(index);
            }
        }
        muxer.start()?;
        self.started = true;

        tracing::info!(
            tracks = self.tracks.len(),
            buffered = self.pending.len(),
            "Muxer started, flushing buffered samples"
        );
        while let Some(sample) = self.pending.pop_front() {
            self.write_to_container(sample.track, &sample.data, &sample.info)?;
        }
        Ok(())
    }

    /// Write one sample, or queue it until every track has a format.
    /// `data` is the payload itself; `info.offset` is ignored.
    pub fn write_sample_data(
        &mut self,
        track: TrackType,
        data: &[u8],
        info: &BufferInfo,
    ) -> ComposeResult<()> {
        if self.stopped {
            return Err(ComposeError::muxer_protocol(format!(
                "{track} sample written after the muxer stopped"
            )));
        }
        self.slot_mut(track)?;
        let info = BufferInfo {
            offset: 0,
            size: info.size.min(data.len()),
            ..*info
        };
        let data = &data[..info.size];

        if self.started {
            return self.write_to_container(track, data, &info);
        }

        self.stats.buffered_before_start += 1;
        self.pending.push_back(PendingSample {
            track,
            data: data.to_vec(),
            info,
        });
        Ok(())
    }

    fn write_to_container(
        &mut self,
        track: TrackType,
        data: &[u8],
        info: &BufferInfo,
    ) -> ComposeResult<()> {
        // Empty end-of-stream markers carry no media.
        if info.size == 0 {
            return Ok(());
        }
        let index = self.slot_mut(track)?.container_index.ok_or_else(|| {
            ComposeError::muxer_protocol(format!("sample for {track} has no resolved format"))
        })?;
        self.container()?.write_sample_data(index, data, info)?;

        let stats = match track {
            TrackType::Video => &mut self.stats.video,
            TrackType::Audio => &mut self.stats.audio,
        };
        stats.samples += 1;
        stats.bytes += info.size as u64;
        stats.last_presentation_time_us = info.presentation_time_us;
        Ok(())
    }

    /// Finalize the container. Only meaningful once started.
    pub fn stop(&mut self) -> ComposeResult<()> {
        if !self.started || self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if !self.pending.is_empty() {
            tracing::warn!(dropped = self.pending.len(), "Stopping with unflushed samples");
        }
        self.container()?.stop()
    }

    pub fn release(&mut self) -> ComposeResult<()> {
        match self.muxer.take() {
            Some(mut muxer) => muxer.release(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{MuxerLog, RecordingMuxer};
    use recompose_media_model::{SampleFlags, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
    use std::sync::{Arc, Mutex};

    fn mux(expected: &[TrackType]) -> (MuxRender, Arc<Mutex<MuxerLog>>) {
        let muxer = RecordingMuxer::new();
        let log = muxer.log();
        (MuxRender::new(Box::new(muxer), expected), log)
    }

    fn info(pts: i64) -> BufferInfo {
        BufferInfo::new(3, pts, SampleFlags::empty())
    }

    #[test]
    fn test_set_output_format_twice_fails() {
        let (mut mux, _) = mux(&[TrackType::Video]);
        mux.set_output_format(TrackType::Video, MediaFormat::video(MIME_VIDEO_AVC, 16, 16))
            .unwrap();
        let err = mux
            .set_output_format(TrackType::Video, MediaFormat::video(MIME_VIDEO_AVC, 16, 16))
            .unwrap_err();
        assert!(matches!(err, ComposeError::MuxerProtocol { .. }));
    }

    #[test]
    fn test_buffered_samples_flush_in_order() {
        let (mut mux, log) = mux(&[TrackType::Video, TrackType::Audio]);
        mux.write_sample_data(TrackType::Audio, &[1, 2, 3], &info(0))
            .unwrap();
        mux.set_output_format(TrackType::Video, MediaFormat::video(MIME_VIDEO_AVC, 16, 16))
            .unwrap();
        mux.write_sample_data(TrackType::Video, &[4, 5, 6], &info(0))
            .unwrap();
        mux.write_sample_data(TrackType::Audio, &[7, 8, 9], &info(23_219))
            .unwrap();
        assert!(!mux.is_started());
        assert_eq!(mux.pending_samples(), 3);

        mux.set_output_format(TrackType::Audio, MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2))
            .unwrap();
        assert!(mux.is_started());
        assert_eq!(mux.pending_samples(), 0);

        let log = log.lock().unwrap();
        assert_eq!(log.tracks.len(), 2);
        let order: Vec<(usize, i64)> = log
            .samples
            .iter()
            .map(|s| (s.track_index, s.presentation_time_us))
            .collect();
        assert_eq!(order, vec![(1, 0), (0, 0), (1, 23_219)]);
        assert_eq!(log.samples[1].data, vec![4, 5, 6]);
    }

    #[test]
    fn test_unexpected_track_rejected() {
        let (mut mux, _) = mux(&[TrackType::Video]);
        let err = mux
            .write_sample_data(TrackType::Audio, &[1, 2, 3], &info(0))
            .unwrap_err();
        assert!(matches!(err, ComposeError::MuxerProtocol { .. }));
    }

    #[test]
    fn test_empty_eos_marker_not_written() {
        let (mut mux, log) = mux(&[TrackType::Video]);
        mux.set_output_format(TrackType::Video, MediaFormat::video(MIME_VIDEO_AVC, 16, 16))
            .unwrap();
        mux.write_sample_data(TrackType::Video, &[], &BufferInfo::end_of_stream(0))
            .unwrap();
        assert!(log.lock().unwrap().samples.is_empty());
    }

    #[test]
    fn test_write_after_stop_fails() {
        let (mut mux, log) = mux(&[TrackType::Video]);
        mux.set_output_format(TrackType::Video, MediaFormat::video(MIME_VIDEO_AVC, 16, 16))
            .unwrap();
        mux.stop().unwrap();
        assert!(log.lock().unwrap().stopped);
        assert!(mux
            .write_sample_data(TrackType::Video, &[1, 2, 3], &info(0))
            .is_err());
    }
}
