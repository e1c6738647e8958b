//! Generated source media and the demuxer/probe reading it.

use recompose_common::{ComposeError, ComposeResult, MICROS_PER_SECOND};
use recompose_media_model::{
    MediaFormat, Resolution, Rotation, Sample, SampleFlags, SourceMetadata, TrackType,
    MIME_AUDIO_AAC, MIME_VIDEO_AVC,
};
use serde::{Deserialize, Serialize};

use crate::backend::{Demuxer, MetadataProbe};

use super::ReleaseLedger;

/// Size of one compressed synthetic video sample.
pub const VIDEO_PAYLOAD_LEN: usize = 14;
const VIDEO_MAGIC: &[u8; 2] = b"SV";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticVideo {
    pub resolution: Resolution,
    pub frame_interval_us: i64,
    pub frame_count: u32,
    pub rotation: Rotation,
    /// Frames between sync samples.
    pub sync_interval: u32,
    pub color: [u8; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticAudio {
    pub sample_rate: u32,
    pub channels: u32,
    pub frames_per_packet: u32,
    pub packet_count: u32,
}

impl SyntheticAudio {
    fn packet_duration_us(&self) -> i64 {
        self.frames_per_packet as i64 * MICROS_PER_SECOND / self.sample_rate as i64
    }

    fn packet_bytes(&self) -> usize {
        (self.frames_per_packet * self.channels * 2) as usize
    }
}

/// Description of a generated source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSource {
    pub video: Option<SyntheticVideo>,
    pub audio: Option<SyntheticAudio>,
    /// Put the audio track at index 0.
    pub audio_first: bool,
    /// Duration reported by the probe. `None` derives it from the tracks,
    /// `Some(0)` reports an unknown duration.
    pub declared_duration_us: Option<i64>,
}

impl SyntheticSource {
    /// `frame_count` frames, `frame_interval_us` apart, starting at 0.
    pub fn video(width: u32, height: u32, frame_interval_us: i64, frame_count: u32) -> Self {
        Self {
            video: Some(SyntheticVideo {
                resolution: Resolution::new(width, height),
                frame_interval_us,
                frame_count,
                rotation: Rotation::Normal,
                sync_interval: 15,
                color: [200, 40, 40, 255],
            }),
            audio: None,
            audio_first: false,
            declared_duration_us: None,
        }
    }

    pub fn with_audio(mut self, sample_rate: u32, channels: u32, frames_per_packet: u32, packet_count: u32) -> Self {
        self.audio = Some(SyntheticAudio {
            sample_rate,
            channels,
            frames_per_packet,
            packet_count,
        });
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        if let Some(video) = self.video.as_mut() {
            video.rotation = rotation;
        }
        self
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        if let Some(video) = self.video.as_mut() {
            video.color = color;
        }
        self
    }

    pub fn audio_first(mut self) -> Self {
        self.audio_first = true;
        self
    }

    pub fn with_declared_duration(mut self, duration_us: i64) -> Self {
        self.declared_duration_us = Some(duration_us);
        self
    }

    fn track_index(&self, track: TrackType) -> Option<usize> {
        let has_video = self.video.is_some();
        let has_audio = self.audio.is_some();
        match (track, self.audio_first) {
            (TrackType::Video, false) if has_video => Some(0),
            (TrackType::Video, true) if has_video => Some(usize::from(has_audio)),
            (TrackType::Audio, true) if has_audio => Some(0),
            (TrackType::Audio, false) if has_audio => Some(usize::from(has_video)),
            _ => None,
        }
    }

    pub fn track_count(&self) -> usize {
        usize::from(self.video.is_some()) + usize::from(self.audio.is_some())
    }

    /// Presentation time of the last video frame, or the end of the last
    /// audio packet, whichever is later.
    pub fn content_duration_us(&self) -> i64 {
        let video = self
            .video
            .as_ref()
            .map(|v| v.frame_interval_us * (v.frame_count.saturating_sub(1)) as i64)
            .unwrap_or(0);
        let audio = self
            .audio
            .as_ref()
            .map(|a| a.packet_duration_us() * a.packet_count as i64)
            .unwrap_or(0);
        video.max(audio)
    }

    pub fn metadata(&self) -> SourceMetadata {
        let (resolution, rotation) = self
            .video
            .as_ref()
            .map(|v| (v.resolution, v.rotation))
            .unwrap_or((Resolution::new(0, 0), Rotation::Normal));
        let duration_us = match self.declared_duration_us {
            None => Some(self.content_duration_us()),
            Some(d) if d > 0 => Some(d),
            Some(_) => None,
        };
        SourceMetadata {
            resolution,
            rotation,
            duration_us,
            has_audio: self.audio.is_some(),
            video_codec: self.video.as_ref().map(|_| MIME_VIDEO_AVC.to_string()),
            audio_codec: self.audio.as_ref().map(|_| MIME_AUDIO_AAC.to_string()),
        }
    }

    pub fn track_format(&self, index: usize) -> Option<MediaFormat> {
        if self.track_index(TrackType::Video) == Some(index) {
            let video = self.video.as_ref()?;
            let mut format =
                MediaFormat::video(MIME_VIDEO_AVC, video.resolution.width, video.resolution.height)
                    .with_duration(self.content_duration_us());
            if video.frame_interval_us > 0 {
                format.frame_rate = Some((MICROS_PER_SECOND / video.frame_interval_us) as u32);
            }
            format.rotation_degrees = Some(video.rotation.degrees());
            format.max_input_size = Some(VIDEO_PAYLOAD_LEN);
            return Some(format);
        }
        if self.track_index(TrackType::Audio) == Some(index) {
            let audio = self.audio.as_ref()?;
            let mut format = MediaFormat::audio(MIME_AUDIO_AAC, audio.sample_rate, audio.channels)
                .with_duration(self.content_duration_us());
            format.max_input_size = Some(audio.packet_bytes());
            format.codec_specific_data = vec![vec![0x12, 0x10]];
            return Some(format);
        }
        None
    }

    /// Every sample of every track, ordered by presentation time.
    pub fn samples(&self) -> Vec<Sample> {
        let mut samples = Vec::new();
        if let (Some(video), Some(index)) = (&self.video, self.track_index(TrackType::Video)) {
            for frame in 0..video.frame_count {
                let flags = if video.sync_interval == 0 || frame % video.sync_interval == 0 {
                    SampleFlags::SYNC
                } else {
                    SampleFlags::empty()
                };
                samples.push(Sample {
                    track_index: index,
                    data: encode_video_payload(video.resolution, video.color),
                    presentation_time_us: frame as i64 * video.frame_interval_us,
                    flags,
                });
            }
        }
        if let (Some(audio), Some(index)) = (&self.audio, self.track_index(TrackType::Audio)) {
            let samples_per_packet = (audio.frames_per_packet * audio.channels) as usize;
            for packet in 0..audio.packet_count {
                let data: Vec<u8> = (0..samples_per_packet)
                    .flat_map(|i| (((packet as usize * 31 + i) % 2048) as i16 - 1024).to_le_bytes())
                    .collect();
                samples.push(Sample {
                    track_index: index,
                    data,
                    presentation_time_us: packet as i64 * audio.packet_duration_us(),
                    flags: SampleFlags::SYNC,
                });
            }
        }
        samples.sort_by_key(|s| (s.presentation_time_us, s.track_index));
        samples
    }
}

pub fn encode_video_payload(resolution: Resolution, color: [u8; 4]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(VIDEO_PAYLOAD_LEN);
    payload.extend_from_slice(VIDEO_MAGIC);
    payload.extend_from_slice(&resolution.width.to_le_bytes());
    payload.extend_from_slice(&resolution.height.to_le_bytes());
    payload.extend_from_slice(&color);
    payload
}

pub fn decode_video_payload(payload: &[u8]) -> Option<(Resolution, [u8; 4])> {
    if payload.len() != VIDEO_PAYLOAD_LEN || &payload[..2] != VIDEO_MAGIC {
        return None;
    }
    let width = u32::from_le_bytes(payload[2..6].try_into().ok()?);
    let height = u32::from_le_bytes(payload[6..10].try_into().ok()?);
    let color = payload[10..14].try_into().ok()?;
    Some((Resolution::new(width, height), color))
}

pub struct SyntheticDemuxer {
    source: SyntheticSource,
    samples: Vec<Sample>,
    selected: Vec<usize>,
    position: usize,
    ledger: ReleaseLedger,
    fail_release: bool,
}

impl SyntheticDemuxer {
    pub fn new(source: SyntheticSource, ledger: ReleaseLedger, fail_release: bool) -> Self {
        let samples = source.samples();
        Self {
            source,
            samples,
            selected: Vec::new(),
            position: 0,
            ledger,
            fail_release,
        }
    }

    fn skip_unselected(&mut self) {
        while self
            .samples
            .get(self.position)
            .is_some_and(|s| !self.selected.contains(&s.track_index))
        {
            self.position += 1;
        }
    }

    fn current(&self) -> Option<&Sample> {
        self.samples.get(self.position)
    }
}

impl Demuxer for SyntheticDemuxer {
    fn track_count(&self) -> usize {
        self.source.track_count()
    }

    fn track_format(&self, index: usize) -> ComposeResult<MediaFormat> {
        self.source
            .track_format(index)
            .ok_or_else(|| ComposeError::unsupported_source(format!("no track {index}")))
    }

    fn select_track(&mut self, index: usize) -> ComposeResult<()> {
        if index >= self.track_count() {
            return Err(ComposeError::unsupported_source(format!("no track {index}")));
        }
        if !self.selected.contains(&index) {
            self.selected.push(index);
        }
        self.position = 0;
        self.skip_unselected();
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64) -> ComposeResult<()> {
        // Start at the last sync frame at or before `time_us`.
        let sync_time = self
            .samples
            .iter()
            .filter(|s| {
                self.selected.contains(&s.track_index)
                    && s.flags.is_sync()
                    && s.presentation_time_us <= time_us
            })
            .map(|s| s.presentation_time_us)
            .min_by_key(|&t| time_us - t)
            .unwrap_or(0);
        self.position = self
            .samples
            .iter()
            .position(|s| s.presentation_time_us >= sync_time)
            .unwrap_or(self.samples.len());
        self.skip_unselected();
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|s| s.track_index)
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.current().map(|s| s.presentation_time_us)
    }

    fn sample_flags(&self) -> SampleFlags {
        self.current().map(|s| s.flags).unwrap_or_default()
    }

    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> ComposeResult<usize> {
        let sample = self
            .current()
            .ok_or_else(|| ComposeError::codec("synthetic-demuxer", "read past end of stream"))?;
        buf.clear();
        buf.extend_from_slice(&sample.data);
        Ok(buf.len())
    }

    fn advance(&mut self) -> bool {
        if self.position < self.samples.len() {
            self.position += 1;
        }
        self.skip_unselected();
        self.position < self.samples.len()
    }

    fn release(&mut self) -> ComposeResult<()> {
        self.ledger.record("demuxer");
        if self.fail_release {
            return Err(ComposeError::codec("synthetic-demuxer", "release failed"));
        }
        Ok(())
    }
}

pub struct SyntheticProbe {
    source: SyntheticSource,
    unsupported: bool,
    ledger: ReleaseLedger,
}

impl SyntheticProbe {
    pub fn new(source: SyntheticSource, unsupported: bool, ledger: ReleaseLedger) -> Self {
        Self {
            source,
            unsupported,
            ledger,
        }
    }
}

impl MetadataProbe for SyntheticProbe {
    fn probe(&mut self) -> ComposeResult<SourceMetadata> {
        if self.unsupported || self.source.video.is_none() {
            return Err(ComposeError::unsupported_source("source has no decodable video track"));
        }
        Ok(self.source.metadata())
    }

    fn release(&mut self) -> ComposeResult<()> {
        self.ledger.record("probe");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_interleave_by_time() {
        let source = SyntheticSource::video(16, 16, 40_000, 3).with_audio(1_000, 1, 20, 4);
        let order: Vec<(usize, i64)> = source
            .samples()
            .iter()
            .map(|s| (s.track_index, s.presentation_time_us))
            .collect();
        assert_eq!(
            order,
            vec![(0, 0), (1, 0), (1, 20_000), (0, 40_000), (1, 40_000), (1, 60_000), (0, 80_000)]
        );
    }

    #[test]
    fn test_content_duration() {
        let source = SyntheticSource::video(16, 16, 40_000, 51);
        assert_eq!(source.content_duration_us(), 2_000_000);
        assert_eq!(source.metadata().duration_us, Some(2_000_000));
        assert_eq!(
            source.with_declared_duration(0).metadata().duration_us,
            None
        );
    }

    #[test]
    fn test_audio_first_swaps_indices() {
        let source = SyntheticSource::video(16, 16, 40_000, 1)
            .with_audio(1_000, 2, 10, 1)
            .audio_first();
        assert_eq!(source.track_format(0).unwrap().mime, MIME_AUDIO_AAC);
        assert_eq!(source.track_format(1).unwrap().mime, MIME_VIDEO_AVC);
    }

    #[test]
    fn test_demuxer_skips_unselected_tracks() {
        let source = SyntheticSource::video(16, 16, 40_000, 2).with_audio(1_000, 1, 20, 4);
        let mut demuxer = SyntheticDemuxer::new(source, ReleaseLedger::default(), false);
        demuxer.select_track(1).unwrap();
        let mut times = Vec::new();
        while let Some(t) = demuxer.sample_time_us() {
            assert_eq!(demuxer.sample_track_index(), Some(1));
            times.push(t);
            demuxer.advance();
        }
        assert_eq!(times, vec![0, 20_000, 40_000, 60_000]);
    }

    #[test]
    fn test_seek_lands_on_sync_frame() {
        let source = SyntheticSource::video(16, 16, 10_000, 40);
        let mut demuxer = SyntheticDemuxer::new(source, ReleaseLedger::default(), false);
        demuxer.select_track(0).unwrap();
        demuxer.seek_to(200_000).unwrap();
        // Sync frames every 15 frames: 0, 150 ms, 300 ms.
        assert_eq!(demuxer.sample_time_us(), Some(150_000));
        assert!(demuxer.sample_flags().is_sync());
    }

    #[test]
    fn test_video_payload_decodes() {
        let payload = encode_video_payload(Resolution::new(8, 6), [1, 2, 3, 4]);
        assert_eq!(
            decode_video_payload(&payload),
            Some((Resolution::new(8, 6), [1, 2, 3, 4]))
        );
        assert_eq!(decode_video_payload(&payload[1..]), None);
    }
}
