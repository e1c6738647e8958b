//! Container muxer that records what it is given.
//!
//! With a journal path, every track and sample is also appended to a JSONL
//! file (one JSON object per line) so a simulated run leaves an
//! inspectable artifact at the destination.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::{BufferInfo, MediaFormat, SampleFlags};
use serde::{Deserialize, Serialize};

use crate::backend::ContainerMuxer;

use super::ReleaseLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxedSample {
    pub track_index: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
    pub size: usize,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Everything the muxer saw, in call order.
#[derive(Debug, Clone, Default)]
pub struct MuxerLog {
    pub tracks: Vec<MediaFormat>,
    pub samples: Vec<MuxedSample>,
    pub started: bool,
    pub stopped: bool,
    pub released: bool,
}

impl MuxerLog {
    pub fn samples_for(&self, track_index: usize) -> impl Iterator<Item = &MuxedSample> {
        self.samples
            .iter()
            .filter(move |s| s.track_index == track_index)
    }

    /// Container index of the first track with this mime prefix.
    pub fn track_with_prefix(&self, prefix: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.mime.starts_with(prefix))
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JournalEntry<'a> {
    Track { index: usize, format: &'a MediaFormat },
    Sample(&'a MuxedSample),
    Stop { samples: usize },
}

pub struct RecordingMuxer {
    log: Arc<Mutex<MuxerLog>>,
    journal: Option<(PathBuf, BufWriter<File>)>,
    ledger: ReleaseLedger,
    fail_release: bool,
}

impl RecordingMuxer {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(MuxerLog::default())),
            journal: None,
            ledger: ReleaseLedger::default(),
            fail_release: false,
        }
    }

    /// Also append a JSONL journal at `path`.
    pub fn with_journal(mut self, path: &Path) -> ComposeResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        self.journal = Some((path.to_path_buf(), BufWriter::new(file)));
        Ok(self)
    }

    pub(crate) fn with_ledger(mut self, ledger: ReleaseLedger, fail_release: bool) -> Self {
        self.ledger = ledger;
        self.fail_release = fail_release;
        self
    }

    pub(crate) fn with_log(mut self, log: Arc<Mutex<MuxerLog>>) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> Arc<Mutex<MuxerLog>> {
        Arc::clone(&self.log)
    }

    fn lock(&self) -> MutexGuard<'_, MuxerLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn journal(&mut self, entry: &JournalEntry<'_>) -> ComposeResult<()> {
        if let Some((_, writer)) = self.journal.as_mut() {
            serde_json::to_writer(&mut *writer, entry)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl Default for RecordingMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerMuxer for RecordingMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> ComposeResult<usize> {
        let index = {
            let mut log = self.lock();
            if log.started {
                return Err(ComposeError::muxer_protocol("track added after start"));
            }
            log.tracks.push(format.clone());
            log.tracks.len() - 1
        };
        self.journal(&JournalEntry::Track { index, format })?;
        Ok(index)
    }

    fn start(&mut self) -> ComposeResult<()> {
        let mut log = self.lock();
        if log.tracks.is_empty() {
            return Err(ComposeError::muxer_protocol("muxer started without tracks"));
        }
        log.started = true;
        Ok(())
    }

    fn write_sample_data(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> ComposeResult<()> {
        let sample = {
            let mut log = self.lock();
            if !log.started || log.stopped {
                return Err(ComposeError::muxer_protocol(
                    "sample written while the muxer is not running",
                ));
            }
            if track_index >= log.tracks.len() {
                return Err(ComposeError::muxer_protocol(format!(
                    "sample for unknown track {track_index}"
                )));
            }
            let sample = MuxedSample {
                track_index,
                presentation_time_us: info.presentation_time_us,
                flags: info.flags,
                size: info.size,
                data: data.get(info.range()).unwrap_or(data).to_vec(),
            };
            log.samples.push(sample.clone());
            sample
        };
        self.journal(&JournalEntry::Sample(&sample))
    }

    fn stop(&mut self) -> ComposeResult<()> {
        let samples = {
            let mut log = self.lock();
            log.stopped = true;
            log.samples.len()
        };
        self.journal(&JournalEntry::Stop { samples })?;
        if let Some((path, writer)) = self.journal.as_mut() {
            writer.flush()?;
            tracing::debug!(path = %path.display(), samples, "Muxer journal written");
        }
        Ok(())
    }

    fn release(&mut self) -> ComposeResult<()> {
        self.lock().released = true;
        self.journal = None;
        self.ledger.record("muxer");
        if self.fail_release {
            return Err(ComposeError::muxer_protocol("muxer release failed"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recompose_media_model::MIME_VIDEO_AVC;

    #[test]
    fn test_samples_require_start() {
        let mut muxer = RecordingMuxer::new();
        let index = muxer
            .add_track(&MediaFormat::video(MIME_VIDEO_AVC, 16, 16))
            .unwrap();
        let info = BufferInfo::new(2, 0, SampleFlags::SYNC);
        assert!(muxer.write_sample_data(index, &[1, 2], &info).is_err());
        muxer.start().unwrap();
        muxer.write_sample_data(index, &[1, 2], &info).unwrap();
        assert_eq!(muxer.log().lock().unwrap().samples.len(), 1);
    }

    #[test]
    fn test_journal_lines() {
        let dir = std::env::temp_dir().join(format!("recompose-journal-{}", std::process::id()));
        let path = dir.join("out.jsonl");
        let mut muxer = RecordingMuxer::new().with_journal(&path).unwrap();
        muxer
            .add_track(&MediaFormat::video(MIME_VIDEO_AVC, 16, 16))
            .unwrap();
        muxer.start().unwrap();
        muxer
            .write_sample_data(0, &[9; 4], &BufferInfo::new(4, 33_333, SampleFlags::SYNC))
            .unwrap();
        muxer.stop().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "track");
        assert_eq!(lines[1]["presentation_time_us"], 33_333);
        assert_eq!(lines[2]["samples"], 1);
        let _ = std::fs::remove_dir_all(dir);
    }
}
