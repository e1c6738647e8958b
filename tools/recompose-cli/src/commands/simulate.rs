//! Run a complete composition against the synthetic backend.

use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use recompose_common::{us_to_secs, AppConfig, ComposeError};
use recompose_engine::synthetic::{FaultPlan, SyntheticBackend};
use recompose_engine::{ComposeListener, ComposeReport, Composer, EngineSettings};
use recompose_media_model::MediaSource;

use crate::options::{CompositionArgs, SyntheticArgs};

enum Finished {
    Completed(ComposeReport),
    Canceled,
    Failed(String),
}

struct ConsoleListener {
    done: Sender<Finished>,
}

impl ComposeListener for ConsoleListener {
    fn on_start(&mut self) {
        println!("  Composition started");
    }

    fn on_progress(&mut self, progress: f64) {
        if progress < 0.0 {
            print!("\r  Progress: unknown duration  ");
        } else {
            print!("\r  Progress: {:.1}%  ", progress * 100.0);
        }
        let _ = std::io::stdout().flush();
    }

    fn on_completed(&mut self, report: &ComposeReport) {
        let _ = self.done.send(Finished::Completed(report.clone()));
    }

    fn on_canceled(&mut self) {
        let _ = self.done.send(Finished::Canceled);
    }

    fn on_failed(&mut self, error: &ComposeError) {
        let _ = self
            .done
            .send(Finished::Failed(format!("{} ({})", error, error.kind())));
    }
}

fn load_faults(path: Option<PathBuf>) -> anyhow::Result<FaultPlan> {
    let Some(path) = path else {
        return Ok(FaultPlan::default());
    };
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read faults file {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse faults file {}: {e}", path.display()))
}

pub fn run(
    output: PathBuf,
    faults: Option<PathBuf>,
    json: bool,
    synthetic: &SyntheticArgs,
    composition: &CompositionArgs,
    app: &AppConfig,
) -> anyhow::Result<()> {
    let source = synthetic.to_source()?;
    let faults = load_faults(faults)?;
    let metadata = source.metadata();

    let config = composition.to_configuration(
        MediaSource::Video(PathBuf::from("synthetic.mp4")),
        output.clone(),
        &app.composition,
    )?;

    println!("Simulating composition");
    println!(
        "  Source: {} ({} deg), {}",
        metadata.resolution,
        metadata.rotation.degrees(),
        if metadata.has_audio { "with audio" } else { "no audio" }
    );
    println!("  Journal: {}", output.display());

    let backend = Arc::new(SyntheticBackend::new(source).with_faults(faults).with_journal());
    let mut composer = Composer::new(config, backend.clone())
        .with_settings(EngineSettings::from(&app.composition));

    let (tx, rx) = channel();
    composer
        .start(Box::new(ConsoleListener { done: tx }))
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    composer.wait();
    println!();

    let finished = rx
        .recv()
        .map_err(|_| anyhow::anyhow!("Composition ended without a result"))?;
    match finished {
        Finished::Completed(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let log = backend.muxer_log();
                println!("Composition complete in {} ms", report.elapsed_ms);
                println!("  Steps: {} ({} idle)", report.steps, report.idle_steps);
                println!("  Video frames: {}", report.video_frames);
                println!("  Video length: {:.3}s", us_to_secs(report.video_written_us));
                if let Some(audio_us) = report.audio_written_us {
                    println!("  Audio length: {:.3}s", us_to_secs(audio_us));
                }
                println!("  Muxed samples: {}", log.samples.len());
                for (index, track) in log.tracks.iter().enumerate() {
                    println!("  Track {index}: {}", track.mime);
                }
            }
            println!("Release order: {}", backend.ledger().entries().join(", "));
            Ok(())
        }
        Finished::Canceled => {
            println!("Composition canceled");
            Ok(())
        }
        Finished::Failed(message) => {
            println!("Release order: {}", backend.ledger().entries().join(", "));
            Err(anyhow::anyhow!("Composition failed: {message}"))
        }
    }
}
