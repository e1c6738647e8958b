use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use recompose_common::ComposeError;
use recompose_engine::synthetic::{FaultPlan, SyntheticBackend, SyntheticSource};
use recompose_engine::{ComposeListener, ComposeReport, Composer, EngineSettings};
use recompose_media_model::{
    FillMode, MediaSource, PipelineConfiguration, RgbaPixels, StillImage,
};

#[derive(Debug)]
enum Event {
    Start,
    Progress(f64),
    Completed { video_frames: u64 },
    Canceled,
    Failed { kind: &'static str, fatal: bool },
}

impl Event {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Completed { .. } | Event::Canceled | Event::Failed { .. }
        )
    }
}

struct ChannelListener(Sender<Event>);

impl ComposeListener for ChannelListener {
    fn on_start(&mut self) {
        let _ = self.0.send(Event::Start);
    }

    fn on_progress(&mut self, progress: f64) {
        let _ = self.0.send(Event::Progress(progress));
    }

    fn on_completed(&mut self, report: &ComposeReport) {
        let _ = self.0.send(Event::Completed {
            video_frames: report.video_frames,
        });
    }

    fn on_canceled(&mut self) {
        let _ = self.0.send(Event::Canceled);
    }

    fn on_failed(&mut self, error: &ComposeError) {
        let _ = self.0.send(Event::Failed {
            kind: error.kind(),
            fatal: error.is_fatal_release(),
        });
    }
}

fn recording_listener() -> (Box<dyn ComposeListener>, Receiver<Event>) {
    let (tx, rx) = channel();
    (Box::new(ChannelListener(tx)), rx)
}

fn settings() -> EngineSettings {
    EngineSettings {
        idle_sleep: Duration::from_millis(0),
        progress_interval_steps: 4,
    }
}

fn video_config() -> PipelineConfiguration {
    PipelineConfiguration::builder(MediaSource::Video("synthetic.mp4".into()), "out.mp4").build()
}

fn composer(backend: &Arc<SyntheticBackend>, config: PipelineConfiguration) -> Composer {
    Composer::new(config, backend.clone()).with_settings(settings())
}

fn drain(rx: &Receiver<Event>) -> Vec<Event> {
    rx.try_iter().collect()
}

#[test]
fn callbacks_arrive_in_order_with_one_terminal_event() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 40)));
    let mut composer = composer(&backend, video_config());
    let (listener, rx) = recording_listener();

    composer.start(listener).unwrap();
    composer.wait();
    assert!(!composer.is_running());

    let events = drain(&rx);
    assert!(matches!(events.first(), Some(Event::Start)));
    assert!(matches!(
        events.last(),
        Some(Event::Completed { video_frames: 40 })
    ));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));
}

#[test]
fn cancel_right_after_start_reports_canceled() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5_000)));
    let mut composer = composer(&backend, video_config());
    let (listener, rx) = recording_listener();

    composer.start(listener).unwrap();
    composer.cancel();
    composer.wait();

    assert!(!composer.is_running());
    assert!(!composer.is_poisoned());
    let events = drain(&rx);
    assert!(matches!(events.last(), Some(Event::Canceled)));
    assert!(!events.iter().any(|e| matches!(e, Event::Completed { .. })));
}

#[test]
fn configuration_error_is_returned_before_anything_starts() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5)));
    let config = PipelineConfiguration::builder(MediaSource::Video("synthetic.mp4".into()), "out.mp4")
        .fill_mode(FillMode::Custom)
        .build();
    let mut composer = composer(&backend, config);
    let (listener, rx) = recording_listener();

    let err = composer.start(listener).unwrap_err();
    assert!(matches!(err, ComposeError::Configuration { .. }), "{err}");
    assert!(!composer.is_running());
    composer.wait();
    assert!(drain(&rx).is_empty());
    assert!(backend.ledger().entries().is_empty());
}

#[test]
fn unsupported_source_fails_after_releasing_the_probe() {
    let faults = FaultPlan {
        unsupported_source: true,
        ..FaultPlan::default()
    };
    let backend = Arc::new(
        SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5)).with_faults(faults),
    );
    let mut composer = composer(&backend, video_config());
    let (listener, rx) = recording_listener();

    composer.start(listener).unwrap();
    composer.wait();

    let events = drain(&rx);
    assert!(
        matches!(events.last(), Some(Event::Failed { kind: "unsupported_source", .. })),
        "{events:?}"
    );
    assert_eq!(backend.ledger().entries(), vec!["probe"]);
}

#[test]
fn still_image_runs_through_the_composer() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 1)));
    let pixels = RgbaPixels::solid(32, 32, [200, 30, 30, 255]);
    let config = PipelineConfiguration::builder(
        MediaSource::StillImage(StillImage::Rgba(pixels)),
        "still.mp4",
    )
    .still_image_duration_ms(1_000)
    .still_image_frame_rate(10)
    .build();
    let mut composer = composer(&backend, config);
    let (listener, rx) = recording_listener();

    composer.start(listener).unwrap();
    composer.wait();

    let events = drain(&rx);
    assert!(matches!(
        events.last(),
        Some(Event::Completed { video_frames: 10 })
    ));
    assert_eq!(backend.muxer_log().tracks.len(), 1);
}

#[test]
fn leaked_release_poisons_the_composer() {
    let faults = FaultPlan {
        demuxer_release_fails: true,
        ..FaultPlan::default()
    };
    let backend = Arc::new(
        SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5)).with_faults(faults),
    );
    let mut composer = composer(&backend, video_config());
    let (listener, rx) = recording_listener();

    composer.start(listener).unwrap();
    composer.wait();

    let events = drain(&rx);
    assert!(
        matches!(events.last(), Some(Event::Failed { kind: "resource_release", fatal: true })),
        "{events:?}"
    );
    assert!(composer.is_poisoned());

    let (listener, rx) = recording_listener();
    let err = composer.start(listener).unwrap_err();
    assert!(err.is_fatal_release());
    assert!(drain(&rx).is_empty());
}

#[test]
fn starting_twice_while_running_is_ignored() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticSource::video(16, 16, 40_000, 5_000)));
    let mut composer = composer(&backend, video_config());
    let (first, first_rx) = recording_listener();
    let (second, second_rx) = recording_listener();

    composer.start(first).unwrap();
    let second_start = composer.start(second);
    composer.cancel();
    composer.wait();

    assert!(second_start.is_ok());
    let events = drain(&first_rx);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(drain(&second_rx).is_empty());
}
