//! Public entry point: configure, start, cancel.
//!
//! A [`Composer`] owns one configuration and runs it on a dedicated worker
//! thread. The listener receives `on_start`, zero or more `on_progress`,
//! then exactly one of `on_completed`, `on_canceled` or `on_failed`, all on
//! the worker thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use recompose_common::{ComposeError, ComposeResult};
use recompose_media_model::{MediaSource, PipelineConfiguration, SourceFacts};

use crate::backend::{FrameFilter, IdentityFilter, MediaBackend};
use crate::engine::{
    CancelToken, ComposeJob, ComposeOutcome, ComposeReport, ComposerEngine, EngineSettings,
    EngineSource,
};
use crate::pixel::load_still_image;

/// Run callbacks. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait ComposeListener: Send {
    fn on_start(&mut self) {}

    /// `0.0..=1.0`, or `-1.0` once when the source duration is unknown.
    fn on_progress(&mut self, progress: f64) {}

    fn on_completed(&mut self, report: &ComposeReport) {}

    fn on_canceled(&mut self) {}

    fn on_failed(&mut self, error: &ComposeError) {}
}

/// Listener that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ComposeListener for NoopListener {}

type FilterFactory = Arc<dyn Fn() -> Box<dyn FrameFilter> + Send + Sync>;

pub struct Composer {
    config: PipelineConfiguration,
    backend: Arc<dyn MediaBackend>,
    settings: EngineSettings,
    filter_factory: FilterFactory,
    cancel: CancelToken,
    running: Arc<AtomicBool>,
    poisoned: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Composer {
    pub fn new(config: PipelineConfiguration, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            config,
            backend,
            settings: EngineSettings::default(),
            filter_factory: Arc::new(|| Box::new(IdentityFilter) as Box<dyn FrameFilter>),
            cancel: CancelToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            poisoned: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Filter applied to every output frame. A new filter is built per run.
    pub fn with_filter<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn FrameFilter> + Send + Sync + 'static,
    {
        self.filter_factory = Arc::new(factory);
        self
    }

    pub fn configuration(&self) -> &PipelineConfiguration {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a previous run failed to release native resources. A
    /// poisoned composer refuses to start again.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Validate the configuration and start a run on a worker thread.
    ///
    /// Configuration errors are returned here, before any resource is
    /// allocated or any callback fires. Starting while a run is active
    /// does nothing.
    pub fn start(&mut self, listener: Box<dyn ComposeListener>) -> ComposeResult<()> {
        if self.is_poisoned() {
            return Err(ComposeError::resource_release(
                "composer",
                "a previous run leaked native resources",
                true,
            ));
        }
        if self.is_running() {
            tracing::warn!("Composition already running; start ignored");
            return Ok(());
        }
        self.config.validate()?;
        self.join_worker();

        self.cancel = CancelToken::new();
        self.running.store(true, Ordering::SeqCst);

        let worker = Worker {
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            settings: self.settings,
            filter_factory: Arc::clone(&self.filter_factory),
            cancel: self.cancel.clone(),
            running: Arc::clone(&self.running),
            poisoned: Arc::clone(&self.poisoned),
        };
        let spawned = std::thread::Builder::new()
            .name("recompose-worker".into())
            .spawn(move || worker.run(listener));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Request cancellation. Observed between steps.
    pub fn cancel(&self) {
        if self.is_running() {
            tracing::info!("Cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Block until the current run, if any, has delivered its terminal
    /// callback.
    pub fn wait(&mut self) {
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Composition worker panicked outside the guarded run");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for Composer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.join_worker();
    }
}

struct Worker {
    config: PipelineConfiguration,
    backend: Arc<dyn MediaBackend>,
    settings: EngineSettings,
    filter_factory: FilterFactory,
    cancel: CancelToken,
    running: Arc<AtomicBool>,
    poisoned: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, mut listener: Box<dyn ComposeListener>) {
        listener.on_start();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.compose(listener.as_mut())));
        let outcome = outcome.unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ComposeError::Other(anyhow::anyhow!(
                "composition worker panicked: {message}"
            )))
        });

        // Must be clear before the terminal callback fires.
        self.running.store(false, Ordering::SeqCst);
        match outcome {
            Ok(ComposeOutcome::Completed(report)) => listener.on_completed(&report),
            Ok(ComposeOutcome::Canceled) => listener.on_canceled(),
            Err(error) => {
                if error.is_fatal_release() {
                    self.poisoned.store(true, Ordering::SeqCst);
                }
                tracing::error!(kind = error.kind(), error = %error, "Composition failed");
                listener.on_failed(&error);
            }
        }
    }

    fn compose(&self, listener: &mut dyn ComposeListener) -> ComposeResult<ComposeOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(ComposeOutcome::Canceled);
        }
        let job = self.prepare()?;
        let mut engine =
            ComposerEngine::new(Arc::clone(&self.backend), self.settings, self.cancel.clone());
        let result = engine.compose(job, &mut |progress| listener.on_progress(progress));
        if engine.resources_leaked() {
            self.poisoned.store(true, Ordering::SeqCst);
        }
        result
    }

    /// Probe or load the source and resolve every default against it.
    fn prepare(&self) -> ComposeResult<ComposeJob> {
        let (source, facts) = match &self.config.source {
            MediaSource::Video(path) => {
                let mut probe = self.backend.open_probe(path)?;
                let probed = probe.probe();
                if let Err(e) = probe.release() {
                    tracing::warn!(error = %e, "Failed to release metadata probe");
                }
                let metadata = probed.map_err(|e| match e {
                    ComposeError::FileNotFound { .. } | ComposeError::UnsupportedSource { .. } => e,
                    other => ComposeError::unsupported_source(other.to_string()),
                })?;
                (EngineSource::Video(path.clone()), SourceFacts::Video(metadata))
            }
            MediaSource::StillImage(image) => {
                let pixels = load_still_image(image)?;
                let facts = SourceFacts::StillImage(pixels.resolution());
                (EngineSource::StillImage(pixels), facts)
            }
        };
        let plan = self.config.resolve(&facts)?;
        tracing::debug!(
            plan = %serde_json::to_string(&plan).unwrap_or_default(),
            "Resolved pipeline"
        );
        Ok(ComposeJob {
            source,
            destination: self.config.destination.clone(),
            plan,
            filter: (self.filter_factory)(),
        })
    }
}
