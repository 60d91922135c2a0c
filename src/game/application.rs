use crate::content::ContentSet;
use crate::notify::{NotificationScheduler, NotificationTable, Toast};
use crate::recovery::diagnostics::{CrashReport, DiagnosticSink};
use crate::recovery::{RecoveryAction, RecoveryController};
use crate::reload::consumer::ConsumerRegistry;
use crate::reload::operation::{ReloadError, ReloadOutcome};
use crate::reload::orchestrator::{PreparedBatch, ReloadPipeline};
use crate::reload::tracker::ReloadStateTracker;
use crate::settings::PersistedSelection;
use anyhow::Context;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// A live game session that has to be closed cleanly before the client can
/// fall back to the safe state.
pub trait SessionHandle: Send + Sync {
    fn disconnect(&self);
}

/// The UI surface receiving dispatched notifications, always on the owning
/// thread.
pub trait ToastSink {
    fn show_toast(&mut self, toast: &Toast);
}

#[derive(Debug, PartialEq, Eq)]
pub enum CycleResult {
    Succeeded {
        /// Some optional content was disabled along the way; the UI shows a
        /// "we disabled some content and retried" notice.
        stripped_content: bool,
    },
    Fatal {
        /// Where the emergency report ended up, if writing it worked out.
        report: Option<PathBuf>,
    },
}

/// The client lifecycle layer: owns the reload pipeline, drives recovery and
/// pumps notifications. Everything here runs on the owning thread; only the
/// pipeline's prepare phase and the notification timer run elsewhere.
pub struct ClientApplication {
    pipeline: ReloadPipeline,
    batch_rx: Receiver<PreparedBatch>,
    tracker: Arc<ReloadStateTracker>,
    recovery: RecoveryController,
    diagnostics: Arc<dyn DiagnosticSink>,
    selection: PersistedSelection,
    selection_path: PathBuf,
    session: Option<Arc<dyn SessionHandle>>,
    scheduler: NotificationScheduler,
    // Dropped last; keeps the worker pool alive for in-flight prepares.
    _runtime: tokio::runtime::Runtime,
}

impl ClientApplication {
    pub fn new(
        registry: ConsumerRegistry,
        selection: PersistedSelection,
        selection_path: PathBuf,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, anyhow::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("Reload Worker")
            .enable_all()
            .build()
            .context("Failed to start the reload worker pool")?;

        let tracker = Arc::new(ReloadStateTracker::new());
        let (pipeline, batch_rx) =
            ReloadPipeline::new(Arc::new(registry), tracker.clone(), runtime.handle().clone());

        Ok(Self {
            pipeline,
            batch_rx,
            tracker,
            recovery: RecoveryController::new(),
            diagnostics,
            selection,
            selection_path,
            session: None,
            scheduler: NotificationScheduler::new(),
            _runtime: runtime,
        })
    }

    pub fn attach_session(&mut self, session: Arc<dyn SessionHandle>) {
        self.session = Some(session);
    }

    pub fn tracker(&self) -> &Arc<ReloadStateTracker> {
        &self.tracker
    }

    pub fn selection_path(&self) -> &PathBuf {
        &self.selection_path
    }

    /// Runs one reload over the given content set and drives recovery until
    /// it either sticks or gives up. Blocks the owning thread between
    /// batches; a windowed client would instead poll the batch channel from
    /// its per-frame update.
    pub fn run_reload_cycle(&mut self, content_set: ContentSet) -> Result<CycleResult, anyhow::Error> {
        self.pipeline.request_reload(content_set);
        let mut stripped_content = false;

        loop {
            let batch = self
                .batch_rx
                .recv()
                .context("The reload worker pool went away")?;
            let outcome = self.pipeline.process_batch(batch);
            let content_set = outcome.content_set.clone();

            if let Some(consumer) = outcome.failing_consumer() {
                self.diagnostics.record_failure(consumer);
            }

            let action = self.recovery.on_outcome(&outcome, &content_set);
            // Finishing the slot may immediately start a coalesced request;
            // a recovery retry requested below then coalesces behind it.
            self.pipeline.complete();

            match action {
                RecoveryAction::Resume => {
                    self.tracker.clear(outcome.id);
                    if stripped_content {
                        info!("Reload succeeded after disabling some optional content");
                    }
                    return Ok(CycleResult::Succeeded { stripped_content });
                }
                RecoveryAction::Retry(baseline) => {
                    stripped_content = true;
                    self.pipeline.request_reload(baseline);
                }
                RecoveryAction::AbortToSafeState => {
                    stripped_content = true;
                    self.abort_to_safe_state(&content_set);
                }
                RecoveryAction::Fatal => {
                    let report = self.write_emergency_report(&outcome);
                    return Ok(CycleResult::Fatal { report });
                }
            }
        }
    }

    /// Safe state: no session, no pending reloads, persisted selection back
    /// to the all-required baseline, and a fresh reload of that baseline.
    fn abort_to_safe_state(&mut self, failing_set: &ContentSet) {
        warn!("Aborting to the safe state");
        if let Some(session) = self.session.take() {
            session.disconnect();
        }
        self.pipeline.drop_pending();
        self.selection.clear_optional();
        if let Err(error) = self.selection.store(&self.selection_path) {
            warn!("Failed to persist the cleared content selection: {:#}", error);
        }
        self.pipeline.request_reload(failing_set.strip_optional());
    }

    /// The fatal path runs unconditionally; a failing report write is logged
    /// but does not keep the process alive.
    fn write_emergency_report(&self, outcome: &ReloadOutcome) -> Option<PathBuf> {
        let cause = outcome
            .result
            .as_ref()
            .err()
            .map(ToString::to_string)
            .unwrap_or_default();
        let report = CrashReport::new(
            outcome.failing_consumer(),
            &format!("{}: {}", ReloadError::ExhaustedRecovery, cause),
            outcome.content_set.bundle_ids(),
            self.tracker.snapshot().as_deref(),
        );
        match self.diagnostics.write_emergency_report(&report) {
            Ok(path) => {
                error!("Fatal content failure, crash report written to {}", path.display());
                Some(path)
            }
            Err(error) => {
                error!(
                    "Fatal content failure, and writing the crash report failed too: {:#}",
                    error
                );
                None
            }
        }
    }

    pub fn configure_notifications(&mut self, table: &NotificationTable, predicate: impl Fn(&str) -> bool) {
        self.scheduler.configure(table.select(predicate));
    }

    /// Owning thread: forwards everything the notification timer queued up
    /// to the UI surface.
    pub fn pump_toasts(&mut self, sink: &mut dyn ToastSink) {
        for toast in self.scheduler.drain_toasts() {
            sink.show_toast(&toast);
        }
    }

    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}
