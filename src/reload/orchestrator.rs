use crate::content::ContentSet;
use crate::reload::consumer::{ConsumerRegistry, PreparedData};
use crate::reload::operation::{OperationId, ReloadError, ReloadOutcome, ReloadPhase};
use crate::reload::tracker::ReloadStateTracker;
use itertools::Itertools;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

/// Explicit holder of the "reload in flight" state. At most one operation
/// runs at a time; a request arriving while one runs goes into the single
/// pending slot, where the newest request wins and older pending requests
/// are dropped.
#[derive(Default)]
pub struct ReloadSlot {
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    running: bool,
    pending: Option<ContentSet>,
}

impl ReloadSlot {
    /// Returns the set to start now, or `None` if it was parked as pending.
    fn begin_or_coalesce(&self, content_set: ContentSet) -> Option<ContentSet> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.running {
            if state.pending.replace(content_set).is_some() {
                debug!("Coalescing reload requests, dropped an older pending request");
            }
            None
        } else {
            state.running = true;
            Some(content_set)
        }
    }

    /// Marks the running operation as done. If a pending request piled up in
    /// the meantime, the slot stays occupied and the pending set is handed
    /// back for an immediate restart.
    fn finish(&self) -> Option<ContentSet> {
        let mut state = self.state.lock().expect("lock poisoned");
        match state.pending.take() {
            Some(next) => Some(next),
            None => {
                state.running = false;
                None
            }
        }
    }

    fn drop_pending(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.pending.take().is_some() {
            debug!("Dropped the pending reload request");
        }
    }
}

/// Everything the background phase produced for one operation, marshalled
/// back to the owning thread. On success there is exactly one prepared entry
/// per consumer, in registration order.
pub struct PreparedBatch {
    pub operation_id: OperationId,
    pub content_set: Arc<ContentSet>,
    prepared: Result<Vec<PreparedData>, ReloadError>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RequestDisposition {
    Started(OperationId),
    Coalesced,
}

/// Runs reload operations: prepares on the background pool, applies on the
/// owning thread, one operation in flight at a time.
pub struct ReloadPipeline {
    registry: Arc<ConsumerRegistry>,
    tracker: Arc<ReloadStateTracker>,
    runtime: tokio::runtime::Handle,
    slot: ReloadSlot,
    batch_tx: Sender<PreparedBatch>,
    next_id: AtomicU64,
}

impl ReloadPipeline {
    pub fn new(
        registry: Arc<ConsumerRegistry>,
        tracker: Arc<ReloadStateTracker>,
        runtime: tokio::runtime::Handle,
    ) -> (Self, Receiver<PreparedBatch>) {
        let (batch_tx, batch_rx) = channel();
        (
            Self {
                registry,
                tracker,
                runtime,
                slot: ReloadSlot::default(),
                batch_tx,
                next_id: AtomicU64::new(1),
            },
            batch_rx,
        )
    }

    /// Requests a reload of the given content set. Starts it right away when
    /// nothing is in flight, otherwise coalesces it into the pending slot.
    pub fn request_reload(&self, content_set: ContentSet) -> RequestDisposition {
        match self.slot.begin_or_coalesce(content_set) {
            Some(set) => RequestDisposition::Started(self.start(set)),
            None => {
                trace!("Reload already in flight, request coalesced");
                RequestDisposition::Coalesced
            }
        }
    }

    /// Finishes the current operation once its outcome has been delivered.
    /// A pending coalesced request is started immediately.
    pub fn complete(&self) -> Option<OperationId> {
        self.slot.finish().map(|next| self.start(next))
    }

    /// Part of abort-to-safe-state: whatever was queued up is no longer
    /// wanted.
    pub fn drop_pending(&self) {
        self.slot.drop_pending();
    }

    fn start(&self, content_set: ContentSet) -> OperationId {
        let operation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tracker.begin(operation_id, &content_set);
        let content_set = Arc::new(content_set);
        trace!(
            "Starting reload operation {} over {} consumers, bundles {:?}",
            operation_id,
            self.registry.len(),
            content_set.bundle_ids()
        );

        // Phase 1: every consumer prepares concurrently on the worker pool.
        // Prepares cannot be aborted mid-consumer, they run to completion.
        let handles = self
            .registry
            .consumers()
            .iter()
            .map(|consumer| {
                let consumer = consumer.clone();
                let content_set = content_set.clone();
                let name = consumer.name();
                (
                    name,
                    self.runtime.spawn_blocking(move || {
                        consumer
                            .prepare(&content_set)
                            .map_err(|reason| ReloadError::Prepare {
                                consumer: name,
                                reason,
                            })
                    }),
                )
            })
            .collect_vec();

        let batch_tx = self.batch_tx.clone();
        self.runtime.spawn(async move {
            let mut prepared = Vec::with_capacity(handles.len());
            let mut failure: Option<ReloadError> = None;
            // Awaiting in registration order makes the reported failure the
            // earliest-registered one, independent of wall-clock finish order.
            for (name, handle) in handles {
                match handle.await {
                    Ok(Ok(data)) => prepared.push(data),
                    Ok(Err(error)) => {
                        if failure.is_none() {
                            failure = Some(error);
                        }
                    }
                    Err(join_error) => {
                        warn!("Prepare task for consumer {} did not finish: {}", name, join_error);
                        if failure.is_none() {
                            failure = Some(ReloadError::Prepare {
                                consumer: name,
                                reason: anyhow::Error::from(join_error),
                            });
                        }
                    }
                }
            }

            let batch = PreparedBatch {
                operation_id,
                content_set,
                prepared: match failure {
                    Some(error) => Err(error),
                    None => Ok(prepared),
                },
            };
            // The owning thread is gone during shutdown, nothing left to do.
            let _ = batch_tx.send(batch);
        });

        operation_id
    }

    /// Phase 2, owning thread only: applies the prepared data strictly in
    /// registration order. A failing apply leaves earlier consumers at their
    /// already-applied new state; there is no all-or-nothing guarantee across
    /// the consumer list, callers treat the outcome as failed and drive it
    /// back through recovery.
    pub fn process_batch(&self, batch: PreparedBatch) -> ReloadOutcome {
        let operation_id = batch.operation_id;
        let result = match batch.prepared {
            Err(error) => {
                // Phase 2 never starts when any prepare failed.
                Err(error)
            }
            Ok(prepared) => {
                self.tracker.transition(operation_id, ReloadPhase::Applying);
                let mut result = Ok(());
                for (consumer, data) in self.registry.consumers().iter().zip(prepared) {
                    if let Err(reason) = consumer.apply(data) {
                        result = Err(ReloadError::Apply {
                            consumer: consumer.name(),
                            reason,
                        });
                        break;
                    }
                }
                result
            }
        };

        let phase = if result.is_ok() {
            ReloadPhase::Succeeded
        } else {
            ReloadPhase::Failed
        };
        self.tracker.transition(operation_id, phase);

        ReloadOutcome {
            id: operation_id,
            content_set: batch.content_set,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentBundle, ContentSet};
    use crate::reload::consumer::ReloadableConsumer;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingConsumer {
        name: &'static str,
        fail_prepare: bool,
        fail_apply: bool,
        prepare_delay: Duration,
        log: Arc<StdMutex<Vec<String>>>,
    }

    impl RecordingConsumer {
        fn new(name: &'static str, log: Arc<StdMutex<Vec<String>>>) -> Self {
            Self {
                name,
                fail_prepare: false,
                fail_apply: false,
                prepare_delay: Duration::ZERO,
                log,
            }
        }
    }

    impl ReloadableConsumer for RecordingConsumer {
        fn name(&self) -> &'static str {
            self.name
        }

        fn prepare(&self, content: &ContentSet) -> Result<PreparedData, anyhow::Error> {
            std::thread::sleep(self.prepare_delay);
            if self.fail_prepare {
                anyhow::bail!("prepare rigged to fail");
            }
            Ok(Box::new(content.bundle_ids()))
        }

        fn apply(&self, _data: PreparedData) -> Result<(), anyhow::Error> {
            if self.fail_apply {
                anyhow::bail!("apply rigged to fail");
            }
            self.log
                .lock()
                .expect("lock poisoned")
                .push(format!("apply {}", self.name));
            Ok(())
        }
    }

    struct Harness {
        pipeline: ReloadPipeline,
        batch_rx: Receiver<PreparedBatch>,
        log: Arc<StdMutex<Vec<String>>>,
        _runtime: tokio::runtime::Runtime,
    }

    fn harness(build: impl FnOnce(&Arc<StdMutex<Vec<String>>>) -> Vec<RecordingConsumer>) -> Harness {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut registry = ConsumerRegistry::new();
        for consumer in build(&log) {
            registry.register(Arc::new(consumer));
        }
        let tracker = Arc::new(ReloadStateTracker::new());
        let (pipeline, batch_rx) = ReloadPipeline::new(Arc::new(registry), tracker, runtime.handle().clone());
        Harness {
            pipeline,
            batch_rx,
            log,
            _runtime: runtime,
        }
    }

    fn base_set() -> ContentSet {
        ContentSet::new(vec![ContentBundle::required("base")])
    }

    fn recv(harness: &Harness) -> PreparedBatch {
        harness
            .batch_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("prepared batch arrives")
    }

    #[test]
    fn applies_run_in_registration_order() {
        let harness = harness(|log| {
            vec![
                {
                    // The first consumer prepares slowest, order must not care.
                    let mut consumer = RecordingConsumer::new("language", log.clone());
                    consumer.prepare_delay = Duration::from_millis(50);
                    consumer
                },
                RecordingConsumer::new("fonts", log.clone()),
                RecordingConsumer::new("textures", log.clone()),
            ]
        });

        harness.pipeline.request_reload(base_set());
        let outcome = harness.pipeline.process_batch(recv(&harness));
        assert!(outcome.is_success());
        assert_eq!(
            *harness.log.lock().expect("lock poisoned"),
            vec!["apply language", "apply fonts", "apply textures"]
        );
        assert!(harness.pipeline.complete().is_none());
    }

    #[test]
    fn prepare_failure_skips_all_applies_and_names_earliest_consumer() {
        let harness = harness(|log| {
            vec![
                RecordingConsumer::new("language", log.clone()),
                {
                    // Fails late in wall-clock time...
                    let mut consumer = RecordingConsumer::new("fonts", log.clone());
                    consumer.fail_prepare = true;
                    consumer.prepare_delay = Duration::from_millis(50);
                    consumer
                },
                {
                    // ...while a later-registered consumer fails instantly.
                    let mut consumer = RecordingConsumer::new("textures", log.clone());
                    consumer.fail_prepare = true;
                    consumer
                },
            ]
        });

        harness.pipeline.request_reload(base_set());
        let outcome = harness.pipeline.process_batch(recv(&harness));
        assert!(!outcome.is_success());
        assert_eq!(outcome.failing_consumer(), Some("fonts"));
        assert!(harness.log.lock().expect("lock poisoned").is_empty());
    }

    #[test]
    fn apply_failure_keeps_earlier_applies_and_stops() {
        let harness = harness(|log| {
            vec![
                RecordingConsumer::new("language", log.clone()),
                {
                    let mut consumer = RecordingConsumer::new("fonts", log.clone());
                    consumer.fail_apply = true;
                    consumer
                },
                RecordingConsumer::new("textures", log.clone()),
            ]
        });

        harness.pipeline.request_reload(base_set());
        let outcome = harness.pipeline.process_batch(recv(&harness));
        assert_eq!(outcome.failing_consumer(), Some("fonts"));
        // Mixed state: language already applied, textures never reached.
        assert_eq!(
            *harness.log.lock().expect("lock poisoned"),
            vec!["apply language"]
        );
    }

    #[test]
    fn concurrent_requests_coalesce_and_newest_wins() {
        let harness = harness(|log| vec![RecordingConsumer::new("language", log.clone())]);

        let first = harness.pipeline.request_reload(base_set());
        assert!(matches!(first, RequestDisposition::Started(_)));

        let second = harness.pipeline.request_reload(ContentSet::new(vec![
            ContentBundle::required("base"),
            ContentBundle::optional("dropped"),
        ]));
        assert_eq!(second, RequestDisposition::Coalesced);

        let third_set = ContentSet::new(vec![
            ContentBundle::required("base"),
            ContentBundle::optional("winner"),
        ]);
        assert_eq!(
            harness.pipeline.request_reload(third_set.clone()),
            RequestDisposition::Coalesced
        );

        let outcome = harness.pipeline.process_batch(recv(&harness));
        assert!(outcome.is_success());

        // Completing the first operation starts the newest pending request,
        // the intermediate one was dropped.
        assert!(harness.pipeline.complete().is_some());
        let outcome = harness.pipeline.process_batch(recv(&harness));
        assert_eq!(*outcome.content_set, third_set);
        assert!(harness.pipeline.complete().is_none());
    }

    #[test]
    fn drop_pending_discards_the_coalesced_request() {
        let harness = harness(|log| vec![RecordingConsumer::new("language", log.clone())]);

        harness.pipeline.request_reload(base_set());
        harness
            .pipeline
            .request_reload(ContentSet::new(vec![ContentBundle::optional("queued")]));
        harness.pipeline.drop_pending();

        let outcome = harness.pipeline.process_batch(recv(&harness));
        assert!(outcome.is_success());
        assert!(harness.pipeline.complete().is_none());
    }
}
