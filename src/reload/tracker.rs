use crate::content::ContentSet;
use crate::reload::operation::{OperationId, ReloadPhase};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::Arc;

/// What the crash reporter gets to see about the reload that was in flight
/// when things went south. Purely diagnostic, never on the critical path.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSnapshot {
    pub operation_id: OperationId,
    pub phase: ReloadPhase,
    pub bundles: Vec<String>,
}

/// Tracks the current reload operation as an atomically swapped snapshot, so
/// the crash reporter (any thread) can read it without taking a lock that the
/// owning thread might be holding while it dies.
#[derive(Default)]
pub struct ReloadStateTracker {
    current: ArcSwapOption<ReloadSnapshot>,
}

impl ReloadStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, operation_id: OperationId, content_set: &ContentSet) {
        self.current.store(Some(Arc::new(ReloadSnapshot {
            operation_id,
            phase: ReloadPhase::Preparing,
            bundles: content_set.bundle_ids(),
        })));
    }

    pub fn transition(&self, operation_id: OperationId, phase: ReloadPhase) {
        let Some(previous) = self.current.load_full() else {
            return;
        };
        if previous.operation_id != operation_id {
            // A newer operation already took over the snapshot.
            return;
        }
        self.current.store(Some(Arc::new(ReloadSnapshot {
            operation_id,
            phase,
            bundles: previous.bundles.clone(),
        })));
    }

    /// Called once the outcome has been delivered and the operation is done
    /// with. Failed snapshots are deliberately kept around so a subsequent
    /// fatal escalation can still point at them.
    pub fn clear(&self, operation_id: OperationId) {
        let Some(previous) = self.current.load_full() else {
            return;
        };
        if previous.operation_id == operation_id && previous.phase != ReloadPhase::Failed {
            self.current.store(None);
        }
    }

    pub fn snapshot(&self) -> Option<Arc<ReloadSnapshot>> {
        self.current.load_full()
    }
}
