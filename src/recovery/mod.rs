pub mod diagnostics;

use crate::content::ContentSet;
use crate::reload::operation::ReloadOutcome;
use log::{error, info, warn};

/// What the client lifecycle layer has to do in reaction to a reload outcome.
#[derive(Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The reload went through, resume normal operation (clear error UI).
    Resume,
    /// Strip every optional pack and run the baseline set through a reload.
    Retry(ContentSet),
    /// Close the session, clear the persisted selection and reload the
    /// all-required baseline. That baseline has to succeed or the next
    /// outcome escalates to `Fatal`.
    AbortToSafeState,
    /// Write the emergency diagnostic snapshot and terminate the process
    /// with a non-zero status. Unconditional, no further retries.
    Fatal,
}

/// Decides, per failed reload, between stripping optional content, aborting
/// to a safe UI state and giving up. Stateful on purpose: the controller must
/// recognize "already stripped, still failing" instead of retrying forever.
#[derive(Default)]
pub struct RecoveryController {
    /// Fingerprint of the set we last answered with `Retry` for.
    stripped: Option<u64>,
    /// Set once we ordered an abort; a failure arriving in this state means
    /// even the baseline set does not load.
    awaiting_safe_state: bool,
}

impl RecoveryController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_outcome(&mut self, outcome: &ReloadOutcome, content_set: &ContentSet) -> RecoveryAction {
        if outcome.is_success() {
            if self.stripped.is_some() || self.awaiting_safe_state {
                info!("Reload recovered after stripping optional content");
            }
            self.reset();
            return RecoveryAction::Resume;
        }

        let consumer = outcome.failing_consumer().unwrap_or("<unknown>");
        warn!(
            "Reload operation {} failed in consumer {}: {}",
            outcome.id,
            consumer,
            outcome.result.as_ref().expect_err("checked above")
        );

        if self.awaiting_safe_state {
            error!("The all-required baseline content set failed to load, nothing left to try");
            return RecoveryAction::Fatal;
        }

        let fingerprint = content_set.fingerprint();
        if content_set.has_optional() && self.stripped != Some(fingerprint) {
            self.stripped = Some(fingerprint);
            let baseline = content_set.strip_optional();
            warn!(
                "Stripping optional content and retrying with bundles {:?}",
                baseline.bundle_ids()
            );
            return RecoveryAction::Retry(baseline);
        }

        if content_set.len() <= 1 {
            error!("Content set is already minimal, treating the failure as fatal");
            return RecoveryAction::Fatal;
        }

        self.awaiting_safe_state = true;
        RecoveryAction::AbortToSafeState
    }

    fn reset(&mut self) {
        self.stripped = None;
        self.awaiting_safe_state = false;
    }
}
