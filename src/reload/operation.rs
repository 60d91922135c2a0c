use crate::content::ContentSet;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub type OperationId = u64;

/// Phase of a reload operation. Transitions are monotonic:
/// Preparing -> Applying -> (Succeeded | Failed), or Preparing -> Failed
/// when a prepare already went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReloadPhase {
    Preparing,
    Applying,
    Succeeded,
    Failed,
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("consumer {consumer} failed to prepare: {reason:#}")]
    Prepare {
        consumer: &'static str,
        reason: anyhow::Error,
    },
    #[error("consumer {consumer} failed to apply: {reason:#}")]
    Apply {
        consumer: &'static str,
        reason: anyhow::Error,
    },
    #[error("recovery exhausted: no optional content left to strip")]
    ExhaustedRecovery,
}

impl ReloadError {
    pub fn failing_consumer(&self) -> Option<&'static str> {
        match self {
            ReloadError::Prepare { consumer, .. } | ReloadError::Apply { consumer, .. } => Some(consumer),
            ReloadError::ExhaustedRecovery => None,
        }
    }
}

/// The single result of one reload operation, delivered to the recovery
/// controller and discarded afterwards.
#[derive(Debug)]
pub struct ReloadOutcome {
    pub id: OperationId,
    pub content_set: Arc<ContentSet>,
    pub result: Result<(), ReloadError>,
}

impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failing_consumer(&self) -> Option<&'static str> {
        self.result.as_ref().err().and_then(ReloadError::failing_consumer)
    }
}
