//! Diagnostics hooks invoked at sync and evaluation points.
use std::time::Duration;

use crate::eval::EvaluationReason;

/// Which sync loop an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Specs payload.
    Specs,
    /// ID lists.
    IdLists,
}

/// Event delivered to a [`DiagnosticsObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// A sync cycle started.
    SyncStarted {
        /// Sync loop.
        kind: SyncKind,
    },
    /// A sync cycle finished.
    SyncFinished {
        /// Sync loop.
        kind: SyncKind,
        /// Whether the cycle succeeded (including "no updates").
        success: bool,
        /// Wall time spent in the cycle.
        duration: Duration,
    },
    /// A spec was evaluated.
    Evaluated {
        /// Spec name.
        name: String,
        /// Evaluated value.
        value: bool,
        /// Rule that determined the value.
        rule_id: String,
        /// Reason attached to the result.
        reason: EvaluationReason,
    },
}

/// Receives [`DiagnosticEvent`]s. The return value is ignored and implementations must not block.
pub trait DiagnosticsObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: DiagnosticEvent);
}

pub(crate) struct NoopDiagnosticsObserver;
impl DiagnosticsObserver for NoopDiagnosticsObserver {
    fn on_event(&self, _event: DiagnosticEvent) {}
}

impl<T: Fn(DiagnosticEvent) + Send + Sync> DiagnosticsObserver for T {
    fn on_event(&self, event: DiagnosticEvent) {
        self(event);
    }
}
