//! Progress module - Progress reporting and cooperative cancellation
//!
//! The core has no logging plumbing of its own; that lives in whatever
//! external job runner drives it. Instead it reports through an injected
//! [`ProgressSink`] callback, covering the seven-stage pipeline and
//! carrying warning messages for non-fatal per-image failures.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::{Result, TagmetryError};

/// Canonical stage names, reported in this order with monotonically
/// non-decreasing `percent`.
pub const STAGES: [&str; 7] = [
    "validate",
    "scan",
    "normalize",
    "metrics",
    "recommend",
    "dedupe",
    "finalize",
];

/// A single progress report.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Completion percentage in `[0, 100]`.
    pub percent: u8,
    /// One of [`STAGES`], or `"failed"` on abort.
    pub stage: String,
    /// Human-readable message; also used as the warning channel for
    /// non-fatal per-image errors (see the error handling design).
    pub message: String,
    /// RFC3339 timestamp of this report.
    pub at_utc: String,
}

impl ProgressUpdate {
    pub fn new(percent: u8, stage: &str, message: impl Into<String>) -> Self {
        ProgressUpdate {
            percent,
            stage: stage.to_string(),
            message: message.into(),
            at_utc: now_rfc3339(),
        }
    }
}

/// Receives [`ProgressUpdate`] values as the pipeline advances.
///
/// Implemented as a trait (rather than a bare closure) so that the
/// orchestrator can hold one behind a `&dyn` reference and share it across
/// the normalize/metrics/recommend and dedupe branches, which may run
/// concurrently.
pub trait ProgressSink: Sync {
    fn report(&self, update: ProgressUpdate);
}

/// A [`ProgressSink`] that discards every update; used by callers that don't
/// need progress feedback (and in tests).
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn report(&self, _update: ProgressUpdate) {}
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Wraps a caller-supplied sink so the `percent` it ultimately observes is
/// monotonically non-decreasing even though the normalize/metrics/recommend
/// branch and the dedupe branch (§2, §5) report concurrently from separate
/// worker threads and would otherwise interleave out of their nominal order
/// (e.g. dedupe's early "started" report racing ahead of recommend's final
/// one). Every update is clamped up to the highest percent seen so far;
/// `stage`/`message`/`at_utc` pass through unchanged.
pub struct MonotonicProgress<'a> {
    inner: &'a dyn ProgressSink,
    high_water_mark: AtomicU8,
}

impl<'a> MonotonicProgress<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        MonotonicProgress { inner, high_water_mark: AtomicU8::new(0) }
    }
}

impl<'a> ProgressSink for MonotonicProgress<'a> {
    fn report(&self, update: ProgressUpdate) {
        let mut observed = self.high_water_mark.load(Ordering::SeqCst);
        let clamped = loop {
            let clamped = update.percent.max(observed);
            match self.high_water_mark.compare_exchange(
                observed,
                clamped,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break clamped,
                Err(actual) => observed = actual,
            }
        };
        self.inner.report(ProgressUpdate { percent: clamped, ..update });
    }
}

/// A cooperative cancellation flag shared between the caller and the core.
///
/// Cloning produces a handle to the same underlying flag. The caller trips
/// it by calling [`CancelToken::cancel`]; the core checks it at every
/// suspension point and per-image loop iteration via [`CancelToken::check`].
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken { flag: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(TagmetryError::Cancelled)` iff the token has tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TagmetryError::cancelled())
        } else {
            Ok(())
        }
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
