//! Replay outcome reporting.

use retrace_core::{CallId, ResultCode, SequenceNumber};

/// A live call that failed where the capture succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Divergence {
    /// Entry point.
    pub call_id: CallId,
    /// Sequence number of the diverging record.
    pub sequence: SequenceNumber,
    /// Entry point name.
    pub name: &'static str,
    /// Result code recorded at capture time, if the call returns one.
    pub captured: Option<ResultCode>,
    /// Result code returned during replay.
    pub live: ResultCode,
}

/// What happened to one dispatched record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The live call was made and matched the capture.
    Dispatched,
    /// The live call was made and diverged; replay continues.
    Diverged,
    /// The record was not replayed.
    Skipped,
}

/// Totals for a replay run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records whose live call was made, diverged or not.
    pub dispatched: u64,
    /// Records skipped under [`FailurePolicy::Continue`](crate::FailurePolicy::Continue).
    pub skipped: u64,
    /// Divergences, in sequence order.
    pub divergences: Vec<Divergence>,
}

impl ReplaySummary {
    /// Whether every record replayed without divergence or skip.
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.divergences.is_empty()
    }
}
