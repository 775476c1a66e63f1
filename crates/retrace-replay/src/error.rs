//! Replay error types.
//!
//! Every record-level error carries the call id and sequence number of the
//! record that raised it.

use retrace_core::{CallId, ResultCode, SequenceNumber};
use retrace_format::FormatError;
use retrace_mapping::MappingError;

use crate::config::ConfigError;
use crate::dispatcher::DispatcherState;

/// Errors raised while replaying a trace.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The configuration failed validation.
    #[error("invalid replay configuration: {0}")]
    Config(#[from] ConfigError),
    /// The trace stream itself is unreadable.
    #[error("trace stream error: {0}")]
    Stream(#[from] FormatError),
    /// A record's payload could not be decoded.
    #[error("call {call_id} at {sequence}: malformed payload")]
    Malformed {
        /// The record's call id.
        call_id: CallId,
        /// The record's sequence number.
        sequence: SequenceNumber,
        /// Decoder error.
        #[source]
        source: FormatError,
    },
    /// No schema is registered for the record's call id.
    #[error("call {call_id} at {sequence}: no schema registered")]
    UnknownCall {
        /// The unrecognized call id.
        call_id: CallId,
        /// The record's sequence number.
        sequence: SequenceNumber,
    },
    /// An argument named by the schema is missing or has the wrong kind.
    #[error("call {call_id} at {sequence}: argument {index} should be {expected}, found {found}")]
    BadArgument {
        /// The record's call id.
        call_id: CallId,
        /// The record's sequence number.
        sequence: SequenceNumber,
        /// Argument index.
        index: usize,
        /// What the schema expects there.
        expected: &'static str,
        /// Kind found in the payload.
        found: &'static str,
    },
    /// A handle in the record could not be resolved to a live handle.
    #[error("call {call_id} at {sequence}: {source}")]
    Unresolved {
        /// The record's call id.
        call_id: CallId,
        /// The record's sequence number.
        sequence: SequenceNumber,
        /// The failed lookup, naming category and capture id.
        #[source]
        source: MappingError,
    },
    /// Updating the mapping tables after a call failed.
    #[error("call {call_id} at {sequence}: mapping update failed: {source}")]
    Mapping {
        /// The record's call id.
        call_id: CallId,
        /// The record's sequence number.
        sequence: SequenceNumber,
        /// The table error.
        #[source]
        source: MappingError,
    },
    /// The live backend returned a different number of created handles
    /// than the record holds.
    #[error("call {call_id} at {sequence}: expected {expected} created handles, live API returned {got}")]
    OutputCountMismatch {
        /// The record's call id.
        call_id: CallId,
        /// The record's sequence number.
        sequence: SequenceNumber,
        /// Output slots in the record.
        expected: usize,
        /// Handles returned by the live API.
        got: usize,
    },
    /// The live call failed where the captured call did not.
    #[error("{name} (call {call_id} at {sequence}) failed live with {live}, captured {captured:?}")]
    LiveCallFailed {
        /// The record's call id.
        call_id: CallId,
        /// The record's sequence number.
        sequence: SequenceNumber,
        /// Entry point name.
        name: &'static str,
        /// Result code recorded at capture time, if the call returns one.
        captured: Option<ResultCode>,
        /// Result code returned by the live call.
        live: ResultCode,
    },
    /// Records arrived with a non-increasing sequence number.
    #[error("call {call_id}: sequence {found} does not follow {previous}")]
    OutOfOrder {
        /// The offending record's call id.
        call_id: CallId,
        /// Last sequence number dispatched.
        previous: SequenceNumber,
        /// The offending sequence number.
        found: SequenceNumber,
    },
    /// The dispatcher has already ended or halted.
    #[error("dispatcher is {state:?}")]
    NotRunning {
        /// State the dispatcher is in.
        state: DispatcherState,
    },
}

impl ReplayError {
    /// Whether the error concerns only the record that raised it, so replay
    /// may skip the record and continue.
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            ReplayError::Malformed { .. }
                | ReplayError::UnknownCall { .. }
                | ReplayError::BadArgument { .. }
                | ReplayError::Unresolved { .. }
        )
    }
}
