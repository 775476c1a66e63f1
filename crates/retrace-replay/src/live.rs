//! The live graphics API as seen by the dispatcher.

use retrace_core::{CallId, HandleCategory, LiveHandle, ResultCode, SequenceNumber};
use retrace_format::Value;
use smallvec::SmallVec;

/// One call about to be made against the live API.
///
/// Arguments are fully remapped: handles are live handles and known
/// device addresses are replay-time addresses. Output slots carry null
/// placeholders. A trailing result code is not included.
#[derive(Clone, Copy, Debug)]
pub struct LiveCall<'a> {
    /// Entry point.
    pub call_id: CallId,
    /// Sequence number of the record being replayed.
    pub sequence: SequenceNumber,
    /// Entry point name.
    pub name: &'static str,
    /// Remapped arguments in declaration order.
    pub args: &'a [Value<LiveHandle>],
}

/// Result of a creation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Created {
    /// Native result code.
    pub result: ResultCode,
    /// Created handles, one per requested output slot, in output order.
    /// Null for slots that failed. May be empty when `result` is a failure.
    pub handles: SmallVec<[LiveHandle; 1]>,
}

/// Result of an address query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueriedAddress {
    /// Native result code.
    pub result: ResultCode,
    /// Replay-time device address of the allocation.
    pub address: u64,
}

/// Capability interface the dispatcher drives, selected per call by its
/// [`CallKind`](crate::CallKind).
pub trait LiveApi {
    /// Make a call with no lifetime effects.
    fn invoke(&mut self, call: &LiveCall<'_>) -> ResultCode;

    /// Make a creation call producing `count` objects of `category`.
    fn create(&mut self, call: &LiveCall<'_>, category: HandleCategory, count: usize) -> Created;

    /// Destroy `handle`.
    fn destroy(&mut self, call: &LiveCall<'_>, category: HandleCategory, handle: LiveHandle) -> ResultCode;

    /// Query the device address of `owner`.
    fn query_address(&mut self, call: &LiveCall<'_>, owner: LiveHandle) -> QueriedAddress;
}

impl<L: LiveApi + ?Sized> LiveApi for &mut L {
    fn invoke(&mut self, call: &LiveCall<'_>) -> ResultCode {
        (**self).invoke(call)
    }

    fn create(&mut self, call: &LiveCall<'_>, category: HandleCategory, count: usize) -> Created {
        (**self).create(call, category, count)
    }

    fn destroy(&mut self, call: &LiveCall<'_>, category: HandleCategory, handle: LiveHandle) -> ResultCode {
        (**self).destroy(call, category, handle)
    }

    fn query_address(&mut self, call: &LiveCall<'_>, owner: LiveHandle) -> QueriedAddress {
        (**self).query_address(call, owner)
    }
}
