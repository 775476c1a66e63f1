//! Test utilities and mock backends for retrace development.
//!
//! Provides [`MockLiveApi`], a deterministic in-memory stand-in for a live
//! graphics driver, and the [`fixtures`] module with a small Vulkan-shaped
//! call schema plus a workload that captures against it.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::collections::{HashMap, HashSet};

use retrace_core::{CallId, HandleCategory, LiveHandle, ResultCode, SequenceNumber};
use retrace_format::Value;
use retrace_replay::{Created, LiveApi, LiveCall, QueriedAddress};
use smallvec::SmallVec;

/// Result code returned by injected failures.
pub const INJECTED_FAILURE: ResultCode = ResultCode(-3);

/// Result code returned when a call references a handle the mock never
/// created or already destroyed.
pub const INVALID_HANDLE: ResultCode = ResultCode(-1_000_012_000);

/// What the dispatcher asked the mock to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Invoke,
    Create {
        category: HandleCategory,
        handles: Vec<LiveHandle>,
    },
    Destroy {
        category: HandleCategory,
        handle: LiveHandle,
    },
    QueryAddress {
        owner: LiveHandle,
        address: u64,
    },
}

/// One logged call.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub call_id: CallId,
    pub sequence: SequenceNumber,
    pub name: &'static str,
    pub args: Vec<Value<LiveHandle>>,
    pub operation: Operation,
    pub result: ResultCode,
}

/// Deterministic mock of a live driver.
///
/// Handles are handed out sequentially from a configurable base and
/// addresses from a fixed aperture, so two replays of the same trace
/// produce identical logs. Every non-null handle argument is checked
/// against the set of objects the mock created and has not destroyed.
pub struct MockLiveApi {
    log: Vec<Invocation>,
    next_handle: u64,
    next_address: u64,
    alive: HashSet<LiveHandle>,
    addresses: HashMap<LiveHandle, u64>,
    fail_calls: HashSet<CallId>,
    fail_sequences: HashSet<SequenceNumber>,
    fail_slots: HashMap<CallId, usize>,
    invalid_uses: Vec<(SequenceNumber, LiveHandle)>,
}

impl MockLiveApi {
    /// Default first live handle.
    pub const HANDLE_BASE: u64 = 0xA000_0000;
    /// Default first device address.
    pub const ADDRESS_BASE: u64 = 0x0000_7F00_0000_0000;
    /// Spacing between addresses handed out for successive allocations.
    pub const ADDRESS_STRIDE: u64 = 0x10_0000;

    pub fn new() -> Self {
        Self::with_handle_base(Self::HANDLE_BASE)
    }

    pub fn with_handle_base(base: u64) -> Self {
        Self {
            log: Vec::new(),
            next_handle: base,
            next_address: Self::ADDRESS_BASE,
            alive: HashSet::new(),
            addresses: HashMap::new(),
            fail_calls: HashSet::new(),
            fail_sequences: HashSet::new(),
            fail_slots: HashMap::new(),
            invalid_uses: Vec::new(),
        }
    }

    /// Fail every call to `call_id`.
    pub fn fail_call(mut self, call_id: CallId) -> Self {
        self.fail_calls.insert(call_id);
        self
    }

    /// Fail the record with this sequence number.
    pub fn fail_at(mut self, sequence: SequenceNumber) -> Self {
        self.fail_sequences.insert(sequence);
        self
    }

    /// Make creation calls to `call_id` fail only in output slot `slot`:
    /// the other slots succeed and the call reports [`INJECTED_FAILURE`].
    pub fn fail_slot(mut self, call_id: CallId, slot: usize) -> Self {
        self.fail_slots.insert(call_id, slot);
        self
    }

    /// Every call made, in order.
    pub fn invocations(&self) -> &[Invocation] {
        &self.log
    }

    /// Names of every call made, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.log.iter().map(|i| i.name).collect()
    }

    /// Invocations of one entry point.
    pub fn calls_to(&self, call_id: CallId) -> impl Iterator<Item = &Invocation> {
        self.log.iter().filter(move |i| i.call_id == call_id)
    }

    /// Objects created and not yet destroyed.
    pub fn alive(&self) -> usize {
        self.alive.len()
    }

    pub fn is_alive(&self, handle: LiveHandle) -> bool {
        self.alive.contains(&handle)
    }

    /// The address handed out for `owner`, if it was queried.
    pub fn address_of(&self, owner: LiveHandle) -> Option<u64> {
        self.addresses.get(&owner).copied()
    }

    /// Handle arguments that named no live object, with the sequence of
    /// the offending call.
    pub fn invalid_uses(&self) -> &[(SequenceNumber, LiveHandle)] {
        &self.invalid_uses
    }

    fn injected(&self, call: &LiveCall<'_>) -> bool {
        self.fail_calls.contains(&call.call_id) || self.fail_sequences.contains(&call.sequence)
    }

    /// Check handle arguments, returning the first failure to report.
    fn validate(&mut self, call: &LiveCall<'_>) -> ResultCode {
        let mut invalid = Vec::new();
        for arg in call.args {
            arg.for_each_handle(&mut |_, h| {
                if !h.is_null() && !self.alive.contains(h) {
                    invalid.push(*h);
                }
            });
        }
        if invalid.is_empty() {
            return if self.injected(call) {
                INJECTED_FAILURE
            } else {
                ResultCode::SUCCESS
            };
        }
        self.invalid_uses
            .extend(invalid.into_iter().map(|h| (call.sequence, h)));
        INVALID_HANDLE
    }

    fn mint(&mut self) -> LiveHandle {
        let h = LiveHandle(self.next_handle);
        self.next_handle += 1;
        self.alive.insert(h);
        h
    }

    fn log(&mut self, call: &LiveCall<'_>, operation: Operation, result: ResultCode) {
        self.log.push(Invocation {
            call_id: call.call_id,
            sequence: call.sequence,
            name: call.name,
            args: call.args.to_vec(),
            operation,
            result,
        });
    }
}

impl Default for MockLiveApi {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveApi for MockLiveApi {
    fn invoke(&mut self, call: &LiveCall<'_>) -> ResultCode {
        let result = self.validate(call);
        self.log(call, Operation::Invoke, result);
        result
    }

    fn create(&mut self, call: &LiveCall<'_>, category: HandleCategory, count: usize) -> Created {
        let mut result = self.validate(call);
        let handles: SmallVec<[LiveHandle; 1]> = if let Some(&slot) = self.fail_slots.get(&call.call_id) {
            result = INJECTED_FAILURE;
            (0..count)
                .map(|i| if i == slot { LiveHandle::NULL } else { self.mint() })
                .collect()
        } else if result.is_success() {
            (0..count).map(|_| self.mint()).collect()
        } else {
            SmallVec::new()
        };
        self.log(
            call,
            Operation::Create {
                category,
                handles: handles.to_vec(),
            },
            result,
        );
        Created { result, handles }
    }

    fn destroy(&mut self, call: &LiveCall<'_>, category: HandleCategory, handle: LiveHandle) -> ResultCode {
        let result = self.validate(call);
        if result.is_success() {
            self.alive.remove(&handle);
            self.addresses.remove(&handle);
        }
        self.log(call, Operation::Destroy { category, handle }, result);
        result
    }

    fn query_address(&mut self, call: &LiveCall<'_>, owner: LiveHandle) -> QueriedAddress {
        let result = self.validate(call);
        let address = if result.is_success() {
            match self.addresses.get(&owner) {
                Some(&a) => a,
                None => {
                    let a = self.next_address;
                    self.next_address += Self::ADDRESS_STRIDE;
                    self.addresses.insert(owner, a);
                    a
                }
            }
        } else {
            0
        };
        self.log(call, Operation::QueryAddress { owner, address }, result);
        QueriedAddress { result, address }
    }
}
