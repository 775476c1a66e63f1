//! Strongly-typed identifiers for captured calls and objects.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one live object instance for the lifetime of a capture.
///
/// Assigned when the creating call is captured, either as the native handle
/// value itself or as a surrogate counter. `CaptureId(0)` is reserved as the
/// null identity: optional handle parameters that were null at capture time
/// are encoded with it and resolve to [`LiveHandle::NULL`] on replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureId(pub u64);

impl CaptureId {
    /// The reserved null identity.
    pub const NULL: CaptureId = CaptureId(0);

    /// Whether this is the reserved null identity.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for CaptureId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// A handle returned by the live driver during replay.
///
/// Opaque to the core; only compared, stored and handed back to the
/// live API. `LiveHandle(0)` is the driver's null handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveHandle(pub u64);

impl LiveHandle {
    /// The null live handle.
    pub const NULL: LiveHandle = LiveHandle(0);

    /// Whether this is the null live handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for LiveHandle {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies an API entry point.
///
/// The numbering is owned by the interception shims; the core only uses it
/// to frame records and to select a call schema during replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u32);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CallId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Position of a record in the trace.
///
/// Strictly increasing within a trace; replay order is sequence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceNumber {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Counter for unique [`ThreadId`] allocation. Zero is never handed out.
static THREAD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_THREAD_ID: ThreadId = ThreadId(THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed));
}

/// Identifies the application thread that issued a captured call.
///
/// `std::thread::ThreadId` has no stable integer form, so each OS thread is
/// assigned a process-unique number on first use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// The identifier of the calling thread.
    ///
    /// Stable for the lifetime of the thread; distinct threads always get
    /// distinct values.
    pub fn current() -> Self {
        CURRENT_THREAD_ID.with(|id| *id)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ThreadId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_ids() {
        assert!(CaptureId::NULL.is_null());
        assert!(!CaptureId(7).is_null());
        assert!(LiveHandle::NULL.is_null());
        assert!(!LiveHandle(0x1000).is_null());
    }

    #[test]
    fn thread_id_stable_within_thread() {
        let a = ThreadId::current();
        let b = ThreadId::current();
        assert_eq!(a, b);
        assert_ne!(a.0, 0);
    }

    #[test]
    fn thread_ids_differ_across_threads() {
        let here = ThreadId::current();
        let there = std::thread::spawn(ThreadId::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn display_is_hex_for_handles() {
        assert_eq!(CaptureId(255).to_string(), "0xff");
        assert_eq!(LiveHandle(16).to_string(), "0x10");
        assert_eq!(CallId(3).to_string(), "3");
    }
}
