//! Capture-side handle registry: native handle value to capture id.

use indexmap::IndexMap;
use retrace_core::{CaptureId, HandleCategory};

use crate::config::CaptureIdPolicy;

#[derive(Debug)]
pub(crate) struct HandleRegistry {
    policy: CaptureIdPolicy,
    ids: IndexMap<(HandleCategory, u64), CaptureId>,
    next_surrogate: u64,
    assigned: u64,
}

impl HandleRegistry {
    pub(crate) fn new(policy: CaptureIdPolicy) -> Self {
        Self {
            policy,
            ids: IndexMap::new(),
            next_surrogate: 1,
            assigned: 0,
        }
    }

    /// Assign an id to a freshly created native handle.
    ///
    /// A native value that is still registered was recycled by the driver
    /// without a captured destroy; the old mapping is replaced.
    pub(crate) fn assign(&mut self, category: HandleCategory, native: u64) -> CaptureId {
        let id = match self.policy {
            CaptureIdPolicy::NativeHandle => CaptureId(native),
            CaptureIdPolicy::Surrogate => {
                let id = CaptureId(self.next_surrogate);
                self.next_surrogate += 1;
                id
            }
        };
        if let Some(old) = self.ids.insert((category, native), id) {
            tracing::warn!(%category, native, %old, new = %id, "native handle reused without a captured destroy");
        }
        self.assigned += 1;
        id
    }

    pub(crate) fn get(&self, category: HandleCategory, native: u64) -> Option<CaptureId> {
        self.ids.get(&(category, native)).copied()
    }

    pub(crate) fn remove(&mut self, category: HandleCategory, native: u64) -> Option<CaptureId> {
        self.ids.swap_remove(&(category, native))
    }

    pub(crate) fn assigned(&self) -> u64 {
        self.assigned
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}
