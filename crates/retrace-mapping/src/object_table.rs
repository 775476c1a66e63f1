//! Capture-id to live-handle table.
//!
//! Identifier spaces are only unique within a [`HandleCategory`], so the
//! table keeps one sub-map per category. Each entry also remembers the
//! object it was created from, which lets the dispatcher find the device a
//! command buffer or buffer belongs to.

use indexmap::IndexMap;
use retrace_core::{CaptureId, HandleCategory, LiveHandle};

use crate::error::MappingError;

/// What a registered capture id currently resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// A live handle returned by the replay driver.
    Live(LiveHandle),
    /// Placeholder for an output slot whose creation failed during replay.
    ///
    /// Kept so positional references into a batch stay aligned. Looking it
    /// up is an error.
    Sentinel,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    slot: Slot,
    parent: Option<(HandleCategory, CaptureId)>,
}

/// Per-category mapping from [`CaptureId`] to [`LiveHandle`].
///
/// # Examples
///
/// ```
/// use retrace_core::{CaptureId, HandleCategory, LiveHandle};
/// use retrace_mapping::{MappingError, ObjectTable};
///
/// let mut table = ObjectTable::new();
/// table.register(HandleCategory::Buffer, CaptureId(5), LiveHandle(0xA0)).unwrap();
/// table.register(HandleCategory::Image, CaptureId(5), LiveHandle(0xB0)).unwrap();
///
/// assert_eq!(table.lookup(HandleCategory::Buffer, CaptureId(5)), Ok(LiveHandle(0xA0)));
/// assert_eq!(table.lookup(HandleCategory::Image, CaptureId(5)), Ok(LiveHandle(0xB0)));
///
/// table.unregister(HandleCategory::Buffer, CaptureId(5));
/// assert!(matches!(
///     table.lookup(HandleCategory::Buffer, CaptureId(5)),
///     Err(MappingError::UnknownHandle { .. })
/// ));
/// ```
#[derive(Debug, Default)]
pub struct ObjectTable {
    categories: IndexMap<HandleCategory, IndexMap<CaptureId, Entry>>,
}

impl ObjectTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping with no parent.
    ///
    /// A null `live` handle is stored as a [`Slot::Sentinel`].
    pub fn register(
        &mut self,
        category: HandleCategory,
        id: CaptureId,
        live: LiveHandle,
    ) -> Result<(), MappingError> {
        self.insert(category, id, live, None)
    }

    /// Register a mapping that records the object it was created from.
    pub fn register_with_parent(
        &mut self,
        category: HandleCategory,
        id: CaptureId,
        live: LiveHandle,
        parent: (HandleCategory, CaptureId),
    ) -> Result<(), MappingError> {
        self.insert(category, id, live, Some(parent))
    }

    fn insert(
        &mut self,
        category: HandleCategory,
        id: CaptureId,
        live: LiveHandle,
        parent: Option<(HandleCategory, CaptureId)>,
    ) -> Result<(), MappingError> {
        if id.is_null() {
            return Err(MappingError::NullCaptureId { category });
        }
        let map = self.categories.entry(category).or_default();
        if map.contains_key(&id) {
            return Err(MappingError::DuplicateHandle { category, id });
        }
        map.insert(
            id,
            Entry {
                slot: slot_for(live),
                parent,
            },
        );
        Ok(())
    }

    /// Register the outputs of one array-producing creation call.
    ///
    /// `ids[i]` is paired with `lives[i]`. A null live handle becomes a
    /// sentinel slot. A null capture id (the slot also failed at capture
    /// time) has nothing to key on and is skipped. Nothing is inserted if
    /// any id is already registered or repeated within the batch.
    ///
    /// Returns the number of entries written.
    pub fn register_batch(
        &mut self,
        category: HandleCategory,
        ids: &[CaptureId],
        lives: &[LiveHandle],
        parent: Option<(HandleCategory, CaptureId)>,
    ) -> Result<usize, MappingError> {
        if ids.len() != lives.len() {
            return Err(MappingError::BatchLengthMismatch {
                ids: ids.len(),
                lives: lives.len(),
            });
        }

        let map = self.categories.entry(category).or_default();
        for (i, id) in ids.iter().enumerate() {
            if id.is_null() {
                continue;
            }
            if map.contains_key(id) || ids[..i].contains(id) {
                return Err(MappingError::DuplicateHandle { category, id: *id });
            }
        }

        let mut written = 0;
        for (&id, &live) in ids.iter().zip(lives) {
            if id.is_null() {
                continue;
            }
            map.insert(
                id,
                Entry {
                    slot: slot_for(live),
                    parent,
                },
            );
            written += 1;
        }
        Ok(written)
    }

    /// The live handle for a required handle parameter.
    pub fn lookup(&self, category: HandleCategory, id: CaptureId) -> Result<LiveHandle, MappingError> {
        match self.entry(category, id)?.slot {
            Slot::Live(h) => Ok(h),
            Slot::Sentinel => Err(MappingError::SentinelHandle { category, id }),
        }
    }

    /// The live handle for an optional handle parameter.
    ///
    /// The reserved null capture id resolves to [`LiveHandle::NULL`] without
    /// touching the table.
    pub fn lookup_optional(
        &self,
        category: HandleCategory,
        id: CaptureId,
    ) -> Result<LiveHandle, MappingError> {
        if id.is_null() {
            return Ok(LiveHandle::NULL);
        }
        self.lookup(category, id)
    }

    /// The raw slot for `id`, including sentinels.
    pub fn slot(&self, category: HandleCategory, id: CaptureId) -> Option<Slot> {
        self.entry(category, id).ok().map(|e| e.slot)
    }

    /// Remove a mapping. Removing an absent id is not an error.
    ///
    /// Returns the removed slot, if there was one.
    pub fn unregister(&mut self, category: HandleCategory, id: CaptureId) -> Option<Slot> {
        self.categories
            .get_mut(&category)
            .and_then(|m| m.swap_remove(&id))
            .map(|e| e.slot)
    }

    /// The object `id` was created from, as recorded at registration.
    pub fn parent(
        &self,
        category: HandleCategory,
        id: CaptureId,
    ) -> Result<Option<(HandleCategory, CaptureId)>, MappingError> {
        Ok(self.entry(category, id)?.parent)
    }

    /// Walk parent links from `(category, id)` until an object of category
    /// `wanted` is reached, and return its capture id.
    ///
    /// Returns `id` itself when `category == wanted`.
    pub fn resolve_owner(
        &self,
        category: HandleCategory,
        id: CaptureId,
        wanted: HandleCategory,
    ) -> Result<CaptureId, MappingError> {
        let (mut cat, mut cur) = (category, id);
        // Parent chains are at most instance -> physical device -> device -> object -> child.
        for _ in 0..HandleCategory::ALL.len() {
            if cat == wanted {
                return Ok(cur);
            }
            match self.entry(cat, cur)?.parent {
                Some((pcat, pid)) => {
                    cat = pcat;
                    cur = pid;
                }
                None => break,
            }
        }
        Err(MappingError::NoOwner {
            category,
            id,
            wanted,
        })
    }

    /// Whether `id` is registered in `category` (live or sentinel).
    pub fn contains(&self, category: HandleCategory, id: CaptureId) -> bool {
        self.categories
            .get(&category)
            .is_some_and(|m| m.contains_key(&id))
    }

    /// Number of entries in one category.
    pub fn category_len(&self, category: HandleCategory) -> usize {
        self.categories.get(&category).map_or(0, IndexMap::len)
    }

    /// Total number of entries across all categories.
    pub fn len(&self) -> usize {
        self.categories.values().map(IndexMap::len).sum()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, category: HandleCategory, id: CaptureId) -> Result<&Entry, MappingError> {
        self.categories
            .get(&category)
            .and_then(|m| m.get(&id))
            .ok_or(MappingError::UnknownHandle { category, id })
    }
}

fn slot_for(live: LiveHandle) -> Slot {
    if live.is_null() {
        Slot::Sentinel
    } else {
        Slot::Live(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use HandleCategory::*;

    #[test]
    fn register_lookup_unregister() {
        let mut t = ObjectTable::new();
        t.register(Buffer, CaptureId(1), LiveHandle(100)).unwrap();
        assert_eq!(t.lookup(Buffer, CaptureId(1)), Ok(LiveHandle(100)));
        assert_eq!(t.unregister(Buffer, CaptureId(1)), Some(Slot::Live(LiveHandle(100))));
        assert_eq!(
            t.lookup(Buffer, CaptureId(1)),
            Err(MappingError::UnknownHandle { category: Buffer, id: CaptureId(1) })
        );
    }

    #[test]
    fn duplicate_register_rejected() {
        let mut t = ObjectTable::new();
        t.register(Device, CaptureId(3), LiveHandle(1)).unwrap();
        assert_eq!(
            t.register(Device, CaptureId(3), LiveHandle(2)),
            Err(MappingError::DuplicateHandle { category: Device, id: CaptureId(3) })
        );
        assert_eq!(t.lookup(Device, CaptureId(3)), Ok(LiveHandle(1)));
    }

    #[test]
    fn reregister_after_unregister_is_allowed() {
        let mut t = ObjectTable::new();
        t.register(Fence, CaptureId(3), LiveHandle(1)).unwrap();
        t.unregister(Fence, CaptureId(3));
        t.register(Fence, CaptureId(3), LiveHandle(2)).unwrap();
        assert_eq!(t.lookup(Fence, CaptureId(3)), Ok(LiveHandle(2)));
    }

    #[test]
    fn unregister_absent_is_noop() {
        let mut t = ObjectTable::new();
        assert_eq!(t.unregister(Sampler, CaptureId(9)), None);
        t.register(Sampler, CaptureId(1), LiveHandle(1)).unwrap();
        assert_eq!(t.unregister(Sampler, CaptureId(9)), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn null_id_resolves_only_for_optional_lookups() {
        let t = ObjectTable::new();
        assert_eq!(t.lookup_optional(DeviceMemory, CaptureId::NULL), Ok(LiveHandle::NULL));
        assert!(matches!(
            t.lookup(DeviceMemory, CaptureId::NULL),
            Err(MappingError::UnknownHandle { .. })
        ));
        assert!(matches!(
            t.lookup_optional(DeviceMemory, CaptureId(4)),
            Err(MappingError::UnknownHandle { .. })
        ));
    }

    #[test]
    fn null_id_cannot_be_registered() {
        let mut t = ObjectTable::new();
        assert_eq!(
            t.register(Queue, CaptureId::NULL, LiveHandle(1)),
            Err(MappingError::NullCaptureId { category: Queue })
        );
    }

    #[test]
    fn batch_preserves_order_and_sentinels() {
        let mut t = ObjectTable::new();
        let ids = [CaptureId(10), CaptureId(11), CaptureId(12), CaptureId(13)];
        let lives = [LiveHandle(0xA), LiveHandle(0xB), LiveHandle::NULL, LiveHandle(0xD)];
        let written = t.register_batch(Pipeline, &ids, &lives, None).unwrap();
        assert_eq!(written, 4);
        assert_eq!(t.lookup(Pipeline, CaptureId(10)), Ok(LiveHandle(0xA)));
        assert_eq!(t.lookup(Pipeline, CaptureId(11)), Ok(LiveHandle(0xB)));
        assert_eq!(t.slot(Pipeline, CaptureId(12)), Some(Slot::Sentinel));
        assert_eq!(
            t.lookup(Pipeline, CaptureId(12)),
            Err(MappingError::SentinelHandle { category: Pipeline, id: CaptureId(12) })
        );
        assert_eq!(t.lookup(Pipeline, CaptureId(13)), Ok(LiveHandle(0xD)));
    }

    #[test]
    fn batch_skips_null_capture_ids() {
        let mut t = ObjectTable::new();
        let ids = [CaptureId(1), CaptureId::NULL, CaptureId(3)];
        let lives = [LiveHandle(1), LiveHandle(2), LiveHandle(3)];
        assert_eq!(t.register_batch(CommandBuffer, &ids, &lives, None), Ok(2));
        assert_eq!(t.category_len(CommandBuffer), 2);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut t = ObjectTable::new();
        t.register(DescriptorSet, CaptureId(2), LiveHandle(1)).unwrap();
        let ids = [CaptureId(1), CaptureId(2)];
        let lives = [LiveHandle(5), LiveHandle(6)];
        assert!(t.register_batch(DescriptorSet, &ids, &lives, None).is_err());
        assert!(!t.contains(DescriptorSet, CaptureId(1)));

        let repeated = [CaptureId(7), CaptureId(7)];
        assert_eq!(
            t.register_batch(DescriptorSet, &repeated, &lives, None),
            Err(MappingError::DuplicateHandle { category: DescriptorSet, id: CaptureId(7) })
        );
        assert!(!t.contains(DescriptorSet, CaptureId(7)));
    }

    #[test]
    fn batch_length_mismatch() {
        let mut t = ObjectTable::new();
        assert_eq!(
            t.register_batch(Image, &[CaptureId(1)], &[], None),
            Err(MappingError::BatchLengthMismatch { ids: 1, lives: 0 })
        );
    }

    #[test]
    fn resolve_owner_walks_parents() {
        let mut t = ObjectTable::new();
        t.register(Instance, CaptureId(1), LiveHandle(1)).unwrap();
        t.register_with_parent(PhysicalDevice, CaptureId(2), LiveHandle(2), (Instance, CaptureId(1)))
            .unwrap();
        t.register_with_parent(Device, CaptureId(3), LiveHandle(3), (PhysicalDevice, CaptureId(2)))
            .unwrap();
        t.register_with_parent(CommandPool, CaptureId(4), LiveHandle(4), (Device, CaptureId(3)))
            .unwrap();
        t.register_with_parent(CommandBuffer, CaptureId(5), LiveHandle(5), (CommandPool, CaptureId(4)))
            .unwrap();

        assert_eq!(t.resolve_owner(CommandBuffer, CaptureId(5), Device), Ok(CaptureId(3)));
        assert_eq!(t.resolve_owner(CommandBuffer, CaptureId(5), Instance), Ok(CaptureId(1)));
        assert_eq!(t.resolve_owner(Device, CaptureId(3), Device), Ok(CaptureId(3)));
        assert_eq!(
            t.resolve_owner(Instance, CaptureId(1), Device),
            Err(MappingError::NoOwner { category: Instance, id: CaptureId(1), wanted: Device })
        );
    }

    #[test]
    fn resolve_owner_reports_missing_link() {
        let mut t = ObjectTable::new();
        t.register_with_parent(Buffer, CaptureId(8), LiveHandle(8), (Device, CaptureId(99)))
            .unwrap();
        assert_eq!(t.resolve_owner(Buffer, CaptureId(8), Device), Ok(CaptureId(99)));
        assert_eq!(
            t.resolve_owner(Buffer, CaptureId(8), PhysicalDevice),
            Err(MappingError::UnknownHandle { category: Device, id: CaptureId(99) })
        );
    }

    proptest! {
        #[test]
        fn categories_are_isolated(id in 1u64..1000, a in 1u64..u64::MAX, b in 1u64..u64::MAX) {
            let mut t = ObjectTable::new();
            t.register(Buffer, CaptureId(id), LiveHandle(a)).unwrap();
            t.register(Image, CaptureId(id), LiveHandle(b)).unwrap();
            prop_assert_eq!(t.lookup(Buffer, CaptureId(id)), Ok(LiveHandle(a)));
            prop_assert_eq!(t.lookup(Image, CaptureId(id)), Ok(LiveHandle(b)));
            t.unregister(Buffer, CaptureId(id));
            prop_assert_eq!(t.lookup(Image, CaptureId(id)), Ok(LiveHandle(b)));
        }

        #[test]
        fn batch_lookup_is_positional(lives in prop::collection::vec(0u64..8, 1..32)) {
            let mut t = ObjectTable::new();
            let ids: Vec<CaptureId> = (1..=lives.len() as u64).map(CaptureId).collect();
            let lives: Vec<LiveHandle> = lives.into_iter().map(LiveHandle).collect();
            let written = t.register_batch(Pipeline, &ids, &lives, None).unwrap();
            prop_assert_eq!(written, ids.len());
            for (id, live) in ids.iter().zip(&lives) {
                let expected = if live.is_null() { Slot::Sentinel } else { Slot::Live(*live) };
                prop_assert_eq!(t.slot(Pipeline, *id), Some(expected));
            }
        }
    }
}
