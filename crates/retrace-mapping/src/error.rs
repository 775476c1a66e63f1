//! Error types for the identity and address tables.

use retrace_core::{CaptureId, HandleCategory};

/// Errors reported by [`ObjectTable`](crate::ObjectTable) and
/// [`GpuVaMap`](crate::GpuVaMap).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The capture id is already registered in this category.
    #[error("{category} {id} is already registered")]
    DuplicateHandle {
        /// Category of the registration.
        category: HandleCategory,
        /// The duplicated capture id.
        id: CaptureId,
    },
    /// No mapping exists for the capture id in this category.
    #[error("{category} {id} is not registered")]
    UnknownHandle {
        /// Category of the lookup.
        category: HandleCategory,
        /// The missing capture id.
        id: CaptureId,
    },
    /// The capture id maps to a slot whose creation failed during replay.
    #[error("{category} {id} refers to an object that failed to create")]
    SentinelHandle {
        /// Category of the lookup.
        category: HandleCategory,
        /// The capture id of the failed slot.
        id: CaptureId,
    },
    /// The reserved null capture id cannot be registered.
    #[error("cannot register the null capture id as a {category}")]
    NullCaptureId {
        /// Category of the attempted registration.
        category: HandleCategory,
    },
    /// Walking parent links never reached an object of the wanted category.
    #[error("{category} {id} has no owning {wanted}")]
    NoOwner {
        /// Category where the walk started.
        category: HandleCategory,
        /// Capture id where the walk started.
        id: CaptureId,
        /// The category that was searched for.
        wanted: HandleCategory,
    },
    /// Batch registration slices differ in length.
    #[error("batch registration with {ids} capture ids but {lives} live handles")]
    BatchLengthMismatch {
        /// Number of capture ids supplied.
        ids: usize,
        /// Number of live handles supplied.
        lives: usize,
    },
    /// A new address range intersects a live range on the same device.
    #[error(
        "range {base:#x}+{size:#x} on device {device} overlaps live range {existing_base:#x}+{existing_size:#x}"
    )]
    OverlappingRange {
        /// Owning device.
        device: CaptureId,
        /// Capture base of the rejected range.
        base: u64,
        /// Size of the rejected range.
        size: u64,
        /// Capture base of the range it collides with.
        existing_base: u64,
        /// Size of the range it collides with.
        existing_size: u64,
    },
    /// An address range with zero size was added.
    #[error("zero-sized range at {base:#x} on device {device}")]
    ZeroSizedRange {
        /// Owning device.
        device: CaptureId,
        /// Capture base of the rejected range.
        base: u64,
    },
    /// `base + size` does not fit in the 64-bit address space.
    #[error("range {base:#x}+{size:#x} on device {device} overflows the address space")]
    AddressOverflow {
        /// Owning device.
        device: CaptureId,
        /// Base address of the rejected range.
        base: u64,
        /// Size of the rejected range.
        size: u64,
    },
}
