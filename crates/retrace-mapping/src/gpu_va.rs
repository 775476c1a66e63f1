//! GPU virtual address remapping.
//!
//! Device addresses are not typed handles: drivers reuse the same numeric
//! space across allocations and across runs, and payloads routinely carry
//! addresses that point into the middle of an allocation. Translation is
//! therefore an interval search rather than an exact-match lookup.
//!
//! Ranges are kept per device in a `BTreeMap` keyed by capture base. Live
//! ranges on one device never overlap, so the only candidate for an
//! address is the range with the greatest base at or below it.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use retrace_core::CaptureId;

use crate::error::MappingError;

/// One translated address range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuRange {
    /// First address of the range at capture time.
    pub capture_base: u64,
    /// Length in bytes. Never zero.
    pub size: u64,
    /// First address of the range during replay.
    pub replay_base: u64,
    /// Object that owns the allocation (buffer, resource, acceleration structure).
    pub owner: CaptureId,
}

impl GpuRange {
    /// One past the last capture-time address.
    pub fn capture_end(&self) -> u64 {
        self.capture_base + self.size
    }

    /// Whether `address` lies in `[capture_base, capture_base + size)`.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.capture_base && address - self.capture_base < self.size
    }

    fn translate(&self, address: u64) -> u64 {
        self.replay_base + (address - self.capture_base)
    }
}

/// Per-device interval map from capture-time to replay-time addresses.
///
/// # Examples
///
/// ```
/// use retrace_core::CaptureId;
/// use retrace_mapping::GpuVaMap;
///
/// let dev = CaptureId(1);
/// let mut map = GpuVaMap::new();
/// map.add_range(dev, 0x1000, 0x100, 0x9000, CaptureId(7)).unwrap();
///
/// assert_eq!(map.translate(dev, 0x1040), 0x9040);
/// assert_eq!(map.translate(dev, 0x2000), 0x2000);
///
/// map.remove_range(dev, 0x1000);
/// assert_eq!(map.translate(dev, 0x1040), 0x1040);
/// ```
#[derive(Debug, Default)]
pub struct GpuVaMap {
    devices: IndexMap<CaptureId, BTreeMap<u64, GpuRange>>,
}

impl GpuVaMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a translation range for `device`.
    ///
    /// Fails if the range is empty, if either end overflows the 64-bit
    /// address space, or if it intersects a live range of the same device.
    pub fn add_range(
        &mut self,
        device: CaptureId,
        capture_base: u64,
        size: u64,
        replay_base: u64,
        owner: CaptureId,
    ) -> Result<(), MappingError> {
        if size == 0 {
            return Err(MappingError::ZeroSizedRange {
                device,
                base: capture_base,
            });
        }
        let end = capture_base
            .checked_add(size)
            .ok_or(MappingError::AddressOverflow {
                device,
                base: capture_base,
                size,
            })?;
        if replay_base.checked_add(size).is_none() {
            return Err(MappingError::AddressOverflow {
                device,
                base: replay_base,
                size,
            });
        }

        let ranges = self.devices.entry(device).or_default();
        let below = ranges.range(..=capture_base).next_back().map(|(_, r)| r);
        let above = ranges.range(capture_base..).next().map(|(_, r)| r);
        let collision = below
            .filter(|r| r.capture_end() > capture_base)
            .or_else(|| above.filter(|r| r.capture_base < end));
        if let Some(existing) = collision {
            return Err(MappingError::OverlappingRange {
                device,
                base: capture_base,
                size,
                existing_base: existing.capture_base,
                existing_size: existing.size,
            });
        }

        ranges.insert(
            capture_base,
            GpuRange {
                capture_base,
                size,
                replay_base,
                owner,
            },
        );
        Ok(())
    }

    /// Remove the range starting exactly at `capture_base`. No-op if absent.
    pub fn remove_range(&mut self, device: CaptureId, capture_base: u64) -> Option<GpuRange> {
        self.devices.get_mut(&device)?.remove(&capture_base)
    }

    /// Remove every range owned by `owner` on `device`. Returns how many went.
    pub fn remove_owned_by(&mut self, device: CaptureId, owner: CaptureId) -> usize {
        let Some(ranges) = self.devices.get_mut(&device) else {
            return 0;
        };
        let before = ranges.len();
        ranges.retain(|_, r| r.owner != owner);
        before - ranges.len()
    }

    /// Drop all ranges of a destroyed device. Returns how many went.
    pub fn remove_device(&mut self, device: CaptureId) -> usize {
        self.devices
            .swap_remove(&device)
            .map_or(0, |ranges| ranges.len())
    }

    /// The live range containing `address`, if any.
    pub fn range_containing(&self, device: CaptureId, address: u64) -> Option<&GpuRange> {
        self.devices
            .get(&device)?
            .range(..=address)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(address))
    }

    /// Translate a capture-time address.
    ///
    /// Inside a live range the offset is preserved; outside every range the
    /// address is returned unchanged. Only call this on values known to be
    /// device addresses.
    pub fn translate(&self, device: CaptureId, address: u64) -> u64 {
        self.range_containing(device, address)
            .map_or(address, |r| r.translate(address))
    }

    /// Translate a batch of addresses in place.
    pub fn translate_all(&self, device: CaptureId, addresses: &mut [u64]) {
        let Some(ranges) = self.devices.get(&device) else {
            return;
        };
        for a in addresses {
            if let Some((_, r)) = ranges.range(..=*a).next_back() {
                if r.contains(*a) {
                    *a = r.translate(*a);
                }
            }
        }
    }

    /// Number of live ranges on `device`.
    pub fn range_count(&self, device: CaptureId) -> usize {
        self.devices.get(&device).map_or(0, BTreeMap::len)
    }

    /// Total number of live ranges across devices.
    pub fn len(&self) -> usize {
        self.devices.values().map(BTreeMap::len).sum()
    }

    /// Whether no ranges are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
