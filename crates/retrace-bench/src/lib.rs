//! Benchmark profiles for the retrace capture/replay core.
//!
//! - [`draw_call_values`]: argument list shaped like a command-buffer call
//! - [`populated_table`]: object table with `n` buffers under one device
//! - [`populated_va_map`]: address map with `n` adjacent ranges

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use retrace_core::{CaptureId, HandleCategory, LiveHandle};
use retrace_format::{StructValue, Value};
use retrace_mapping::{GpuVaMap, ObjectTable};

/// Device every profile object belongs to.
pub const DEVICE: CaptureId = CaptureId(1);

/// Size of each range in [`populated_va_map`].
pub const RANGE_SIZE: u64 = 0x1_0000;

/// Capture-time base address of the first range.
pub const CAPTURE_BASE: u64 = 0x1000_0000_0000;

/// A command-buffer call binding `handles` buffers and pushing one
/// structure with two device addresses and an extension link.
pub fn draw_call_values(handles: usize) -> Vec<Value> {
    let mut values = vec![Value::handle(HandleCategory::CommandBuffer, CaptureId(2))];
    values.push(Value::Array(Some(
        (0..handles)
            .map(|i| Value::handle(HandleCategory::Buffer, CaptureId(100 + i as u64)))
            .collect(),
    )));
    values.push(Value::Struct(
        StructValue::new(
            7,
            vec![
                Value::Address(CAPTURE_BASE + 0x40),
                Value::Address(CAPTURE_BASE + RANGE_SIZE),
                Value::U32(3),
            ],
        )
        .with_link(1_000_000_001, vec![Value::Bool(true), Value::F32(0.5)]),
    ));
    values.push(Value::Str(Some("main".into())));
    values
}

/// An object table holding one device and `n` buffers parented to it,
/// with capture ids `100..100 + n`.
pub fn populated_table(n: usize) -> ObjectTable {
    let mut table = ObjectTable::new();
    table
        .register(HandleCategory::Device, DEVICE, LiveHandle(0xD))
        .expect("fresh table");
    let ids: Vec<CaptureId> = (0..n as u64).map(|i| CaptureId(100 + i)).collect();
    let lives: Vec<LiveHandle> = (0..n as u64).map(|i| LiveHandle(0x10_000 + i)).collect();
    table
        .register_batch(HandleCategory::Buffer, &ids, &lives, Some((HandleCategory::Device, DEVICE)))
        .expect("fresh ids");
    table
}

/// An address map with `n` adjacent ranges of [`RANGE_SIZE`] bytes on
/// [`DEVICE`], starting at [`CAPTURE_BASE`].
pub fn populated_va_map(n: usize) -> GpuVaMap {
    let mut map = GpuVaMap::new();
    for i in 0..n as u64 {
        map.add_range(
            DEVICE,
            CAPTURE_BASE + i * RANGE_SIZE,
            RANGE_SIZE,
            0x7F00_0000_0000 + i * RANGE_SIZE * 2,
            CaptureId(100 + i),
        )
        .expect("ranges are disjoint");
    }
    map
}
