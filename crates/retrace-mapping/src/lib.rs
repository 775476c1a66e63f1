//! Identity and address remapping for retrace replay.
//!
//! A captured trace refers to objects by [`CaptureId`](retrace_core::CaptureId)
//! and to GPU memory by raw virtual addresses, both of which differ on the
//! replaying machine. This crate holds the two tables the replay dispatcher
//! uses to translate them:
//!
//! - [`ObjectTable`]: `(category, capture id) -> live handle`, exact match
//! - [`GpuVaMap`]: per-device interval map, offset-preserving translation
//!
//! Both tables are single-threaded. Callers that share one across threads
//! must serialize access themselves.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod gpu_va;
pub mod object_table;

pub use error::MappingError;
pub use gpu_va::{GpuRange, GpuVaMap};
pub use object_table::{ObjectTable, Slot};
