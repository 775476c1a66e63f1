//! Core types for the retrace capture/replay core.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! identifiers shared by every other crate in the workspace: capture-time
//! object identities, replay-time live handles, handle categories, call
//! identifiers, sequence numbers and native result codes.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod category;
pub mod id;
pub mod result;

pub use category::HandleCategory;
pub use id::{CallId, CaptureId, LiveHandle, SequenceNumber, ThreadId};
pub use result::ResultCode;
