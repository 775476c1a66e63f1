//! Capture side of retrace: sessions and per-call encoders.
//!
//! An interception shim drives a [`CaptureSession`] for every intercepted
//! entry point:
//!
//! 1. [`CaptureSession::begin`] (or [`begin_lifetime`](CaptureSession::begin_lifetime)
//!    for calls that create or destroy objects). `None` means the session
//!    is not capturing and the call is not encoded.
//! 2. Encode the arguments on the returned [`CallEncoder`].
//! 3. Forward the call to the next layer.
//! 4. Encode created handles and the result.
//! 5. [`CallEncoder::end`] appends the record with the next sequence number.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod encoder;
pub mod error;
mod registry;
pub mod session;

pub use config::{CaptureConfig, CaptureIdPolicy, ConfigError};
pub use encoder::CallEncoder;
pub use error::CaptureError;
pub use session::{CaptureSession, CaptureSummary, SessionState};
