//! Replay side of retrace: call schemas, the live API seam, and the
//! sequential dispatcher.
//!
//! A [`Dispatcher`] reads records in sequence order, decodes their
//! arguments, remaps every capture id to a live handle and every known
//! device address to its replay-time address, invokes the [`LiveApi`],
//! and then updates its object table and address map from the outputs.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod live;
pub mod report;
pub mod schema;

pub use config::{ConfigError, FailurePolicy, ReplayConfig};
pub use dispatcher::{Dispatcher, DispatcherState};
pub use error::ReplayError;
pub use live::{Created, LiveApi, LiveCall, QueriedAddress};
pub use report::{DispatchOutcome, Divergence, ReplaySummary};
pub use schema::{CallKind, CallSchema, SchemaRegistry};
