//! The capture session: owns the trace sink and object identity state.
//!
//! # Locking
//!
//! Two locks, always taken in this order:
//!
//! 1. `registry` (`RwLock`): native handle to capture id. Plain calls take
//!    the read side briefly per handle they encode. A lifetime call (one
//!    that creates or destroys objects) takes the write side at its first
//!    id assignment or release and holds it until its record is appended,
//!    so creations reach the file in the same order their ids were handed
//!    out. The forwarded native call runs before that point, outside the
//!    lock.
//! 2. `sink` (`Mutex`): the trace writer and the sequence counter. Held
//!    only for the append of one finished payload.
//!
//! Encoding itself happens in a thread-local buffer outside both locks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use retrace_core::{CallId, SequenceNumber, ThreadId};
use retrace_format::{CapabilityFlags, TraceHeader, TraceMetadata, TraceWriter};

use crate::config::{CaptureConfig, CaptureIdPolicy};
use crate::encoder::CallEncoder;
use crate::error::CaptureError;
use crate::registry::HandleRegistry;

const CAPTURING: u8 = 0;
const PAUSED: u8 = 1;
const FINALIZED: u8 = 2;

/// Lifecycle state of a [`CaptureSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Calls are being recorded.
    Capturing,
    /// [`begin`](CaptureSession::begin) yields no encoder.
    Paused,
    /// The sink has been flushed and released.
    Finalized,
}

/// Totals reported when a session is finalized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Call records appended to the trace.
    pub records_written: u64,
    /// Capture ids handed out to created objects.
    pub capture_ids_assigned: u64,
    /// Extension-chain links dropped because their tag was unsupported.
    pub skipped_chain_links: u64,
}

struct Sink<W: Write> {
    writer: TraceWriter<W>,
    next_sequence: u64,
    since_flush: u64,
}

/// An active capture.
///
/// Shared by reference (or `Arc`) between application threads. Each
/// intercepted call asks for a [`CallEncoder`] with [`begin`] or
/// [`begin_lifetime`], encodes its arguments and result, and calls
/// [`CallEncoder::end`].
///
/// Dropping a session that was not finalized flushes the sink and logs any
/// failure.
///
/// [`begin`]: CaptureSession::begin
/// [`begin_lifetime`]: CaptureSession::begin_lifetime
pub struct CaptureSession<W: Write + Send> {
    config: CaptureConfig,
    state: AtomicU8,
    registry: RwLock<HandleRegistry>,
    sink: Mutex<Option<Sink<W>>>,
    skipped_chain_links: AtomicU64,
}

impl CaptureSession<BufWriter<File>> {
    /// Create (or truncate) a trace file at `path` and start a session on it.
    pub fn create(path: impl AsRef<Path>, config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        let file = File::create(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "opened trace file");
        Self::from_writer(BufWriter::new(file), config)
    }
}

impl<W: Write + Send> CaptureSession<W> {
    /// Start a session writing to `writer`. The header is written immediately.
    pub fn from_writer(writer: W, config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let mut capabilities = CapabilityFlags::GPU_ADDRESSES | CapabilityFlags::EXTENSION_CHAINS;
        if config.capture_id_policy == CaptureIdPolicy::Surrogate {
            capabilities |= CapabilityFlags::HANDLE_IDS_ARE_SURROGATE;
        }
        let header = TraceHeader::new(
            capabilities,
            TraceMetadata {
                application: config.application_name.clone(),
                api: config.api_name.clone(),
                tool_version: env!("CARGO_PKG_VERSION").into(),
            },
        );
        let writer = TraceWriter::new(writer, &header)?;

        let state = if config.start_paused { PAUSED } else { CAPTURING };
        tracing::info!(
            application = %config.application_name,
            api = %config.api_name,
            policy = ?config.capture_id_policy,
            paused = config.start_paused,
            "capture session started"
        );

        Ok(Self {
            registry: RwLock::new(HandleRegistry::new(config.capture_id_policy)),
            config,
            state: AtomicU8::new(state),
            sink: Mutex::new(Some(Sink {
                writer,
                next_sequence: 1,
                since_flush: 0,
            })),
            skipped_chain_links: AtomicU64::new(0),
        })
    }

    /// The session's configuration.
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            CAPTURING => SessionState::Capturing,
            PAUSED => SessionState::Paused,
            _ => SessionState::Finalized,
        }
    }

    /// Whether calls begun now will be recorded.
    pub fn is_capturing(&self) -> bool {
        self.state.load(Ordering::Acquire) == CAPTURING
    }

    /// Start encoding a call that neither creates nor destroys objects.
    ///
    /// Returns `None` when the session is paused or finalized; the caller
    /// then skips all encoding for this call.
    pub fn begin(&self, call_id: CallId) -> Option<CallEncoder<'_, W>> {
        if !self.is_capturing() {
            return None;
        }
        Some(CallEncoder::new(self, call_id, false))
    }

    /// Start encoding a call that creates or destroys objects.
    ///
    /// The identity lock is not taken here. The encoder acquires it when it
    /// first assigns or releases a capture id. From then on, calls begun on
    /// the same thread must not encode handles until this encoder ends.
    /// Returns `None` when the session is not capturing.
    pub fn begin_lifetime(&self, call_id: CallId) -> Option<CallEncoder<'_, W>> {
        if !self.is_capturing() {
            return None;
        }
        Some(CallEncoder::new(self, call_id, true))
    }

    /// Stop recording until [`resume`](Self::resume).
    pub fn pause(&self) -> Result<(), CaptureError> {
        self.transition(CAPTURING, PAUSED)?;
        tracing::info!("capture paused");
        Ok(())
    }

    /// Resume recording after [`pause`](Self::pause) or a paused start.
    pub fn resume(&self) -> Result<(), CaptureError> {
        self.transition(PAUSED, CAPTURING)?;
        tracing::info!("capture resumed");
        Ok(())
    }

    fn transition(&self, from: u8, to: u8) -> Result<(), CaptureError> {
        match self
            .state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(FINALIZED) => Err(CaptureError::Finalized),
            // Already in the target state.
            Err(_) => Ok(()),
        }
    }

    /// Flush and release the sink. Calls ended afterwards fail with
    /// [`CaptureError::Finalized`].
    pub fn finalize(&self) -> Result<CaptureSummary, CaptureError> {
        let mut sink = self.take_sink()?;
        sink.writer.flush()?;
        Ok(self.finish_summary(&sink))
    }

    /// Finalize and hand back the underlying sink.
    pub fn finish(self) -> Result<(W, CaptureSummary), CaptureError> {
        let mut sink = self.take_sink()?;
        sink.writer.flush()?;
        let summary = self.finish_summary(&sink);
        Ok((sink.writer.into_inner(), summary))
    }

    /// Records appended so far.
    pub fn records_written(&self) -> u64 {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |s| s.writer.records_written())
    }

    fn take_sink(&self) -> Result<Sink<W>, CaptureError> {
        self.state.store(FINALIZED, Ordering::Release);
        let mut guard = self.sink.lock().map_err(|_| CaptureError::Poisoned)?;
        guard.take().ok_or(CaptureError::Finalized)
    }

    fn finish_summary(&self, sink: &Sink<W>) -> CaptureSummary {
        let summary = CaptureSummary {
            records_written: sink.writer.records_written(),
            capture_ids_assigned: self.registry_read().assigned(),
            skipped_chain_links: self.skipped_chain_links.load(Ordering::Relaxed),
        };
        tracing::info!(
            records = summary.records_written,
            ids = summary.capture_ids_assigned,
            skipped_links = summary.skipped_chain_links,
            "capture session finalized"
        );
        summary
    }

    pub(crate) fn registry_read(&self) -> RwLockReadGuard<'_, HandleRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry_write(&self) -> Result<RwLockWriteGuard<'_, HandleRegistry>, CaptureError> {
        self.registry.write().map_err(|_| {
            tracing::error!("identity lock poisoned");
            CaptureError::Poisoned
        })
    }

    pub(crate) fn supported_chain_tags(&self) -> Option<&std::collections::HashSet<u32>> {
        self.config.supported_chain_tags.as_ref()
    }

    pub(crate) fn note_skipped_links(&self, count: usize) {
        if count > 0 {
            self.skipped_chain_links
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Append one finished payload, assigning the next sequence number.
    pub(crate) fn append(&self, call_id: CallId, payload: &[u8]) -> Result<SequenceNumber, CaptureError> {
        let mut guard = self.sink.lock().map_err(|_| CaptureError::Poisoned)?;
        let sink = guard.as_mut().ok_or(CaptureError::Finalized)?;

        let sequence = SequenceNumber(sink.next_sequence);
        sink.writer
            .append(call_id, ThreadId::current(), sequence, payload)?;
        sink.next_sequence += 1;

        if let Some(interval) = self.config.flush_interval {
            sink.since_flush += 1;
            if sink.since_flush >= interval {
                sink.writer.flush()?;
                sink.since_flush = 0;
            }
        }
        tracing::trace!(%call_id, %sequence, len = payload.len(), "record appended");
        Ok(sequence)
    }
}

impl<W: Write + Send> Drop for CaptureSession<W> {
    fn drop(&mut self) {
        let sink = self
            .sink
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut sink) = sink {
            match sink.writer.flush() {
                Ok(()) => tracing::info!(
                    records = sink.writer.records_written(),
                    "capture session closed on drop"
                ),
                Err(e) => tracing::error!(error = %e, "failed to flush trace on teardown"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::HandleCategory;
    use retrace_format::TraceReader;

    fn session() -> CaptureSession<Vec<u8>> {
        CaptureSession::from_writer(Vec::new(), CaptureConfig::default()).unwrap()
    }

    #[test]
    fn begin_is_none_while_paused() {
        let s = session();
        s.pause().unwrap();
        assert_eq!(s.state(), SessionState::Paused);
        assert!(s.begin(CallId(1)).is_none());
        assert!(s.begin_lifetime(CallId(1)).is_none());
        s.resume().unwrap();
        assert!(s.begin(CallId(1)).is_some());
    }

    #[test]
    fn start_paused_config() {
        let cfg = CaptureConfig {
            start_paused: true,
            ..CaptureConfig::default()
        };
        let s = CaptureSession::from_writer(Vec::new(), cfg).unwrap();
        assert!(s.begin(CallId(1)).is_none());
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = CaptureConfig {
            flush_interval: Some(0),
            ..CaptureConfig::default()
        };
        assert!(matches!(
            CaptureSession::from_writer(Vec::new(), cfg),
            Err(CaptureError::Config(_))
        ));
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase() {
        let s = session();
        let mut seqs = Vec::new();
        for _ in 0..3 {
            let mut enc = s.begin(CallId(9)).unwrap();
            enc.encode_u32(1);
            seqs.push(enc.end().unwrap());
        }
        assert_eq!(seqs, vec![SequenceNumber(1), SequenceNumber(2), SequenceNumber(3)]);
        assert_eq!(s.records_written(), 3);
    }

    #[test]
    fn finalize_twice_and_end_after_finalize() {
        let s = session();
        let enc = s.begin(CallId(1)).unwrap();
        let summary = s.finalize().unwrap();
        assert_eq!(summary.records_written, 0);
        assert!(matches!(enc.end(), Err(CaptureError::Finalized)));
        assert!(matches!(s.finalize(), Err(CaptureError::Finalized)));
        assert!(matches!(s.resume(), Err(CaptureError::Finalized)));
        assert!(s.begin(CallId(1)).is_none());
    }

    #[test]
    fn finish_returns_readable_trace() {
        let cfg = CaptureConfig {
            capture_id_policy: CaptureIdPolicy::Surrogate,
            application_name: "unit".into(),
            ..CaptureConfig::default()
        };
        let s = CaptureSession::from_writer(Vec::new(), cfg).unwrap();
        let mut enc = s.begin_lifetime(CallId(2)).unwrap();
        enc.encode_new_handle(HandleCategory::Device, 0xABC).unwrap();
        enc.end().unwrap();

        let (bytes, summary) = s.finish().unwrap();
        assert_eq!(summary.records_written, 1);
        assert_eq!(summary.capture_ids_assigned, 1);

        let reader = TraceReader::open(bytes.as_slice()).unwrap();
        let header = reader.header();
        assert_eq!(header.metadata.application, "unit");
        assert!(header
            .capabilities
            .contains(CapabilityFlags::HANDLE_IDS_ARE_SURROGATE));
    }
}
