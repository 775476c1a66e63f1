//! Per-call encoder handed out by [`CaptureSession::begin`].
//!
//! Encoding writes into a buffer owned by the calling thread and reused
//! across calls, so the hot path never touches a shared lock. Only
//! [`CallEncoder::end`] reaches the session's sink.

use std::cell::Cell;
use std::io::Write;
use std::sync::RwLockWriteGuard;

use retrace_core::{CallId, CaptureId, HandleCategory, ResultCode, SequenceNumber};
use retrace_format::{StructValue, Value, ValueEncoder};
use smallvec::SmallVec;

use crate::error::CaptureError;
use crate::registry::HandleRegistry;
use crate::session::CaptureSession;

/// Buffers above this capacity are not kept for reuse.
const MAX_RETAINED_BUFFER: usize = 1 << 20;

thread_local! {
    static ENCODE_BUFFER: Cell<Vec<u8>> = const { Cell::new(Vec::new()) };
}

fn take_buffer() -> Vec<u8> {
    ENCODE_BUFFER.try_with(Cell::take).unwrap_or_default()
}

fn return_buffer(mut buf: Vec<u8>) {
    if buf.capacity() > MAX_RETAINED_BUFFER {
        return;
    }
    buf.clear();
    // A nested encoder on the same thread may have returned its buffer
    // first; keep whichever is larger.
    let _ = ENCODE_BUFFER.try_with(|slot| {
        let current = slot.take();
        slot.set(if current.capacity() >= buf.capacity() {
            current
        } else {
            buf
        });
    });
}

/// Encodes one call's arguments and result into a single trace record.
///
/// Values are appended in call order. Dropping the encoder without calling
/// [`end`](Self::end) discards the call and rolls back any capture ids it
/// assigned.
///
/// # Examples
///
/// ```
/// use retrace_capture::{CaptureConfig, CaptureSession};
/// use retrace_core::{CallId, HandleCategory, ResultCode};
///
/// let session = CaptureSession::from_writer(Vec::new(), CaptureConfig::default()).unwrap();
///
/// if let Some(mut enc) = session.begin_lifetime(CallId(10)) {
///     enc.encode_handle(HandleCategory::Device, 0x1000);
///     let id = enc.encode_new_handle(HandleCategory::Buffer, 0x2000).unwrap();
///     enc.encode_result(ResultCode::SUCCESS);
///     enc.end().unwrap();
///     assert_eq!(id.0, 0x2000);
/// };
/// ```
pub struct CallEncoder<'a, W: Write + Send> {
    session: &'a CaptureSession<W>,
    call_id: CallId,
    buf: Vec<u8>,
    values: u32,
    values_enc: ValueEncoder<'a>,
    lifetime: bool,
    identity: Option<RwLockWriteGuard<'a, HandleRegistry>>,
    created: SmallVec<[(HandleCategory, u64); 4]>,
    destroyed: SmallVec<[(HandleCategory, u64); 2]>,
    ended: bool,
}

impl<'a, W: Write + Send> CallEncoder<'a, W> {
    pub(crate) fn new(
        session: &'a CaptureSession<W>,
        call_id: CallId,
        lifetime: bool,
    ) -> Self {
        let mut buf = take_buffer();
        // Value count, patched in `end`.
        buf.extend_from_slice(&0u32.to_le_bytes());
        let values_enc = match session.supported_chain_tags() {
            Some(tags) => ValueEncoder::with_supported_links(tags),
            None => ValueEncoder::new(),
        };
        Self {
            session,
            call_id,
            buf,
            values: 0,
            values_enc,
            lifetime,
            identity: None,
            created: SmallVec::new(),
            destroyed: SmallVec::new(),
            ended: false,
        }
    }

    /// The call being encoded.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Whether this encoder may create or destroy objects.
    pub fn is_lifetime(&self) -> bool {
        self.lifetime
    }

    /// Append an already-built value.
    pub fn encode_value(&mut self, value: &Value) -> &mut Self {
        self.values_enc.encode(&mut self.buf, value);
        self.values += 1;
        self
    }

    /// Append a boolean.
    pub fn encode_bool(&mut self, v: bool) -> &mut Self {
        self.encode_value(&Value::Bool(v))
    }

    /// Append an unsigned 32-bit integer (enum, flags, count).
    pub fn encode_u32(&mut self, v: u32) -> &mut Self {
        self.encode_value(&Value::U32(v))
    }

    /// Append a signed 32-bit integer.
    pub fn encode_i32(&mut self, v: i32) -> &mut Self {
        self.encode_value(&Value::I32(v))
    }

    /// Append an unsigned 64-bit integer (size, offset).
    pub fn encode_u64(&mut self, v: u64) -> &mut Self {
        self.encode_value(&Value::U64(v))
    }

    /// Append a signed 64-bit integer.
    pub fn encode_i64(&mut self, v: i64) -> &mut Self {
        self.encode_value(&Value::I64(v))
    }

    /// Append a 32-bit float.
    pub fn encode_f32(&mut self, v: f32) -> &mut Self {
        self.encode_value(&Value::F32(v))
    }

    /// Append a 64-bit float.
    pub fn encode_f64(&mut self, v: f64) -> &mut Self {
        self.encode_value(&Value::F64(v))
    }

    /// Append a nullable string.
    pub fn encode_str(&mut self, s: Option<&str>) -> &mut Self {
        self.encode_value(&Value::Str(s.map(str::to_owned)))
    }

    /// Append a nullable byte blob.
    pub fn encode_bytes(&mut self, b: Option<&[u8]>) -> &mut Self {
        self.encode_value(&Value::Bytes(b.map(<[u8]>::to_vec)))
    }

    /// Append a structure. Unsupported chain links are dropped.
    pub fn encode_struct(&mut self, s: StructValue) -> &mut Self {
        self.encode_value(&Value::Struct(s))
    }

    /// Append a GPU virtual address.
    pub fn encode_address(&mut self, address: u64) -> &mut Self {
        self.encode_value(&Value::Address(address))
    }

    /// Append the call's native result code.
    pub fn encode_result(&mut self, code: ResultCode) -> &mut Self {
        self.encode_value(&Value::I64(code.0))
    }

    /// The capture id of an existing native handle.
    ///
    /// A null native handle maps to [`CaptureId::NULL`]. A handle whose
    /// creation was never captured is logged and also mapped to null.
    pub fn capture_id(&self, category: HandleCategory, native: u64) -> CaptureId {
        if native == 0 {
            return CaptureId::NULL;
        }
        let found = match &self.identity {
            Some(registry) => registry.get(category, native),
            None => self.session.registry_read().get(category, native),
        };
        found.unwrap_or_else(|| {
            tracing::warn!(call_id = %self.call_id, %category, native, "handle was not captured at creation; encoding null");
            CaptureId::NULL
        })
    }

    /// Append a reference to an existing object.
    pub fn encode_handle(&mut self, category: HandleCategory, native: u64) -> &mut Self {
        let id = self.capture_id(category, native);
        self.encode_value(&Value::handle(category, id))
    }

    /// Append an array of references to existing objects.
    pub fn encode_handles(&mut self, category: HandleCategory, natives: &[u64]) -> &mut Self {
        let items: Vec<Value> = natives
            .iter()
            .map(|&n| Value::handle(category, self.capture_id(category, n)))
            .collect();
        self.encode_value(&Value::Array(Some(items)))
    }

    /// The identity lock, taken on the first id assignment or release and
    /// held until the record is appended.
    fn registry_mut(&mut self) -> Result<&mut HandleRegistry, CaptureError> {
        self.require_lifetime()?;
        let session = self.session;
        let guard = match self.identity.take() {
            Some(guard) => guard,
            None => session.registry_write()?,
        };
        Ok(&mut **self.identity.insert(guard))
    }

    fn require_lifetime(&self) -> Result<(), CaptureError> {
        if self.lifetime {
            Ok(())
        } else {
            Err(CaptureError::NotLifetimeEncoder {
                call_id: self.call_id,
            })
        }
    }

    fn assign(&mut self, category: HandleCategory, native: u64) -> Result<CaptureId, CaptureError> {
        if native == 0 {
            // Creation failed at capture time; nothing to identify.
            self.require_lifetime()?;
            return Ok(CaptureId::NULL);
        }
        let id = self.registry_mut()?.assign(category, native);
        self.created.push((category, native));
        Ok(id)
    }

    /// Assign a capture id to an object this call created and append it.
    pub fn encode_new_handle(
        &mut self,
        category: HandleCategory,
        native: u64,
    ) -> Result<CaptureId, CaptureError> {
        let id = self.assign(category, native)?;
        self.encode_value(&Value::handle(category, id));
        Ok(id)
    }

    /// Assign capture ids to a batch of created objects and append them as
    /// one array, preserving order. Null slots stay null.
    pub fn encode_new_handles(
        &mut self,
        category: HandleCategory,
        natives: &[u64],
    ) -> Result<Vec<CaptureId>, CaptureError> {
        let ids = natives
            .iter()
            .map(|&n| self.assign(category, n))
            .collect::<Result<Vec<_>, _>>()?;
        let items: Vec<Value> = ids.iter().map(|&id| Value::handle(category, id)).collect();
        self.encode_value(&Value::Array(Some(items)));
        Ok(ids)
    }

    /// Append a reference to an object this call destroys. Its mapping is
    /// released once the record is written.
    pub fn encode_destroyed_handle(
        &mut self,
        category: HandleCategory,
        native: u64,
    ) -> Result<CaptureId, CaptureError> {
        self.registry_mut()?;
        let id = self.capture_id(category, native);
        if native != 0 {
            self.destroyed.push((category, native));
        }
        self.encode_value(&Value::handle(category, id));
        Ok(id)
    }

    /// Finish the call and append its record.
    ///
    /// Returns the sequence number the record was written with.
    pub fn end(mut self) -> Result<SequenceNumber, CaptureError> {
        let count = self.values.to_le_bytes();
        self.buf[..4].copy_from_slice(&count);

        let sequence = self.session.append(self.call_id, &self.buf)?;
        self.ended = true;

        if let Some(mut registry) = self.identity.take() {
            for (category, native) in self.destroyed.drain(..) {
                registry.remove(category, native);
            }
        }
        self.session
            .note_skipped_links(self.values_enc.skipped_links().len());
        Ok(sequence)
    }
}

impl<W: Write + Send> Drop for CallEncoder<'_, W> {
    fn drop(&mut self) {
        if !self.ended {
            if let Some(registry) = self.identity.as_deref_mut() {
                for &(category, native) in &self.created {
                    registry.remove(category, native);
                }
            }
            tracing::debug!(call_id = %self.call_id, "call discarded without end");
        }
        return_buffer(std::mem::take(&mut self.buf));
    }
}
