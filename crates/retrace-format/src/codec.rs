//! Binary encode/decode for call payloads and the trace file.
//!
//! All integers are little-endian. Counts and lengths are `u32`. Every value
//! starts with a one-byte kind tag, so a payload can be walked without the
//! call's schema; nullable kinds add a presence byte after the tag.
//!
//! Decoding works on a byte slice through [`ByteCursor`], which checks the
//! remaining length before every read. Declared counts are validated against
//! the bytes that remain before anything is allocated.

use std::collections::HashSet;
use std::io::{Read, Write};

use retrace_core::{CallId, CaptureId, HandleCategory, SequenceNumber, ThreadId};
use smallvec::SmallVec;

use crate::error::FormatError;
use crate::types::{CallRecord, CapabilityFlags, TraceHeader, TraceMetadata};
use crate::value::{ChainLink, ExtensionChain, StructValue, Value};
use crate::{FORMAT_VERSION, MAGIC, MAX_NESTING, MAX_PAYLOAD_LEN};

// ── Kind tags ───────────────────────────────────────────────────

/// Kind tag for [`Value::Bool`].
pub const KIND_BOOL: u8 = 0x01;
/// Kind tag for [`Value::U8`].
pub const KIND_U8: u8 = 0x02;
/// Kind tag for [`Value::U32`].
pub const KIND_U32: u8 = 0x03;
/// Kind tag for [`Value::I32`].
pub const KIND_I32: u8 = 0x04;
/// Kind tag for [`Value::U64`].
pub const KIND_U64: u8 = 0x05;
/// Kind tag for [`Value::I64`].
pub const KIND_I64: u8 = 0x06;
/// Kind tag for [`Value::F32`].
pub const KIND_F32: u8 = 0x07;
/// Kind tag for [`Value::F64`].
pub const KIND_F64: u8 = 0x08;
/// Kind tag for [`Value::Handle`].
pub const KIND_HANDLE: u8 = 0x10;
/// Kind tag for [`Value::Address`].
pub const KIND_ADDRESS: u8 = 0x11;
/// Kind tag for [`Value::Str`].
pub const KIND_STR: u8 = 0x20;
/// Kind tag for [`Value::Bytes`].
pub const KIND_BYTES: u8 = 0x21;
/// Kind tag for [`Value::Pointer`].
pub const KIND_POINTER: u8 = 0x22;
/// Kind tag for [`Value::Array`].
pub const KIND_ARRAY: u8 = 0x23;
/// Kind tag for [`Value::Struct`].
pub const KIND_STRUCT: u8 = 0x30;

/// Chain link tag that terminates an extension chain.
pub const CHAIN_END: u32 = 0;

// ── Primitive writers ───────────────────────────────────────────

/// Write a single byte.
pub fn write_u8(w: &mut dyn Write, v: u8) -> Result<(), FormatError> {
    w.write_all(&[v])?;
    Ok(())
}

/// Write a little-endian u32.
pub fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u64.
pub fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a length-prefixed UTF-8 string (u32 length + bytes).
pub fn write_length_prefixed_str(w: &mut dyn Write, s: &str) -> Result<(), FormatError> {
    write_u32_le(w, s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

// ── Primitive readers ───────────────────────────────────────────

/// Read a single byte.
pub fn read_u8(r: &mut dyn Read) -> Result<u8, FormatError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Read a little-endian u32.
pub fn read_u32_le(r: &mut dyn Read) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64_le(r: &mut dyn Read) -> Result<u64, FormatError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a length-prefixed UTF-8 string.
///
/// The length is trusted only as far as the stream actually delivers bytes.
pub fn read_length_prefixed_str(r: &mut dyn Read) -> Result<String, FormatError> {
    let len = read_u32_le(r)? as usize;
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(FormatError::Truncated {
            what: "header string",
            needed: len,
            available: buf.len(),
        });
    }
    Ok(String::from_utf8(buf)?)
}

// ── Byte cursor ─────────────────────────────────────────────────

/// Bounds-checked reader over an in-memory payload.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    /// A cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
        if n > self.remaining() {
            return Err(FormatError::Truncated {
                what,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    /// Read a byte.
    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, FormatError> {
        Ok(self.array::<1>(what)?[0])
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self, what: &'static str) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    /// Read a little-endian u64.
    pub fn read_u64(&mut self, what: &'static str) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.array(what)?))
    }

    /// Read a u32 count and check that `count * min_elem_size` bytes remain.
    pub fn read_count(&mut self, what: &'static str, min_elem_size: usize) -> Result<usize, FormatError> {
        let count = self.read_u32(what)? as usize;
        let needed = count.saturating_mul(min_elem_size);
        if needed > self.remaining() {
            return Err(FormatError::CountExceedsPayload {
                what,
                declared: count as u64,
                available: self.remaining(),
            });
        }
        Ok(count)
    }
}

// ── Value encoding ──────────────────────────────────────────────

/// Encodes [`Value`] trees, optionally dropping unsupported chain links.
///
/// Links whose tag is not in the supported set (and links using the
/// reserved terminator tag) are left out of the encoding and remembered in
/// [`skipped_links`](ValueEncoder::skipped_links). The rest of the call is
/// still encoded.
#[derive(Default)]
pub struct ValueEncoder<'s> {
    supported_links: Option<&'s HashSet<u32>>,
    skipped: SmallVec<[u32; 4]>,
}

impl<'s> ValueEncoder<'s> {
    /// An encoder that accepts every chain link.
    pub fn new() -> Self {
        Self::default()
    }

    /// An encoder that only writes chain links whose tag is in `supported`.
    pub fn with_supported_links(supported: &'s HashSet<u32>) -> Self {
        Self {
            supported_links: Some(supported),
            skipped: SmallVec::new(),
        }
    }

    /// Tags of chain links skipped so far.
    pub fn skipped_links(&self) -> &[u32] {
        &self.skipped
    }

    /// Append one value to `buf`.
    pub fn encode(&mut self, buf: &mut Vec<u8>, value: &Value<CaptureId>) {
        match value {
            Value::Bool(v) => {
                buf.push(KIND_BOOL);
                buf.push(*v as u8);
            }
            Value::U8(v) => {
                buf.push(KIND_U8);
                buf.push(*v);
            }
            Value::U32(v) => {
                buf.push(KIND_U32);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::I32(v) => {
                buf.push(KIND_I32);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::U64(v) => {
                buf.push(KIND_U64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::I64(v) => {
                buf.push(KIND_I64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::F32(v) => {
                buf.push(KIND_F32);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::F64(v) => {
                buf.push(KIND_F64);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Handle { category, handle } => {
                buf.push(KIND_HANDLE);
                buf.extend_from_slice(&category.tag().to_le_bytes());
                buf.extend_from_slice(&handle.0.to_le_bytes());
            }
            Value::Address(a) => {
                buf.push(KIND_ADDRESS);
                buf.extend_from_slice(&a.to_le_bytes());
            }
            Value::Str(s) => {
                buf.push(KIND_STR);
                put_nullable_bytes(buf, s.as_deref().map(str::as_bytes));
            }
            Value::Bytes(b) => {
                buf.push(KIND_BYTES);
                put_nullable_bytes(buf, b.as_deref());
            }
            Value::Pointer(p) => {
                buf.push(KIND_POINTER);
                match p {
                    Some(inner) => {
                        buf.push(1);
                        self.encode(buf, inner);
                    }
                    None => buf.push(0),
                }
            }
            Value::Array(a) => {
                buf.push(KIND_ARRAY);
                match a {
                    Some(items) => {
                        buf.push(1);
                        buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
                        for item in items {
                            self.encode(buf, item);
                        }
                    }
                    None => buf.push(0),
                }
            }
            Value::Struct(s) => {
                buf.push(KIND_STRUCT);
                self.encode_struct_body(buf, s);
            }
        }
    }

    fn encode_struct_body(&mut self, buf: &mut Vec<u8>, s: &StructValue<CaptureId>) {
        buf.extend_from_slice(&s.type_tag.to_le_bytes());
        self.encode_fields(buf, &s.fields);
        for link in s.chain.links() {
            if !self.accepts(link.type_tag) {
                tracing::warn!(
                    struct_tag = s.type_tag,
                    link_tag = link.type_tag,
                    "skipping unsupported extension chain link"
                );
                self.skipped.push(link.type_tag);
                continue;
            }
            buf.extend_from_slice(&link.type_tag.to_le_bytes());
            // Length placeholder, patched once the link's fields are written.
            let len_at = buf.len();
            buf.extend_from_slice(&0u32.to_le_bytes());
            let body_start = buf.len();
            self.encode_fields(buf, &link.fields);
            let body_len = (buf.len() - body_start) as u32;
            buf[len_at..len_at + 4].copy_from_slice(&body_len.to_le_bytes());
        }
        buf.extend_from_slice(&CHAIN_END.to_le_bytes());
    }

    fn encode_fields(&mut self, buf: &mut Vec<u8>, fields: &[Value<CaptureId>]) {
        buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        for f in fields {
            self.encode(buf, f);
        }
    }

    fn accepts(&self, tag: u32) -> bool {
        tag != CHAIN_END && self.supported_links.map_or(true, |s| s.contains(&tag))
    }
}

fn put_nullable_bytes(buf: &mut Vec<u8>, bytes: Option<&[u8]>) {
    match bytes {
        Some(b) => {
            buf.push(1);
            buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            buf.extend_from_slice(b);
        }
        None => buf.push(0),
    }
}

/// Encode a single value with an accept-all encoder.
pub fn encode_value(buf: &mut Vec<u8>, value: &Value<CaptureId>) {
    ValueEncoder::new().encode(buf, value);
}

/// Encode a complete payload: value count followed by the values.
pub fn encode_payload(values: &[Value<CaptureId>]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    let mut enc = ValueEncoder::new();
    for v in values {
        enc.encode(&mut buf, v);
    }
    buf
}

// ── Value decoding ──────────────────────────────────────────────

/// Decode one value from the cursor.
pub fn decode_value(cur: &mut ByteCursor<'_>) -> Result<Value<CaptureId>, FormatError> {
    decode_value_at(cur, 0)
}

fn decode_presence(cur: &mut ByteCursor<'_>, what: &'static str) -> Result<bool, FormatError> {
    match cur.read_u8(what)? {
        0 => Ok(false),
        1 => Ok(true),
        flag => Err(FormatError::InvalidPresenceFlag { what, flag }),
    }
}

fn decode_nullable_bytes(
    cur: &mut ByteCursor<'_>,
    what: &'static str,
) -> Result<Option<Vec<u8>>, FormatError> {
    if !decode_presence(cur, what)? {
        return Ok(None);
    }
    let len = cur.read_count(what, 1)?;
    Ok(Some(cur.take(len, what)?.to_vec()))
}

fn decode_value_at(cur: &mut ByteCursor<'_>, depth: usize) -> Result<Value<CaptureId>, FormatError> {
    if depth > MAX_NESTING {
        return Err(FormatError::NestingTooDeep { limit: MAX_NESTING });
    }
    let tag = cur.read_u8("value kind")?;
    let value = match tag {
        KIND_BOOL => match cur.read_u8("bool")? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            flag => return Err(FormatError::InvalidPresenceFlag { what: "bool", flag }),
        },
        KIND_U8 => Value::U8(cur.read_u8("u8")?),
        KIND_U32 => Value::U32(cur.read_u32("u32")?),
        KIND_I32 => Value::I32(cur.read_u32("i32")? as i32),
        KIND_U64 => Value::U64(cur.read_u64("u64")?),
        KIND_I64 => Value::I64(cur.read_u64("i64")? as i64),
        KIND_F32 => Value::F32(f32::from_bits(cur.read_u32("f32")?)),
        KIND_F64 => Value::F64(f64::from_bits(cur.read_u64("f64")?)),
        KIND_HANDLE => {
            let cat_tag = cur.read_u16("handle category")?;
            let category = HandleCategory::from_tag(cat_tag)
                .ok_or(FormatError::UnknownCategory { tag: cat_tag })?;
            let id = CaptureId(cur.read_u64("capture id")?);
            Value::Handle {
                category,
                handle: id,
            }
        }
        KIND_ADDRESS => Value::Address(cur.read_u64("address")?),
        KIND_STR => match decode_nullable_bytes(cur, "string")? {
            Some(bytes) => Value::Str(Some(String::from_utf8(bytes)?)),
            None => Value::Str(None),
        },
        KIND_BYTES => Value::Bytes(decode_nullable_bytes(cur, "byte blob")?),
        KIND_POINTER => {
            if decode_presence(cur, "pointer")? {
                Value::Pointer(Some(Box::new(decode_value_at(cur, depth + 1)?)))
            } else {
                Value::Pointer(None)
            }
        }
        KIND_ARRAY => {
            if decode_presence(cur, "array")? {
                // Every element is at least its one-byte kind tag.
                let count = cur.read_count("array count", 1)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(decode_value_at(cur, depth + 1)?);
                }
                Value::Array(Some(items))
            } else {
                Value::Array(None)
            }
        }
        KIND_STRUCT => Value::Struct(decode_struct_body(cur, depth)?),
        other => return Err(FormatError::UnknownKind { tag: other }),
    };
    Ok(value)
}

fn decode_fields(cur: &mut ByteCursor<'_>, depth: usize) -> Result<Vec<Value<CaptureId>>, FormatError> {
    let count = cur.read_count("field count", 1)?;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(decode_value_at(cur, depth + 1)?);
    }
    Ok(fields)
}

fn decode_struct_body(
    cur: &mut ByteCursor<'_>,
    depth: usize,
) -> Result<StructValue<CaptureId>, FormatError> {
    let type_tag = cur.read_u32("struct type tag")?;
    let fields = decode_fields(cur, depth)?;
    let mut chain = ExtensionChain::new();
    loop {
        let link_tag = cur.read_u32("chain link tag")?;
        if link_tag == CHAIN_END {
            break;
        }
        let declared = cur.read_u32("chain link length")?;
        if declared as usize > cur.remaining() {
            return Err(FormatError::CountExceedsPayload {
                what: "chain link length",
                declared: declared as u64,
                available: cur.remaining(),
            });
        }
        let start = cur.position();
        let link_fields = decode_fields(cur, depth)?;
        let actual = cur.position() - start;
        if actual != declared as usize {
            return Err(FormatError::LinkLengthMismatch {
                tag: link_tag,
                declared,
                actual,
            });
        }
        chain.push(ChainLink {
            type_tag: link_tag,
            fields: link_fields,
        });
    }
    Ok(StructValue {
        type_tag,
        fields,
        chain,
    })
}

/// Decode a complete payload produced by [`encode_payload`].
///
/// Fails on truncation and on trailing bytes after the declared values.
pub fn decode_payload(data: &[u8]) -> Result<Vec<Value<CaptureId>>, FormatError> {
    let mut cur = ByteCursor::new(data);
    let count = cur.read_count("payload value count", 1)?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decode_value(&mut cur)?);
    }
    if cur.remaining() != 0 {
        return Err(FormatError::TrailingBytes {
            count: cur.remaining(),
        });
    }
    Ok(values)
}

// ── Header encode/decode ────────────────────────────────────────

/// Encode the trace header (magic, version, capabilities, metadata).
pub fn encode_header(w: &mut dyn Write, header: &TraceHeader) -> Result<(), FormatError> {
    w.write_all(&MAGIC)?;
    write_u8(w, header.version)?;
    write_u32_le(w, header.capabilities.bits())?;
    write_length_prefixed_str(w, &header.metadata.application)?;
    write_length_prefixed_str(w, &header.metadata.api)?;
    write_length_prefixed_str(w, &header.metadata.tool_version)?;
    Ok(())
}

/// Decode and validate the trace header.
pub fn decode_header(r: &mut dyn Read) -> Result<TraceHeader, FormatError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(FormatError::InvalidMagic);
    }

    let version = read_u8(r)?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion { found: version });
    }

    let bits = read_u32_le(r)?;
    let capabilities = CapabilityFlags::from_bits(bits).ok_or(FormatError::UnknownCapabilities {
        bits: bits & !CapabilityFlags::all().bits(),
    })?;

    let metadata = TraceMetadata {
        application: read_length_prefixed_str(r)?,
        api: read_length_prefixed_str(r)?,
        tool_version: read_length_prefixed_str(r)?,
    };

    Ok(TraceHeader {
        version,
        capabilities,
        metadata,
    })
}

// ── Record encode/decode ────────────────────────────────────────

/// Encode a record block from its parts.
pub fn encode_record_parts(
    w: &mut dyn Write,
    call_id: CallId,
    thread_id: ThreadId,
    sequence: SequenceNumber,
    payload: &[u8],
) -> Result<(), FormatError> {
    if payload.len() as u64 > MAX_PAYLOAD_LEN {
        return Err(FormatError::PayloadTooLarge {
            len: payload.len() as u64,
            limit: MAX_PAYLOAD_LEN,
        });
    }
    write_u32_le(w, call_id.0)?;
    write_u64_le(w, thread_id.0)?;
    write_u64_le(w, sequence.0)?;
    write_u32_le(w, payload.len() as u32)?;
    w.write_all(payload)?;
    Ok(())
}

/// Encode a single record block.
pub fn encode_record(w: &mut dyn Write, record: &CallRecord) -> Result<(), FormatError> {
    encode_record_parts(
        w,
        record.call_id,
        record.thread_id,
        record.sequence,
        &record.payload,
    )
}

/// Decode a single record block.
///
/// Returns `Ok(None)` on clean EOF (no bytes available), `Ok(Some(record))`
/// on success, or an error on truncated/corrupt data.
pub fn decode_record(r: &mut dyn Read) -> Result<Option<CallRecord>, FormatError> {
    // Read the call id byte-by-byte to distinguish clean EOF (zero bytes)
    // from truncation (1-3 bytes before EOF).
    let mut id_buf = [0u8; 4];
    let mut filled = 0;
    while filled < id_buf.len() {
        match r.read(&mut id_buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FormatError::TruncatedRecordHeader {
                    got: filled,
                    expected: id_buf.len(),
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FormatError::Io(e)),
        }
    }
    let call_id = CallId(u32::from_le_bytes(id_buf));
    let thread_id = ThreadId(read_u64_le(r)?);
    let sequence = SequenceNumber(read_u64_le(r)?);

    let len = read_u32_le(r)? as u64;
    if len > MAX_PAYLOAD_LEN {
        return Err(FormatError::PayloadTooLarge {
            len,
            limit: MAX_PAYLOAD_LEN,
        });
    }
    let mut payload = Vec::new();
    r.take(len).read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(FormatError::Truncated {
            what: "record payload",
            needed: len as usize,
            available: payload.len(),
        });
    }

    Ok(Some(CallRecord {
        call_id,
        thread_id,
        sequence,
        payload,
    }))
}
