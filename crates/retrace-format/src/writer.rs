//! Trace writer.
//!
//! [`TraceWriter`] streams call records to any `Write` sink. The header is
//! written immediately on construction.

use std::io::Write;

use retrace_core::{CallId, SequenceNumber, ThreadId};

use crate::codec::{encode_header, encode_record, encode_record_parts};
use crate::error::FormatError;
use crate::types::{CallRecord, TraceHeader};

/// Writes a trace to a byte stream.
///
/// Generic over `W: Write` so tests can use `Vec<u8>` and production code
/// can use `BufWriter<File>`.
///
/// # Examples
///
/// ```
/// use retrace_core::{CallId, SequenceNumber, ThreadId};
/// use retrace_format::{
///     encode_payload, CapabilityFlags, TraceHeader, TraceMetadata, TraceReader, TraceWriter,
///     Value,
/// };
///
/// let header = TraceHeader::new(CapabilityFlags::empty(), TraceMetadata::default());
///
/// let mut buf = Vec::new();
/// let mut writer = TraceWriter::new(&mut buf, &header).unwrap();
/// for seq in 1..=2u64 {
///     let payload = encode_payload(&[Value::U32(seq as u32)]);
///     writer
///         .append(CallId(7), ThreadId(1), SequenceNumber(seq), &payload)
///         .unwrap();
/// }
/// assert_eq!(writer.records_written(), 2);
/// drop(writer);
///
/// let mut reader = TraceReader::open(buf.as_slice()).unwrap();
/// assert_eq!(reader.header(), &header);
/// let first = reader.next_record().unwrap().unwrap();
/// assert_eq!(first.sequence, SequenceNumber(1));
/// assert_eq!(first.decode_values().unwrap(), vec![Value::U32(1)]);
/// assert!(reader.next_record().unwrap().is_some());
/// assert!(reader.next_record().unwrap().is_none());
/// ```
pub struct TraceWriter<W: Write> {
    writer: W,
    last_sequence: Option<SequenceNumber>,
    records_written: u64,
}

impl<W: Write> TraceWriter<W> {
    /// Create a new trace writer, immediately writing the header.
    pub fn new(mut writer: W, header: &TraceHeader) -> Result<Self, FormatError> {
        encode_header(&mut writer, header)?;
        Ok(Self {
            writer,
            last_sequence: None,
            records_written: 0,
        })
    }

    fn check_sequence(&self, found: SequenceNumber) -> Result<(), FormatError> {
        match self.last_sequence {
            Some(previous) if found <= previous => {
                Err(FormatError::SequenceRegression { previous, found })
            }
            _ => Ok(()),
        }
    }

    /// Append a record from its parts without building a [`CallRecord`].
    pub fn append(
        &mut self,
        call_id: CallId,
        thread_id: ThreadId,
        sequence: SequenceNumber,
        payload: &[u8],
    ) -> Result<(), FormatError> {
        self.check_sequence(sequence)?;
        encode_record_parts(&mut self.writer, call_id, thread_id, sequence, payload)?;
        self.last_sequence = Some(sequence);
        self.records_written += 1;
        Ok(())
    }

    /// Append a pre-built record.
    pub fn write_record(&mut self, record: &CallRecord) -> Result<(), FormatError> {
        self.check_sequence(record.sequence)?;
        encode_record(&mut self.writer, record)?;
        self.last_sequence = Some(record.sequence);
        self.records_written += 1;
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<(), FormatError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Sequence number of the last record written.
    pub fn last_sequence(&self) -> Option<SequenceNumber> {
        self.last_sequence
    }

    /// Consume the writer and return the underlying `Write` sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
