//! Trace reader.
//!
//! [`TraceReader`] reads call records from any `Read` source. The header is
//! validated on construction.

use std::io::Read;

use crate::codec::{decode_header, decode_record};
use crate::error::FormatError;
use crate::types::{CallRecord, TraceHeader};

/// Reads a trace from a byte stream.
///
/// Generic over `R: Read` so tests can use `&[u8]` and production code can
/// use `BufReader<File>`.
pub struct TraceReader<R: Read> {
    reader: R,
    header: TraceHeader,
    records_read: u64,
}

impl<R: Read> TraceReader<R> {
    /// Open a trace stream, reading and validating the header.
    pub fn open(mut reader: R) -> Result<Self, FormatError> {
        let header = decode_header(&mut reader)?;
        Ok(Self {
            reader,
            header,
            records_read: 0,
        })
    }

    /// The trace header.
    pub fn header(&self) -> &TraceHeader {
        &self.header
    }

    /// Read the next record, or `None` if the stream is exhausted.
    pub fn next_record(&mut self) -> Result<Option<CallRecord>, FormatError> {
        let record = decode_record(&mut self.reader)?;
        if record.is_some() {
            self.records_read += 1;
        }
        Ok(record)
    }

    /// Number of records read so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Convert into a record iterator.
    pub fn records(self) -> RecordIter<R> {
        RecordIter {
            reader: self.reader,
            records_read: self.records_read,
            done: false,
        }
    }
}

/// Iterator adapter over trace records.
///
/// Yields at most one error, then ends.
pub struct RecordIter<R: Read> {
    reader: R,
    records_read: u64,
    done: bool,
}

impl<R: Read> RecordIter<R> {
    /// Number of records yielded so far, including any read before conversion.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

impl<R: Read> Iterator for RecordIter<R> {
    type Item = Result<CallRecord, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match decode_record(&mut self.reader) {
            Ok(Some(record)) => {
                self.records_read += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
