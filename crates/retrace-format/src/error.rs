//! Error types for the envelope codec and trace file format.

use std::io;

use retrace_core::SequenceNumber;

/// Errors that can occur while encoding, decoding, writing or reading a trace.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// An I/O error occurred during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The stream does not start with the expected `b"RTRC"` magic bytes.
    #[error("invalid magic bytes (expected b\"RTRC\")")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported format version {found}")]
    UnsupportedVersion {
        /// The version found in the stream.
        found: u8,
    },
    /// The header carries capability bits this build does not understand.
    #[error("unknown capability flags {bits:#010x}")]
    UnknownCapabilities {
        /// The unrecognized bits.
        bits: u32,
    },
    /// Fewer bytes remain than a fixed-size field needs.
    #[error("truncated {what}: need {needed} bytes, {available} available")]
    Truncated {
        /// What was being read.
        what: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },
    /// A declared element count or byte length cannot fit in the bytes that remain.
    #[error("{what} declares {declared} but only {available} bytes remain")]
    CountExceedsPayload {
        /// What carried the declaration.
        what: &'static str,
        /// The declared count or length.
        declared: u64,
        /// Bytes remaining.
        available: usize,
    },
    /// A chain link's declared length disagrees with the bytes its fields used.
    #[error("chain link {tag:#x} declares {declared} bytes but its fields use {actual}")]
    LinkLengthMismatch {
        /// The link's structure type tag.
        tag: u32,
        /// Length from the link header.
        declared: u32,
        /// Bytes actually consumed by the link's fields.
        actual: usize,
    },
    /// A value kind tag is not recognized.
    #[error("unknown value kind tag {tag:#04x}")]
    UnknownKind {
        /// The unrecognized tag.
        tag: u8,
    },
    /// A handle category tag is not recognized.
    #[error("unknown handle category tag {tag}")]
    UnknownCategory {
        /// The unrecognized tag.
        tag: u16,
    },
    /// A presence flag was neither 0 nor 1.
    #[error("invalid presence flag {flag} for {what}")]
    InvalidPresenceFlag {
        /// What the flag guarded.
        what: &'static str,
        /// The flag byte found.
        flag: u8,
    },
    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// Structures or pointers nest deeper than the decoder allows.
    #[error("value nesting exceeds {limit} levels")]
    NestingTooDeep {
        /// The nesting limit.
        limit: usize,
    },
    /// Bytes remain after the last declared value of a payload.
    #[error("{count} trailing bytes after payload")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        count: usize,
    },
    /// A record payload is larger than the format allows.
    #[error("payload of {len} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Declared payload length.
        len: u64,
        /// Maximum accepted length.
        limit: u64,
    },
    /// A partial record header was found at the end of the stream.
    #[error("truncated record header: got {got} of {expected} bytes")]
    TruncatedRecordHeader {
        /// Bytes read before EOF.
        got: usize,
        /// Bytes in a full header field.
        expected: usize,
    },
    /// A record was appended with a sequence number not above the previous one.
    #[error("sequence number {found} does not follow {previous}")]
    SequenceRegression {
        /// Last sequence number written.
        previous: SequenceNumber,
        /// The offending sequence number.
        found: SequenceNumber,
    },
}
