//! Streaming log digest engine.
//!
//! Feed single-line [`LogEntry`] values into a [`Parser`] and read back a
//! compact per-pattern summary: for every distinct message shape, a
//! representative sample, a stable content hash, a severity level and an
//! occurrence count. Multi-line events (stack traces, wrapped exceptions,
//! JSON dumps) are reassembled before aggregation, and per-level pattern
//! cardinality is bounded.

pub mod classify;
pub mod pattern;
pub mod pipeline;

pub use classify::{contains_timestamp, guess_level, Level};
pub use pattern::Pattern;
pub use pipeline::{
    DecodeError, Decoder, LogCounter, LogEntry, Message, MessageCallback, MultilineCollector,
    Parser, DEFAULT_COLLECTOR_TIMEOUT, DEFAULT_MAX_MESSAGE_BYTES, OVERFLOW_PATTERN_HASH,
    UNCLASSIFIED_PATTERN_LABEL,
};
