pub mod collector;
pub mod decoder;
pub mod parser;

pub use collector::{
    LogEntry, Message, MultilineCollector, DEFAULT_COLLECTOR_TIMEOUT, DEFAULT_MAX_MESSAGE_BYTES,
};
pub use decoder::{DecodeError, Decoder};
pub use parser::{
    LogCounter, MessageCallback, Parser, OVERFLOW_PATTERN_HASH, UNCLASSIFIED_PATTERN_LABEL,
};
