use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Per-line preprocessor for upstream transport formats.
///
/// The ingestion worker runs each entry through the decoder before the
/// collector sees it; a decode error drops that entry and the stream moves
/// on. Absent decoder means entries pass through untouched.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: &str) -> Result<String, DecodeError>;
}
