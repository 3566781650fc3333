use thiserror::Error;

/// Failures of the numeric core.
///
/// Every variant carries enough context (channel, window, index) to locate the
/// offending input without rerunning the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error(
        "invalid window size {window}{}: must be at least 3 and at most the input length",
        .len.map(|n| format!(" for input of length {n}")).unwrap_or_default()
    )]
    InvalidWindow { window: usize, len: Option<usize> },

    #[error("no valid sample within the first window (window {window}, length {len})")]
    EmptyOrAllMissing { window: usize, len: usize },

    #[error("timestamps of {channel:?} decrease at index {idx}: {prev} > {next}")]
    MonotonicityViolation {
        channel: String,
        idx: usize,
        prev: f64,
        next: f64,
    },

    #[error("channel {channel:?} has no column {column:?}")]
    MissingRequiredColumn { channel: String, column: String },

    #[error("column {column:?} of {channel:?} has length {actual}, expected {expected}")]
    LengthMismatch {
        channel: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("column {column:?} appears more than once")]
    DuplicateColumn { column: String },

    #[error("channel {channel:?} has no samples")]
    EmptyChannel { channel: String },
}
