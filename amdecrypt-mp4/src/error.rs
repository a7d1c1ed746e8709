use thiserror::Error;

/// The Errors that may occur when extracting or muxing mp4 data.
#[derive(Debug, Error)]
pub enum Error {
    /// A box header or table could not be interpreted.
    #[error("malformed container at byte {offset}: {reason}")]
    MalformedContainer { offset: u64, reason: String },

    /// No `stsd` box could be located in the source movie box.
    #[error("no reusable sample description found in the source movie box")]
    MissingSampleDescription,

    /// A value does not fit the 32-bit field of the output box.
    #[error("{field} does not fit in a 32-bit box field (value {value})")]
    FieldOverflow { field: &'static str, value: u64 },

    /// Sample table sizes disagree with the supplied media bytes.
    #[error("sample table covers {expected} bytes but {actual} bytes of media were supplied")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn malformed<T: Into<String>>(offset: u64, reason: T) -> Self {
        Self::MalformedContainer {
            offset,
            reason: reason.into(),
        }
    }
}
