use std::{fmt, io};
use thiserror::Error;

/// Pipeline stage a fatal error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Decrypt,
    Remux,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Extract => "extract",
            Self::Decrypt => "decrypt",
            Self::Remux => "remux",
            Self::Finalize => "finalize",
        })
    }
}

/// The Errors that may occur while decrypting a song.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer closed or stalled before sending a full plaintext frame.
    #[error("decryption peer sent {actual} of {expected} bytes for sample {sample}")]
    ShortTransportRead {
        expected: usize,
        actual: usize,
        sample: usize,
    },

    #[error("decryption transport failed: {0}")]
    Transport(#[source] io::Error),

    #[error("invalid endpoint {0:?}, expected host:port")]
    InvalidEndpoint(String),

    #[error("key field {field} is {len} bytes long, at most 255 fit the wire format")]
    KeyTooLong { field: &'static str, len: usize },

    #[error("sample {sample} needs a {len} byte frame, more than a 32-bit length allows")]
    FrameTooLarge { sample: usize, len: usize },

    /// The normalizer is missing or exited unsuccessfully.
    #[error("normalizer unavailable: {0}")]
    NormalizerUnavailable(String),

    #[error(transparent)]
    Mp4(#[from] amdecrypt_mp4::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tag this error with the stage it happened in. Already tagged errors
    /// keep their stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } => self,
            source => Self::Stage {
                stage,
                source: Box::new(source),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Innermost error, with the stage tag removed.
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            _ => self,
        }
    }

    /// Transport failures are the only errors worth re-running the whole
    /// pipeline for.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.root(),
            Self::ShortTransportRead { .. } | Self::Transport(_)
        )
    }
}
