//! Error taxonomy for the imputation pipeline.
//!
//! Everything fatal propagates to the caller; the single exception is
//! workspace removal, which `workspace::Workspace` downgrades to a warning
//! because it cannot affect an already-produced result.

use std::io;

/// Pipeline-wide result alias.
pub type Result<T, E = MagicError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum MagicError {
    /// Malformed shapes, missing container fields, bad parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem failure: workspace creation, buffer allocation, mmap.
    #[error("i/o failure during {stage}: {source}")]
    Io {
        stage: String,
        #[source]
        source: io::Error,
    },

    /// Chunk file encode/decode failure.
    #[error("chunk codec failure during {stage}: {source}")]
    Codec {
        stage: String,
        #[source]
        source: bincode::Error,
    },

    /// A worker failed while processing one chunk. Carries the chunk index
    /// and its column range so the failing unit of work is identifiable.
    #[error("chunk {chunk} (columns [{start}, {end})) failed: {source}")]
    Compute {
        chunk: usize,
        start: usize,
        end: usize,
        #[source]
        source: Box<MagicError>,
    },
}

impl MagicError {
    pub(crate) fn io(stage: impl Into<String>, source: io::Error) -> Self {
        MagicError::Io {
            stage: stage.into(),
            source,
        }
    }

    pub(crate) fn codec(stage: impl Into<String>, source: bincode::Error) -> Self {
        MagicError::Codec {
            stage: stage.into(),
            source,
        }
    }
}
