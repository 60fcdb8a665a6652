use std::fmt;
use std::io;

use thiserror::Error;

/// The three roles a pipeline thread can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Transform,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Read => "read",
            Stage::Transform => "transform",
            Stage::Write => "write",
        })
    }
}

/// Violations of the container format or of the buffer sequencing contract.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("block index {0} was inserted twice")]
    DuplicateIndex(u64),

    #[error("container header is truncated ({0} of 4 bytes)")]
    TruncatedHeader(usize),

    #[error("container header declares a negative block count ({0})")]
    NegativeCount(i32),

    #[error("block count {0} does not fit the 32-bit container header")]
    TooManyBlocks(u64),

    #[error("record length field is truncated ({0} of 4 bytes)")]
    TruncatedLength(usize),

    #[error("record declares a negative length ({0})")]
    NegativeLength(i32),

    #[error("record declares {declared} bytes but only {available} remain")]
    TruncatedRecord { declared: usize, available: usize },

    #[error("record of {0} bytes does not fit a 32-bit length field")]
    RecordTooLarge(usize),

    #[error("stream ended after {found} of {expected} blocks")]
    UnexpectedEof { expected: u64, found: u64 },

    #[error("container has data after the last declared record")]
    TrailingData,
}

/// Terminal error of a compress or decompress run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error in block {index}: {message}")]
    Codec { index: u64, message: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} stage panicked")]
    StagePanicked(Stage),
}

impl PipelineError {
    pub fn codec(index: u64, err: anyhow::Error) -> Self {
        PipelineError::Codec {
            index,
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_keeps_context_chain() {
        let err = anyhow::anyhow!("bad frame").context("zstd decompress");
        let msg = PipelineError::codec(7, err).to_string();
        assert!(msg.contains("block 7"), "{msg}");
        assert!(msg.contains("zstd decompress: bad frame"), "{msg}");
    }

    #[test]
    fn protocol_errors_convert() {
        let err: PipelineError = ProtocolError::DuplicateIndex(3).into();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolError::DuplicateIndex(3))
        ));
    }
}
