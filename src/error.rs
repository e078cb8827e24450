//! Error taxonomy for session setup and the frame pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecId;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A camera or session of this kind is already active.
    #[error("{0} already active")]
    ResourceBusy(&'static str),
    #[error("camera device error: {0}")]
    DeviceIo(String),
    #[error("no codec available for {0}")]
    CodecUnavailable(CodecId),
    #[error("could not open codec context: {0}")]
    CodecOpenFailed(String),
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("could not open {}: {source}", path.display())]
    FileOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not start session: {0}")]
    StartFailed(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn file_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::FileOpenFailed {
            path: path.into(),
            source,
        }
    }
}
