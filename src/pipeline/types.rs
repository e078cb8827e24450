//! Core types shared by the sessions

use std::any::Any;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Encode,
    Decode,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Encode => write!(f, "encode"),
            SessionKind::Decode => write!(f, "decode"),
        }
    }
}

/// Handed to the close callback once a session has released its resources.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseReport {
    pub kind: SessionKind,
    pub path: PathBuf,
    /// Frames encoded, or frames presented.
    pub frames: u64,
    /// Bytes written to, or read from, the file.
    pub bytes: u64,
    /// Set when the loop ended on an error instead of a stop or end of stream.
    pub error: Option<String>,
}

/// Invoked exactly once, from the session's worker thread.
pub type CloseCallback = Box<dyn FnOnce(CloseReport) + Send>;

/// Text of a payload caught with `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
