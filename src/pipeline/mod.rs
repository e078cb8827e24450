//! Frame pipeline for ffcamera
//!
//! Two sessions share one file:
//! - the encode session takes viewfinder frames, encodes them on its own
//!   thread and appends every chunk to the file;
//! - the decode session reads the same file on its own thread and presents
//!   decoded frames on a surface.
//!
//! # Synchronization
//!
//! The only blocking point is the decode session's read request. When the
//! file has nothing new it waits on a [`ReadGate`] which the writer signals
//! after each append, and which a stop request or the writer closing also
//! releases.
//!
//! Both sessions follow [`SessionState`]: resources are released exactly
//! once, on the `Stopping -> Closed` edge, right before the close callback.

pub mod decode;
pub mod encode;
pub mod gate;
pub mod health;
pub mod recorder;
pub mod state;
pub mod types;

pub use decode::DecodeSession;
pub use encode::{EncodeInput, EncodeSession};
pub use gate::{GateState, GateWait, ReadGate};
pub use health::{HealthSummary, PipelineHealth};
pub use recorder::{Recorder, RecorderStatus};
pub use state::{SessionState, StateCell};
pub use types::{CloseCallback, CloseReport, SessionKind};
