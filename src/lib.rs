//! Camera viewfinder recording with a live decode preview.
//!
//! Frames from a [`capture::Camera`] pass through a [`capture::Viewfinder`]
//! into an [`pipeline::EncodeSession`] that writes a file, while a
//! [`pipeline::DecodeSession`] reads the same file back and presents it on a
//! [`display::RenderSurface`]. [`pipeline::Recorder`] wires the pieces
//! together.

pub mod capture;
pub mod codec;
pub mod config;
pub mod display;
pub mod error;
pub mod pipeline;

pub use error::{PipelineError, Result};
