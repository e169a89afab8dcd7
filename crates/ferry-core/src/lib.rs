//! ferry-core — wire syntax, frame reader, and configuration.
//! All other Ferry crates depend on this one.

pub mod codec;
pub mod config;
pub mod wire;

pub use codec::{Frame, FrameCodec, FrameError, FrameLimits};
pub use wire::{FileHeader, WireError};
