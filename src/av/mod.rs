//! Value types shared by every stage: media formats, frames and the
//! readiness commands stages exchange through their queues.

mod command;
mod format;
mod frame;

pub use command::*;
pub use format::*;
pub use frame::*;

/// Logical track number. Stable across file boundaries once a pipeline runs.
pub type TrackId = usize;
