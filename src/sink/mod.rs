//! Terminal stages.

mod frame_buffer;
mod mux_render;
mod progress;

pub use frame_buffer::FrameBuffer;
pub use mux_render::{MuxRender, ProgressCallback};
pub use progress::ProgressTracker;
