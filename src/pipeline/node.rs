use std::sync::Arc;

use crate::av::{CommandQueue, MediaKind, TrackId};
use crate::error::Result;

use super::{CaptureSource, Plugin, Render, Shared, Source};

/// What a stage does in a graph. Connection legality is decided on roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reads samples from files.
    Source,
    /// Captures audio from a microphone.
    Microphone,
    /// Captures video frames.
    CaptureSource,
    /// Decodes samples.
    Decoder,
    /// Encodes samples.
    Encoder,
    /// Applies video effects.
    Effector,
    /// Changes the playback speed of video.
    TimeScaler,
    /// Forwards samples untouched.
    PassThrough,
    /// Writes the output.
    Sink,
}

/// A stage as the scheduler and the connectors see it.
#[derive(Clone)]
pub enum Node {
    /// A file source.
    Source(Shared<dyn Source>),
    /// A capture device.
    Capture(Shared<dyn CaptureSource>),
    /// A decoder, encoder, effector or pass-through.
    Plugin(Shared<dyn Plugin>),
    /// The multiplexing sink.
    Render(Shared<dyn Render>),
}

impl Node {
    /// Role of the underlying stage.
    pub fn role(&self) -> Role {
        match self {
            Node::Source(stage) => stage.lock().role(),
            Node::Capture(stage) => stage.lock().role(),
            Node::Plugin(stage) => stage.lock().role(),
            Node::Render(stage) => stage.lock().role(),
        }
    }

    /// Media kind a consuming stage handles.
    pub fn kind(&self) -> Option<MediaKind> {
        match self {
            Node::Plugin(stage) => Some(stage.lock().kind()),
            Node::Render(stage) => Some(stage.lock().kind()),
            Node::Capture(stage) => Some(stage.lock().media_format().kind),
            Node::Source(_) => None,
        }
    }

    /// Identity of the underlying stage.
    pub fn id(&self) -> usize {
        match self {
            Node::Source(stage) => Arc::as_ptr(stage) as *const () as usize,
            Node::Capture(stage) => Arc::as_ptr(stage) as *const () as usize,
            Node::Plugin(stage) => Arc::as_ptr(stage) as *const () as usize,
            Node::Render(stage) => Arc::as_ptr(stage) as *const () as usize,
        }
    }

    /// Whether both nodes wrap the same stage.
    pub fn is_same(&self, other: &Node) -> bool {
        self.id() == other.id()
    }

    /// Runs `f` on the output queue; `None` for stages that produce nothing.
    pub fn with_output_queue<R>(&self, f: impl FnOnce(&mut CommandQueue) -> R) -> Option<R> {
        match self {
            Node::Source(stage) => Some(f(stage.lock().output_queue())),
            Node::Capture(stage) => Some(f(stage.lock().output_queue())),
            Node::Plugin(stage) => Some(f(stage.lock().output_queue())),
            Node::Render(_) => None,
        }
    }

    /// Runs `f` on the input queue; `None` for stages that consume nothing.
    pub fn with_input_queue<R>(&self, f: impl FnOnce(&mut CommandQueue) -> R) -> Option<R> {
        match self {
            Node::Plugin(stage) => Some(f(stage.lock().input_queue())),
            Node::Render(stage) => Some(f(stage.lock().input_queue())),
            Node::Source(_) | Node::Capture(_) => None,
        }
    }

    /// Track a consuming stage reads; `None` for pure producers.
    pub fn input_track_id(&self) -> Option<TrackId> {
        match self {
            Node::Plugin(stage) => Some(stage.lock().track_id()),
            Node::Render(stage) => Some(stage.lock().track_id()),
            Node::Source(_) | Node::Capture(_) => None,
        }
    }

    /// Refreshes the stage's readiness commands.
    pub fn fill_command_queues(&self) -> Result<()> {
        match self {
            Node::Source(stage) => stage.lock().fill_command_queues(),
            Node::Capture(stage) => stage.lock().fill_command_queues(),
            Node::Plugin(stage) => stage.lock().fill_command_queues(),
            Node::Render(stage) => stage.lock().fill_command_queues(),
        }
    }

    /// Starts the stage.
    pub fn start(&self) -> Result<()> {
        match self {
            Node::Source(stage) => stage.lock().start(),
            Node::Capture(stage) => stage.lock().start(),
            Node::Plugin(stage) => stage.lock().start(),
            Node::Render(stage) => stage.lock().start(),
        }
    }

    /// Stops the stage.
    pub fn stop(&self) -> Result<()> {
        match self {
            Node::Source(stage) => stage.lock().stop(),
            Node::Capture(stage) => stage.lock().stop(),
            Node::Plugin(stage) => stage.lock().stop(),
            Node::Render(stage) => stage.lock().stop(),
        }
    }

    /// Releases the stage's backend.
    pub fn release(&self) -> Result<()> {
        match self {
            Node::Source(stage) => stage.lock().release(),
            Node::Capture(stage) => stage.lock().release(),
            Node::Plugin(stage) => stage.lock().release(),
            Node::Render(stage) => stage.lock().release(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Node::Source(_) => "Source",
            Node::Capture(_) => "Capture",
            Node::Plugin(_) => "Plugin",
            Node::Render(_) => "Render",
        };
        write!(f, "{}@{:#x}", variant, self.id())
    }
}
