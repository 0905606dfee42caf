use crate::av::{BufferIndex, Command, CommandQueue, Frame, MediaFormat, MediaKind, Resolution, TrackId};
use crate::error::{FlowError, Result};
use crate::render::{RenderContext, Surface, SurfaceRequest, SurfaceTarget};

use super::{ProcessorControl, Role, Shared};

/// Lifecycle shared by every pipeline stage.
pub trait Stage: Send {
    /// What the stage does in a graph.
    fn role(&self) -> Role;

    /// Starts the stage and publishes its first readiness.
    fn start(&mut self) -> Result<()>;

    /// Stops the stage. Pending requests turn into end of stream.
    fn stop(&mut self) -> Result<()>;

    /// Frees backend resources. Must be safe to call more than once.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    /// Lets the stage poll its backend and publish new readiness.
    fn fill_command_queues(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Producer side of an edge.
pub trait OutputStage: Stage {
    /// Readiness the stage publishes as a producer.
    fn output_queue(&mut self) -> &mut CommandQueue;
}

/// Consumer side of an edge.
pub trait InputStage: Stage {
    /// Requests the stage publishes as a consumer.
    fn input_queue(&mut self) -> &mut CommandQueue;

    /// Track the stage consumes.
    fn track_id(&self) -> TrackId;

    /// Sets the track this stage consumes and re-arms its input queue.
    fn set_track_id(&mut self, track_id: TrackId);

    /// Media kind the stage consumes.
    fn kind(&self) -> MediaKind;

    /// Drops pending requests and tells the scheduler to leave this pair.
    fn skip_processing(&mut self) {
        let track = self.track_id();
        self.input_queue().clear();
        self.input_queue().queue(Command::NextPair, track);
    }

    /// Configures the backend from the current input format.
    fn configure(&mut self) -> Result<()>;

    /// Input format to configure with.
    fn set_media_format(&mut self, format: MediaFormat) -> Result<()>;

    /// Accepts one input frame.
    fn push(&mut self, frame: Frame) -> Result<()>;

    /// Starts flushing. `index` is a free input buffer when the stage needs
    /// one to carry the end-of-stream flag.
    fn drain(&mut self, index: Option<BufferIndex>) -> Result<()>;

    /// A frame owning a free input buffer, `None` when none is available yet.
    fn find_free_frame(&mut self) -> Option<Frame> {
        None
    }
}

/// A pull-based source of samples: a file, several files, a microphone.
pub trait Source: OutputStage {
    /// Reads the next sample into `frame`.
    fn pull(&mut self, frame: &mut Frame) -> Result<()>;

    /// Number of tracks of the current file.
    fn track_count(&self) -> usize;

    /// Format of `track` in the current file.
    fn track_format(&self, track: TrackId) -> Result<MediaFormat>;

    /// First track of the given kind.
    fn track_id_by_kind(&self, kind: MediaKind) -> Option<TrackId>;

    /// Format of the first track of `kind`.
    fn format_by_kind(&self, kind: MediaKind) -> Option<MediaFormat> {
        self.track_id_by_kind(kind)
            .and_then(|track| self.track_format(track).ok())
    }

    /// Includes `track` in the output.
    fn select_track(&mut self, track: TrackId) -> Result<()>;

    /// Duration in microseconds after trimming.
    fn duration(&self) -> i64;

    /// Whether the current file is the last one.
    fn is_last_file(&self) -> bool {
        true
    }

    /// Maps a track of the current file onto the downstream track id.
    fn set_track_map(&mut self, _file_track: TrackId, _downstream: TrackId) {}

    /// One connected plugin finished switching to the next file.
    fn next_file(&mut self) -> Result<()> {
        Ok(())
    }

    /// Counts one more plugin fed by this source.
    fn increment_connected_plugins(&mut self) {}
}

/// A live source that renders straight into a surface (camera, screen).
pub trait CaptureSource: OutputStage {
    /// The latest captured image, on the output surface.
    fn get_frame(&mut self) -> Result<Frame>;

    /// Format of the captured stream.
    fn media_format(&self) -> MediaFormat;

    /// Hands over the surface to capture into.
    fn set_output_surface(&mut self, surface: Box<dyn Surface>);

    /// The surface being captured into.
    fn output_surface(&mut self) -> Option<&mut dyn Surface>;
}

/// A transform stage: decoder, encoder, effector, pass-through.
pub trait Plugin: InputStage + OutputStage {
    /// Next output frame, empty when nothing is ready.
    fn get_frame(&mut self) -> Result<Frame>;

    /// Returns an output buffer handed out by [`Plugin::get_frame`].
    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<()>;

    /// Polls the backend for output and publishes `HasData`.
    fn check_if_output_queue_has_data(&mut self) -> Result<()> {
        Ok(())
    }

    /// Current output format.
    fn output_format(&self) -> Result<MediaFormat>;

    /// Track id downstream stages know this output by.
    fn output_track_id(&self) -> TrackId;

    /// Sets the downstream track id.
    fn set_output_track_id(&mut self, track_id: TrackId);

    /// Picture size of the incoming frames.
    fn set_input_resolution(&mut self, _resolution: Resolution) {}

    /// Format of the samples an upstream plugin now produces.
    fn set_input_media_format(&mut self, _format: MediaFormat) {}

    /// Creates the surface upstream stages render into.
    fn create_input_surface(&mut self, _context: Option<RenderContext>) -> Result<Box<dyn Surface>> {
        Err(FlowError::Render(format!("{:?} has no input surface", self.role())))
    }

    /// Handle of the surface this stage reads from.
    fn input_target(&mut self) -> Result<SurfaceTarget> {
        Err(FlowError::Render(format!("{:?} has no input surface", self.role())))
    }

    /// Hands ownership of the surface this stage renders into.
    fn set_output_surface(&mut self, _surface: Box<dyn Surface>) -> Result<()> {
        Err(FlowError::Render(format!("{:?} cannot render to a surface", self.role())))
    }

    /// Binds output to a surface owned by another stage.
    fn set_output_target(&mut self, _target: SurfaceTarget) -> Result<()> {
        Err(FlowError::Render(format!("{:?} cannot render to a surface", self.role())))
    }

    /// Surface this stage renders into, if it owns one.
    fn output_surface(&mut self) -> Option<&mut dyn Surface> {
        None
    }

    /// Waits for the frame at `pts` to land on the output surface.
    fn wait_for_surface(&mut self, _pts: i64) -> Result<()> {
        Ok(())
    }

    /// A frame was drawn on `surface`, which feeds this stage.
    fn notify_surface_ready(&mut self, _surface: &mut dyn Surface) -> Result<()> {
        Ok(())
    }

    /// Resolves once this stage's input surface exists.
    fn request_surface(&mut self) -> Option<SurfaceRequest> {
        None
    }
}

/// A buffer a sink wrote and now gives back to the plugin that produced it.
pub struct Release {
    /// Buffer to give back.
    pub index: BufferIndex,
    /// Plugin that issued the buffer.
    pub owner: Shared<dyn Plugin>,
}

/// Terminal stage: multiplexer or renderer.
pub trait Render: InputStage {
    /// Accepts a frame produced by `owner`. Returns the buffers that were
    /// consumed and must go back to their owners.
    fn push_with_releaser(&mut self, frame: Frame, owner: Shared<dyn Plugin>) -> Result<Vec<Release>>;

    /// Counts one drained plugin after writing anything still held back.
    /// Returns the buffers that must go back to their owners.
    fn drain_with_releaser(&mut self) -> Result<Vec<Release>>;

    /// Buffers consumed outside a push or drain, e.g. by a flush on start.
    fn take_releases(&mut self) -> Vec<Release>;

    /// Registers a track format and returns its backend track id.
    fn add_media_format(&mut self, format: MediaFormat) -> Result<TrackId>;

    /// Signalled once every connected plugin drained.
    fn set_stop_listener(&mut self, control: ProcessorControl);

    /// Whether the output was finished.
    fn is_finalized(&self) -> bool;
}
