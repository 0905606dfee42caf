use log::debug;

use crate::av::{BufferIndex, Command, CommandQueue, Frame, FrameFlags, MediaFormat, MediaKind, TrackId};
use crate::codec::{CodecMode, MediaCodec};
use crate::error::Result;
use crate::pipeline::{InputStage, OutputStage, Plugin, Role, Stage};
use crate::render::{RenderContext, Surface};

use super::codec::{CodecCore, Flavor, Polled};
use super::PluginState;

/// Frames a surface encoder accepts before the sink returns one.
const MAX_FRAMES_IN_FLIGHT: usize = 2;

fn drain_outputs(core: &mut CodecCore) -> Result<()> {
    loop {
        if core.poll_output()? == Polled::TryAgain {
            return Ok(());
        }
    }
}

/// Surface-input video encoder.
pub struct VideoEncoder {
    core: CodecCore,
    frames_in_flight: usize,
}

impl VideoEncoder {
    /// Video encoder over `codec`, fed through its input surface.
    pub fn new(codec: Box<dyn MediaCodec>) -> Self {
        Self {
            core: CodecCore::new(codec, MediaKind::Video, Flavor::Encoder),
            frames_in_flight: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        self.core.state
    }

    fn feed_me(&mut self) {
        if self.frames_in_flight >= MAX_FRAMES_IN_FLIGHT {
            return;
        }
        if !matches!(self.core.input_queue.first(), Some((Command::NeedData, _))) {
            self.core.need_data();
        }
    }
}

impl Stage for VideoEncoder {
    fn role(&self) -> Role {
        Role::Encoder
    }

    fn start(&mut self) -> Result<()> {
        self.core.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.core.stop()
    }

    fn release(&mut self) -> Result<()> {
        self.core.release()
    }

    fn fill_command_queues(&mut self) -> Result<()> {
        if self.core.state != PluginState::Normal {
            return Ok(());
        }
        drain_outputs(&mut self.core)?;
        self.feed_me();
        Ok(())
    }
}

impl OutputStage for VideoEncoder {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.core.output_queue
    }
}

impl InputStage for VideoEncoder {
    fn input_queue(&mut self) -> &mut CommandQueue {
        &mut self.core.input_queue
    }

    fn track_id(&self) -> TrackId {
        self.core.track_id
    }

    fn set_track_id(&mut self, track_id: TrackId) {
        self.core.track_id = track_id;
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn configure(&mut self) -> Result<()> {
        self.core.configure(None, CodecMode::Encoder)
    }

    fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        self.core.media_format = Some(format);
        Ok(())
    }

    fn push(&mut self, frame: Frame) -> Result<()> {
        if frame.is_eof() {
            return self.drain(None);
        }
        self.feed_me();
        Ok(())
    }

    fn drain(&mut self, _index: Option<BufferIndex>) -> Result<()> {
        if self.core.state != PluginState::Normal || self.core.input_closed {
            return Ok(());
        }
        debug!("signalling end of input stream to video encoder");
        self.core.input_queue.clear();
        self.core.input_closed = true;
        self.core.codec.signal_end_of_input_stream()
    }
}

impl Plugin for VideoEncoder {
    fn get_frame(&mut self) -> Result<Frame> {
        let frame = self.core.get_frame()?;
        drain_outputs(&mut self.core)?;
        Ok(frame)
    }

    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<()> {
        self.core.codec.release_output_buffer(index, false)?;
        self.frames_in_flight = self.frames_in_flight.saturating_sub(1);
        Ok(())
    }

    fn check_if_output_queue_has_data(&mut self) -> Result<()> {
        drain_outputs(&mut self.core)
    }

    fn output_format(&self) -> Result<MediaFormat> {
        self.core.output_format()
    }

    fn output_track_id(&self) -> TrackId {
        self.core.output_track_id
    }

    fn set_output_track_id(&mut self, track_id: TrackId) {
        self.core.output_track_id = track_id;
    }

    fn create_input_surface(&mut self, context: Option<RenderContext>) -> Result<Box<dyn Surface>> {
        self.core.codec.create_input_surface(context)
    }

    fn notify_surface_ready(&mut self, surface: &mut dyn Surface) -> Result<()> {
        if self.frames_in_flight < MAX_FRAMES_IN_FLIGHT {
            surface.swap_buffers()?;
            self.frames_in_flight += 1;
        }
        Ok(())
    }
}

/// Buffer-input audio encoder.
pub struct AudioEncoder {
    core: CodecCore,
}

impl AudioEncoder {
    /// Audio encoder over `codec`.
    pub fn new(codec: Box<dyn MediaCodec>) -> Self {
        Self {
            core: CodecCore::new(codec, MediaKind::Audio, Flavor::Encoder),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        self.core.state
    }
}

impl Stage for AudioEncoder {
    fn role(&self) -> Role {
        Role::Encoder
    }

    fn start(&mut self) -> Result<()> {
        self.core.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.core.stop()
    }

    fn release(&mut self) -> Result<()> {
        self.core.release()
    }

    fn fill_command_queues(&mut self) -> Result<()> {
        if self.core.state != PluginState::Normal {
            return Ok(());
        }
        drain_outputs(&mut self.core)?;
        self.core.feed_me_if_not_draining()
    }
}

impl OutputStage for AudioEncoder {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.core.output_queue
    }
}

impl InputStage for AudioEncoder {
    fn input_queue(&mut self) -> &mut CommandQueue {
        &mut self.core.input_queue
    }

    fn track_id(&self) -> TrackId {
        self.core.track_id
    }

    fn set_track_id(&mut self, track_id: TrackId) {
        self.core.track_id = track_id;
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn configure(&mut self) -> Result<()> {
        self.core.configure(None, CodecMode::Encoder)
    }

    fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        self.core.media_format = Some(format);
        Ok(())
    }

    fn push(&mut self, mut frame: Frame) -> Result<()> {
        if frame.is_eof() {
            return self.drain(frame.take_buffer_index());
        }
        if frame.is_empty() {
            if let Some(index) = frame.take_buffer_index() {
                self.core.input_indexes.push_front(index);
            }
            return self.core.feed_me_if_not_draining();
        }
        self.core.queue_frame(&mut frame, FrameFlags::NONE)?;
        drain_outputs(&mut self.core)?;
        self.core.feed_me_if_not_draining()
    }

    fn drain(&mut self, index: Option<BufferIndex>) -> Result<()> {
        if self.core.state != PluginState::Normal || self.core.input_closed {
            return Ok(());
        }
        match index.or_else(|| self.core.input_indexes.pop_front()) {
            Some(index) => {
                self.core.queue_end_of_stream(index)?;
                drain_outputs(&mut self.core)
            }
            None => {
                self.core.input_queue.clear();
                self.core.input_closed = true;
                self.core.codec.signal_end_of_input_stream()
            }
        }
    }

    fn find_free_frame(&mut self) -> Option<Frame> {
        self.core.find_free_frame()
    }
}

impl Plugin for AudioEncoder {
    fn get_frame(&mut self) -> Result<Frame> {
        self.core.feed_me_if_not_draining()?;
        let frame = self.core.get_frame()?;
        drain_outputs(&mut self.core)?;
        Ok(frame)
    }

    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<()> {
        self.core.codec.release_output_buffer(index, false)
    }

    fn check_if_output_queue_has_data(&mut self) -> Result<()> {
        drain_outputs(&mut self.core)
    }

    fn output_format(&self) -> Result<MediaFormat> {
        self.core.output_format()
    }

    fn output_track_id(&self) -> TrackId {
        self.core.output_track_id
    }

    fn set_output_track_id(&mut self, track_id: TrackId) {
        self.core.output_track_id = track_id;
    }
}
