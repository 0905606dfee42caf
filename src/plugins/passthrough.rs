use log::trace;

use crate::av::{BufferIndex, Command, CommandQueue, Frame, MediaFormat, MediaKind, TrackId};
use crate::error::{FlowError, Result};
use crate::pipeline::{InputStage, OutputStage, Plugin, Role, Stage};

use super::{PluginState, EDGE_TRACK};

/// Forwards source samples unchanged, e.g. to remux without transcoding.
pub struct PassThroughPlugin {
    kind: MediaKind,
    state: PluginState,
    frame: Option<Frame>,
    input_queue: CommandQueue,
    output_queue: CommandQueue,
    media_format: Option<MediaFormat>,
    track_id: TrackId,
    output_track_id: TrackId,
}

impl PassThroughPlugin {
    /// Pass-through for tracks of `kind`.
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            state: PluginState::Starting,
            frame: None,
            input_queue: CommandQueue::new(),
            output_queue: CommandQueue::new(),
            media_format: None,
            track_id: 0,
            output_track_id: EDGE_TRACK,
        }
    }

    fn is_draining(&self) -> bool {
        matches!(self.state, PluginState::Draining | PluginState::Drained)
    }

    fn feed_me_if_not_draining(&mut self) {
        if !self.is_draining() {
            self.input_queue.queue(Command::NeedData, self.track_id);
        }
    }
}

impl Stage for PassThroughPlugin {
    fn role(&self) -> Role {
        Role::PassThrough
    }

    fn start(&mut self) -> Result<()> {
        self.state = PluginState::Normal;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state = PluginState::Paused;
        self.frame = None;
        self.output_queue.clear();
        Ok(())
    }
}

impl OutputStage for PassThroughPlugin {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.output_queue
    }
}

impl InputStage for PassThroughPlugin {
    fn input_queue(&mut self) -> &mut CommandQueue {
        &mut self.input_queue
    }

    fn track_id(&self) -> TrackId {
        self.track_id
    }

    fn set_track_id(&mut self, track_id: TrackId) {
        self.track_id = track_id;
        self.input_queue.clear();
        self.feed_me_if_not_draining();
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn configure(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        self.media_format = Some(format);
        self.output_queue.queue(Command::OutputFormatChanged, EDGE_TRACK);
        Ok(())
    }

    fn push(&mut self, frame: Frame) -> Result<()> {
        if frame.is_eof() {
            return self.drain(None);
        }
        if frame.should_skip() || frame.is_empty() {
            trace!("pass-through dropping frame at {}", frame.pts());
            self.feed_me_if_not_draining();
            return Ok(());
        }
        self.frame = Some(frame);
        self.output_queue.queue(Command::HasData, EDGE_TRACK);
        Ok(())
    }

    fn drain(&mut self, _index: Option<BufferIndex>) -> Result<()> {
        if self.is_draining() {
            return Ok(());
        }
        self.state = PluginState::Draining;
        self.input_queue.clear();
        self.output_queue.queue(Command::EndOfFile, EDGE_TRACK);
        Ok(())
    }

    fn find_free_frame(&mut self) -> Option<Frame> {
        if self.is_draining() || self.frame.is_some() {
            return None;
        }
        Some(Frame::new())
    }
}

impl Plugin for PassThroughPlugin {
    fn get_frame(&mut self) -> Result<Frame> {
        match self.frame.take() {
            Some(mut frame) => {
                self.feed_me_if_not_draining();
                frame.set_track_id(self.output_track_id);
                Ok(frame)
            }
            None if self.is_draining() => Ok(Frame::eof()),
            None => Err(FlowError::InvalidState(
                "pass-through frame pulled twice".into(),
            )),
        }
    }

    fn release_output_buffer(&mut self, _index: BufferIndex) -> Result<()> {
        Ok(())
    }

    fn output_format(&self) -> Result<MediaFormat> {
        self.media_format
            .clone()
            .ok_or(FlowError::MissingFormat(self.kind))
    }

    fn output_track_id(&self) -> TrackId {
        self.output_track_id
    }

    fn set_output_track_id(&mut self, track_id: TrackId) {
        self.output_track_id = track_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_announced_once_set() {
        let mut plugin = PassThroughPlugin::new(MediaKind::Video);
        assert!(plugin.output_queue().is_empty());
        plugin
            .set_media_format(MediaFormat::video("video/avc", 640, 480))
            .unwrap();
        assert_eq!(
            plugin.output_queue().first(),
            Some((Command::OutputFormatChanged, 0))
        );
    }

    #[test]
    fn test_forwards_frames_on_its_output_track() {
        let mut plugin = PassThroughPlugin::new(MediaKind::Audio);
        plugin.set_track_id(1);
        plugin.start().unwrap();
        plugin.set_output_track_id(3);
        assert_eq!(plugin.input_queue().dequeue().unwrap(), (Command::NeedData, 1));

        let mut frame = plugin.find_free_frame().unwrap();
        frame.set_data(&[7, 8]);
        frame.set_pts(42);
        plugin.push(frame).unwrap();
        assert!(plugin.find_free_frame().is_none());
        assert_eq!(plugin.output_queue().first(), Some((Command::HasData, 0)));

        let out = plugin.get_frame().unwrap();
        assert_eq!(out.data(), &[7, 8]);
        assert_eq!(out.track_id(), 3);
        assert_eq!(plugin.input_queue().first(), Some((Command::NeedData, 1)));
        assert!(plugin.get_frame().is_err());
    }

    #[test]
    fn test_drain_emits_end_of_file() {
        let mut plugin = PassThroughPlugin::new(MediaKind::Video);
        plugin.set_track_id(0);
        plugin.start().unwrap();
        plugin.push(Frame::eof()).unwrap();
        plugin.drain(None).unwrap();

        assert!(plugin.input_queue().is_empty());
        assert_eq!(plugin.output_queue().len(), 1);
        assert_eq!(plugin.output_queue().first(), Some((Command::EndOfFile, 0)));
        assert!(plugin.get_frame().unwrap().is_eof());
    }
}
