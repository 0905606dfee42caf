use std::collections::VecDeque;

use bytes::BytesMut;

use crate::av::{BufferIndex, Command, CommandQueue, Frame, MediaFormat, MediaKind, TrackId};
use crate::error::{FlowError, Result};
use crate::pipeline::{InputStage, OutputStage, Plugin, Role, Stage};

use super::{PluginState, EDGE_TRACK};

/// A transformation of raw audio samples.
pub trait AudioEffect: Send {
    /// Microsecond range the effect covers. `None` covers the whole stream.
    fn segment(&self) -> Option<(i64, i64)> {
        None
    }

    /// Transforms `samples` taken at `pts` in place.
    fn apply(&mut self, samples: &mut BytesMut, pts: i64) -> Result<()>;

    /// Format of the samples after this effect, when it changes them.
    fn media_format(&self) -> Option<MediaFormat> {
        None
    }
}

/// Applies [`AudioEffect`]s to decoded samples using a small pool of frames.
pub struct AudioEffector {
    state: PluginState,
    effects: Vec<Box<dyn AudioEffect>>,
    free: VecDeque<BufferIndex>,
    ready: VecDeque<Frame>,
    input_queue: CommandQueue,
    output_queue: CommandQueue,
    media_format: Option<MediaFormat>,
    track_id: TrackId,
    output_track_id: TrackId,
}

impl AudioEffector {
    /// Effector with `pool` frames in rotation.
    pub fn new(pool: usize) -> Self {
        Self {
            state: PluginState::Starting,
            effects: Vec::new(),
            free: (0..pool.max(1)).map(BufferIndex::new).collect(),
            ready: VecDeque::new(),
            input_queue: CommandQueue::new(),
            output_queue: CommandQueue::new(),
            media_format: None,
            track_id: 0,
            output_track_id: EDGE_TRACK,
        }
    }

    /// Appends an effect.
    pub fn add_effect(&mut self, effect: Box<dyn AudioEffect>) {
        self.effects.push(effect);
    }

    /// Removes the effect at `index`.
    pub fn remove_effect(&mut self, index: usize) -> Option<Box<dyn AudioEffect>> {
        if index < self.effects.len() {
            Some(self.effects.remove(index))
        } else {
            None
        }
    }

    fn is_draining(&self) -> bool {
        matches!(self.state, PluginState::Draining | PluginState::Drained)
    }

    fn feed_me_if_not_draining(&mut self) {
        let waiting = matches!(self.input_queue.first(), Some((Command::NeedData, _)));
        if !self.is_draining() && !self.free.is_empty() && !waiting {
            self.input_queue.queue(Command::NeedData, self.track_id);
        }
    }

    fn apply_effects(&mut self, frame: &mut Frame) -> Result<()> {
        let pts = frame.pts();
        for effect in self.effects.iter_mut() {
            let inside = match effect.segment() {
                None => true,
                Some((start, end)) => start <= pts && pts <= end,
            };
            if inside {
                effect.apply(frame.data_mut(), pts)?;
                if let Some(format) = effect.media_format() {
                    self.media_format = Some(format);
                }
            }
        }
        Ok(())
    }
}

impl Stage for AudioEffector {
    fn role(&self) -> Role {
        Role::Effector
    }

    fn start(&mut self) -> Result<()> {
        self.state = PluginState::Normal;
        self.input_queue.clear();
        self.feed_me_if_not_draining();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state = PluginState::Paused;
        Ok(())
    }
}

impl OutputStage for AudioEffector {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.output_queue
    }
}

impl InputStage for AudioEffector {
    fn input_queue(&mut self) -> &mut CommandQueue {
        &mut self.input_queue
    }

    fn track_id(&self) -> TrackId {
        self.track_id
    }

    fn set_track_id(&mut self, track_id: TrackId) {
        self.track_id = track_id;
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn configure(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        self.media_format = Some(format);
        Ok(())
    }

    fn push(&mut self, mut frame: Frame) -> Result<()> {
        if frame.is_eof() {
            return self.drain(frame.take_buffer_index());
        }
        if frame.is_empty() {
            if let Some(index) = frame.take_buffer_index() {
                self.free.push_back(index);
            }
            self.feed_me_if_not_draining();
            return Ok(());
        }
        self.apply_effects(&mut frame)?;
        self.ready.push_back(frame);
        self.output_queue.queue(Command::HasData, EDGE_TRACK);
        self.feed_me_if_not_draining();
        Ok(())
    }

    fn drain(&mut self, index: Option<BufferIndex>) -> Result<()> {
        if let Some(index) = index {
            self.free.push_back(index);
        }
        if self.is_draining() {
            return Ok(());
        }
        self.state = PluginState::Draining;
        self.input_queue.clear();
        self.output_queue.queue(Command::EndOfFile, EDGE_TRACK);
        Ok(())
    }

    fn find_free_frame(&mut self) -> Option<Frame> {
        if self.is_draining() {
            return None;
        }
        self.free
            .pop_front()
            .map(|index| Frame::new().with_buffer_index(index))
    }
}

impl Plugin for AudioEffector {
    fn get_frame(&mut self) -> Result<Frame> {
        match self.ready.pop_front() {
            Some(mut frame) => {
                frame.set_track_id(self.output_track_id);
                Ok(frame)
            }
            None if self.is_draining() => Ok(Frame::eof()),
            None => Ok(Frame::empty()),
        }
    }

    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<()> {
        self.free.push_back(index);
        self.feed_me_if_not_draining();
        Ok(())
    }

    fn output_format(&self) -> Result<MediaFormat> {
        self.media_format
            .clone()
            .ok_or(FlowError::MissingFormat(MediaKind::Audio))
    }

    fn output_track_id(&self) -> TrackId {
        self.output_track_id
    }

    fn set_output_track_id(&mut self, track_id: TrackId) {
        self.output_track_id = track_id;
    }

    fn set_input_media_format(&mut self, format: MediaFormat) {
        self.media_format = Some(format);
        self.output_queue
            .queue(Command::OutputFormatChanged, EDGE_TRACK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Halve;

    impl AudioEffect for Halve {
        fn segment(&self) -> Option<(i64, i64)> {
            Some((0, 100))
        }

        fn apply(&mut self, samples: &mut BytesMut, _pts: i64) -> Result<()> {
            for sample in samples.iter_mut() {
                *sample /= 2;
            }
            Ok(())
        }
    }

    fn filled(effector: &mut AudioEffector, data: &[u8], pts: i64) -> Frame {
        let mut frame = effector.find_free_frame().unwrap();
        frame.set_data(data);
        frame.set_pts(pts);
        frame
    }

    #[test]
    fn test_effect_applies_inside_segment() {
        let mut effector = AudioEffector::new(3);
        effector.add_effect(Box::new(Halve));
        effector.start().unwrap();

        let frame = filled(&mut effector, &[8, 4], 50);
        effector.push(frame).unwrap();
        let frame = filled(&mut effector, &[8, 4], 500);
        effector.push(frame).unwrap();

        assert_eq!(effector.get_frame().unwrap().data(), &[4, 2]);
        assert_eq!(effector.get_frame().unwrap().data(), &[8, 4]);
        assert!(effector.get_frame().unwrap().is_empty());
    }

    #[test]
    fn test_pool_exhaustion_stops_requests_until_release() {
        let mut effector = AudioEffector::new(2);
        effector.start().unwrap();
        assert_eq!(effector.input_queue().dequeue().unwrap(), (Command::NeedData, 0));

        let first = filled(&mut effector, &[1], 0);
        effector.push(first).unwrap();
        effector.input_queue().clear();
        let second = filled(&mut effector, &[2], 1);
        effector.push(second).unwrap();

        assert!(effector.find_free_frame().is_none());
        assert!(effector.input_queue().is_empty());

        let mut out = effector.get_frame().unwrap();
        effector
            .release_output_buffer(out.take_buffer_index().unwrap())
            .unwrap();
        assert_eq!(effector.input_queue().first(), Some((Command::NeedData, 0)));
    }

    #[test]
    fn test_input_format_change_is_announced() {
        let mut effector = AudioEffector::new(1);
        effector.set_input_media_format(MediaFormat::audio("audio/raw", 48000, 2));
        assert_eq!(
            effector.output_queue().first(),
            Some((Command::OutputFormatChanged, 0))
        );
        assert_eq!(effector.output_format().unwrap().sample_rate, Some(48000));
    }

    #[test]
    fn test_end_of_stream_returns_buffer_and_drains() {
        let mut effector = AudioEffector::new(1);
        effector.start().unwrap();
        let mut frame = effector.find_free_frame().unwrap();
        frame.set_flags(crate::av::FrameFlags::END_OF_STREAM);
        effector.push(frame).unwrap();

        assert_eq!(effector.output_queue().first(), Some((Command::EndOfFile, 0)));
        assert!(effector.get_frame().unwrap().is_eof());
        assert!(effector.find_free_frame().is_none());
    }
}
