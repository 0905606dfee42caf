use log::debug;

use crate::av::{BufferIndex, Command, CommandQueue, Frame, MediaFormat, MediaKind, Resolution, TrackId};
use crate::codec::{CodecMode, MediaCodec};
use crate::error::Result;
use crate::pipeline::{InputStage, OutputStage, Plugin, Role, Stage};
use crate::render::{Surface, SurfaceTarget};

use super::codec::{CodecCore, Flavor};

/// Decoder plugin for either media kind.
///
/// A video decoder renders into a surface: either one it owns (handed over
/// by an encoder) or one owned by an effector, bound through its target.
pub struct Decoder {
    core: CodecCore,
    output_surface: Option<Box<dyn Surface>>,
    output_target: Option<SurfaceTarget>,
}

impl Decoder {
    /// Decoder for `kind` over `codec`.
    pub fn new(codec: Box<dyn MediaCodec>, kind: MediaKind) -> Self {
        Self {
            core: CodecCore::new(codec, kind, Flavor::Decoder),
            output_surface: None,
            output_target: None,
        }
    }

    /// Video decoder.
    pub fn video(codec: Box<dyn MediaCodec>) -> Self {
        Self::new(codec, MediaKind::Video)
    }

    /// Audio decoder.
    pub fn audio(codec: Box<dyn MediaCodec>) -> Self {
        Self::new(codec, MediaKind::Audio)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> super::PluginState {
        self.core.state
    }

    fn init_input_queue(&mut self) {
        if self.core.kind == MediaKind::Video {
            let track = self.core.track_id;
            self.core.input_queue.queue(Command::NeedInputFormat, track);
        }
    }
}

impl Stage for Decoder {
    fn role(&self) -> Role {
        Role::Decoder
    }

    fn start(&mut self) -> Result<()> {
        self.core.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.core.stop()
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut surface) = self.output_surface.take() {
            surface.release();
        }
        self.core.release()
    }

    fn fill_command_queues(&mut self) -> Result<()> {
        self.core.fill_command_queues()
    }
}

impl OutputStage for Decoder {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.core.output_queue
    }
}

impl InputStage for Decoder {
    fn input_queue(&mut self) -> &mut CommandQueue {
        &mut self.core.input_queue
    }

    fn track_id(&self) -> TrackId {
        self.core.track_id
    }

    fn set_track_id(&mut self, track_id: TrackId) {
        self.core.track_id = track_id;
        self.init_input_queue();
    }

    fn kind(&self) -> MediaKind {
        self.core.kind
    }

    fn configure(&mut self) -> Result<()> {
        self.core.configure(self.output_target, CodecMode::Decoder)
    }

    fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        self.core.media_format = Some(format);
        Ok(())
    }

    fn push(&mut self, mut frame: Frame) -> Result<()> {
        if frame.is_eof() {
            return self.drain(frame.take_buffer_index());
        }
        let pts = frame.pts();
        let skip = frame.should_skip();
        let flags = frame.flags();
        self.core.queue_frame(&mut frame, flags)?;
        if skip {
            self.core.skip_pts.push(pts);
        }
        self.core.poll_output()?;
        self.core.feed_me_if_not_draining()
    }

    fn drain(&mut self, index: Option<BufferIndex>) -> Result<()> {
        let index = match index.or_else(|| self.core.input_indexes.pop_front()) {
            Some(index) => index,
            None => {
                self.core.input_queue.clear();
                self.core.input_closed = true;
                return self.core.codec.signal_end_of_input_stream();
            }
        };
        self.core.queue_end_of_stream(index)
    }

    fn find_free_frame(&mut self) -> Option<Frame> {
        self.core.find_free_frame()
    }
}

impl Plugin for Decoder {
    fn get_frame(&mut self) -> Result<Frame> {
        self.core.feed_me_if_not_draining()?;
        let frame = self.core.get_frame()?;
        self.core.poll_output()?;
        Ok(frame)
    }

    fn release_output_buffer(&mut self, index: BufferIndex) -> Result<()> {
        let render = self.output_target.is_some();
        self.core.codec.release_output_buffer(index, render)
    }

    fn check_if_output_queue_has_data(&mut self) -> Result<()> {
        self.core.poll_output().map(|_| ())
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

    fn set_input_resolution(&mut self, resolution: Resolution) {
        if let Some(surface) = self.output_surface.as_mut() {
            surface.set_input_size(resolution);
        }
    }

    fn set_output_surface(&mut self, surface: Box<dyn Surface>) -> Result<()> {
        debug!("decoder takes ownership of surface {:?}", surface.target());
        self.output_target = Some(surface.target());
        self.output_surface = Some(surface);
        Ok(())
    }

    fn set_output_target(&mut self, target: SurfaceTarget) -> Result<()> {
        self.output_surface = None;
        self.output_target = Some(target);
        Ok(())
    }

    fn output_surface(&mut self) -> Option<&mut dyn Surface> {
        match self.output_surface.as_mut() {
            Some(surface) => Some(surface.as_mut()),
            None => None,
        }
    }

    fn wait_for_surface(&mut self, pts: i64) -> Result<()> {
        if let Some(surface) = self.output_surface.as_mut() {
            surface.await_new_image()?;
            surface.draw_image()?;
            surface.set_presentation_time(pts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::FrameFlags;
    use crate::codec::tests::TestCodec;
    use crate::plugins::PluginState;

    fn started_video_decoder() -> (Decoder, TestCodec) {
        let codec = TestCodec::new(MediaFormat::video("video/raw", 320, 240));
        let mut decoder = Decoder::video(Box::new(codec.clone()));
        decoder
            .set_media_format(MediaFormat::video("video/avc", 320, 240))
            .unwrap();
        decoder.set_track_id(0);
        decoder.configure().unwrap();
        decoder.start().unwrap();
        (decoder, codec)
    }

    #[test]
    fn test_video_decoder_waits_for_input_format() {
        let (mut decoder, _) = started_video_decoder();
        assert_eq!(
            decoder.input_queue().first(),
            Some((Command::NeedInputFormat, 0))
        );
    }

    #[test]
    fn test_fill_reports_format_change_then_asks_for_data() {
        let (mut decoder, _) = started_video_decoder();
        decoder.input_queue().clear();
        decoder.fill_command_queues().unwrap();
        assert_eq!(
            decoder.output_queue().first(),
            Some((Command::OutputFormatChanged, 0))
        );
        assert_eq!(decoder.input_queue().first(), Some((Command::NeedData, 0)));
    }

    #[test]
    fn test_push_produces_data_followed_by_next_pair_hint() {
        let (mut decoder, _) = started_video_decoder();
        decoder.fill_command_queues().unwrap();
        decoder.output_queue().clear();

        let mut frame = decoder.find_free_frame().unwrap();
        frame.set_data(&[1, 2, 3]);
        frame.set_pts(100);
        decoder.push(frame).unwrap();

        let commands: Vec<_> = decoder.output_queue().iter().copied().collect();
        assert_eq!(
            commands,
            vec![(Command::HasData, 0), (Command::NextPair, 0)]
        );
        let mut out = decoder.get_frame().unwrap();
        assert_eq!(out.data(), &[1, 2, 3]);
        assert_eq!(out.pts(), 100);
        let index = out.take_buffer_index().unwrap();
        decoder.release_output_buffer(index).unwrap();
    }

    #[test]
    fn test_skipped_frames_never_reach_the_output() {
        let (mut decoder, codec) = started_video_decoder();
        decoder.fill_command_queues().unwrap();
        decoder.output_queue().clear();

        let mut frame = decoder.find_free_frame().unwrap();
        frame.set_data(&[9]);
        frame.set_pts(40);
        frame.set_skip(true);
        decoder.push(frame).unwrap();

        assert!(!decoder.output_queue().contains(Command::HasData));
        assert_eq!(codec.log().lock().released_outputs, vec![(0, false)]);
    }

    #[test]
    fn test_end_of_stream_turns_into_end_of_file() {
        let (mut decoder, codec) = started_video_decoder();
        decoder.fill_command_queues().unwrap();
        decoder.output_queue().clear();

        let frame = decoder.find_free_frame().unwrap();
        let index = frame.buffer_index().map(|i| i.raw()).unwrap();
        decoder.drain(Some(BufferIndex::new(index))).unwrap();
        assert!(decoder.input_queue().is_empty());
        decoder.fill_command_queues().unwrap();

        assert_eq!(decoder.output_queue().first(), Some((Command::EndOfFile, 0)));
        assert_eq!(decoder.state(), PluginState::Draining);
        assert!(codec.log().lock().inputs[0].flags.contains(FrameFlags::END_OF_STREAM));
        assert!(decoder.get_frame().unwrap().is_eof());
    }

    #[test]
    fn test_end_of_stream_waits_for_pending_frames() {
        let (mut decoder, _) = started_video_decoder();
        decoder.fill_command_queues().unwrap();
        decoder.output_queue().clear();

        let mut frame = decoder.find_free_frame().unwrap();
        frame.set_data(&[4]);
        frame.set_pts(10);
        decoder.push(frame).unwrap();
        decoder.drain(None).unwrap();
        decoder.check_if_output_queue_has_data().unwrap();
        assert!(!decoder.output_queue().contains(Command::EndOfFile));

        let out = decoder.get_frame().unwrap();
        assert_eq!(out.data(), &[4]);
        assert!(decoder.output_queue().contains(Command::EndOfFile));
        assert!(!decoder.output_queue().contains(Command::HasData));
    }
}
