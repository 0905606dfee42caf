use bytes::BytesMut;
use log::{debug, warn};

use crate::av::{Command, CommandQueue, Frame, FrameFlags, MediaFormat, MediaKind, TrackId};
use crate::error::{FlowError, Result};
use crate::pipeline::{CaptureSource, OutputStage, Role, Source, Stage};
use crate::render::Surface;

/// A camera or screen grabber that draws its images onto a surface.
pub trait CaptureBackend: Send {
    /// Format of the captured video.
    fn media_format(&self) -> MediaFormat;

    /// Starts capturing.
    fn start(&mut self) -> Result<()>;

    /// Stops capturing.
    fn stop(&mut self) -> Result<()>;

    /// Whether a new image is waiting to be drawn.
    fn frame_available(&mut self) -> bool;

    /// Draws the newest image onto `surface` and returns its timestamp.
    fn draw(&mut self, surface: &mut dyn Surface) -> Result<i64>;

    /// Frees the device.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A live video source rendering into the input surface of an encoder.
pub struct CameraSource {
    backend: Box<dyn CaptureBackend>,
    surface: Option<Box<dyn Surface>>,
    output_queue: CommandQueue,
    stopped: bool,
}

impl CameraSource {
    /// Camera source over `backend`, stopped until started.
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            surface: None,
            output_queue: CommandQueue::new(),
            stopped: true,
        }
    }

    /// Whether the source is stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Stage for CameraSource {
    fn role(&self) -> Role {
        Role::CaptureSource
    }

    fn start(&mut self) -> Result<()> {
        self.backend.start()?;
        self.stopped = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.output_queue.clear();
        self.output_queue.queue(Command::EndOfFile, 0);
        self.backend.stop()
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
        self.backend.release()
    }

    fn fill_command_queues(&mut self) -> Result<()> {
        if self.stopped || self.surface.is_none() || !self.output_queue.is_empty() {
            return Ok(());
        }
        if self.backend.frame_available() {
            self.output_queue.queue(Command::HasData, 0);
        }
        Ok(())
    }
}

impl OutputStage for CameraSource {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.output_queue
    }
}

impl CaptureSource for CameraSource {
    fn get_frame(&mut self) -> Result<Frame> {
        if self.stopped {
            return Ok(Frame::eof());
        }
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| FlowError::Render("capture source has no output surface".into()))?;
        let pts = self.backend.draw(surface.as_mut())?;
        surface.set_presentation_time(pts);
        // the image lives on the surface; the payload only marks the frame as real
        Ok(Frame::with_data([1]).with_pts(pts))
    }

    fn media_format(&self) -> MediaFormat {
        self.backend.media_format()
    }

    fn set_output_surface(&mut self, surface: Box<dyn Surface>) {
        debug!("capture source renders into surface {:?}", surface.target());
        self.surface = Some(surface);
    }

    fn output_surface(&mut self) -> Option<&mut dyn Surface> {
        match self.surface.as_mut() {
            Some(surface) => Some(surface.as_mut()),
            None => None,
        }
    }
}

/// A microphone or other PCM capture device.
pub trait AudioCaptureBackend: Send {
    /// Format of the captured audio.
    fn media_format(&self) -> MediaFormat;

    /// Starts capturing.
    fn start(&mut self) -> Result<()>;

    /// Stops capturing.
    fn stop(&mut self) -> Result<()>;

    /// Reads the next chunk of samples into `buf` and returns its timestamp.
    /// `None` reports a read failure and ends the stream.
    fn read(&mut self, buf: &mut BytesMut) -> Result<Option<i64>>;

    /// Frees the device.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A live audio source. Publishes `HasData` on track 0 while running; the
/// frame pulled after [`Stage::stop`] is the end-of-stream sentinel.
pub struct MicrophoneSource {
    backend: Box<dyn AudioCaptureBackend>,
    output_queue: CommandQueue,
    stopped: bool,
    ended: bool,
}

impl MicrophoneSource {
    /// Microphone source over `backend`, stopped until started.
    pub fn new(backend: Box<dyn AudioCaptureBackend>) -> Self {
        Self {
            backend,
            output_queue: CommandQueue::new(),
            stopped: true,
            ended: false,
        }
    }

    /// Whether the source is stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn end(&mut self, frame: &mut Frame) {
        frame.data_mut().clear();
        frame.set_flags(FrameFlags::END_OF_STREAM);
        if !self.ended {
            self.ended = true;
            self.output_queue.queue(Command::EndOfFile, 0);
        }
    }
}

impl Stage for MicrophoneSource {
    fn role(&self) -> Role {
        Role::Microphone
    }

    fn start(&mut self) -> Result<()> {
        self.backend.start()?;
        self.stopped = false;
        self.ended = false;
        self.output_queue.queue(Command::HasData, 0);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        // one more pull hands out the end-of-stream frame
        self.output_queue.queue(Command::HasData, 0);
        self.stopped = true;
        self.backend.stop()
    }

    fn release(&mut self) -> Result<()> {
        self.backend.release()
    }
}

impl OutputStage for MicrophoneSource {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.output_queue
    }
}

impl Source for MicrophoneSource {
    fn pull(&mut self, frame: &mut Frame) -> Result<()> {
        if self.stopped {
            self.end(frame);
            return Ok(());
        }
        match self.backend.read(frame.data_mut())? {
            Some(pts) => {
                frame.set_pts(pts);
                frame.set_flags(FrameFlags::NONE);
                frame.set_track_id(0);
                self.output_queue.queue(Command::HasData, 0);
            }
            None => {
                warn!("microphone read failed, ending the stream");
                self.end(frame);
            }
        }
        Ok(())
    }

    fn track_count(&self) -> usize {
        1
    }

    fn track_format(&self, track: TrackId) -> Result<MediaFormat> {
        if track != 0 {
            return Err(FlowError::TrackOutOfRange { track, count: 1 });
        }
        Ok(self.backend.media_format())
    }

    fn track_id_by_kind(&self, kind: MediaKind) -> Option<TrackId> {
        (kind == MediaKind::Audio).then_some(0)
    }

    fn select_track(&mut self, track: TrackId) -> Result<()> {
        self.track_format(track).map(|_| ())
    }

    fn duration(&self) -> i64 {
        0
    }
}

/// Scripted capture backends.
pub mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Camera that has an image ready for every queued timestamp.
    pub struct TestCamera {
        /// Format reported to the pipeline.
        pub format: MediaFormat,
        /// Timestamps of the images still to capture.
        pub frames: VecDeque<i64>,
    }

    impl TestCamera {
        /// Camera with an image for each of `frames`.
        pub fn new(frames: impl IntoIterator<Item = i64>) -> Self {
            Self {
                format: MediaFormat::video("video/avc", 320, 240),
                frames: frames.into_iter().collect(),
            }
        }
    }

    impl CaptureBackend for TestCamera {
        fn media_format(&self) -> MediaFormat {
            self.format.clone()
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn frame_available(&mut self) -> bool {
            !self.frames.is_empty()
        }

        fn draw(&mut self, surface: &mut dyn Surface) -> Result<i64> {
            let pts = self
                .frames
                .pop_front()
                .ok_or_else(|| FlowError::Render("no image captured".into()))?;
            surface.draw_image()?;
            Ok(pts)
        }
    }

    /// Microphone returning queued chunks; an exhausted script is a read error.
    pub struct TestMicrophone {
        /// Format reported to the pipeline.
        pub format: MediaFormat,
        /// Chunks still to read, with their timestamps.
        pub chunks: VecDeque<(i64, Vec<u8>)>,
    }

    impl TestMicrophone {
        /// Microphone reading `chunks` in order.
        pub fn new(chunks: impl IntoIterator<Item = (i64, Vec<u8>)>) -> Self {
            Self {
                format: MediaFormat::audio("audio/raw", 44100, 1),
                chunks: chunks.into_iter().collect(),
            }
        }
    }

    impl AudioCaptureBackend for TestMicrophone {
        fn media_format(&self) -> MediaFormat {
            self.format.clone()
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut BytesMut) -> Result<Option<i64>> {
            Ok(self.chunks.pop_front().map(|(pts, data)| {
                buf.clear();
                buf.extend_from_slice(&data);
                pts
            }))
        }
    }
}

#[cfg(test)]
mod capture_tests {
    use super::tests::{TestCamera, TestMicrophone};
    use super::*;
    use crate::av::Resolution;
    use crate::render::tests::TestSurface;

    #[test]
    fn test_microphone_stop_emits_a_single_end_of_file() {
        let mut source = MicrophoneSource::new(Box::new(TestMicrophone::new([
            (0, vec![1, 2]),
            (10, vec![3, 4]),
        ])));
        source.start().unwrap();
        assert_eq!(source.output_queue().dequeue().unwrap(), (Command::HasData, 0));

        let mut frame = Frame::new();
        source.pull(&mut frame).unwrap();
        assert_eq!(frame.data(), &[1, 2]);
        assert_eq!(source.output_queue().dequeue().unwrap(), (Command::HasData, 0));

        source.stop().unwrap();
        source.stop().unwrap();
        assert_eq!(source.output_queue().dequeue().unwrap(), (Command::HasData, 0));
        assert!(source.output_queue().is_empty());

        let mut frame = Frame::new();
        source.pull(&mut frame).unwrap();
        assert!(frame.is_eof());
        source.pull(&mut frame).unwrap();
        assert_eq!(source.output_queue().len(), 1);
        assert_eq!(source.output_queue().first(), Some((Command::EndOfFile, 0)));
    }

    #[test]
    fn test_microphone_read_failure_ends_the_stream() {
        let mut source = MicrophoneSource::new(Box::new(TestMicrophone::new([])));
        source.start().unwrap();
        source.output_queue().clear();
        let mut frame = Frame::new();
        source.pull(&mut frame).unwrap();
        assert!(frame.is_eof());
        assert_eq!(source.output_queue().first(), Some((Command::EndOfFile, 0)));
    }

    #[test]
    fn test_camera_publishes_only_with_a_surface() {
        let mut source = CameraSource::new(Box::new(TestCamera::new([5, 10])));
        source.start().unwrap();
        source.fill_command_queues().unwrap();
        assert!(source.output_queue().is_empty());

        let surface = TestSurface::new(Resolution::new(320, 240));
        let log = surface.log();
        source.set_output_surface(Box::new(surface));
        source.fill_command_queues().unwrap();
        assert_eq!(source.output_queue().dequeue().unwrap(), (Command::HasData, 0));

        let frame = source.get_frame().unwrap();
        assert_eq!(frame.pts(), 5);
        assert_eq!(log.lock().drawn, 1);

        source.stop().unwrap();
        source.stop().unwrap();
        assert_eq!(source.output_queue().len(), 1);
        assert!(source.get_frame().unwrap().is_eof());
    }
}
