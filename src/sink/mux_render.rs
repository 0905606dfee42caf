use log::{debug, info, trace, warn};
use std::mem;

use crate::av::{Command, CommandQueue, Frame, FrameFlags, MediaFormat, MediaKind, TrackId};
use crate::error::{FlowError, Result};
use crate::format::MediaMuxer;
use crate::pipeline::{InputStage, Plugin, ProcessorControl, Release, Render, Role, Shared, Stage};
use crate::plugins::PluginState;

use super::{FrameBuffer, ProgressTracker};

/// Receives the progress fraction after each written sample.
pub type ProgressCallback = Box<dyn FnMut(f32) + Send>;

type Buffered = (Frame, Option<Shared<dyn Plugin>>);

/// Sink writing encoded samples into a [`MediaMuxer`].
///
/// Every connected plugin calls [`InputStage::configure`] once and later
/// registers its output format. Samples arriving before the last format
/// are held in a [`FrameBuffer`]; the muxer starts once every track is
/// known. When each connected plugin has drained, the muxer is stopped and
/// released and the stop listener completes the run. That happens once.
pub struct MuxRender {
    muxer: Box<dyn MediaMuxer>,
    input_queue: CommandQueue,
    buffer: FrameBuffer<Buffered>,
    state: PluginState,
    kind: MediaKind,
    connected_plugins: usize,
    configured_tracks: usize,
    track_ids: Vec<(MediaKind, TrackId)>,
    drain_count: usize,
    muxer_started: bool,
    muxer_closed: bool,
    frames_written: bool,
    finalized: bool,
    progress: ProgressTracker,
    progress_step: f32,
    reported: f32,
    on_progress: Option<ProgressCallback>,
    stop_listener: Option<ProcessorControl>,
    pending_releases: Vec<Release>,
}

impl MuxRender {
    /// Sink writing through `muxer`.
    pub fn new(muxer: Box<dyn MediaMuxer>) -> Self {
        Self {
            muxer,
            input_queue: CommandQueue::new(),
            buffer: FrameBuffer::new(0),
            state: PluginState::Starting,
            kind: MediaKind::Video,
            connected_plugins: 0,
            configured_tracks: 0,
            track_ids: Vec::new(),
            drain_count: 0,
            muxer_started: false,
            muxer_closed: false,
            frames_written: false,
            finalized: false,
            progress: ProgressTracker::default(),
            progress_step: 0.0,
            reported: 0.0,
            on_progress: None,
            stop_listener: None,
            pending_releases: Vec::new(),
        }
    }

    /// Expected output duration, for progress reporting.
    pub fn set_duration(&mut self, duration: i64) {
        self.progress.set_finish(duration);
    }

    /// Reports progress whenever it moved by at least `step`.
    pub fn set_progress_listener(&mut self, step: f32, callback: ProgressCallback) {
        self.progress_step = step.max(0.0);
        self.on_progress = Some(callback);
    }

    /// Fraction of the expected duration written so far.
    pub fn progress(&self) -> f32 {
        self.progress.progress()
    }

    /// Number of plugins feeding the sink.
    pub fn connected_plugins(&self) -> usize {
        self.connected_plugins
    }

    /// Frames held until every track is configured.
    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    fn is_draining(&self) -> bool {
        matches!(self.state, PluginState::Draining | PluginState::Drained)
    }

    fn feed_me_if_not_draining(&mut self) {
        if !self.is_draining() {
            self.input_queue.queue(Command::NeedData, 0);
        }
    }

    fn ready_to_write(&self) -> bool {
        self.connected_plugins > 0 && self.buffer.are_all_tracks_configured()
    }

    fn start_muxer(&mut self) -> Result<()> {
        if self.muxer_started || !self.ready_to_write() {
            return Ok(());
        }
        info!("starting muxer with {} tracks", self.configured_tracks);
        self.muxer.start()?;
        self.muxer_started = true;
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        trace!(
            "writing {} bytes at {} on track {}",
            frame.len(),
            frame.pts(),
            frame.track_id()
        );
        self.muxer
            .write_sample_data(frame.track_id(), frame.data(), frame.pts(), frame.flags())?;
        self.frames_written = true;
        self.progress.track(frame.pts());
        self.report_progress();
        Ok(())
    }

    fn report_progress(&mut self) {
        let progress = self.progress.progress();
        if let Some(callback) = self.on_progress.as_mut() {
            if progress - self.reported >= self.progress_step && progress > self.reported {
                self.reported = progress;
                callback(progress);
            }
        }
    }

    /// Writes one frame and collects its buffer for release. Returns
    /// whether the frame ended its stream.
    fn write_one(&mut self, (mut frame, owner): Buffered, releases: &mut Vec<Release>) -> Result<bool> {
        let end = frame.flags().contains(FrameFlags::END_OF_STREAM);
        if !frame.is_empty() && !frame.is_eof() {
            self.write(&frame)?;
        }
        if let Some(index) = frame.take_buffer_index() {
            match owner {
                Some(owner) => releases.push(Release { index, owner }),
                None => warn!("sink dropped buffer {} without an owner", index.raw()),
            }
        }
        Ok(end)
    }

    fn accept(&mut self, frame: Frame, owner: Option<Shared<dyn Plugin>>) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        if self.finalized {
            warn!("sink received a frame after it was finalized");
            Self::hand_back(frame, owner, &mut releases);
            return Ok(releases);
        }

        if frame.is_eof() {
            Self::hand_back(frame, owner, &mut releases);
            self.end_stream()?;
            releases.append(&mut self.pending_releases);
            return Ok(releases);
        }

        if !self.ready_to_write() {
            self.buffer.push((frame, owner));
            self.input_queue.queue(Command::NeedInputFormat, 0);
            return Ok(releases);
        }

        let mut ended = self.flush()?;
        releases.append(&mut self.pending_releases);
        if self.write_one((frame, owner), &mut releases)? {
            ended += 1;
        }
        if ended == 0 {
            self.feed_me_if_not_draining();
        }
        for _ in 0..ended {
            self.count_drain()?;
        }
        releases.append(&mut self.pending_releases);
        Ok(releases)
    }

    /// Writes the frames held back while formats were missing, once every
    /// track is known. Their buffers join the pending releases. Returns how
    /// many of them ended their stream.
    fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() || !self.ready_to_write() {
            return Ok(0);
        }
        self.start_muxer()?;
        debug!("flushing {} buffered frames", self.buffer.len());
        let mut releases = mem::take(&mut self.pending_releases);
        let mut ended = 0;
        while let Some(buffered) = self.buffer.pull() {
            if self.write_one(buffered, &mut releases)? {
                ended += 1;
            }
        }
        self.pending_releases = releases;
        Ok(ended)
    }

    /// One upstream plugin finished: buffered frames go out first.
    fn end_stream(&mut self) -> Result<()> {
        if self.finalized {
            warn!("sink drained again after finalize");
            return Ok(());
        }
        let ended = self.flush()?;
        for _ in 0..ended {
            self.count_drain()?;
        }
        self.count_drain()
    }

    fn count_drain(&mut self) -> Result<()> {
        if self.finalized {
            warn!("sink drained again after finalize");
            return Ok(());
        }
        self.drain_count += 1;
        debug!(
            "sink drain {} of {}",
            self.drain_count, self.connected_plugins
        );
        if self.drain_count >= self.connected_plugins {
            return self.finalize();
        }
        if self.buffer.are_all_tracks_configured() {
            self.feed_me_if_not_draining();
        } else {
            self.input_queue.queue(Command::NeedInputFormat, 0);
        }
        Ok(())
    }

    /// Hands the buffer of an unwritten frame back.
    fn hand_back(mut frame: Frame, owner: Option<Shared<dyn Plugin>>, releases: &mut Vec<Release>) {
        if let (Some(index), Some(owner)) = (frame.take_buffer_index(), owner) {
            releases.push(Release { index, owner });
        }
    }

    fn close_muxer(&mut self) -> Result<()> {
        if self.muxer_closed {
            return Ok(());
        }
        self.muxer_closed = true;
        let result = if self.muxer_started {
            self.muxer.stop().and_then(|_| self.muxer.release())
        } else {
            self.muxer.release()
        };
        match result {
            Err(err) if !self.frames_written => {
                warn!("closing muxer that never wrote a sample failed: {}", err);
                Ok(())
            }
            other => other,
        }
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        info!("all {} plugins drained, finalizing sink", self.connected_plugins);
        if !self.buffer.is_empty() {
            warn!("finalizing with {} frames still waiting for formats", self.buffer.len());
            let mut releases = mem::take(&mut self.pending_releases);
            while let Some((frame, owner)) = self.buffer.take() {
                Self::hand_back(frame, owner, &mut releases);
            }
            self.pending_releases = releases;
        }
        self.input_queue.clear();
        self.state = PluginState::Drained;
        let closed = self.close_muxer();
        if let Some(control) = self.stop_listener.as_ref() {
            control.complete();
        }
        closed
    }
}

impl Stage for MuxRender {
    fn role(&self) -> Role {
        Role::Sink
    }

    fn start(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.state == PluginState::Starting {
            self.state = PluginState::Normal;
        }
        if self.muxer_started || !self.ready_to_write() {
            return Ok(());
        }
        self.start_muxer()?;
        let ended = self.flush()?;
        for _ in 0..self.configured_tracks {
            self.feed_me_if_not_draining();
        }
        for _ in 0..ended {
            self.count_drain()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.finalized {
            self.state = PluginState::Paused;
        }
        self.input_queue.clear();
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.buffer = FrameBuffer::new(self.buffer.track_count());
        self.close_muxer()
    }
}

impl InputStage for MuxRender {
    fn input_queue(&mut self) -> &mut CommandQueue {
        &mut self.input_queue
    }

    fn track_id(&self) -> TrackId {
        0
    }

    fn set_track_id(&mut self, _track_id: TrackId) {}

    /// Kind of the most recently registered track.
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn configure(&mut self) -> Result<()> {
        self.connected_plugins += 1;
        self.input_queue.queue(Command::NeedInputFormat, 0);
        self.buffer.add_track();
        Ok(())
    }

    fn set_media_format(&mut self, format: MediaFormat) -> Result<()> {
        self.add_media_format(format).map(|_| ())
    }

    fn push(&mut self, frame: Frame) -> Result<()> {
        self.accept(frame, None).map(|_| ())
    }

    fn drain(&mut self, _index: Option<crate::av::BufferIndex>) -> Result<()> {
        self.end_stream()
    }
}

impl Render for MuxRender {
    fn push_with_releaser(&mut self, frame: Frame, owner: Shared<dyn Plugin>) -> Result<Vec<Release>> {
        self.accept(frame, Some(owner))
    }

    fn drain_with_releaser(&mut self) -> Result<Vec<Release>> {
        self.end_stream()?;
        Ok(self.take_releases())
    }

    fn take_releases(&mut self) -> Vec<Release> {
        mem::take(&mut self.pending_releases)
    }

    fn add_media_format(&mut self, format: MediaFormat) -> Result<TrackId> {
        if self.finalized {
            return Err(FlowError::InvalidState("sink already finalized".into()));
        }
        // a format change after a file rollover keeps the track
        if let Some((_, track)) = self.track_ids.iter().find(|(kind, _)| *kind == format.kind) {
            debug!("sink keeps track {} for {}", track, format.mime);
            return Ok(*track);
        }
        if self.muxer_started {
            return Err(FlowError::InvalidState(
                "muxer started before every track was registered".into(),
            ));
        }
        let track = self.muxer.add_track(&format)?;
        info!("sink registered {} as track {}", format.mime, track);
        self.kind = format.kind;
        self.track_ids.push((format.kind, track));
        self.buffer.configure(self.configured_tracks);
        self.configured_tracks += 1;
        Ok(track)
    }

    fn set_stop_listener(&mut self, control: ProcessorControl) {
        self.stop_listener = Some(control);
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::BufferIndex;
    use crate::format::tests::{TestMuxer, WrittenSample};
    use crate::pipeline::shared;
    use crate::plugins::PassThroughPlugin;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn owner() -> Shared<dyn Plugin> {
        shared(PassThroughPlugin::new(MediaKind::Video))
    }

    fn two_track_sink() -> (MuxRender, Arc<Mutex<crate::format::tests::MuxerLog>>) {
        let muxer = TestMuxer::new();
        let log = muxer.log();
        let mut sink = MuxRender::new(Box::new(muxer));
        sink.configure().unwrap();
        sink.configure().unwrap();
        sink.start().unwrap();
        (sink, log)
    }

    #[test]
    fn test_samples_wait_for_every_format() {
        let (mut sink, log) = two_track_sink();
        let video = sink
            .add_media_format(MediaFormat::video("video/avc", 320, 240))
            .unwrap();
        sink.start().unwrap();

        let frame = Frame::with_data([1, 2])
            .with_pts(10)
            .with_track_id(video)
            .with_buffer_index(BufferIndex::new(4));
        let releases = sink.push_with_releaser(frame, owner()).unwrap();
        assert!(releases.is_empty());
        assert!(log.lock().samples.is_empty());
        assert_eq!(log.lock().started, 0);
        assert_eq!(sink.buffered_frames(), 1);

        let audio = sink
            .add_media_format(MediaFormat::audio("audio/mp4a-latm", 44100, 2))
            .unwrap();
        sink.start().unwrap();
        assert_eq!(log.lock().started, 1);

        let frame = Frame::with_data([3]).with_pts(5).with_track_id(audio);
        let releases = sink.push_with_releaser(frame, owner()).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].index.raw(), 4);
        assert_eq!(
            log.lock().samples,
            vec![
                WrittenSample { track: video, data: vec![1, 2], pts: 10, flags: FrameFlags::NONE },
                WrittenSample { track: audio, data: vec![3], pts: 5, flags: FrameFlags::NONE },
            ]
        );
    }

    #[test]
    fn test_drain_flushes_frames_held_for_a_late_format() {
        let (mut sink, log) = two_track_sink();
        let control = ProcessorControl::new();
        sink.set_stop_listener(control.clone());
        let video = sink
            .add_media_format(MediaFormat::video("video/avc", 320, 240))
            .unwrap();
        let frame = Frame::with_data([1])
            .with_pts(0)
            .with_track_id(video)
            .with_buffer_index(BufferIndex::new(2));
        assert!(sink.push_with_releaser(frame, owner()).unwrap().is_empty());
        sink.add_media_format(MediaFormat::audio("audio/mp4a-latm", 44100, 2))
            .unwrap();

        let releases = sink.drain_with_releaser().unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].index.raw(), 2);
        assert_eq!(sink.buffered_frames(), 0);
        assert_eq!(log.lock().started, 1);
        assert_eq!(log.lock().samples.len(), 1);
        assert!(!sink.is_finalized());

        assert!(sink.drain_with_releaser().unwrap().is_empty());
        assert!(sink.is_finalized());
        assert!(control.is_completed());
        assert_eq!(log.lock().samples[0].data, vec![1]);
    }

    #[test]
    fn test_start_flushes_once_the_last_format_arrives() {
        let (mut sink, log) = two_track_sink();
        let video = sink
            .add_media_format(MediaFormat::video("video/avc", 320, 240))
            .unwrap();
        let frame = Frame::with_data([5])
            .with_pts(0)
            .with_track_id(video)
            .with_buffer_index(BufferIndex::new(3));
        sink.push_with_releaser(frame, owner()).unwrap();
        sink.add_media_format(MediaFormat::audio("audio/mp4a-latm", 44100, 2))
            .unwrap();
        sink.start().unwrap();

        assert_eq!(log.lock().samples.len(), 1);
        let releases = sink.take_releases();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].index.raw(), 3);
        assert!(sink.take_releases().is_empty());

        sink.drain(None).unwrap();
        sink.drain(None).unwrap();
        assert!(sink.is_finalized());
        assert_eq!(log.lock().samples.len(), 1);
    }

    #[test]
    fn test_end_of_stream_sentinel_flushes_before_counting() {
        let (mut sink, log) = two_track_sink();
        let video = sink
            .add_media_format(MediaFormat::video("video/avc", 320, 240))
            .unwrap();
        sink.push_with_releaser(Frame::with_data([9]).with_track_id(video), owner())
            .unwrap();
        sink.add_media_format(MediaFormat::audio("audio/mp4a-latm", 44100, 2))
            .unwrap();

        sink.push_with_releaser(Frame::eof(), owner()).unwrap();
        sink.push_with_releaser(Frame::eof(), owner()).unwrap();
        assert!(sink.is_finalized());
        assert_eq!(log.lock().samples.len(), 1);
        assert_eq!(log.lock().stopped, 1);
    }

    #[test]
    fn test_finalize_hands_back_frames_that_never_got_a_format() {
        let (mut sink, log) = two_track_sink();
        let video = sink
            .add_media_format(MediaFormat::video("video/avc", 320, 240))
            .unwrap();
        let frame = Frame::with_data([1])
            .with_track_id(video)
            .with_buffer_index(BufferIndex::new(6));
        sink.push_with_releaser(frame, owner()).unwrap();

        assert!(sink.drain_with_releaser().unwrap().is_empty());
        let releases = sink.drain_with_releaser().unwrap();
        assert!(sink.is_finalized());
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].index.raw(), 6);
        assert!(log.lock().samples.is_empty());
    }

    #[test]
    fn test_finalize_happens_once() {
        let (mut sink, log) = two_track_sink();
        let control = ProcessorControl::new();
        sink.set_stop_listener(control.clone());

        sink.drain(None).unwrap();
        assert!(!sink.is_finalized());
        assert_eq!(sink.input_queue().first(), Some((Command::NeedInputFormat, 0)));

        sink.drain(None).unwrap();
        sink.drain(None).unwrap();
        sink.release().unwrap();
        assert!(sink.is_finalized());
        assert!(control.is_completed());
        assert!(sink.input_queue().is_empty());
        assert_eq!(log.lock().released, 1);
    }

    #[test]
    fn test_end_of_stream_sentinel_is_not_written() {
        let muxer = TestMuxer::new();
        let log = muxer.log();
        let mut sink = MuxRender::new(Box::new(muxer));
        sink.configure().unwrap();
        sink.add_media_format(MediaFormat::video("video/avc", 64, 64)).unwrap();
        sink.start().unwrap();

        let eof = Frame::eof().with_buffer_index(BufferIndex::new(9));
        let releases = sink.push_with_releaser(eof, owner()).unwrap();
        assert_eq!(releases.len(), 1);
        assert!(log.lock().samples.is_empty());
        assert!(sink.is_finalized());
        assert_eq!(log.lock().stopped, 1);
    }

    #[test]
    fn test_last_payload_is_written_before_draining() {
        let muxer = TestMuxer::new();
        let log = muxer.log();
        let mut sink = MuxRender::new(Box::new(muxer));
        sink.configure().unwrap();
        sink.add_media_format(MediaFormat::video("video/avc", 64, 64)).unwrap();
        sink.start().unwrap();

        let last = Frame::with_data([7]).with_pts(30).with_flags(FrameFlags::END_OF_STREAM);
        sink.push(last).unwrap();
        assert_eq!(log.lock().samples.len(), 1);
        assert!(sink.is_finalized());
    }

    #[test]
    fn test_progress_is_reported_in_steps() {
        let muxer = TestMuxer::new();
        let mut sink = MuxRender::new(Box::new(muxer));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        sink.set_duration(100);
        sink.set_progress_listener(0.25, Box::new(move |p| sink_seen.lock().push(p)));
        sink.configure().unwrap();
        sink.add_media_format(MediaFormat::audio("audio/raw", 8000, 1)).unwrap();
        sink.start().unwrap();

        for pts in [10, 30, 40, 60, 90] {
            sink.push(Frame::with_data([0]).with_pts(pts)).unwrap();
        }
        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!((seen[0] - 0.3).abs() < 1e-6);
        assert!((seen[2] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_repeated_format_keeps_its_track() {
        let (mut sink, log) = two_track_sink();
        let video = sink
            .add_media_format(MediaFormat::video("video/avc", 320, 240))
            .unwrap();
        let audio = sink
            .add_media_format(MediaFormat::audio("audio/mp4a-latm", 44100, 2))
            .unwrap();
        sink.start().unwrap();

        let again = sink
            .add_media_format(MediaFormat::video("video/avc", 640, 480))
            .unwrap();
        assert_eq!(again, video);
        assert_ne!(audio, video);
        assert_eq!(log.lock().tracks.len(), 2);
    }
}
