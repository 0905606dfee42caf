use log::{debug, trace, warn};

use crate::av::{Command, CommandQueue, Frame, MediaFormat, MediaKind, TrackId};
use crate::error::{FlowError, Result};
use crate::format::{MediaExtractor, SeekMode, SourceId};
use crate::pipeline::{OutputStage, Role, Source, Stage};

use super::Segments;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Normal,
    Draining,
    Drained,
}

/// One container file read through a [`MediaExtractor`], optionally trimmed
/// to a set of [`Segments`].
///
/// Output timestamps are continuous across the cut gaps. Samples before the
/// seek position (between the sync sample and the segment start) are still
/// emitted so decoders can reconstruct the picture, but flagged to be skipped.
pub struct MediaSource {
    extractor: Box<dyn MediaExtractor>,
    output_queue: CommandQueue,
    selected: Vec<TrackId>,
    segments: Segments,
    state: SourceState,
    seek_position: i64,
    last_track: TrackId,
    released: bool,
}

impl MediaSource {
    /// Source reading through `extractor`. No track is selected.
    pub fn new(extractor: Box<dyn MediaExtractor>) -> Self {
        Self {
            extractor,
            output_queue: CommandQueue::new(),
            selected: Vec::new(),
            segments: Segments::new(),
            state: SourceState::Drained,
            seek_position: 0,
            last_track: 0,
            released: false,
        }
    }

    /// Where the samples come from.
    pub fn source_id(&self) -> &SourceId {
        self.extractor.source_id()
    }

    /// Selected tracks in selection order.
    pub fn selected_tracks(&self) -> &[TrackId] {
        &self.selected
    }

    /// Removes `track` from the output.
    pub fn unselect_track(&mut self, track: TrackId) -> Result<()> {
        self.check_track(track)?;
        self.extractor.unselect_track(track)?;
        self.selected.retain(|selected| *selected != track);
        Ok(())
    }

    /// Keeps `range` of the file, trimmed against the kept ranges. Returns
    /// whether anything was kept.
    pub fn add_segment(&mut self, range: (i64, i64)) -> bool {
        self.segments.add(range)
    }

    /// Drops the kept range at `index`.
    pub fn remove_segment(&mut self, index: usize) -> Option<(i64, i64)> {
        self.segments.remove(index)
    }

    /// Kept ranges.
    pub fn segments(&self) -> &Segments {
        &self.segments
    }

    /// Longest selected track, or longest track when none is selected.
    pub fn raw_duration(&self) -> i64 {
        let longest = |tracks: &mut dyn Iterator<Item = TrackId>| {
            tracks
                .filter_map(|track| self.extractor.track_format(track).ok())
                .filter_map(|format| format.duration)
                .max()
                .unwrap_or(0)
        };
        let selected = longest(&mut self.selected.iter().copied());
        if selected > 0 {
            selected
        } else {
            longest(&mut (0..self.extractor.track_count()))
        }
    }

    /// Duration after trimming.
    pub fn segments_duration(&self) -> i64 {
        if self.segments.is_empty() {
            self.raw_duration()
        } else {
            self.segments.duration()
        }
    }

    /// Moves to the sync sample before `position`. Samples up to `position`
    /// are emitted with the skip flag set.
    pub fn seek(&mut self, position: i64) -> Result<()> {
        debug!("seeking {} to {}", self.source_id(), position);
        self.extractor.seek_to(position, SeekMode::PreviousSync)?;
        self.output_queue.clear();

        // audio ahead of the cut would start the output early
        if self.has_video_track() {
            while let (Some(track), Some(pts)) = (self.extractor.sample_track_index(), self.extractor.sample_time()) {
                if self.is_video_track(track) || pts >= position || !self.extractor.advance() {
                    break;
                }
            }
        }

        self.seek_position = position;
        self.check_if_has_data();
        Ok(())
    }

    /// Releases the extractor.
    pub fn close(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.extractor.release()
    }

    fn check_track(&self, track: TrackId) -> Result<()> {
        let count = self.extractor.track_count();
        if track >= count {
            return Err(FlowError::TrackOutOfRange { track, count });
        }
        Ok(())
    }

    fn is_video_track(&self, track: TrackId) -> bool {
        self.extractor
            .track_format(track)
            .map(|format| format.is_video())
            .unwrap_or(false)
    }

    fn has_video_track(&self) -> bool {
        self.selected.iter().any(|track| self.is_video_track(*track))
    }

    fn check_if_has_data(&mut self) {
        let pts = match (self.extractor.sample_track_index(), self.extractor.sample_time()) {
            (Some(_), Some(pts)) => pts,
            _ => return self.drain(),
        };

        if pts < self.seek_position || self.segments.is_inside_segment(pts) {
            return self.has_data();
        }

        match self.segments.segment_after(pts) {
            Some((start, _)) => {
                if let Err(err) = self.seek(start) {
                    warn!("seek to next segment failed: {}", err);
                    self.drain();
                }
            }
            None => self.drain(),
        }
    }

    fn has_data(&mut self) {
        if let Some(track) = self.extractor.sample_track_index() {
            self.output_queue.queue(Command::HasData, track);
            self.last_track = track;
        }
    }

    fn drain(&mut self) {
        self.state = SourceState::Draining;
        self.output_queue.clear();
        if self.selected.is_empty() {
            self.output_queue.queue(Command::EndOfFile, self.last_track);
        }
        for track in self.selected.iter() {
            self.output_queue.queue(Command::EndOfFile, *track);
        }
    }

    fn output_time(&mut self, pts: i64) -> i64 {
        if pts < self.seek_position {
            return pts;
        }
        self.segments.save_sample_time(pts);
        self.segments.shift(pts)
    }
}

impl Stage for MediaSource {
    fn role(&self) -> Role {
        Role::Source
    }

    fn start(&mut self) -> Result<()> {
        self.state = SourceState::Normal;
        if self.segments.is_empty() {
            self.segments.add((0, self.raw_duration()));
        } else {
            self.segments.remove_out_of_bound(self.raw_duration());
        }
        let start = self.segments.first().map_or(0, |(start, _)| start);
        self.seek(start)
    }

    fn stop(&mut self) -> Result<()> {
        self.drain();
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.close()
    }
}

impl OutputStage for MediaSource {
    fn output_queue(&mut self) -> &mut CommandQueue {
        &mut self.output_queue
    }
}

impl Source for MediaSource {
    fn pull(&mut self, frame: &mut Frame) -> Result<()> {
        if self.state != SourceState::Normal {
            return Err(FlowError::InvalidState(
                "pull from a media source that is not started or already drained".into(),
            ));
        }

        let sample_time = self.extractor.sample_time().unwrap_or(0);
        let pts = self.output_time(sample_time);
        let track = self.extractor.sample_track_index().unwrap_or(self.last_track);
        let flags = self.extractor.sample_flags();
        let size = self.extractor.read_sample_data(frame.data_mut())?;
        frame.data_mut().truncate(size);
        frame.set_pts(pts);
        frame.set_track_id(track);
        frame.set_flags(flags);
        frame.set_skip(sample_time < self.seek_position);
        trace!("pulled {} bytes at {} from track {}", size, pts, track);

        if !frame.is_eof() {
            self.extractor.advance();
            self.check_if_has_data();
        }
        Ok(())
    }

    fn track_count(&self) -> usize {
        self.extractor.track_count()
    }

    fn track_format(&self, track: TrackId) -> Result<MediaFormat> {
        self.check_track(track)?;
        self.extractor.track_format(track)
    }

    fn track_id_by_kind(&self, kind: MediaKind) -> Option<TrackId> {
        (0..self.extractor.track_count()).find(|track| {
            self.extractor
                .track_format(*track)
                .map(|format| format.kind == kind)
                .unwrap_or(false)
        })
    }

    fn select_track(&mut self, track: TrackId) -> Result<()> {
        self.check_track(track)?;
        self.extractor.select_track(track)?;
        if !self.selected.contains(&track) {
            self.selected.push(track);
        }
        Ok(())
    }

    fn duration(&self) -> i64 {
        self.segments_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::FrameFlags;
    use crate::format::tests::{TestExtractor, TestSample};
    use pretty_assertions::assert_eq;

    fn video_samples(times: &[i64]) -> Vec<TestSample> {
        times
            .iter()
            .map(|pts| TestSample::new(*pts, vec![*pts as u8]))
            .collect()
    }

    fn video_source(times: &[i64], duration: i64) -> MediaSource {
        let extractor = TestExtractor::new("video.mp4").with_track(
            MediaFormat::video("video/avc", 640, 480).with_duration(duration),
            video_samples(times),
        );
        let mut source = MediaSource::new(Box::new(extractor));
        source.select_track(0).unwrap();
        source
    }

    fn pull_all(source: &mut MediaSource) -> Vec<(i64, bool)> {
        let mut pulled = Vec::new();
        while let Some((Command::HasData, _)) = source.output_queue().first() {
            source.output_queue().dequeue().unwrap();
            let mut frame = Frame::new();
            source.pull(&mut frame).unwrap();
            pulled.push((frame.pts(), frame.should_skip()));
        }
        pulled
    }

    #[test]
    fn test_pull_requires_start() {
        let mut source = video_source(&[0], 100);
        let mut frame = Frame::new();
        assert!(matches!(
            source.pull(&mut frame),
            Err(FlowError::InvalidState(_))
        ));
    }

    #[test]
    fn test_selecting_missing_track_fails() {
        let mut source = video_source(&[0], 100);
        assert!(matches!(
            source.select_track(3),
            Err(FlowError::TrackOutOfRange { track: 3, count: 1 })
        ));
    }

    #[test]
    fn test_reads_every_sample_then_end_of_file() {
        let mut source = video_source(&[0, 10, 20], 30);
        source.start().unwrap();
        assert_eq!(source.output_queue().first(), Some((Command::HasData, 0)));

        let mut frame = Frame::new();
        source.output_queue().dequeue().unwrap();
        source.pull(&mut frame).unwrap();
        assert_eq!(frame.data(), &[0]);
        assert!(frame.flags().contains(FrameFlags::KEY_FRAME));

        assert_eq!(pull_all(&mut source), vec![(10, false), (20, false)]);
        assert_eq!(source.output_queue().first(), Some((Command::EndOfFile, 0)));
        assert_eq!(source.output_queue().len(), 1);
    }

    #[test]
    fn test_segments_cut_and_shift_timestamps() {
        let mut source = video_source(&[0, 10, 20, 30, 40, 50, 60], 70);
        source.add_segment((0, 10));
        source.add_segment((40, 50));
        source.start().unwrap();

        assert_eq!(
            pull_all(&mut source),
            vec![(0, false), (10, false), (11, false), (21, false)]
        );
        assert_eq!(source.duration(), 20);
    }

    #[test]
    fn test_samples_before_segment_start_are_skipped() {
        let extractor = TestExtractor::new("gop.mp4").with_track(
            MediaFormat::video("video/avc", 640, 480).with_duration(100),
            vec![
                TestSample::new(0, [0]),
                TestSample::new(10, [1]).with_flags(FrameFlags::NONE),
                TestSample::new(20, [2]).with_flags(FrameFlags::NONE),
            ],
        );
        let mut source = MediaSource::new(Box::new(extractor));
        source.select_track(0).unwrap();
        source.add_segment((15, 100));
        source.start().unwrap();

        assert_eq!(pull_all(&mut source), vec![(0, true), (10, true), (5, false)]);
    }

    #[test]
    fn test_duration_prefers_selected_tracks() {
        let extractor = TestExtractor::new("av.mp4")
            .with_track(MediaFormat::video("video/avc", 640, 480).with_duration(100), vec![])
            .with_track(MediaFormat::audio("audio/mp4a-latm", 44100, 2).with_duration(120), vec![]);
        let mut source = MediaSource::new(Box::new(extractor));
        assert_eq!(source.raw_duration(), 120);
        source.select_track(0).unwrap();
        assert_eq!(source.raw_duration(), 100);
        assert_eq!(source.track_id_by_kind(MediaKind::Audio), Some(1));
    }

    #[test]
    fn test_audio_at_the_start_survives_track_selection_order() {
        let extractor = TestExtractor::new("av.mp4")
            .with_track(
                MediaFormat::audio("audio/mp4a-latm", 44100, 2).with_duration(40),
                vec![TestSample::new(0, [0xA0]), TestSample::new(20, [0xA1])],
            )
            .with_track(
                MediaFormat::video("video/avc", 640, 480).with_duration(40),
                vec![TestSample::new(0, [0xB0]), TestSample::new(20, [0xB1])],
            );
        let mut source = MediaSource::new(Box::new(extractor));
        source.select_track(1).unwrap();
        source.select_track(0).unwrap();
        source.start().unwrap();

        let mut pulled = Vec::new();
        while let Some((Command::HasData, _)) = source.output_queue().first() {
            source.output_queue().dequeue().unwrap();
            let mut frame = Frame::new();
            source.pull(&mut frame).unwrap();
            pulled.push((frame.track_id(), frame.pts()));
        }
        assert_eq!(pulled, vec![(0, 0), (1, 0), (0, 20), (1, 20)]);
    }

    #[test]
    fn test_audio_before_a_cut_is_dropped_until_video() {
        let extractor = TestExtractor::new("av.mp4")
            .with_track(
                MediaFormat::audio("audio/mp4a-latm", 44100, 2).with_duration(100),
                vec![TestSample::new(0, [0xA0]), TestSample::new(30, [0xA1]), TestSample::new(60, [0xA2])],
            )
            .with_track(
                MediaFormat::video("video/avc", 640, 480).with_duration(100),
                vec![
                    TestSample::new(0, [0xB0]),
                    TestSample::new(40, [0xB1]).with_flags(FrameFlags::NONE),
                ],
            );
        let mut source = MediaSource::new(Box::new(extractor));
        source.select_track(0).unwrap();
        source.select_track(1).unwrap();
        source.add_segment((50, 100));
        source.start().unwrap();

        // the seek lands on the audio sample at 30, before the cut at 50
        let mut frame = Frame::new();
        source.output_queue().dequeue().unwrap();
        source.pull(&mut frame).unwrap();
        assert_eq!(frame.track_id(), 1);
        assert!(frame.should_skip());
    }

    #[test]
    fn test_stop_drains_and_close_releases_once() {
        let extractor = TestExtractor::new("a.mp4").with_track(
            MediaFormat::audio("audio/mp4a-latm", 44100, 2).with_duration(10),
            vec![TestSample::new(0, [1])],
        );
        let released = extractor.released_flag();
        let mut source = MediaSource::new(Box::new(extractor));
        source.select_track(0).unwrap();
        source.start().unwrap();
        source.stop().unwrap();
        assert_eq!(source.output_queue().first(), Some((Command::EndOfFile, 0)));

        source.release().unwrap();
        source.release().unwrap();
        assert!(*released.lock());
    }
}
