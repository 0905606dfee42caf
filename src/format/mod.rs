use bytes::BytesMut;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::av::{FrameFlags, MediaFormat, TrackId};
use crate::Result;

/// Where a source's samples come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceId {
    /// A local file.
    Path(PathBuf),
    /// An open file descriptor.
    Descriptor(i32),
    /// A remote resource.
    Uri(Url),
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Path(path) => write!(f, "{}", path.display()),
            SourceId::Descriptor(fd) => write!(f, "fd:{}", fd),
            SourceId::Uri(url) => write!(f, "{}", url),
        }
    }
}

/// Where a seek lands relative to sync samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Last sync sample at or before the target.
    PreviousSync,
    /// First sync sample at or after the target.
    NextSync,
    /// Sync sample nearest the target.
    ClosestSync,
}

/// Common trait for container demultiplexers
pub trait MediaExtractor: Send {
    /// Source the extractor reads.
    fn source_id(&self) -> &SourceId;

    /// Number of tracks in the container.
    fn track_count(&self) -> usize;

    /// Format of `track`.
    fn track_format(&self, track: TrackId) -> Result<MediaFormat>;

    /// Includes `track` in the sample walk.
    fn select_track(&mut self, track: TrackId) -> Result<()>;

    /// Excludes `track` from the sample walk.
    fn unselect_track(&mut self, track: TrackId) -> Result<()>;

    /// Track of the current sample, `None` once the selected tracks are exhausted.
    fn sample_track_index(&self) -> Option<TrackId>;

    /// Timestamp of the current sample in microseconds.
    fn sample_time(&self) -> Option<i64>;

    /// Flags of the current sample.
    fn sample_flags(&self) -> FrameFlags;

    /// Copies the current sample into `buf`, returning its size.
    fn read_sample_data(&mut self, buf: &mut BytesMut) -> Result<usize>;

    /// Moves to the next sample; false once exhausted.
    fn advance(&mut self) -> bool;

    /// Moves to a sync sample near `pts`.
    fn seek_to(&mut self, pts: i64, mode: SeekMode) -> Result<()>;

    /// Closes the container.
    fn release(&mut self) -> Result<()>;
}

/// Common trait for container multiplexers
pub trait MediaMuxer: Send {
    /// Registers a track and returns the id samples must be written with.
    fn add_track(&mut self, format: &MediaFormat) -> Result<TrackId>;

    /// Starts writing; every track must be added first.
    fn start(&mut self) -> Result<()>;

    /// Writes one sample to `track`.
    fn write_sample_data(
        &mut self,
        track: TrackId,
        data: &[u8],
        pts: i64,
        flags: FrameFlags,
    ) -> Result<()>;

    /// Finishes the container.
    fn stop(&mut self) -> Result<()>;

    /// Frees the backend.
    fn release(&mut self) -> Result<()>;
}

/// In-memory extractor and muxer for tests.
pub mod tests {
    use super::*;
    use crate::error::FlowError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// One sample of a [`TestExtractor`] track.
    #[derive(Debug, Clone)]
    pub struct TestSample {
        /// Timestamp in microseconds.
        pub pts: i64,
        /// Payload.
        pub data: Vec<u8>,
        /// Flags, key frame by default.
        pub flags: FrameFlags,
    }

    impl TestSample {
        /// Key frame sample at `pts`.
        pub fn new(pts: i64, data: impl Into<Vec<u8>>) -> Self {
            Self {
                pts,
                data: data.into(),
                flags: FrameFlags::KEY_FRAME,
            }
        }

        /// Replaces the flags.
        pub fn with_flags(mut self, flags: FrameFlags) -> Self {
            self.flags = flags;
            self
        }
    }

    /// In-memory demultiplexer. Samples of all tracks are served in
    /// timestamp order, filtered by the selected tracks.
    pub struct TestExtractor {
        id: SourceId,
        formats: Vec<MediaFormat>,
        samples: Vec<(TrackId, TestSample)>,
        selected: Vec<bool>,
        cursor: usize,
        released: Arc<Mutex<bool>>,
    }

    impl TestExtractor {
        /// Extractor with no tracks, named `name`.
        pub fn new(name: &str) -> Self {
            Self {
                id: SourceId::Path(PathBuf::from(name)),
                formats: Vec::new(),
                samples: Vec::new(),
                selected: Vec::new(),
                cursor: 0,
                released: Arc::new(Mutex::new(false)),
            }
        }

        /// Adds a track with its samples.
        pub fn with_track(mut self, format: MediaFormat, samples: Vec<TestSample>) -> Self {
            let track = self.formats.len();
            self.formats.push(format);
            self.selected.push(false);
            self.samples
                .extend(samples.into_iter().map(|sample| (track, sample)));
            self.samples.sort_by_key(|(track, sample)| (sample.pts, *track));
            self
        }

        /// Set once `release` ran.
        pub fn released_flag(&self) -> Arc<Mutex<bool>> {
            self.released.clone()
        }

        /// Position of the next sample of a selected track. Selecting a
        /// track later still sees its samples from the cursor on.
        fn position(&self) -> Option<usize> {
            (self.cursor..self.samples.len()).find(|index| self.selected[self.samples[*index].0])
        }

        fn current(&self) -> Option<&(TrackId, TestSample)> {
            self.position().map(|index| &self.samples[index])
        }
    }

    impl MediaExtractor for TestExtractor {
        fn source_id(&self) -> &SourceId {
            &self.id
        }

        fn track_count(&self) -> usize {
            self.formats.len()
        }

        fn track_format(&self, track: TrackId) -> Result<MediaFormat> {
            self.formats
                .get(track)
                .cloned()
                .ok_or_else(|| FlowError::Extractor(format!("no track {}", track)))
        }

        fn select_track(&mut self, track: TrackId) -> Result<()> {
            let slot = self
                .selected
                .get_mut(track)
                .ok_or_else(|| FlowError::Extractor(format!("no track {}", track)))?;
            *slot = true;
            Ok(())
        }

        fn unselect_track(&mut self, track: TrackId) -> Result<()> {
            if let Some(slot) = self.selected.get_mut(track) {
                *slot = false;
            }
            Ok(())
        }

        fn sample_track_index(&self) -> Option<TrackId> {
            self.current().map(|(track, _)| *track)
        }

        fn sample_time(&self) -> Option<i64> {
            self.current().map(|(_, sample)| sample.pts)
        }

        fn sample_flags(&self) -> FrameFlags {
            self.current()
                .map(|(_, sample)| sample.flags)
                .unwrap_or_default()
        }

        fn read_sample_data(&mut self, buf: &mut BytesMut) -> Result<usize> {
            buf.clear();
            match self.current() {
                Some((_, sample)) => {
                    buf.extend_from_slice(&sample.data);
                    Ok(sample.data.len())
                }
                None => Ok(0),
            }
        }

        fn advance(&mut self) -> bool {
            self.cursor = match self.position() {
                Some(index) => index + 1,
                None => self.samples.len(),
            };
            self.current().is_some()
        }

        fn seek_to(&mut self, pts: i64, _mode: SeekMode) -> Result<()> {
            let sync = self
                .samples
                .iter()
                .filter(|(track, sample)| {
                    self.selected[*track]
                        && sample.pts <= pts
                        && sample.flags.contains(FrameFlags::KEY_FRAME)
                })
                .map(|(_, sample)| sample.pts)
                .max()
                .unwrap_or(0);
            // every track's samples at the sync time stay readable
            self.cursor = self
                .samples
                .iter()
                .position(|(_, sample)| sample.pts >= sync)
                .unwrap_or(self.samples.len());
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            *self.released.lock() = true;
            Ok(())
        }
    }

    /// One `write_sample_data` call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct WrittenSample {
        /// Muxer track id.
        pub track: TrackId,
        /// Written payload.
        pub data: Vec<u8>,
        /// Written timestamp.
        pub pts: i64,
        /// Written flags.
        pub flags: FrameFlags,
    }

    /// Calls observed by a [`TestMuxer`].
    #[derive(Debug, Default)]
    pub struct MuxerLog {
        /// Added track formats, indexed by track id.
        pub tracks: Vec<MediaFormat>,
        /// Written samples in order.
        pub samples: Vec<WrittenSample>,
        /// `start` calls.
        pub started: usize,
        /// `stop` calls.
        pub stopped: usize,
        /// `release` calls.
        pub released: usize,
    }

    /// A test muxer implementation
    #[derive(Default)]
    pub struct TestMuxer {
        log: Arc<Mutex<MuxerLog>>,
    }

    impl TestMuxer {
        /// Muxer with an empty log.
        pub fn new() -> Self {
            Self::default()
        }

        /// Shared call log.
        pub fn log(&self) -> Arc<Mutex<MuxerLog>> {
            self.log.clone()
        }
    }

    impl MediaMuxer for TestMuxer {
        fn add_track(&mut self, format: &MediaFormat) -> Result<TrackId> {
            let mut log = self.log.lock();
            log.tracks.push(format.clone());
            Ok(log.tracks.len() - 1)
        }

        fn start(&mut self) -> Result<()> {
            self.log.lock().started += 1;
            Ok(())
        }

        fn write_sample_data(
            &mut self,
            track: TrackId,
            data: &[u8],
            pts: i64,
            flags: FrameFlags,
        ) -> Result<()> {
            let mut log = self.log.lock();
            if log.started == 0 {
                return Err(FlowError::Muxer("write before start".into()));
            }
            log.samples.push(WrittenSample {
                track,
                data: data.to_vec(),
                pts,
                flags,
            });
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.log.lock().stopped += 1;
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.log.lock().released += 1;
            Ok(())
        }
    }
}
