use std::collections::{HashSet, VecDeque};

use crate::av::TrackId;

/// Holds frames back until every connected track has a format.
#[derive(Debug)]
pub struct FrameBuffer<T> {
    tracks: usize,
    configured: HashSet<TrackId>,
    frames: VecDeque<T>,
}

impl<T> FrameBuffer<T> {
    /// A buffer expecting `tracks` tracks, none configured yet.
    pub fn new(tracks: usize) -> Self {
        Self {
            tracks,
            configured: HashSet::new(),
            frames: VecDeque::new(),
        }
    }

    /// One more connected track to wait for.
    pub fn add_track(&mut self) {
        self.tracks += 1;
    }

    /// Marks `track` as having its format. Repeats count once.
    pub fn configure(&mut self, track: TrackId) {
        self.configured.insert(track);
    }

    /// Number of tracks the buffer waits for.
    pub fn track_count(&self) -> usize {
        self.tracks
    }

    /// True once every expected track is configured.
    pub fn are_all_tracks_configured(&self) -> bool {
        self.configured.len() == self.tracks
    }

    /// Holds a frame back.
    pub fn push(&mut self, frame: T) {
        self.frames.push_back(frame);
    }

    /// True when [`FrameBuffer::pull`] would return a frame.
    pub fn can_pull(&self) -> bool {
        self.are_all_tracks_configured() && !self.frames.is_empty()
    }

    /// Oldest buffered frame, only once every track is configured.
    pub fn pull(&mut self) -> Option<T> {
        if self.are_all_tracks_configured() {
            self.frames.pop_front()
        } else {
            None
        }
    }

    /// Oldest buffered frame whether or not every track is configured.
    pub fn take(&mut self) -> Option<T> {
        self.frames.pop_front()
    }

    /// Number of frames held back.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frame is held back.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl<T> Default for FrameBuffer<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tracks_is_configured() {
        let buffer: FrameBuffer<u8> = FrameBuffer::new(0);
        assert!(buffer.are_all_tracks_configured());
        assert!(!buffer.can_pull());
    }

    #[test]
    fn test_frames_wait_for_every_track() {
        let mut buffer = FrameBuffer::new(0);
        buffer.add_track();
        buffer.add_track();
        buffer.push("video");

        buffer.configure(0);
        assert!(!buffer.can_pull());
        assert_eq!(buffer.pull(), None);

        // configuring a track twice does not count twice
        buffer.configure(0);
        assert!(!buffer.are_all_tracks_configured());

        buffer.configure(1);
        assert!(buffer.can_pull());
        assert_eq!(buffer.pull(), Some("video"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_ignores_the_gate() {
        let mut buffer = FrameBuffer::new(2);
        buffer.push(1);
        assert_eq!(buffer.pull(), None);
        assert_eq!(buffer.take(), Some(1));
        assert_eq!(buffer.take(), None);
    }
}
