use bytes::{Bytes, BytesMut};
use std::fmt;
use std::ops::BitOr;

use super::TrackId;

/// Handle for returning a buffer to the stage that issued it.
///
/// Deliberately neither `Clone` nor `Copy`: giving the index back consumes
/// it, so a buffer cannot be released twice.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferIndex(usize);

impl BufferIndex {
    /// Wraps a backend buffer slot.
    pub fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// The backend slot number.
    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Sample flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// No flag set.
    pub const NONE: FrameFlags = FrameFlags(0);
    /// Sync sample.
    pub const KEY_FRAME: FrameFlags = FrameFlags(1);
    /// Codec configuration data, no media payload.
    pub const CODEC_CONFIG: FrameFlags = FrameFlags(2);
    /// Last sample of the stream.
    pub const END_OF_STREAM: FrameFlags = FrameFlags(4);

    /// Flags from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set. `NONE` is never contained.
    pub fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: FrameFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

/// One unit of media data moving along a pipeline edge.
///
/// A frame that came out of a codec owns that codec's [`BufferIndex`]; the
/// consumer hands it back through `release_output_buffer` after use.
pub struct Frame {
    data: BytesMut,
    pts: i64,
    flags: FrameFlags,
    track_id: TrackId,
    buffer_index: Option<BufferIndex>,
    skip: bool,
}

impl Frame {
    /// Frame with no payload, zero timestamp and track 0.
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            pts: 0,
            flags: FrameFlags::NONE,
            track_id: 0,
            buffer_index: None,
            skip: false,
        }
    }

    /// Frame carrying a copy of `data`.
    pub fn with_data(data: impl AsRef<[u8]>) -> Self {
        let mut frame = Frame::new();
        frame.set_data(data.as_ref());
        frame
    }

    /// A frame with no payload and no flags: "nothing ready yet".
    pub fn empty() -> Self {
        Frame::new()
    }

    /// The end-of-stream sentinel.
    pub fn eof() -> Self {
        Frame::new().with_flags(FrameFlags::END_OF_STREAM)
    }

    /// Sets the presentation timestamp.
    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }

    /// Sets the flags.
    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the track id.
    pub fn with_track_id(mut self, track_id: TrackId) -> Self {
        self.track_id = track_id;
        self
    }

    /// Attaches the buffer index.
    pub fn with_buffer_index(mut self, index: BufferIndex) -> Self {
        self.buffer_index = Some(index);
        self
    }

    /// Whether this is the EOF sentinel: end-of-stream flag and no payload.
    pub fn is_eof(&self) -> bool {
        self.flags.contains(FrameFlags::END_OF_STREAM) && self.data.is_empty()
    }

    /// No payload and not the EOF sentinel.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && !self.is_eof()
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload, for backends that fill it in place.
    pub fn data_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    /// Replaces the payload with a copy of `data`.
    pub fn set_data(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    /// Payload copied into an immutable buffer.
    pub fn freeze(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Presentation timestamp in microseconds.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// Sets the presentation timestamp.
    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    /// Sample flags.
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Replaces the flags.
    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags;
    }

    /// Track the frame belongs to.
    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    /// Moves the frame to another track.
    pub fn set_track_id(&mut self, track_id: TrackId) {
        self.track_id = track_id;
    }

    /// Buffer index the frame owns, if any.
    pub fn buffer_index(&self) -> Option<&BufferIndex> {
        self.buffer_index.as_ref()
    }

    /// Takes the buffer index out of the frame, leaving it without one.
    pub fn take_buffer_index(&mut self) -> Option<BufferIndex> {
        self.buffer_index.take()
    }

    /// Attaches the buffer index.
    pub fn set_buffer_index(&mut self, index: BufferIndex) {
        self.buffer_index = Some(index);
    }

    /// Whether consumers should drop this frame.
    pub fn should_skip(&self) -> bool {
        self.skip
    }

    /// Marks the frame to be dropped downstream.
    pub fn set_skip(&mut self, skip: bool) {
        self.skip = skip;
    }

    /// Copies timestamp, flags and track, leaving payload and buffer index alone.
    pub fn copy_info_from(&mut self, other: &Frame) {
        self.pts = other.pts;
        self.flags = other.flags;
        self.track_id = other.track_id;
        self.skip = other.skip;
    }

    /// Replaces the payload with a copy of `other`'s.
    pub fn copy_data_from(&mut self, other: &Frame) {
        self.set_data(&other.data);
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        if self.is_eof() || other.is_eof() {
            return self.is_eof() && other.is_eof();
        }
        self.pts == other.pts
            && self.flags == other.flags
            && self.track_id == other.track_id
            && self.data == other.data
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eof() {
            return f.write_str("Frame(EOF)");
        }
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("pts", &self.pts)
            .field("flags", &self.flags)
            .field("track_id", &self.track_id)
            .field("buffer_index", &self.buffer_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_sentinels_are_equal_regardless_of_buffer_index() {
        let a = Frame::eof().with_buffer_index(BufferIndex::new(3));
        let b = Frame::eof().with_pts(77).with_track_id(1);
        assert!(a.is_eof());
        assert_eq!(a, b);
        assert_ne!(a, Frame::empty());
    }

    #[test]
    fn test_end_of_stream_flag_with_payload_is_not_eof() {
        let frame = Frame::with_data([1, 2]).with_flags(FrameFlags::END_OF_STREAM);
        assert!(!frame.is_eof());
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_take_buffer_index_leaves_frame_without_one() {
        let mut frame = Frame::with_data([9]).with_buffer_index(BufferIndex::new(5));
        assert_eq!(frame.take_buffer_index(), Some(BufferIndex::new(5)));
        assert_eq!(frame.take_buffer_index(), None);
    }

    #[test]
    fn test_flags() {
        let mut flags = FrameFlags::KEY_FRAME | FrameFlags::END_OF_STREAM;
        assert!(flags.contains(FrameFlags::KEY_FRAME));
        flags.remove(FrameFlags::KEY_FRAME);
        assert!(!flags.contains(FrameFlags::KEY_FRAME));
        assert!(!flags.contains(FrameFlags::NONE));
        assert_eq!(flags.bits(), 4);
    }

    #[test]
    fn test_copy_info_and_data() {
        let source = Frame::with_data([1, 2, 3]).with_pts(555).with_track_id(2);
        let mut target = Frame::new().with_buffer_index(BufferIndex::new(1));
        target.copy_info_from(&source);
        target.copy_data_from(&source);
        assert_eq!(target, source);
        assert!(target.buffer_index().is_some());
    }
}
