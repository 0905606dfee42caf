use bytes::Bytes;
use log::{debug, trace};
use std::collections::VecDeque;

use crate::av::{BufferIndex, Command, CommandQueue, Frame, FrameFlags, MediaFormat, MediaKind, TrackId};
use crate::codec::{BufferInfo, CodecMode, MediaCodec, OutputStatus};
use crate::error::{FlowError, Result};
use crate::render::SurfaceTarget;

/// Track id plugins use on their output edges.
pub const EDGE_TRACK: TrackId = 0;

/// Lifecycle of a codec-backed plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Created, codec not started.
    Starting,
    /// Moving samples.
    Normal,
    /// End of stream submitted, output still flowing.
    Draining,
    /// Every output was handed on.
    Drained,
    /// Waiting for the next file's format.
    Paused,
}

/// How a codec reports end of stream on its output edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    /// The end-of-stream buffer is returned at once and `EndOfFile` is queued.
    Decoder,
    /// The end-of-stream buffer travels downstream like any other frame.
    Encoder,
}

/// Poll result of one `dequeue_output_buffer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Polled {
    TryAgain,
    FormatChanged,
    Buffer,
    EndOfStream,
    Skipped,
}

/// State machine shared by every codec-backed plugin.
pub(crate) struct CodecCore {
    pub codec: Box<dyn MediaCodec>,
    pub state: PluginState,
    pub kind: MediaKind,
    pub input_queue: CommandQueue,
    pub output_queue: CommandQueue,
    pub input_indexes: VecDeque<BufferIndex>,
    pub ready: VecDeque<(BufferIndex, BufferInfo)>,
    pub media_format: Option<MediaFormat>,
    pub output_format: Option<MediaFormat>,
    pub track_id: TrackId,
    pub output_track_id: TrackId,
    /// Timestamps whose decoded output is dropped.
    pub skip_pts: Vec<i64>,
    /// Set once end of stream was queued on the input side.
    pub input_closed: bool,
    /// End of stream arrived while decoded frames were still waiting.
    eos_deferred: bool,
    flavor: Flavor,
    released: bool,
}

impl CodecCore {
    pub fn new(codec: Box<dyn MediaCodec>, kind: MediaKind, flavor: Flavor) -> Self {
        Self {
            codec,
            state: PluginState::Starting,
            kind,
            input_queue: CommandQueue::new(),
            output_queue: CommandQueue::new(),
            input_indexes: VecDeque::new(),
            ready: VecDeque::new(),
            media_format: None,
            output_format: None,
            track_id: 0,
            output_track_id: 0,
            skip_pts: Vec::new(),
            input_closed: false,
            eos_deferred: false,
            flavor,
            released: false,
        }
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.state, PluginState::Draining | PluginState::Drained)
    }

    pub fn configure(&mut self, surface: Option<SurfaceTarget>, mode: CodecMode) -> Result<()> {
        let format = self
            .media_format
            .as_ref()
            .ok_or(FlowError::MissingFormat(self.kind))?;
        debug!("configuring {:?} {:?} codec for {}", self.kind, mode, format.mime);
        self.codec.configure(format, surface, mode)
    }

    pub fn start(&mut self) -> Result<()> {
        self.codec.start()?;
        self.state = PluginState::Normal;
        self.input_closed = false;
        self.eos_deferred = false;
        self.released = false;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if self.state == PluginState::Paused || self.released {
            return Ok(());
        }
        self.state = PluginState::Paused;
        self.input_indexes.clear();
        self.ready.clear();
        self.output_queue.clear();
        self.codec.stop()
    }

    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.input_indexes.clear();
        self.ready.clear();
        self.codec.release()
    }

    pub fn need_data(&mut self) {
        if !self.is_draining() && !self.input_closed {
            self.input_queue.queue(Command::NeedData, self.track_id);
        }
    }

    /// Grabs a free input buffer and asks for data to fill it.
    pub fn feed_me_if_not_draining(&mut self) -> Result<()> {
        if self.is_draining() || self.input_closed || self.state != PluginState::Normal {
            return Ok(());
        }
        match self.codec.dequeue_input_buffer()? {
            Some(index) => {
                self.input_indexes.push_back(index);
                self.need_data();
            }
            None => {
                let waiting = matches!(self.input_queue.first(), Some((Command::NeedData, _)));
                if !self.input_indexes.is_empty() && !waiting {
                    self.need_data();
                }
            }
        }
        Ok(())
    }

    pub fn fill_command_queues(&mut self) -> Result<()> {
        if self.state != PluginState::Normal {
            return Ok(());
        }
        self.poll_output()?;
        self.feed_me_if_not_draining()
    }

    pub fn poll_output(&mut self) -> Result<Polled> {
        if !matches!(self.state, PluginState::Normal | PluginState::Draining) {
            return Ok(Polled::TryAgain);
        }
        match self.codec.dequeue_output_buffer()? {
            OutputStatus::TryAgain => {
                if self.state == PluginState::Draining {
                    self.state = PluginState::Drained;
                }
                Ok(Polled::TryAgain)
            }
            OutputStatus::FormatChanged => {
                self.output_format = Some(self.codec.output_format()?);
                self.output_queue.queue(Command::OutputFormatChanged, EDGE_TRACK);
                Ok(Polled::FormatChanged)
            }
            OutputStatus::Buffer(index, info) => self.accept_output(index, info),
        }
    }

    fn accept_output(&mut self, index: BufferIndex, info: BufferInfo) -> Result<Polled> {
        let eos = info.is_end_of_stream();
        if !eos {
            if let Some(pos) = self.skip_pts.iter().position(|pts| *pts == info.pts) {
                self.skip_pts.remove(pos);
                trace!("dropping trimmed output at {}", info.pts);
                self.codec.release_output_buffer(index, false)?;
                return Ok(Polled::Skipped);
            }
        }

        if eos {
            if self.state != PluginState::Drained {
                self.input_queue.clear();
                self.state = PluginState::Draining;
            }
            if self.flavor == Flavor::Decoder && info.size == 0 {
                self.codec.release_output_buffer(index, false)?;
                // EndOfFile would wipe the HasData of frames still waiting
                if self.ready.is_empty() {
                    self.output_queue.queue(Command::EndOfFile, EDGE_TRACK);
                } else {
                    self.eos_deferred = true;
                }
                return Ok(Polled::EndOfStream);
            }
        }

        self.ready.push_back((index, info));
        self.output_queue.queue(Command::HasData, EDGE_TRACK);
        if self.flavor == Flavor::Decoder {
            self.output_queue.queue(Command::NextPair, EDGE_TRACK);
        }
        Ok(if eos { Polled::EndOfStream } else { Polled::Buffer })
    }

    /// A frame owning the oldest free input buffer.
    pub fn find_free_frame(&mut self) -> Option<Frame> {
        if self.is_draining() {
            return None;
        }
        self.input_indexes
            .pop_front()
            .map(|index| Frame::new().with_buffer_index(index))
    }

    /// The oldest ready output as a frame, empty if none, EOF once drained.
    pub fn get_frame(&mut self) -> Result<Frame> {
        let entry = match self.ready.pop_front() {
            Some(entry) => entry,
            None if self.is_draining() => {
                self.poll_output()?;
                match self.ready.pop_front() {
                    Some(entry) => entry,
                    None => return Ok(Frame::eof()),
                }
            }
            None => return Ok(Frame::empty()),
        };

        let (index, info) = entry;
        if self.eos_deferred && self.ready.is_empty() {
            self.eos_deferred = false;
            self.output_queue.queue(Command::EndOfFile, EDGE_TRACK);
        }
        let data = if info.size > 0 {
            self.codec.output_buffer(&index)?
        } else {
            Bytes::new()
        };
        let size = info.size.min(data.len());
        if self.flavor == Flavor::Decoder && info.is_end_of_stream() {
            // last payload carried the flag; the edge still needs its EndOfFile
            self.output_queue.queue(Command::EndOfFile, EDGE_TRACK);
        }
        let pts = if size == 0 && info.is_end_of_stream() {
            info.pts.max(0)
        } else {
            info.pts
        };
        Ok(Frame::with_data(&data[..size])
            .with_pts(pts)
            .with_flags(info.flags)
            .with_track_id(self.output_track_id)
            .with_buffer_index(index))
    }

    /// Queues the end-of-stream flag on an input buffer.
    pub fn queue_end_of_stream(&mut self, index: BufferIndex) -> Result<()> {
        self.input_queue.clear();
        self.input_closed = true;
        debug!("queueing end of stream on {:?} codec", self.kind);
        self.codec
            .queue_input_buffer(index, &[], 0, FrameFlags::END_OF_STREAM)
    }

    /// Sends a frame's payload to the codec, returning its input buffer.
    pub fn queue_frame(&mut self, frame: &mut Frame, flags: FrameFlags) -> Result<()> {
        let index = frame.take_buffer_index().ok_or(FlowError::BufferReleased)?;
        self.codec
            .queue_input_buffer(index, frame.data(), frame.pts(), flags)
    }

    pub fn output_format(&self) -> Result<MediaFormat> {
        match &self.output_format {
            Some(format) => Ok(format.clone()),
            None => self.codec.output_format(),
        }
    }
}
