//! Backend codec contract.
//!
//! Modeled on asynchronous hardware codecs: every call returns immediately,
//! and "nothing available yet" is a normal answer rather than an error.

use bytes::Bytes;

use crate::av::{BufferIndex, FrameFlags, MediaFormat};
use crate::error::Result;
use crate::render::{RenderContext, Surface, SurfaceTarget};

/// Whether the codec is opened for decoding or encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    /// Compressed input, raw output.
    Decoder,
    /// Raw input, compressed output.
    Encoder,
}

/// Metadata of a dequeued output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Payload size in bytes.
    pub size: usize,
    /// Presentation timestamp in microseconds.
    pub pts: i64,
    /// Sample flags.
    pub flags: FrameFlags,
}

impl BufferInfo {
    /// Whether the buffer ends the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(FrameFlags::END_OF_STREAM)
    }
}

/// Answer of [`MediaCodec::dequeue_output_buffer`].
#[derive(Debug, PartialEq, Eq)]
pub enum OutputStatus {
    /// A filled output buffer.
    Buffer(BufferIndex, BufferInfo),
    /// The output format changed; read it with `output_format`.
    FormatChanged,
    /// Nothing ready yet.
    TryAgain,
}

/// A hardware or software codec.
pub trait MediaCodec: Send {
    /// Sets the codec up for `format`, rendering to `surface` when given.
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<SurfaceTarget>,
        mode: CodecMode,
    ) -> Result<()>;

    /// Starts accepting input.
    fn start(&mut self) -> Result<()>;

    /// Stops processing; buffers become invalid.
    fn stop(&mut self) -> Result<()>;

    /// Frees the backend.
    fn release(&mut self) -> Result<()>;

    /// Index of a free input buffer, `None` for "try again".
    fn dequeue_input_buffer(&mut self) -> Result<Option<BufferIndex>>;

    /// Submits a filled input buffer.
    fn queue_input_buffer(
        &mut self,
        index: BufferIndex,
        data: &[u8],
        pts: i64,
        flags: FrameFlags,
    ) -> Result<()>;

    /// Polls for output.
    fn dequeue_output_buffer(&mut self) -> Result<OutputStatus>;

    /// Payload of a dequeued output buffer.
    fn output_buffer(&self, index: &BufferIndex) -> Result<Bytes>;

    /// Gives an output buffer back, rendering it to the bound surface if asked.
    fn release_output_buffer(&mut self, index: BufferIndex, render: bool) -> Result<()>;

    /// Current output format.
    fn output_format(&self) -> Result<MediaFormat>;

    /// Input surface for surface-to-surface encoding.
    fn create_input_surface(&mut self, context: Option<RenderContext>) -> Result<Box<dyn Surface>>;

    /// Ends a surface-fed input stream.
    fn signal_end_of_input_stream(&mut self) -> Result<()>;
}

/// An identity codec for tests: every input buffer reappears as an output.
pub mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::render::tests::TestSurface;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;

    /// One `queue_input_buffer` call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct QueuedInput {
        /// Input slot.
        pub index: usize,
        /// Submitted payload.
        pub data: Vec<u8>,
        /// Submitted timestamp.
        pub pts: i64,
        /// Submitted flags.
        pub flags: FrameFlags,
    }

    /// Calls observed by a [`TestCodec`].
    #[derive(Debug, Default)]
    pub struct CodecLog {
        /// `configure` arguments.
        pub configured: Vec<(MediaFormat, Option<SurfaceTarget>, CodecMode)>,
        /// `start` calls.
        pub started: usize,
        /// `stop` calls.
        pub stopped: usize,
        /// `release` calls.
        pub released: usize,
        /// Submitted inputs in order.
        pub inputs: Vec<QueuedInput>,
        /// Released outputs with their render flag.
        pub released_outputs: Vec<(usize, bool)>,
        /// `signal_end_of_input_stream` calls.
        pub end_of_input_signalled: usize,
    }

    struct State {
        log: Arc<Mutex<CodecLog>>,
        input_buffers: usize,
        free_inputs: VecDeque<usize>,
        pending: VecDeque<(Bytes, i64, FrameFlags)>,
        outputs: HashMap<usize, Bytes>,
        next_output: usize,
        format_pending: bool,
        output_format: MediaFormat,
        running: bool,
        fail_start: bool,
    }

    /// Identity codec sharing its state between clones.
    #[derive(Clone)]
    pub struct TestCodec {
        state: Arc<Mutex<State>>,
    }

    impl TestCodec {
        /// Codec that reports `output_format` once started.
        pub fn new(output_format: MediaFormat) -> Self {
            Self {
                state: Arc::new(Mutex::new(State {
                    log: Arc::new(Mutex::new(CodecLog::default())),
                    input_buffers: 2,
                    free_inputs: VecDeque::new(),
                    pending: VecDeque::new(),
                    outputs: HashMap::new(),
                    next_output: 0,
                    format_pending: false,
                    output_format,
                    running: false,
                    fail_start: false,
                })),
            }
        }

        /// Number of input slots.
        pub fn with_input_buffers(self, count: usize) -> Self {
            self.state.lock().input_buffers = count;
            self
        }

        /// Makes `start` fail.
        pub fn failing_start(self) -> Self {
            self.state.lock().fail_start = true;
            self
        }

        /// Shared call log.
        pub fn log(&self) -> Arc<Mutex<CodecLog>> {
            self.state.lock().log.clone()
        }

        /// Puts an encoded sample on the output side, as a surface swap would.
        pub fn emit(&self, data: &[u8], pts: i64, flags: FrameFlags) {
            self.state
                .lock()
                .pending
                .push_back((Bytes::copy_from_slice(data), pts, flags));
        }
    }

    impl MediaCodec for TestCodec {
        fn configure(
            &mut self,
            format: &MediaFormat,
            surface: Option<SurfaceTarget>,
            mode: CodecMode,
        ) -> Result<()> {
            let state = self.state.lock();
            state.log.lock().configured.push((format.clone(), surface, mode));
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            let mut state = self.state.lock();
            if state.fail_start {
                return Err(FlowError::Codec("codec refused to start".into()));
            }
            state.running = true;
            state.format_pending = true;
            state.free_inputs = (0..state.input_buffers).collect();
            state.log.lock().started += 1;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            let mut state = self.state.lock();
            state.running = false;
            state.free_inputs.clear();
            state.pending.clear();
            state.outputs.clear();
            state.log.lock().stopped += 1;
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            let state = self.state.lock();
            state.log.lock().released += 1;
            Ok(())
        }

        fn dequeue_input_buffer(&mut self) -> Result<Option<BufferIndex>> {
            let mut state = self.state.lock();
            if !state.running {
                return Ok(None);
            }
            Ok(state.free_inputs.pop_front().map(BufferIndex::new))
        }

        fn queue_input_buffer(
            &mut self,
            index: BufferIndex,
            data: &[u8],
            pts: i64,
            flags: FrameFlags,
        ) -> Result<()> {
            let mut state = self.state.lock();
            state.log.lock().inputs.push(QueuedInput {
                index: index.raw(),
                data: data.to_vec(),
                pts,
                flags,
            });
            state.free_inputs.push_back(index.raw());
            state
                .pending
                .push_back((Bytes::copy_from_slice(data), pts, flags));
            Ok(())
        }

        fn dequeue_output_buffer(&mut self) -> Result<OutputStatus> {
            let mut state = self.state.lock();
            if !state.running {
                return Ok(OutputStatus::TryAgain);
            }
            if state.format_pending {
                state.format_pending = false;
                return Ok(OutputStatus::FormatChanged);
            }
            match state.pending.pop_front() {
                Some((data, pts, flags)) => {
                    let index = state.next_output;
                    state.next_output += 1;
                    let info = BufferInfo {
                        size: data.len(),
                        pts,
                        flags,
                    };
                    state.outputs.insert(index, data);
                    Ok(OutputStatus::Buffer(BufferIndex::new(index), info))
                }
                None => Ok(OutputStatus::TryAgain),
            }
        }

        fn output_buffer(&self, index: &BufferIndex) -> Result<Bytes> {
            self.state
                .lock()
                .outputs
                .get(&index.raw())
                .cloned()
                .ok_or_else(|| FlowError::Codec(format!("unknown output buffer {}", index.raw())))
        }

        fn release_output_buffer(&mut self, index: BufferIndex, render: bool) -> Result<()> {
            let mut state = self.state.lock();
            if state.outputs.remove(&index.raw()).is_none() {
                return Err(FlowError::Codec(format!(
                    "output buffer {} released twice",
                    index.raw()
                )));
            }
            state.log.lock().released_outputs.push((index.raw(), render));
            Ok(())
        }

        fn output_format(&self) -> Result<MediaFormat> {
            Ok(self.state.lock().output_format.clone())
        }

        fn create_input_surface(
            &mut self,
            _context: Option<RenderContext>,
        ) -> Result<Box<dyn Surface>> {
            let handle = self.clone();
            let resolution = self.state.lock().output_format.resolution.unwrap_or_default();
            let surface = TestSurface::new(resolution)
                .with_swap_hook(move |pts| handle.emit(&[0xE0], pts, FrameFlags::NONE));
            Ok(Box::new(surface))
        }

        fn signal_end_of_input_stream(&mut self) -> Result<()> {
            let mut state = self.state.lock();
            state.log.lock().end_of_input_signalled += 1;
            state
                .pending
                .push_back((Bytes::new(), 0, FrameFlags::END_OF_STREAM));
            Ok(())
        }
    }
}
