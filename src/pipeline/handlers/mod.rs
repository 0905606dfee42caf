//! Concrete handshake steps.
//!
//! A handler is built for one dispatch and owns clones of the two stages of
//! its pair. It never holds a stage lock while locking the same stage again;
//! where both stages are needed at once the producer is locked first.

use log::{debug, trace, warn};

use crate::av::{Command, Frame, MediaKind, TrackId};
use crate::error::{FlowError, Result};

use super::{CaptureSource, CommandHandler, Node, Plugin, Release, Render, Shared, Source};

/// Puts a consumer back in line behind other pairs after a missing buffer.
fn restore_consumer(consumer: &Shared<dyn Plugin>, track: TrackId) {
    let mut consumer = consumer.lock();
    consumer.skip_processing();
    consumer.input_queue().queue(Command::NeedData, track);
}

/// Source `HasData` / plugin `NeedData`: one sample into a free input buffer.
pub struct PushData {
    source: Shared<dyn Source>,
    plugin: Shared<dyn Plugin>,
}

impl PushData {
    /// Handler feeding `plugin` from `source`.
    pub fn new(source: Shared<dyn Source>, plugin: Shared<dyn Plugin>) -> Self {
        Self { source, plugin }
    }
}

impl CommandHandler for PushData {
    fn handle(&mut self) -> Result<()> {
        let (track, free) = {
            let mut plugin = self.plugin.lock();
            (plugin.track_id(), plugin.find_free_frame())
        };
        let mut frame = match free {
            Some(frame) => frame,
            None => {
                trace!("no free input buffer on track {}, trying other pairs", track);
                self.source.lock().output_queue().queue(Command::HasData, track);
                restore_consumer(&self.plugin, track);
                return Ok(());
            }
        };

        self.source.lock().pull(&mut frame)?;
        let mut plugin = self.plugin.lock();
        plugin.push(frame)?;
        plugin.check_if_output_queue_has_data()
    }
}

/// Source `OutputFormatChanged` / plugin `NeedData`: the source moved on to
/// its next file. The plugin drains, restarts with the new file's format and
/// lets the source publish again once every plugin did the same.
pub struct Rollover {
    source: Shared<dyn Source>,
    plugin: Shared<dyn Plugin>,
}

impl Rollover {
    /// Handler switching `plugin` to the source's next file.
    pub fn new(source: Shared<dyn Source>, plugin: Shared<dyn Plugin>) -> Self {
        Self { source, plugin }
    }
}

impl CommandHandler for Rollover {
    fn handle(&mut self) -> Result<()> {
        let (kind, track, free) = {
            let mut plugin = self.plugin.lock();
            (plugin.kind(), plugin.track_id(), plugin.find_free_frame())
        };
        let mut frame = match free {
            Some(frame) => frame,
            None => {
                self.source
                    .lock()
                    .output_queue()
                    .queue(Command::OutputFormatChanged, track);
                restore_consumer(&self.plugin, track);
                return Ok(());
            }
        };

        let format = self
            .source
            .lock()
            .format_by_kind(kind)
            .ok_or(FlowError::MissingFormat(kind))?;
        debug!("restarting {:?} plugin for {}", kind, format.mime);
        {
            let mut plugin = self.plugin.lock();
            plugin.drain(frame.take_buffer_index())?;
            plugin.stop()?;
            plugin.set_media_format(format)?;
            plugin.configure()?;
            plugin.start()?;
            plugin.set_track_id(track);
        }

        let mut source = self.source.lock();
        if let Some(file_track) = source.track_id_by_kind(kind) {
            source.select_track(file_track)?;
            source.set_track_map(file_track, track);
        }
        source.next_file()
    }
}

/// Source `EndOfFile` / plugin `NeedData` or `NeedInputFormat`.
pub struct SourceEnded {
    plugin: Shared<dyn Plugin>,
}

impl SourceEnded {
    /// Handler draining `plugin`.
    pub fn new(plugin: Shared<dyn Plugin>) -> Self {
        Self { plugin }
    }
}

impl CommandHandler for SourceEnded {
    fn handle(&mut self) -> Result<()> {
        let mut plugin = self.plugin.lock();
        let index = plugin
            .find_free_frame()
            .and_then(|mut frame| frame.take_buffer_index());
        debug!("end of file reached {:?} plugin", plugin.kind());
        plugin.drain(index)
    }
}

/// Source `HasData` / video decoder `NeedInputFormat`: sizes the decoder
/// output and keeps the sample for the next handshake.
pub struct ConfigureVideoDecoder {
    source: Shared<dyn Source>,
    decoder: Shared<dyn Plugin>,
}

impl ConfigureVideoDecoder {
    /// Handler configuring `decoder` from the source's track.
    pub fn new(source: Shared<dyn Source>, decoder: Shared<dyn Plugin>) -> Self {
        Self { source, decoder }
    }
}

impl CommandHandler for ConfigureVideoDecoder {
    fn handle(&mut self) -> Result<()> {
        let track = self.decoder.lock().track_id();
        self.source.lock().output_queue().queue(Command::HasData, track);
        let resolution = self
            .source
            .lock()
            .format_by_kind(MediaKind::Video)
            .and_then(|format| format.resolution);
        if let Some(resolution) = resolution {
            self.decoder.lock().set_input_resolution(resolution);
        }
        Ok(())
    }
}

/// Decoder `HasData` / video encoder `NeedData`: renders the decoded image
/// onto the encoder's input surface.
pub struct PushSurface {
    decoder: Shared<dyn Plugin>,
    encoder: Shared<dyn Plugin>,
}

impl PushSurface {
    /// Handler rendering into the encoder's surface.
    pub fn new(decoder: Shared<dyn Plugin>, encoder: Shared<dyn Plugin>) -> Self {
        Self { decoder, encoder }
    }
}

impl CommandHandler for PushSurface {
    fn handle(&mut self) -> Result<()> {
        let mut decoder = self.decoder.lock();
        let mut frame = decoder.get_frame()?;
        if let Some(index) = frame.take_buffer_index() {
            decoder.release_output_buffer(index)?;
        }

        let mut encoder = self.encoder.lock();
        if frame.len() != 0 {
            decoder.wait_for_surface(frame.pts())?;
            if let Some(surface) = decoder.output_surface() {
                encoder.notify_surface_ready(surface)?;
            }
        }
        drop(decoder);

        encoder.push(frame)?;
        encoder.check_if_output_queue_has_data()
    }
}

/// Plugin `HasData` / effector or encoder `NeedData` on a surface edge the
/// consumer reads by itself.
pub struct PushSurfaceToEffector {
    output: Shared<dyn Plugin>,
    input: Shared<dyn Plugin>,
}

impl PushSurfaceToEffector {
    /// Handler for the surface edge from `output` to `input`.
    pub fn new(output: Shared<dyn Plugin>, input: Shared<dyn Plugin>) -> Self {
        Self { output, input }
    }
}

impl CommandHandler for PushSurfaceToEffector {
    fn handle(&mut self) -> Result<()> {
        let frame = {
            let mut output = self.output.lock();
            let mut frame = output.get_frame()?;
            if let Some(index) = frame.take_buffer_index() {
                output.release_output_buffer(index)?;
            }
            frame
        };
        let mut input = self.input.lock();
        input.push(frame)?;
        input.check_if_output_queue_has_data()
    }
}

/// Plugin `OutputFormatChanged` / video effector `NeedInputFormat`.
pub struct ConfigureVideoEffector {
    output: Shared<dyn Plugin>,
    effector: Shared<dyn Plugin>,
}

impl ConfigureVideoEffector {
    /// Handler configuring `effector` with the producer's format.
    pub fn new(output: Shared<dyn Plugin>, effector: Shared<dyn Plugin>) -> Self {
        Self { output, effector }
    }
}

impl CommandHandler for ConfigureVideoEffector {
    fn handle(&mut self) -> Result<()> {
        let resolution = self.output.lock().output_format()?.resolution;
        let mut effector = self.effector.lock();
        let track = effector.track_id();
        effector.input_queue().queue(Command::NeedData, track);
        if let Some(resolution) = resolution {
            effector.set_input_resolution(resolution);
        }
        Ok(())
    }
}

/// Producer `EndOfFile` / plugin `NeedData`.
pub struct Drain {
    plugin: Shared<dyn Plugin>,
}

impl Drain {
    /// Handler draining `plugin`.
    pub fn new(plugin: Shared<dyn Plugin>) -> Self {
        Self { plugin }
    }
}

impl CommandHandler for Drain {
    fn handle(&mut self) -> Result<()> {
        self.plugin.lock().drain(None)
    }
}

/// Producer `OutputFormatChanged` / consumer `NeedData` on edges where the
/// consumer does not care: the request stays armed.
pub struct SkipOutputFormatChange {
    consumer: Node,
}

impl SkipOutputFormatChange {
    /// Handler leaving `consumer`'s request armed.
    pub fn new(consumer: Node) -> Self {
        Self { consumer }
    }
}

impl CommandHandler for SkipOutputFormatChange {
    fn handle(&mut self) -> Result<()> {
        let track = self.consumer.input_track_id().ok_or_else(|| {
            FlowError::InvalidState(format!("{:?} has no input queue", self.consumer))
        })?;
        self.consumer
            .with_input_queue(|queue| queue.queue(Command::NeedData, track));
        Ok(())
    }
}

/// Plugin `HasData` / plugin `NeedData` on a buffer edge: copies samples
/// from an output buffer into a free input buffer.
pub struct CopyData {
    output: Shared<dyn Plugin>,
    input: Shared<dyn Plugin>,
}

impl CopyData {
    /// Handler copying from `output` into `input`.
    pub fn new(output: Shared<dyn Plugin>, input: Shared<dyn Plugin>) -> Self {
        Self { output, input }
    }
}

impl CommandHandler for CopyData {
    fn handle(&mut self) -> Result<()> {
        let (track, free) = {
            let mut input = self.input.lock();
            (input.track_id(), input.find_free_frame())
        };
        let mut target = match free {
            Some(frame) => frame,
            None => {
                self.output.lock().output_queue().queue(Command::HasData, track);
                restore_consumer(&self.input, track);
                return Ok(());
            }
        };

        {
            let mut output = self.output.lock();
            let mut frame = output.get_frame()?;
            target.copy_data_from(&frame);
            target.copy_info_from(&frame);
            if let Some(index) = frame.take_buffer_index() {
                output.release_output_buffer(index)?;
            }
        }

        let mut input = self.input.lock();
        input.push(target)?;
        input.check_if_output_queue_has_data()
    }
}

/// Plugin `OutputFormatChanged` / plugin `NeedData` on an audio buffer edge.
pub struct AudioFormatChanged {
    output: Shared<dyn Plugin>,
    input: Shared<dyn Plugin>,
}

impl AudioFormatChanged {
    /// Handler reconfiguring `input` with the new format.
    pub fn new(output: Shared<dyn Plugin>, input: Shared<dyn Plugin>) -> Self {
        Self { output, input }
    }
}

impl CommandHandler for AudioFormatChanged {
    fn handle(&mut self) -> Result<()> {
        let format = self.output.lock().output_format()?;
        let mut input = self.input.lock();
        input.set_input_media_format(format);
        input.push(Frame::empty())
    }
}

/// Plugin `OutputFormatChanged` / sink `NeedInputFormat`: registers the
/// plugin's output as a sink track.
pub struct RegisterSinkTrack {
    plugin: Shared<dyn Plugin>,
    sink: Shared<dyn Render>,
}

impl RegisterSinkTrack {
    /// Handler registering `plugin`'s output with `sink`.
    pub fn new(plugin: Shared<dyn Plugin>, sink: Shared<dyn Render>) -> Self {
        Self { plugin, sink }
    }
}

impl CommandHandler for RegisterSinkTrack {
    fn handle(&mut self) -> Result<()> {
        let format = self.plugin.lock().output_format()?;
        let (track, releases) = {
            let mut sink = self.sink.lock();
            let track = sink.add_media_format(format)?;
            sink.start()?;
            (track, sink.take_releases())
        };
        self.plugin.lock().set_output_track_id(track);
        give_back(releases)
    }
}

/// Returns consumed buffers to their owners. The sink lock must be dropped.
fn give_back(releases: Vec<Release>) -> Result<()> {
    for release in releases {
        release.owner.lock().release_output_buffer(release.index)?;
    }
    Ok(())
}

/// Plugin `HasData` / sink `NeedData` or `NeedInputFormat`: hands a frame to
/// the sink and returns the buffers the sink is done with.
pub struct PullData {
    plugin: Shared<dyn Plugin>,
    sink: Shared<dyn Render>,
}

impl PullData {
    /// Handler moving frames from `plugin` to `sink`.
    pub fn new(plugin: Shared<dyn Plugin>, sink: Shared<dyn Render>) -> Self {
        Self { plugin, sink }
    }
}

impl CommandHandler for PullData {
    fn handle(&mut self) -> Result<()> {
        let frame = self.plugin.lock().get_frame()?;
        let releases = self
            .sink
            .lock()
            .push_with_releaser(frame, self.plugin.clone())?;
        give_back(releases)
    }
}

/// Plugin `EndOfFile` / sink `NeedData` or `NeedInputFormat`.
pub struct DrainSink {
    sink: Shared<dyn Render>,
}

impl DrainSink {
    /// Handler counting one drained track on `sink`.
    pub fn new(sink: Shared<dyn Render>) -> Self {
        Self { sink }
    }
}

impl CommandHandler for DrainSink {
    fn handle(&mut self) -> Result<()> {
        let releases = self.sink.lock().drain_with_releaser()?;
        give_back(releases)
    }
}

/// Capture source `HasData` / encoder `NeedData`: the image already sits on
/// the encoder surface and only has to be submitted.
pub struct CaptureSurface {
    source: Shared<dyn CaptureSource>,
    encoder: Shared<dyn Plugin>,
}

impl CaptureSurface {
    /// Handler submitting captured images to `encoder`.
    pub fn new(source: Shared<dyn CaptureSource>, encoder: Shared<dyn Plugin>) -> Self {
        Self { source, encoder }
    }
}

impl CommandHandler for CaptureSurface {
    fn handle(&mut self) -> Result<()> {
        let mut source = self.source.lock();
        let frame = source.get_frame()?;
        let mut encoder = self.encoder.lock();
        if !frame.is_eof() && frame.len() != 0 {
            match source.output_surface() {
                Some(surface) => encoder.notify_surface_ready(surface)?,
                None => warn!("capture source lost its surface"),
            }
        }
        drop(source);

        encoder.push(frame)?;
        encoder.check_if_output_queue_has_data()
    }
}

/// Microphone `HasData` / plugin `NeedData`: reads one chunk of samples into
/// a free input buffer of an encoder or effector.
pub struct MicrophonePull {
    source: Shared<dyn Source>,
    plugin: Shared<dyn Plugin>,
}

impl MicrophonePull {
    /// Handler reading microphone samples into `plugin`.
    pub fn new(source: Shared<dyn Source>, plugin: Shared<dyn Plugin>) -> Self {
        Self { source, plugin }
    }
}

impl CommandHandler for MicrophonePull {
    fn handle(&mut self) -> Result<()> {
        let (track, free) = {
            let mut plugin = self.plugin.lock();
            (plugin.track_id(), plugin.find_free_frame())
        };
        let mut frame = match free {
            Some(frame) => frame,
            None => {
                self.source.lock().output_queue().queue(Command::HasData, track);
                restore_consumer(&self.plugin, track);
                return Ok(());
            }
        };

        {
            let mut source = self.source.lock();
            // give pending video a turn before the next chunk
            source.output_queue().queue(Command::NextPair, track);
            source.pull(&mut frame)?;
        }

        let eof = frame.is_eof();
        let mut plugin = self.plugin.lock();
        plugin.push(frame)?;
        if !eof {
            plugin.check_if_output_queue_has_data()?;
        }
        Ok(())
    }
}
