//! One-call transcoding on top of the pipeline engine.
//!
//! A [`MediaComposer`] collects source files, target formats and effects,
//! builds the stage graph through a [`MediaObjectFactory`] and runs it on a
//! worker thread. Lifecycle events reach the caller through a
//! [`ProgressListener`]; every run ends with exactly one of
//! `on_media_done`, `on_media_stop` or `on_error`.

use log::{error, info};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::av::{MediaFormat, MediaKind};
use crate::codec::MediaCodec;
use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use crate::format::{MediaExtractor, MediaMuxer, SourceId};
use crate::pipeline::{
    shared, CommandProcessor, InputStage, Node, Pipeline, ProcessOutcome, ProcessorControl, Source,
};
use crate::plugins::{AudioEffect, AudioEffector, AudioEncoder, Decoder, VideoEffect, VideoEffector, VideoEncoder};
use crate::render::RenderHandle;
use crate::sink::MuxRender;
use crate::source::{MediaSource, MultipleMediaSource};

/// Receives the lifecycle of a composer run. Called from the worker thread
/// except for pause and resume.
pub trait ProgressListener: Send + Sync {
    /// The worker started.
    fn on_media_start(&self);

    /// Fraction of the output written, in `0.0..=1.0`.
    fn on_media_progress(&self, progress: f32);

    /// Every track was written and the output finalized.
    fn on_media_done(&self);

    /// The run was paused.
    fn on_media_pause(&self);

    /// The run was resumed.
    fn on_media_resume(&self);

    /// The run was stopped before the end.
    fn on_media_stop(&self);

    /// The run failed. Reported at most once, instead of done or stop.
    fn on_error(&self, error: FlowError);
}

/// Creates the platform backends a composer wires together.
pub trait MediaObjectFactory: Send + Sync {
    /// Opens a demultiplexer for `source`.
    fn create_extractor(&self, source: &SourceId) -> Result<Box<dyn MediaExtractor>>;

    /// A decoder for samples of `format`.
    fn create_video_decoder(&self, format: &MediaFormat) -> Result<Box<dyn MediaCodec>>;

    /// An encoder producing `format`.
    fn create_video_encoder(&self, format: &MediaFormat) -> Result<Box<dyn MediaCodec>>;

    /// A decoder for audio samples of `format`.
    fn create_audio_decoder(&self, format: &MediaFormat) -> Result<Box<dyn MediaCodec>>;

    /// An audio encoder producing `format`.
    fn create_audio_encoder(&self, format: &MediaFormat) -> Result<Box<dyn MediaCodec>>;

    /// Opens the output multiplexer at `target`.
    fn create_muxer(&self, target: &Path) -> Result<Box<dyn MediaMuxer>>;

    /// Graphics backend for effectors and time scaling.
    fn render_backend(&self) -> RenderHandle;
}

struct Run {
    control: ProcessorControl,
    worker: Option<JoinHandle<()>>,
}

/// Joins, cuts, transcodes and applies effects to media files.
///
/// ```ignore
/// let mut composer = MediaComposer::new(factory, listener, EngineConfig::load()?);
/// composer.add_source_path("in.mp4")?;
/// composer.set_target_file("out.mp4")?;
/// composer.set_target_video_format(MediaFormat::video("video/avc", 640, 480));
/// composer.start()?;
/// composer.wait()?;
/// ```
pub struct MediaComposer {
    factory: Box<dyn MediaObjectFactory>,
    listener: Arc<dyn ProgressListener>,
    config: EngineConfig,
    source: MultipleMediaSource,
    target: Option<(PathBuf, MuxRender)>,
    video_format: Option<MediaFormat>,
    audio_format: Option<MediaFormat>,
    video_effects: Vec<Box<dyn VideoEffect>>,
    audio_effects: Vec<Box<dyn AudioEffect>>,
    time_scale: Option<(u32, (i64, i64))>,
    run: Option<Run>,
}

impl MediaComposer {
    /// Composer creating its backends through `factory`.
    pub fn new(
        factory: Box<dyn MediaObjectFactory>,
        listener: Arc<dyn ProgressListener>,
        config: EngineConfig,
    ) -> Self {
        Self {
            factory,
            listener,
            config,
            source: MultipleMediaSource::new(),
            target: None,
            video_format: None,
            audio_format: None,
            video_effects: Vec::new(),
            audio_effects: Vec::new(),
            time_scale: None,
            run: None,
        }
    }

    fn check_idle(&self) -> Result<()> {
        if self.run.is_some() {
            return Err(FlowError::InvalidState("composer already started".into()));
        }
        Ok(())
    }

    /// Appends a file opened through the factory.
    pub fn add_source_file(&mut self, source: SourceId) -> Result<()> {
        self.check_idle()?;
        let extractor = self.factory.create_extractor(&source)?;
        self.source.add(MediaSource::new(extractor))
    }

    /// Opens a local file as the next source.
    pub fn add_source_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.add_source_file(SourceId::Path(path.as_ref().to_path_buf()))
    }

    /// Appends an already opened, possibly trimmed, source.
    pub fn add_source(&mut self, source: MediaSource) -> Result<()> {
        self.check_idle()?;
        self.source.add(source)
    }

    /// Opens a source and inserts it at `index`.
    pub fn insert_source_file(&mut self, index: usize, source: SourceId) -> Result<()> {
        self.check_idle()?;
        let extractor = self.factory.create_extractor(&source)?;
        self.source.insert_at(index, MediaSource::new(extractor))
    }

    /// Removes the source at `index`.
    pub fn remove_source_file(&mut self, index: usize) -> Result<MediaSource> {
        self.check_idle()?;
        self.source.remove(index)
    }

    /// Sources in playback order.
    pub fn source_files(&self) -> &[MediaSource] {
        self.source.files()
    }

    /// Total duration of the added files after trimming, in microseconds.
    pub fn duration(&self) -> i64 {
        self.source.duration()
    }

    /// Opens the output through the factory.
    pub fn set_target_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.check_idle()?;
        let path = path.as_ref().to_path_buf();
        let muxer = self.factory.create_muxer(&path)?;
        self.target = Some((path, MuxRender::new(muxer)));
        Ok(())
    }

    /// Output path, once set.
    pub fn target_file(&self) -> Option<&Path> {
        self.target.as_ref().map(|(path, _)| path.as_path())
    }

    /// Enables the video chain. Without a target format video is dropped.
    pub fn set_target_video_format(&mut self, format: MediaFormat) {
        self.video_format = Some(format);
    }

    /// Video target format, if set.
    pub fn target_video_format(&self) -> Option<&MediaFormat> {
        self.video_format.as_ref()
    }

    /// Enables the audio chain. Without a target format audio is dropped.
    pub fn set_target_audio_format(&mut self, format: MediaFormat) {
        self.audio_format = Some(format);
    }

    /// Audio target format, if set.
    pub fn target_audio_format(&self) -> Option<&MediaFormat> {
        self.audio_format.as_ref()
    }

    /// Appends a video effect.
    pub fn add_video_effect(&mut self, effect: Box<dyn VideoEffect>) {
        self.video_effects.push(effect);
    }

    /// Removes the video effect at `index`.
    pub fn remove_video_effect(&mut self, index: usize) -> Option<Box<dyn VideoEffect>> {
        if index < self.video_effects.len() {
            Some(self.video_effects.remove(index))
        } else {
            None
        }
    }

    /// Number of video effects.
    pub fn video_effect_count(&self) -> usize {
        self.video_effects.len()
    }

    /// Appends an audio effect.
    pub fn add_audio_effect(&mut self, effect: Box<dyn AudioEffect>) {
        self.audio_effects.push(effect);
    }

    /// Removes the audio effect at `index`.
    pub fn remove_audio_effect(&mut self, index: usize) -> Option<Box<dyn AudioEffect>> {
        if index < self.audio_effects.len() {
            Some(self.audio_effects.remove(index))
        } else {
            None
        }
    }

    /// Number of audio effects.
    pub fn audio_effect_count(&self) -> usize {
        self.audio_effects.len()
    }

    /// Plays `segment` of the video `factor` times faster.
    pub fn set_video_time_scale(&mut self, factor: u32, segment: (i64, i64)) {
        self.time_scale = Some((factor, segment));
    }

    /// Builds the pipeline and starts processing on a worker thread.
    pub fn start(&mut self) -> Result<()> {
        self.check_idle()?;
        if self.source.file_count() == 0 {
            return Err(FlowError::MissingStage("source file".into()));
        }
        if self.target.is_none() {
            return Err(FlowError::MissingStage("target file".into()));
        }

        let mut pipeline = Pipeline::new();
        let video_input = self.source.format_by_kind(MediaKind::Video);
        if let (Some(input), Some(target)) = (video_input, self.video_format.clone()) {
            self.build_video_chain(&mut pipeline, &input, target)?;
        }
        let audio_input = self.source.format_by_kind(MediaKind::Audio);
        if let (Some(input), Some(target)) = (audio_input, self.audio_format.clone()) {
            self.build_audio_chain(&mut pipeline, &input, target)?;
        }

        let (path, mut sink) = match self.target.take() {
            Some(target) => target,
            None => return Err(FlowError::MissingStage("target file".into())),
        };
        let source = mem::replace(&mut self.source, MultipleMediaSource::new());
        sink.set_duration(source.duration());
        let listener = self.listener.clone();
        sink.set_progress_listener(
            self.config.progress_step,
            Box::new(move |progress| listener.on_media_progress(progress)),
        );
        pipeline.add_source(Node::Source(shared(source)));
        pipeline.set_sink(shared(sink));

        let processor = CommandProcessor::with_config(&self.config);
        let control = processor.control();
        let listener = self.listener.clone();
        let worker = thread::Builder::new()
            .name("vdkflow-composer".into())
            .spawn(move || run(pipeline, processor, listener))?;
        info!("composing into {}", path.display());
        self.run = Some(Run {
            control,
            worker: Some(worker),
        });
        Ok(())
    }

    fn build_video_chain(&mut self, pipeline: &mut Pipeline, input: &MediaFormat, target: MediaFormat) -> Result<()> {
        let decoder = Decoder::video(self.factory.create_video_decoder(input)?);
        let mut encoder = VideoEncoder::new(self.factory.create_video_encoder(&target)?);
        encoder.set_media_format(target)?;
        pipeline.add_video_stage(Node::Plugin(shared(decoder)));

        let effects = mem::take(&mut self.video_effects);
        if !effects.is_empty() || self.time_scale.is_some() {
            let backend = self.factory.render_backend();
            let mut effector = match self.time_scale {
                Some((factor, segment)) => VideoEffector::time_scaler(backend, factor, segment),
                None => VideoEffector::new(backend),
            };
            for effect in effects {
                effector.add_effect(effect);
            }
            pipeline.add_video_stage(Node::Plugin(shared(effector)));
        }
        pipeline.add_video_stage(Node::Plugin(shared(encoder)));
        Ok(())
    }

    fn build_audio_chain(&mut self, pipeline: &mut Pipeline, input: &MediaFormat, target: MediaFormat) -> Result<()> {
        let decoder = Decoder::audio(self.factory.create_audio_decoder(input)?);
        let mut encoder = AudioEncoder::new(self.factory.create_audio_encoder(&target)?);
        encoder.set_media_format(target.clone())?;
        pipeline.add_audio_stage(Node::Plugin(shared(decoder)));

        let effects = mem::take(&mut self.audio_effects);
        if !effects.is_empty() {
            let mut effector = AudioEffector::new(self.config.audio_frame_pool);
            effector.set_media_format(target)?;
            for effect in effects {
                effector.add_effect(effect);
            }
            pipeline.add_audio_stage(Node::Plugin(shared(effector)));
        }
        pipeline.add_audio_stage(Node::Plugin(shared(encoder)));
        Ok(())
    }

    fn control(&self) -> Result<&ProcessorControl> {
        self.run
            .as_ref()
            .map(|run| &run.control)
            .ok_or_else(|| FlowError::InvalidState("composer not started".into()))
    }

    /// Pauses the running pipeline.
    pub fn pause(&self) -> Result<()> {
        self.control()?.pause();
        self.listener.on_media_pause();
        Ok(())
    }

    /// Resumes a paused pipeline.
    pub fn resume(&self) -> Result<()> {
        self.control()?.resume();
        self.listener.on_media_resume();
        Ok(())
    }

    /// Asks the worker to stop. `on_media_stop` follows once the pipeline
    /// is released.
    pub fn stop(&self) -> Result<()> {
        self.control()?.stop();
        Ok(())
    }

    /// Blocks until the worker has delivered its terminal notification.
    pub fn wait(&mut self) -> Result<()> {
        let worker = match self.run.as_mut().and_then(|run| run.worker.take()) {
            Some(worker) => worker,
            None => return Ok(()),
        };
        worker
            .join()
            .map_err(|_| FlowError::InvalidState("composer worker panicked".into()))
    }
}

/// Worker body: resolve, process, release, then exactly one terminal event.
fn run(mut pipeline: Pipeline, mut processor: CommandProcessor, listener: Arc<dyn ProgressListener>) {
    let outcome = pipeline.resolve(&mut processor).and_then(|()| {
        listener.on_media_start();
        listener.on_media_progress(0.0);
        processor.process()
    });
    let released = pipeline.release();

    match (outcome, released) {
        (Ok(ProcessOutcome::Completed), Ok(())) => {
            info!("composing done");
            listener.on_media_progress(1.0);
            listener.on_media_done();
        }
        (Ok(ProcessOutcome::Stopped), Ok(())) => {
            info!("composing stopped");
            listener.on_media_stop();
        }
        (Ok(_), Err(err)) | (Err(err), Ok(())) => {
            error!("composing failed: {}", err);
            listener.on_error(err);
        }
        (Err(cause), Err(release)) => {
            error!("composing failed: {}, release failed too: {}", cause, release);
            listener.on_error(FlowError::Teardown {
                cause: Box::new(cause),
                release: Box::new(release),
            });
        }
    }
}
