use log::{info, warn};

use crate::av::MediaKind;
use crate::error::{FlowError, Result};

use super::{CommandProcessor, ConnectorFactory, Node, Render, Role, Shared};

/// The stage graph of one run: sources, one chain of plugins per media
/// kind and a sink.
///
/// [`Pipeline::resolve`] connects every adjacent pair in declaration order:
/// the source serving the chain's kind, the chain itself, then the sink.
#[derive(Default)]
pub struct Pipeline {
    sources: Vec<Node>,
    video: Vec<Node>,
    audio: Vec<Node>,
    sink: Option<Shared<dyn Render>>,
    connectors: ConnectorFactory,
}

impl Pipeline {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source node.
    pub fn add_source(&mut self, source: Node) {
        self.sources.push(source);
    }

    /// Appends a stage to the video chain.
    pub fn add_video_stage(&mut self, stage: Node) {
        self.video.push(stage);
    }

    /// Appends a stage to the audio chain.
    pub fn add_audio_stage(&mut self, stage: Node) {
        self.audio.push(stage);
    }

    /// Sets the sink every chain ends in.
    pub fn set_sink(&mut self, sink: Shared<dyn Render>) {
        self.sink = Some(sink);
    }

    /// The sink, once set.
    pub fn sink(&self) -> Option<&Shared<dyn Render>> {
        self.sink.as_ref()
    }

    /// Wires the graph into `processor` and starts the sources.
    pub fn resolve(&mut self, processor: &mut CommandProcessor) -> Result<()> {
        if self.sources.is_empty() {
            return Err(FlowError::MissingStage("source".into()));
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| FlowError::MissingStage("sink".into()))?;
        if self.video.is_empty() && self.audio.is_empty() {
            return Err(FlowError::MissingStage("video or audio encoder".into()));
        }

        let chains = [
            (MediaKind::Video, self.video.clone()),
            (MediaKind::Audio, self.audio.clone()),
        ];
        for (kind, chain) in chains.iter() {
            let (first, last) = match (chain.first(), chain.last()) {
                (Some(first), Some(last)) => (first, last),
                _ => continue,
            };
            if !matches!(last.role(), Role::Encoder | Role::PassThrough) {
                return Err(FlowError::MissingStage(format!("{:?} encoder", kind).to_lowercase()));
            }
            let source = self.source_for(*kind)?;
            self.connectors.connect(processor, &source, first)?;
            for pair in chain.windows(2) {
                self.connectors.connect(processor, &pair[0], &pair[1])?;
            }
            self.connectors.connect(processor, last, &Node::Render(sink.clone()))?;
        }

        self.connectors.run_deferred()?;
        sink.lock().set_stop_listener(processor.control());
        for source in &self.sources {
            source.start()?;
        }
        info!(
            "pipeline resolved: {} sources, {} video and {} audio stages, {} pairs",
            self.sources.len(),
            self.video.len(),
            self.audio.len(),
            processor.pairs().len()
        );
        Ok(())
    }

    /// The first source able to feed a chain of `kind`.
    fn source_for(&self, kind: MediaKind) -> Result<Node> {
        self.sources
            .iter()
            .find(|source| match source {
                Node::Source(stage) => stage.lock().track_id_by_kind(kind).is_some(),
                Node::Capture(stage) => stage.lock().media_format().kind == kind,
                _ => false,
            })
            .cloned()
            .ok_or(FlowError::MissingFormat(kind))
    }

    /// Stops the sources; the rest of the graph drains behind them.
    pub fn stop(&self) -> Result<()> {
        for source in &self.sources {
            source.stop()?;
        }
        Ok(())
    }

    /// Best-effort release of every stage. Returns the first failure.
    pub fn release(&self) -> Result<()> {
        let mut first = None;
        let stages = self
            .sources
            .iter()
            .chain(self.video.iter())
            .chain(self.audio.iter())
            .cloned()
            .chain(self.sink.clone().map(Node::Render));
        for stage in stages {
            if let Err(err) = stage.release() {
                warn!("releasing {:?} failed: {}", stage, err);
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
