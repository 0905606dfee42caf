use futures::FutureExt;
use log::{debug, info};

use crate::av::{Command, MediaKind};
use crate::error::{FlowError, Result};
use crate::render::SurfaceRequest;

use super::handlers::{
    AudioFormatChanged, CaptureSurface, ConfigureVideoDecoder, ConfigureVideoEffector, CopyData, Drain,
    DrainSink, MicrophonePull, PullData, PushData, PushSurface, PushSurfaceToEffector, RegisterSinkTrack,
    Rollover, SkipOutputFormatChange, SourceEnded,
};
use super::rules::find_rule;
use super::{
    CaptureSource, CommandHandler, CommandHandlerFactory, CommandProcessor, Node, OutputInputPair, Plugin,
    Render, Role, Shared, Source, Strategy,
};

/// Handler constructor over clones of two stages.
fn bind2<A, B, H>(a: &A, b: &B, new: fn(A, B) -> H) -> impl Fn() -> H + Send + Sync + 'static
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    H: CommandHandler + 'static,
{
    let (a, b) = (a.clone(), b.clone());
    move || new(a.clone(), b.clone())
}

fn bind1<A, H>(a: &A, new: fn(A) -> H) -> impl Fn() -> H + Send + Sync + 'static
where
    A: Clone + Send + Sync + 'static,
    H: CommandHandler + 'static,
{
    let a = a.clone();
    move || new(a.clone())
}

/// Media kinds the rule predicate is checked against.
fn edge_kinds(producer: &Node, consumer: &Node) -> Vec<MediaKind> {
    let mut kinds = Vec::with_capacity(2);
    if matches!(producer, Node::Plugin(_) | Node::Capture(_)) {
        kinds.extend(producer.kind());
    }
    if let Node::Plugin(_) = consumer {
        kinds.extend(consumer.kind());
    }
    kinds
}

/// An effector whose encoder surface can only be created once the
/// effector's own input surface exists.
struct DeferredSetup {
    effector: Shared<dyn Plugin>,
    encoder: Shared<dyn Plugin>,
    request: SurfaceRequest,
}

/// Wires edges: looks the role pair up in the connection rules, registers
/// the pair's handlers with the processor and performs the one-time setup
/// the strategy needs.
#[derive(Default)]
pub struct ConnectorFactory {
    deferred: Vec<DeferredSetup>,
}

impl ConnectorFactory {
    /// Factory with no deferred setups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires `producer` to `consumer` with the strategy of their connection rule.
    pub fn connect(&mut self, processor: &mut CommandProcessor, producer: &Node, consumer: &Node) -> Result<()> {
        let producer_role = producer.role();
        let consumer_role = consumer.role();
        let illegal = || FlowError::IllegalConnection {
            producer: producer_role,
            consumer: consumer_role,
        };
        let kinds = edge_kinds(producer, consumer);
        let rule = find_rule(producer_role, consumer_role, &kinds).ok_or_else(illegal)?;
        debug!(
            "connecting {:?} -> {:?} ({:?}) with {:?}",
            producer_role, consumer_role, kinds, rule.strategy
        );

        match (rule.strategy, producer, consumer) {
            (Strategy::SourcePush, Node::Source(source), Node::Plugin(plugin)) => {
                source_push(processor, source, plugin, consumer_role)
            }
            (Strategy::SurfacePush, Node::Plugin(decoder), Node::Plugin(encoder)) => {
                surface_push(processor, decoder, encoder)
            }
            (Strategy::EffectorInput, Node::Plugin(decoder), Node::Plugin(effector)) => {
                effector_input(processor, decoder, effector)
            }
            (Strategy::EffectorOutput, Node::Plugin(effector), Node::Plugin(encoder)) => {
                self.effector_output(processor, effector, encoder)
            }
            (Strategy::AudioCopy, Node::Plugin(output), Node::Plugin(input)) => {
                audio_copy(processor, output, input, producer_role, consumer_role)
            }
            (Strategy::CapturePush, Node::Capture(camera), Node::Plugin(encoder)) => {
                capture_push(processor, camera, encoder)
            }
            (Strategy::MicrophonePush, Node::Source(microphone), Node::Plugin(plugin)) => {
                microphone_push(processor, microphone, plugin, consumer_role)
            }
            (Strategy::SinkPull, Node::Plugin(plugin), Node::Render(sink)) => sink_pull(processor, plugin, sink),
            _ => Err(illegal()),
        }
    }

    /// Setups waiting for a surface.
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    /// Completes the setups that waited for an effector's input surface.
    /// Every request must be answered by now.
    pub fn run_deferred(&mut self) -> Result<()> {
        for setup in self.deferred.drain(..) {
            let context = setup.request.now_or_never().ok_or_else(|| {
                FlowError::MissingStage("effector input surface was never created".into())
            })??;
            debug!("effector surface ready in context {}", context.id());
            let surface = {
                let mut encoder = setup.encoder.lock();
                encoder.configure()?;
                encoder.create_input_surface(Some(context))?
            };
            {
                let mut effector = setup.effector.lock();
                effector.set_output_surface(surface)?;
                effector.configure()?;
                effector.start()?;
            }
            setup.encoder.lock().start()?;
        }
        Ok(())
    }

    fn effector_output(
        &mut self,
        processor: &mut CommandProcessor,
        effector: &Shared<dyn Plugin>,
        encoder: &Shared<dyn Plugin>,
    ) -> Result<()> {
        let mut handlers = CommandHandlerFactory::new();
        handlers.register(
            Command::HasData,
            Command::NeedData,
            bind2(effector, encoder, PushSurfaceToEffector::new),
        );
        handlers.register(Command::EndOfFile, Command::NeedData, bind1(encoder, Drain::new));
        register_skip(&mut handlers, &Node::Plugin(encoder.clone()));
        add_pair(processor, Node::Plugin(effector.clone()), Node::Plugin(encoder.clone()), handlers)?;

        let role = effector.lock().role();
        let request = effector
            .lock()
            .request_surface()
            .ok_or_else(|| FlowError::MissingStage(format!("{:?} cannot provide a surface", role)))?;
        self.deferred.push(DeferredSetup {
            effector: effector.clone(),
            encoder: encoder.clone(),
            request,
        });
        Ok(())
    }
}

fn add_pair(processor: &mut CommandProcessor, output: Node, input: Node, handlers: CommandHandlerFactory) -> Result<()> {
    processor.add(OutputInputPair::new(output, input, handlers)?)
}

fn register_skip(handlers: &mut CommandHandlerFactory, consumer: &Node) {
    handlers.register(
        Command::OutputFormatChanged,
        Command::NeedData,
        bind1(consumer, SkipOutputFormatChange::new),
    );
}

fn source_push(
    processor: &mut CommandProcessor,
    source: &Shared<dyn Source>,
    plugin: &Shared<dyn Plugin>,
    role: Role,
) -> Result<()> {
    let kind = plugin.lock().kind();
    let (track, format) = {
        let source = source.lock();
        let track = source.track_id_by_kind(kind).ok_or(FlowError::MissingFormat(kind))?;
        (track, source.track_format(track)?)
    };
    source.lock().select_track(track)?;
    plugin.lock().set_track_id(track);

    let mut handlers = CommandHandlerFactory::new();
    handlers.register(Command::HasData, Command::NeedData, bind2(source, plugin, PushData::new));
    handlers.register(
        Command::OutputFormatChanged,
        Command::NeedData,
        bind2(source, plugin, Rollover::new),
    );
    handlers.register(Command::EndOfFile, Command::NeedData, bind1(plugin, SourceEnded::new));
    handlers.register(
        Command::EndOfFile,
        Command::NeedInputFormat,
        bind1(plugin, SourceEnded::new),
    );
    handlers.register(
        Command::HasData,
        Command::NeedInputFormat,
        bind2(source, plugin, ConfigureVideoDecoder::new),
    );
    add_pair(processor, Node::Source(source.clone()), Node::Plugin(plugin.clone()), handlers)?;

    info!("{:?} {:?} reads source track {} ({})", kind, role, track, format.mime);
    {
        let mut plugin = plugin.lock();
        plugin.set_media_format(format)?;
        if role == Role::PassThrough {
            plugin.start()?;
        }
    }
    source.lock().increment_connected_plugins();
    Ok(())
}

fn surface_push(processor: &mut CommandProcessor, decoder: &Shared<dyn Plugin>, encoder: &Shared<dyn Plugin>) -> Result<()> {
    let mut handlers = CommandHandlerFactory::new();
    handlers.register(Command::HasData, Command::NeedData, bind2(decoder, encoder, PushSurface::new));
    handlers.register(Command::EndOfFile, Command::NeedData, bind1(encoder, Drain::new));
    register_skip(&mut handlers, &Node::Plugin(encoder.clone()));
    add_pair(processor, Node::Plugin(decoder.clone()), Node::Plugin(encoder.clone()), handlers)?;

    let surface = {
        let mut encoder = encoder.lock();
        encoder.configure()?;
        encoder.create_input_surface(None)?
    };
    decoder.lock().set_output_surface(surface)?;
    encoder.lock().start()?;
    let mut decoder = decoder.lock();
    decoder.configure()?;
    decoder.start()
}

fn effector_input(processor: &mut CommandProcessor, decoder: &Shared<dyn Plugin>, effector: &Shared<dyn Plugin>) -> Result<()> {
    let mut handlers = CommandHandlerFactory::new();
    handlers.register(
        Command::HasData,
        Command::NeedData,
        bind2(decoder, effector, PushSurfaceToEffector::new),
    );
    handlers.register(
        Command::OutputFormatChanged,
        Command::NeedInputFormat,
        bind2(decoder, effector, ConfigureVideoEffector::new),
    );
    handlers.register(Command::EndOfFile, Command::NeedData, bind1(effector, Drain::new));
    register_skip(&mut handlers, &Node::Plugin(effector.clone()));
    add_pair(processor, Node::Plugin(decoder.clone()), Node::Plugin(effector.clone()), handlers)?;

    let target = effector.lock().input_target()?;
    let mut decoder = decoder.lock();
    decoder.set_output_target(target)?;
    decoder.configure()?;
    decoder.start()
}

fn audio_copy(
    processor: &mut CommandProcessor,
    output: &Shared<dyn Plugin>,
    input: &Shared<dyn Plugin>,
    producer: Role,
    consumer: Role,
) -> Result<()> {
    let mut handlers = CommandHandlerFactory::new();
    handlers.register(Command::HasData, Command::NeedData, bind2(output, input, CopyData::new));
    handlers.register(
        Command::OutputFormatChanged,
        Command::NeedData,
        bind2(output, input, AudioFormatChanged::new),
    );
    handlers.register(Command::EndOfFile, Command::NeedData, bind1(input, Drain::new));
    add_pair(processor, Node::Plugin(output.clone()), Node::Plugin(input.clone()), handlers)?;

    // decoders and effectors start with their downstream edge, encoders with their upstream one
    if matches!(producer, Role::Decoder | Role::Effector) {
        let mut output = output.lock();
        output.configure()?;
        output.start()?;
    }
    if consumer == Role::Encoder {
        let mut input = input.lock();
        input.configure()?;
        input.start()?;
    }
    Ok(())
}

fn capture_push(processor: &mut CommandProcessor, camera: &Shared<dyn CaptureSource>, encoder: &Shared<dyn Plugin>) -> Result<()> {
    let mut handlers = CommandHandlerFactory::new();
    handlers.register(Command::HasData, Command::NeedData, bind2(camera, encoder, CaptureSurface::new));
    handlers.register(Command::EndOfFile, Command::NeedData, bind1(encoder, Drain::new));
    register_skip(&mut handlers, &Node::Plugin(encoder.clone()));
    add_pair(processor, Node::Capture(camera.clone()), Node::Plugin(encoder.clone()), handlers)?;

    let surface = {
        let mut encoder = encoder.lock();
        encoder.configure()?;
        encoder.create_input_surface(None)?
    };
    camera.lock().set_output_surface(surface);
    encoder.lock().start()
}

fn microphone_push(
    processor: &mut CommandProcessor,
    microphone: &Shared<dyn Source>,
    plugin: &Shared<dyn Plugin>,
    role: Role,
) -> Result<()> {
    let mut handlers = CommandHandlerFactory::new();
    handlers.register(
        Command::HasData,
        Command::NeedData,
        bind2(microphone, plugin, MicrophonePull::new),
    );
    handlers.register(Command::EndOfFile, Command::NeedData, bind1(plugin, Drain::new));
    register_skip(&mut handlers, &Node::Plugin(plugin.clone()));
    add_pair(processor, Node::Source(microphone.clone()), Node::Plugin(plugin.clone()), handlers)?;

    if role == Role::Effector {
        let format = microphone
            .lock()
            .format_by_kind(MediaKind::Audio)
            .ok_or(FlowError::MissingFormat(MediaKind::Audio))?;
        plugin.lock().set_media_format(format)?;
    }
    {
        let mut plugin = plugin.lock();
        plugin.configure()?;
        plugin.start()?;
    }
    microphone.lock().increment_connected_plugins();
    Ok(())
}

fn sink_pull(processor: &mut CommandProcessor, plugin: &Shared<dyn Plugin>, sink: &Shared<dyn Render>) -> Result<()> {
    let mut handlers = CommandHandlerFactory::new();
    handlers.register(
        Command::OutputFormatChanged,
        Command::NeedInputFormat,
        bind2(plugin, sink, RegisterSinkTrack::new),
    );
    handlers.register(Command::HasData, Command::NeedData, bind2(plugin, sink, PullData::new));
    handlers.register(Command::HasData, Command::NeedInputFormat, bind2(plugin, sink, PullData::new));
    handlers.register(Command::EndOfFile, Command::NeedData, bind1(sink, DrainSink::new));
    handlers.register(Command::EndOfFile, Command::NeedInputFormat, bind1(sink, DrainSink::new));
    register_skip(&mut handlers, &Node::Render(sink.clone()));
    add_pair(processor, Node::Plugin(plugin.clone()), Node::Render(sink.clone()), handlers)?;

    sink.lock().configure()
}

#[cfg(test)]
mod tests;
