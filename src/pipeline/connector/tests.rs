use super::*;
use crate::av::{MediaFormat, Resolution};
use crate::codec::tests::TestCodec;
use crate::codec::CodecMode;
use crate::format::tests::{TestExtractor, TestMuxer, TestSample};
use crate::pipeline::{shared, InputStage, OutputStage};
use crate::plugins::{Decoder, PassThroughPlugin, VideoEffector, VideoEncoder};
use crate::render::tests::TestRenderBackend;
use crate::sink::MuxRender;
use crate::source::MediaSource;
use std::sync::Arc;

fn video_format() -> MediaFormat {
    MediaFormat::video("video/avc", 320, 240).with_duration(100)
}

fn two_track_source() -> Shared<dyn Source> {
    let extractor = TestExtractor::new("clip.mp4")
        .with_track(
            MediaFormat::audio("audio/mp4a-latm", 44100, 2).with_duration(100),
            vec![TestSample::new(0, [1])],
        )
        .with_track(video_format(), vec![TestSample::new(0, [2])]);
    shared(MediaSource::new(Box::new(extractor)))
}

fn video_encoder(codec: &TestCodec) -> Shared<dyn Plugin> {
    let mut encoder = VideoEncoder::new(Box::new(codec.clone()));
    encoder.set_media_format(video_format()).unwrap();
    shared(encoder)
}

#[test]
fn test_illegal_pair_is_rejected() {
    let mut processor = CommandProcessor::new();
    let mut connectors = ConnectorFactory::new();
    let sink = Node::Render(shared(MuxRender::new(Box::new(TestMuxer::new()))));
    let decoder = Node::Plugin(shared(Decoder::video(Box::new(TestCodec::new(video_format())))));

    let err = connectors.connect(&mut processor, &sink, &decoder).unwrap_err();
    assert!(matches!(
        err,
        FlowError::IllegalConnection {
            producer: Role::Sink,
            consumer: Role::Decoder,
        }
    ));
    assert!(err.is_configuration());
    assert!(processor.pairs().is_empty());
}

#[test]
fn test_source_push_binds_the_track_of_the_plugin_kind() {
    let mut processor = CommandProcessor::new();
    let mut connectors = ConnectorFactory::new();
    let source = two_track_source();
    let plugin: Shared<dyn Plugin> = shared(PassThroughPlugin::new(MediaKind::Video));

    let producer = Node::Source(source.clone());
    let consumer = Node::Plugin(plugin.clone());
    connectors.connect(&mut processor, &producer, &consumer).unwrap();

    assert_eq!(processor.pairs().len(), 1);
    let handlers = processor.pairs()[0].handlers();
    assert!(handlers.contains(Command::HasData, Command::NeedData));
    assert!(handlers.contains(Command::OutputFormatChanged, Command::NeedData));
    assert!(handlers.contains(Command::EndOfFile, Command::NeedInputFormat));

    let mut plugin = plugin.lock();
    assert_eq!(plugin.track_id(), 1);
    assert_eq!(plugin.input_queue().first(), Some((Command::NeedData, 1)));
    assert_eq!(plugin.output_queue().first(), Some((Command::OutputFormatChanged, 0)));
    drop(plugin);

    assert!(matches!(
        connectors.connect(&mut processor, &producer, &consumer),
        Err(FlowError::DuplicatePair)
    ));
}

#[test]
fn test_source_without_the_kind_is_a_missing_format() {
    let mut processor = CommandProcessor::new();
    let mut connectors = ConnectorFactory::new();
    let extractor = TestExtractor::new("silent.mp4").with_track(video_format(), Vec::new());
    let source = Node::Source(shared(MediaSource::new(Box::new(extractor))));
    let decoder = Node::Plugin(shared(Decoder::audio(Box::new(TestCodec::new(
        MediaFormat::audio("audio/raw", 44100, 2),
    )))));

    assert!(matches!(
        connectors.connect(&mut processor, &source, &decoder),
        Err(FlowError::MissingFormat(MediaKind::Audio))
    ));
}

#[test]
fn test_surface_push_hands_the_encoder_surface_to_the_decoder() {
    let mut processor = CommandProcessor::new();
    let mut connectors = ConnectorFactory::new();
    let decoder_codec = TestCodec::new(MediaFormat::video("video/raw", 320, 240));
    let encoder_codec = TestCodec::new(video_format());
    let decoder: Shared<dyn Plugin> = shared(Decoder::video(Box::new(decoder_codec.clone())));
    decoder.lock().set_media_format(video_format()).unwrap();
    let encoder = video_encoder(&encoder_codec);

    connectors
        .connect(&mut processor, &Node::Plugin(decoder.clone()), &Node::Plugin(encoder.clone()))
        .unwrap();

    assert_eq!(encoder_codec.log().lock().started, 1);
    let decoder_log = decoder_codec.log();
    let decoder_log = decoder_log.lock();
    assert_eq!(decoder_log.started, 1);
    let (_, target, mode) = &decoder_log.configured[0];
    assert!(target.is_some());
    assert_eq!(*mode, CodecMode::Decoder);
    assert_eq!(
        decoder.lock().output_surface().map(|surface| surface.resolution()),
        Some(Resolution::new(320, 240))
    );
}

#[test]
fn test_effector_output_waits_for_the_input_surface() {
    let mut processor = CommandProcessor::new();
    let mut connectors = ConnectorFactory::new();
    let backend = Arc::new(TestRenderBackend::new());
    let decoder_codec = TestCodec::new(MediaFormat::video("video/raw", 320, 240));
    let encoder_codec = TestCodec::new(video_format());
    let decoder: Shared<dyn Plugin> = shared(Decoder::video(Box::new(decoder_codec.clone())));
    decoder.lock().set_media_format(video_format()).unwrap();
    let effector: Shared<dyn Plugin> = shared(VideoEffector::new(backend.clone()));
    let encoder = video_encoder(&encoder_codec);

    connectors
        .connect(&mut processor, &Node::Plugin(decoder.clone()), &Node::Plugin(effector.clone()))
        .unwrap();
    connectors
        .connect(&mut processor, &Node::Plugin(effector.clone()), &Node::Plugin(encoder.clone()))
        .unwrap();
    assert_eq!(connectors.pending(), 1);
    assert_eq!(encoder_codec.log().lock().started, 0);

    connectors.run_deferred().unwrap();
    assert_eq!(connectors.pending(), 0);
    assert_eq!(encoder_codec.log().lock().started, 1);
    assert_eq!(backend.surfaces.lock().len(), 1);
    assert_eq!(
        effector.lock().input_queue().first(),
        Some((Command::NeedInputFormat, 0))
    );
    let decoder_target = decoder_codec.log().lock().configured[0].1;
    assert_eq!(decoder_target, Some(effector.lock().input_target().unwrap()));
}

#[test]
fn test_unanswered_surface_request_fails_resolution() {
    let mut processor = CommandProcessor::new();
    let mut connectors = ConnectorFactory::new();
    let effector: Shared<dyn Plugin> = shared(VideoEffector::new(Arc::new(TestRenderBackend::new())));
    let encoder = video_encoder(&TestCodec::new(video_format()));

    connectors
        .connect(&mut processor, &Node::Plugin(effector), &Node::Plugin(encoder))
        .unwrap();
    assert!(matches!(connectors.run_deferred(), Err(FlowError::MissingStage(_))));
}

#[test]
fn test_sink_pull_counts_the_plugin() {
    let mut processor = CommandProcessor::new();
    let mut connectors = ConnectorFactory::new();
    let sink = shared(MuxRender::new(Box::new(TestMuxer::new())));
    let encoder = video_encoder(&TestCodec::new(video_format()));

    connectors
        .connect(&mut processor, &Node::Plugin(encoder), &Node::Render(sink.clone()))
        .unwrap();
    assert_eq!(sink.lock().connected_plugins(), 1);
    assert_eq!(sink.lock().input_queue().first(), Some((Command::NeedInputFormat, 0)));
}
