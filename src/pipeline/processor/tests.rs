use super::*;
use crate::av::{FrameFlags, MediaFormat, MediaKind};
use crate::format::tests::{MuxerLog, TestExtractor, TestMuxer, TestSample};
use crate::pipeline::{shared, CommandHandlerFactory, Node, Pipeline};
use crate::plugins::PassThroughPlugin;
use crate::sink::MuxRender;
use crate::source::MediaSource;
use std::time::Instant;

fn quick_config() -> EngineConfig {
    EngineConfig::default()
        .with_idle_backoff(Duration::ZERO)
        .with_stall_limit(1_000)
}

fn video_source(samples: Vec<TestSample>) -> Node {
    let extractor = TestExtractor::new("clip.mp4").with_track(
        MediaFormat::video("video/avc", 320, 240).with_duration(1_000),
        samples,
    );
    Node::Source(shared(MediaSource::new(Box::new(extractor))))
}

/// Source -> pass-through -> muxer, resolved into a fresh processor.
fn pass_through(samples: Vec<TestSample>) -> (CommandProcessor, Arc<Mutex<MuxerLog>>) {
    let mut processor = CommandProcessor::with_config(&quick_config());
    let muxer = TestMuxer::new();
    let log = muxer.log();
    let mut pipeline = Pipeline::new();
    pipeline.add_source(video_source(samples));
    pipeline.add_video_stage(Node::Plugin(shared(PassThroughPlugin::new(MediaKind::Video))));
    pipeline.set_sink(shared(MuxRender::new(Box::new(muxer))));
    pipeline.resolve(&mut processor).unwrap();
    (processor, log)
}

fn samples(times: &[i64]) -> Vec<TestSample> {
    times
        .iter()
        .map(|pts| TestSample::new(*pts, [*pts as u8]).with_flags(FrameFlags::NONE))
        .collect()
}

#[test]
fn test_duplicate_and_self_pairs_are_rejected() {
    let source = video_source(Vec::new());
    let plugin = Node::Plugin(shared(PassThroughPlugin::new(MediaKind::Video)));
    let mut processor = CommandProcessor::new();

    processor
        .add(OutputInputPair::new(source.clone(), plugin.clone(), CommandHandlerFactory::new()).unwrap())
        .unwrap();
    let again = OutputInputPair::new(source.clone(), plugin.clone(), CommandHandlerFactory::new()).unwrap();
    assert!(matches!(processor.add(again), Err(FlowError::DuplicatePair)));
    assert!(matches!(
        OutputInputPair::new(plugin.clone(), plugin, CommandHandlerFactory::new()),
        Err(FlowError::SamePair)
    ));
    assert_eq!(processor.pairs().len(), 1);
}

#[test]
fn test_runs_until_the_sink_completes() {
    let (mut processor, log) = pass_through(samples(&[0, 10, 20]));
    assert_eq!(processor.process().unwrap(), ProcessOutcome::Completed);
    assert!(processor.control().is_completed());

    let log = log.lock();
    let written: Vec<i64> = log.samples.iter().map(|sample| sample.pts).collect();
    assert_eq!(written, vec![0, 10, 20]);
    assert_eq!(log.stopped, 1);
    assert_eq!(log.released, 1);
}

#[test]
fn test_stop_before_processing_returns_stopped() {
    let (mut processor, log) = pass_through(samples(&[0, 10]));
    processor.stop();
    assert_eq!(processor.process().unwrap(), ProcessOutcome::Stopped);
    assert!(log.lock().samples.is_empty());
}

#[test]
fn test_idle_pairs_stall_after_the_limit() {
    let source = video_source(samples(&[0]));
    let plugin = Node::Plugin(shared(PassThroughPlugin::new(MediaKind::Video)));
    let config = EngineConfig::default()
        .with_idle_backoff(Duration::ZERO)
        .with_stall_limit(3);
    let mut processor = CommandProcessor::with_config(&config);
    processor
        .add(OutputInputPair::new(source, plugin, CommandHandlerFactory::new()).unwrap())
        .unwrap();

    assert!(matches!(processor.process(), Err(FlowError::Stalled(3))));
}

#[test]
fn test_tick_reports_progress() {
    let (mut processor, _) = pass_through(samples(&[0]));
    for pair in processor.pairs() {
        pair.fill_command_queues().unwrap();
    }
    assert!(processor.tick().unwrap());
}

#[test]
fn test_pause_blocks_until_resume() {
    let (mut processor, log) = pass_through(samples(&[0, 10, 20, 30]));
    let control = processor.control();
    control.pause();
    assert!(control.is_paused());

    let worker = thread::spawn(move || processor.process());
    thread::sleep(Duration::from_millis(50));
    assert!(!control.is_completed());
    assert!(log.lock().samples.is_empty());

    let resumed_at = Instant::now();
    control.resume();
    let outcome = worker.join().unwrap().unwrap();
    assert_eq!(outcome, ProcessOutcome::Completed);
    assert!(resumed_at.elapsed() < Duration::from_secs(5));

    let written: Vec<i64> = log.lock().samples.iter().map(|sample| sample.pts).collect();
    assert_eq!(written, vec![0, 10, 20, 30]);
}

#[test]
fn test_stop_wakes_a_paused_loop() {
    let (mut processor, _) = pass_through(samples(&[0, 10]));
    let control = processor.control();
    control.pause();
    let worker = thread::spawn(move || processor.process());
    thread::sleep(Duration::from_millis(20));
    control.stop();
    assert_eq!(worker.join().unwrap().unwrap(), ProcessOutcome::Stopped);
}
