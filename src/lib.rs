#![doc(html_root_url = "https://docs.rs/vdkflow/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # vdkflow - media pipeline engine
//!
//! `vdkflow` joins, cuts, transcodes and applies effects to audio/video by
//! composing decoder, encoder, effect and multiplex stages into a pipeline.
//! The stages sit on top of poll-style backends: a codec may answer "no
//! buffer yet" to any call, and the engine keeps every stage fed anyway.
//!
//! ## How it runs
//!
//! Every stage publishes readiness commands (`HasData`, `NeedData`,
//! `NeedInputFormat`, `OutputFormatChanged`, `EndOfFile`, `NextPair`) into
//! its queues. Each edge of the graph is an [`OutputInputPair`] holding a
//! table of handlers keyed by (producer command, consumer command). The
//! [`CommandProcessor`] sweeps the pairs and runs the handler matching the
//! heads of both queues, until the sink has drained every track.
//!
//! ```rust,no_run
//! use vdkflow::format::tests::{TestExtractor, TestMuxer, TestSample};
//! use vdkflow::av::{MediaFormat, MediaKind};
//! use vdkflow::pipeline::{shared, CommandProcessor, Node, Pipeline};
//! use vdkflow::plugins::PassThroughPlugin;
//! use vdkflow::sink::MuxRender;
//! use vdkflow::source::MediaSource;
//!
//! fn main() -> vdkflow::Result<()> {
//!     let extractor = TestExtractor::new("clip.mp4").with_track(
//!         MediaFormat::video("video/avc", 640, 480).with_duration(1_000),
//!         vec![TestSample::new(0, [1, 2, 3])],
//!     );
//!
//!     let mut pipeline = Pipeline::new();
//!     pipeline.add_source(Node::Source(shared(MediaSource::new(Box::new(extractor)))));
//!     pipeline.add_video_stage(Node::Plugin(shared(PassThroughPlugin::new(MediaKind::Video))));
//!     pipeline.set_sink(shared(MuxRender::new(Box::new(TestMuxer::new()))));
//!
//!     let mut processor = CommandProcessor::new();
//!     pipeline.resolve(&mut processor)?;
//!     processor.process()?;
//!     pipeline.release()
//! }
//! ```
//!
//! For whole-file jobs use [`composer::MediaComposer`], which builds the
//! graph from target formats and runs it on a worker thread.
//!
//! ## Module Overview
//!
//! - `av`: frames, formats and the command vocabulary
//! - `codec`, `format`, `render`: contracts of the platform backends
//! - `pipeline`: stage traits, handlers, scheduler and graph builder
//! - `plugins`: decoders, encoders, pass-through and effectors
//! - `source`: file, multi-file and capture sources
//! - `sink`: the multiplexing sink and progress tracking
//! - `composer`: one-call transcoding with lifecycle notifications
//! - `config`, `error`: engine configuration and the crate error type

/// Frames, formats and readiness commands
pub mod av;

/// Backend codec contract
pub mod codec;

/// Composer front end
pub mod composer;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Backend demultiplexer and multiplexer contracts
pub mod format;

/// The execution engine
pub mod pipeline;

/// Transform stages
pub mod plugins;

/// Surface and rendering contract
pub mod render;

/// Terminal stages
pub mod sink;

/// Producers of media samples
pub mod source;

pub use error::{FlowError, Result};
pub use pipeline::{CommandProcessor, OutputInputPair};
