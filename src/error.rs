use std::num::ParseIntError;
use thiserror::Error;

use crate::av::{Command, MediaKind, TrackId};
use crate::pipeline::Role;

/// Everything that can go wrong while building or running a pipeline.
#[derive(Error, Debug)]
pub enum FlowError {
    /// I/O failure, e.g. reading a configuration file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A numeric configuration value did not parse.
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    /// Codec backend failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Demultiplexer backend failure.
    #[error("extractor error: {0}")]
    Extractor(String),

    /// Multiplexer backend failure.
    #[error("muxer error: {0}")]
    Muxer(String),

    /// Surface or render backend failure.
    #[error("render error: {0}")]
    Render(String),

    /// Bad configuration value or key.
    #[error("config error: {0}")]
    Config(String),

    /// No connection rule joins these roles.
    #[error("illegal connection: {producer:?} -> {consumer:?}")]
    IllegalConnection {
        /// Upstream role.
        producer: Role,
        /// Downstream role.
        consumer: Role,
    },

    /// A stage the graph needs was never set.
    #[error("pipeline is missing a stage: {0}")]
    MissingStage(String),

    /// A chain needs a target format that was not set.
    #[error("no {0:?} format was provided")]
    MissingFormat(MediaKind),

    /// Track index past the source's track count.
    #[error("track {track} is out of range, source has {count} tracks")]
    TrackOutOfRange {
        /// Requested track.
        track: TrackId,
        /// Tracks the source has.
        count: usize,
    },

    /// Source cannot be used as given.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The two stages are already paired.
    #[error("a pair between these stages is already registered")]
    DuplicatePair,

    /// Producer and consumer are the same stage.
    #[error("a stage cannot be paired with itself")]
    SamePair,

    /// Dequeue from an empty command queue.
    #[error("command queue is empty")]
    EmptyQueue,

    /// No handler is registered for the two queue heads.
    #[error("no handler for {output:?} -> {input:?}")]
    NoHandler {
        /// Producer head.
        output: Command,
        /// Consumer head.
        input: Command,
    },

    /// Operation not allowed in the stage's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The frame's buffer was already given back.
    #[error("frame does not own a buffer index")]
    BufferReleased,

    /// The surface request was dropped unanswered.
    #[error("surface request was dropped before a surface was provided")]
    SurfaceCancelled,

    /// The processor hit its stall limit.
    #[error("no pair made progress for {0} sweeps")]
    Stalled(u64),

    /// A run failed and releasing the pipeline failed too.
    #[error("{cause}; release also failed: {release}")]
    Teardown {
        /// The error that ended the run.
        cause: Box<FlowError>,
        /// The error raised while releasing.
        release: Box<FlowError>,
    },
}

impl FlowError {
    /// Errors raised while wiring a pipeline, before any sample moved.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FlowError::Config(_)
                | FlowError::IllegalConnection { .. }
                | FlowError::MissingStage(_)
                | FlowError::MissingFormat(_)
                | FlowError::TrackOutOfRange { .. }
                | FlowError::InvalidSource(_)
                | FlowError::DuplicatePair
                | FlowError::SamePair
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(FlowError::TrackOutOfRange { track: 3, count: 1 }.is_configuration());
        assert!(FlowError::IllegalConnection {
            producer: Role::Sink,
            consumer: Role::Decoder,
        }
        .is_configuration());
        assert!(!FlowError::Codec("boom".into()).is_configuration());
        assert!(!FlowError::EmptyQueue.is_configuration());
    }

    #[test]
    fn test_teardown_message_mentions_both_failures() {
        let err = FlowError::Teardown {
            cause: Box::new(FlowError::Codec("start failed".into())),
            release: Box::new(FlowError::Muxer("release failed".into())),
        };
        let text = err.to_string();
        assert!(text.contains("start failed"));
        assert!(text.contains("release failed"));
    }
}
