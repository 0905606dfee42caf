//! Transform stages: codec-backed decoders and encoders, pass-through and
//! effectors.
//!
//! Codec-backed plugins share one state machine (`codec::CodecCore`) that
//! turns the poll-style [`MediaCodec`](crate::codec::MediaCodec) answers into
//! readiness commands. Every plugin publishes on output track
//! [`EDGE_TRACK`]; the sink maps it to its own track ids.

mod audio_effector;
pub(crate) mod codec;
mod decoder;
mod effector;
mod encoder;
mod passthrough;

pub use audio_effector::{AudioEffect, AudioEffector};
pub use codec::{PluginState, EDGE_TRACK};
pub use decoder::Decoder;
pub use effector::{VideoEffect, VideoEffector};
pub use encoder::{AudioEncoder, VideoEncoder};
pub use passthrough::PassThroughPlugin;
