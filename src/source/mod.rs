//! Producers of media samples.
//!
//! [`MediaSource`] reads one file through a [`MediaExtractor`](crate::format::MediaExtractor)
//! and honours trim [`Segments`]. [`MultipleMediaSource`] plays several
//! files back to back as one stream. The capture sources wrap live
//! devices.

mod capture;
mod media_source;
mod multiple;
mod segments;

pub use capture::{tests as capture_fakes, AudioCaptureBackend, CameraSource, CaptureBackend, MicrophoneSource};
pub use media_source::MediaSource;
pub use multiple::MultipleMediaSource;
pub use segments::Segments;
