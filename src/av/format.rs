use std::fmt;

/// The two media families a track can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Picture tracks.
    Video,
    /// Sound tracks.
    Audio,
}

impl MediaKind {
    /// Kind implied by a mime type such as `video/avc` or `audio/mp4a-latm`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("video/") {
            Some(MediaKind::Video)
        } else if mime.starts_with("audio/") {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Horizontal pixels.
    pub width: u32,
    /// Vertical pixels.
    pub height: u32,
}

impl Resolution {
    /// Creates a `width` x `height` resolution.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Description of one track as reported by an extractor or a codec.
///
/// Timestamps and durations are in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFormat {
    /// Media family of the track.
    pub kind: MediaKind,
    /// Mime type, e.g. `video/avc`.
    pub mime: String,
    /// Track duration in microseconds.
    pub duration: Option<i64>,
    /// Picture size, video only.
    pub resolution: Option<Resolution>,
    /// Frames per second, video only.
    pub frame_rate: Option<u32>,
    /// Seconds between key frames, video only.
    pub key_frame_interval: Option<u32>,
    /// Target bits per second.
    pub bit_rate: Option<u32>,
    /// Samples per second, audio only.
    pub sample_rate: Option<u32>,
    /// Channel count, audio only.
    pub channels: Option<u16>,
}

impl MediaFormat {
    /// Video format of the given size.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: MediaKind::Video,
            mime: mime.into(),
            duration: None,
            resolution: Some(Resolution::new(width, height)),
            frame_rate: None,
            key_frame_interval: None,
            bit_rate: None,
            sample_rate: None,
            channels: None,
        }
    }

    /// Audio format with the given sample layout.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            kind: MediaKind::Audio,
            mime: mime.into(),
            duration: None,
            resolution: None,
            frame_rate: None,
            key_frame_interval: None,
            bit_rate: None,
            sample_rate: Some(sample_rate),
            channels: Some(channels),
        }
    }

    /// Sets the duration in microseconds.
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets the bit rate.
    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    /// Sets the frame rate.
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Sets the key frame interval in seconds.
    pub fn with_key_frame_interval(mut self, seconds: u32) -> Self {
        self.key_frame_interval = Some(seconds);
        self
    }

    /// Whether this is a video format.
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Whether this is an audio format.
    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("video/avc"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("audio/mp4a-latm"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_mime("text/vtt"), None);
    }

    #[test]
    fn test_builder() {
        let format = MediaFormat::video("video/avc", 640, 480)
            .with_duration(1_000_000)
            .with_bit_rate(2_000_000)
            .with_frame_rate(30);
        assert!(format.is_video());
        assert_eq!(format.resolution, Some(Resolution::new(640, 480)));
        assert_eq!(format.duration, Some(1_000_000));
        assert_eq!(format.frame_rate, Some(30));
    }
}
