use crate::av::MediaKind;

use super::Role;

/// How a legal connection is wired: which handlers it registers and what
/// one-time setup it performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Source samples pushed into a decoder or pass-through.
    SourcePush,
    /// Decoder rendering straight into the encoder's input surface.
    SurfacePush,
    /// Decoder rendering into the surface an effector reads.
    EffectorInput,
    /// Effector drawing onto the encoder's input surface.
    EffectorOutput,
    /// Audio samples copied between buffer-based plugins.
    AudioCopy,
    /// Camera drawing onto the encoder's input surface.
    CapturePush,
    /// Microphone chunks read into an encoder or effector.
    MicrophonePush,
    /// Encoded samples pulled into the sink.
    SinkPull,
}

/// One legal `(producer, consumer)` role pair.
///
/// `kind` restricts the rule to one media kind. It is checked against the
/// consumer's kind, and against the producer's when the producer is a
/// plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRule {
    /// Upstream role.
    pub producer: Role,
    /// Downstream role.
    pub consumer: Role,
    /// Media kind the rule is limited to.
    pub kind: Option<MediaKind>,
    /// How the two stages are wired.
    pub strategy: Strategy,
}

impl ConnectionRule {
    const fn new(producer: Role, consumer: Role, kind: Option<MediaKind>, strategy: Strategy) -> Self {
        Self {
            producer,
            consumer,
            kind,
            strategy,
        }
    }

    /// Whether the rule applies to these roles and kinds.
    pub fn matches(&self, producer: Role, consumer: Role, kinds: &[MediaKind]) -> bool {
        self.producer == producer
            && self.consumer == consumer
            && self
                .kind
                .map_or(true, |kind| kinds.iter().all(|candidate| *candidate == kind))
    }
}

const VIDEO: Option<MediaKind> = Some(MediaKind::Video);
const AUDIO: Option<MediaKind> = Some(MediaKind::Audio);

/// Every connection a pipeline may contain.
pub const CONNECTION_RULES: &[ConnectionRule] = &[
    ConnectionRule::new(Role::Source, Role::Decoder, None, Strategy::SourcePush),
    ConnectionRule::new(Role::Source, Role::PassThrough, None, Strategy::SourcePush),
    ConnectionRule::new(Role::Decoder, Role::Encoder, VIDEO, Strategy::SurfacePush),
    ConnectionRule::new(Role::Decoder, Role::Encoder, AUDIO, Strategy::AudioCopy),
    ConnectionRule::new(Role::Decoder, Role::Effector, VIDEO, Strategy::EffectorInput),
    ConnectionRule::new(Role::Decoder, Role::Effector, AUDIO, Strategy::AudioCopy),
    ConnectionRule::new(Role::Decoder, Role::TimeScaler, VIDEO, Strategy::EffectorInput),
    ConnectionRule::new(Role::Effector, Role::Encoder, VIDEO, Strategy::EffectorOutput),
    ConnectionRule::new(Role::Effector, Role::Encoder, AUDIO, Strategy::AudioCopy),
    ConnectionRule::new(Role::TimeScaler, Role::Encoder, VIDEO, Strategy::EffectorOutput),
    ConnectionRule::new(Role::CaptureSource, Role::Encoder, VIDEO, Strategy::CapturePush),
    ConnectionRule::new(Role::Microphone, Role::Encoder, AUDIO, Strategy::MicrophonePush),
    ConnectionRule::new(Role::Microphone, Role::Effector, AUDIO, Strategy::MicrophonePush),
    ConnectionRule::new(Role::Encoder, Role::Sink, None, Strategy::SinkPull),
    ConnectionRule::new(Role::PassThrough, Role::Sink, None, Strategy::SinkPull),
];

/// The rule allowing `producer -> consumer` for stages of `kinds`.
pub fn find_rule(producer: Role, consumer: Role, kinds: &[MediaKind]) -> Option<&'static ConnectionRule> {
    CONNECTION_RULES
        .iter()
        .find(|rule| rule.matches(producer, consumer, kinds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_kind_selects_the_strategy() {
        let video = find_rule(Role::Decoder, Role::Encoder, &[MediaKind::Video]).unwrap();
        assert_eq!(video.strategy, Strategy::SurfacePush);
        let audio = find_rule(Role::Decoder, Role::Encoder, &[MediaKind::Audio]).unwrap();
        assert_eq!(audio.strategy, Strategy::AudioCopy);
    }

    #[test]
    fn test_mixed_kinds_do_not_match_a_kind_rule() {
        assert!(find_rule(Role::Decoder, Role::Encoder, &[MediaKind::Audio, MediaKind::Video]).is_none());
        assert!(find_rule(Role::Encoder, Role::Sink, &[MediaKind::Audio, MediaKind::Video]).is_some());
    }

    #[test]
    fn test_illegal_pairs_have_no_rule() {
        assert!(find_rule(Role::Sink, Role::Decoder, &[]).is_none());
        assert!(find_rule(Role::Source, Role::Encoder, &[MediaKind::Video]).is_none());
        assert!(find_rule(Role::Microphone, Role::Encoder, &[MediaKind::Video]).is_none());
        assert!(find_rule(Role::Decoder, Role::Decoder, &[MediaKind::Audio]).is_none());
    }

    #[test]
    fn test_rules_are_unambiguous() {
        let mut seen = HashSet::new();
        for rule in CONNECTION_RULES {
            assert!(
                seen.insert((rule.producer, rule.consumer, rule.kind)),
                "duplicate rule {:?}",
                rule
            );
        }
    }
}
