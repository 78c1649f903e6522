//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Decides how many remote video streams to request from the media server.

use std::collections::HashSet;

use lastn_common::ParticipantId;
use log::*;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::{
    media::{LastN, MediaSession},
    speakers::SpeakerQueueUpdate,
};

/// The channel last-N to use when the configuration doesn't name one.
pub const DEFAULT_CHANNEL_LAST_N: LastN = LastN::Limited(4);

/// Receive video quality, from best to worst. The order matters: see
/// [`last_n_for_quality_level`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum VideoQualityLevel {
    Ultra,
    High,
    Standard,
    Low,
    Off,
}

impl VideoQualityLevel {
    pub const fn height(self) -> u16 {
        match self {
            Self::Ultra => 2160,
            Self::High => 720,
            Self::Standard => 360,
            Self::Low => 180,
            Self::Off => 0,
        }
    }

    pub fn from_height(height: u16) -> Option<Self> {
        Self::iter().find(|level| level.height() == height)
    }
}

/// Scales the channel last-N down for lower receive qualities: halved at standard
/// definition, and halved again for each level below that. Unlimited stays unlimited.
pub fn last_n_for_quality_level(quality: VideoQualityLevel, channel_last_n: LastN) -> LastN {
    let index = VideoQualityLevel::iter()
        .position(|level| level == quality)
        .unwrap_or(0);
    match channel_last_n {
        LastN::Limited(n) if index > 1 => LastN::Limited(n >> (index - 1)),
        other => other,
    }
}

/// Everything the admission policy looks at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionInputs {
    pub baseline_last_n: LastN,
    pub override_last_n: Option<LastN>,
    pub screen_share_active: bool,
    pub tile_view_enabled: bool,
    pub local_is_dominant_speaker: bool,
    pub speaker_count: usize,
}

impl Default for AdmissionInputs {
    fn default() -> Self {
        Self {
            baseline_last_n: DEFAULT_CHANNEL_LAST_N,
            override_last_n: None,
            screen_share_active: false,
            tile_view_enabled: false,
            local_is_dominant_speaker: false,
            speaker_count: 0,
        }
    }
}

/// The admission policy.
///
/// An override always wins. While someone shares their screen on the stage layout, request
/// roughly one stream per recent speaker, plus one when the local participant isn't the
/// dominant speaker so there is always at least one other face. Otherwise use the baseline.
pub fn compute_target_last_n(inputs: &AdmissionInputs) -> LastN {
    if let Some(override_last_n) = inputs.override_last_n {
        return override_last_n;
    }
    if inputs.screen_share_active && !inputs.tile_view_enabled {
        let speaker_count = u32::try_from(inputs.speaker_count).unwrap_or(u32::MAX);
        return if inputs.local_is_dominant_speaker && speaker_count == 0 {
            LastN::Limited(1)
        } else if inputs.local_is_dominant_speaker {
            LastN::Limited(speaker_count)
        } else {
            LastN::Limited(speaker_count.saturating_add(1))
        };
    }
    inputs.baseline_last_n
}

/// Holds the session facts the admission policy depends on and pushes a new target to the
/// media session whenever one of them changes.
///
/// Every recompute pushes, even when the target is unchanged. A push that fails is not
/// retried; the next input change pushes again.
pub struct StreamAdmissionController {
    media_session: Box<dyn MediaSession>,
    channel_last_n: LastN,
    preferred_quality: VideoQualityLevel,
    override_last_n: Option<LastN>,
    screen_share_participants: HashSet<ParticipantId>,
    tile_view_enabled: bool,
    local_is_dominant_speaker: bool,
    /// Zero until the speaker tracker first reports.
    speaker_count: usize,
    /// The last value pushed.
    target_last_n: Option<LastN>,
}

impl StreamAdmissionController {
    pub fn new(channel_last_n: LastN, media_session: Box<dyn MediaSession>) -> Self {
        Self {
            media_session,
            channel_last_n,
            preferred_quality: VideoQualityLevel::High,
            override_last_n: None,
            screen_share_participants: HashSet::new(),
            tile_view_enabled: false,
            local_is_dominant_speaker: false,
            speaker_count: 0,
            target_last_n: None,
        }
    }

    pub fn inputs(&self) -> AdmissionInputs {
        AdmissionInputs {
            baseline_last_n: self.baseline_last_n(),
            override_last_n: self.override_last_n,
            screen_share_active: !self.screen_share_participants.is_empty(),
            tile_view_enabled: self.tile_view_enabled,
            local_is_dominant_speaker: self.local_is_dominant_speaker,
            speaker_count: self.speaker_count,
        }
    }

    pub fn baseline_last_n(&self) -> LastN {
        last_n_for_quality_level(self.preferred_quality, self.channel_last_n)
    }

    pub fn target_last_n(&self) -> Option<LastN> {
        self.target_last_n
    }

    pub fn override_last_n(&self) -> Option<LastN> {
        self.override_last_n
    }

    /// Evaluates the policy and pushes the result to the media session.
    pub fn recompute(&mut self) -> LastN {
        let inputs = self.inputs();
        let target = compute_target_last_n(&inputs);
        if self.target_last_n != Some(target) {
            info!(
                "last-N {} -> {} ({:?})",
                self.target_last_n
                    .map_or_else(|| "unset".to_string(), |last_n| last_n.to_string()),
                target,
                inputs
            );
        }
        self.target_last_n = Some(target);
        if let Err(err) = self.media_session.set_last_n(target) {
            warn!("failed to set last-N to {}: {}", target, err);
        }
        target
    }

    pub fn handle_speaker_queue_changed(&mut self, update: &SpeakerQueueUpdate) -> LastN {
        self.speaker_count = update.count;
        self.recompute()
    }

    pub fn set_screen_share_participants(
        &mut self,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> LastN {
        self.screen_share_participants = participants.into_iter().collect();
        self.recompute()
    }

    pub fn set_tile_view_enabled(&mut self, enabled: bool) -> LastN {
        self.tile_view_enabled = enabled;
        self.recompute()
    }

    pub fn set_local_is_dominant_speaker(&mut self, dominant: bool) -> LastN {
        self.local_is_dominant_speaker = dominant;
        self.recompute()
    }

    pub fn set_channel_last_n(&mut self, channel_last_n: LastN) -> LastN {
        self.channel_last_n = channel_last_n;
        self.recompute()
    }

    pub fn set_preferred_video_quality(&mut self, quality: VideoQualityLevel) -> LastN {
        self.preferred_quality = quality;
        self.recompute()
    }

    /// Forces `value` until the override is disabled again.
    pub fn set_override(&mut self, enabled: bool, value: LastN) -> LastN {
        self.override_last_n = enabled.then_some(value);
        debug!("last-N override: {:?}", self.override_last_n);
        self.recompute()
    }

    /// The "show everyone" switch: forces unlimited, or goes back to adaptive if unlimited
    /// is already forced.
    pub fn toggle_unlimited(&mut self) -> LastN {
        if self.override_last_n == Some(LastN::Unlimited) {
            self.set_override(false, LastN::Unlimited)
        } else {
            self.set_override(true, LastN::Unlimited)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::media::{MediaSessionError, MockMediaSession};

    fn recording_media_session() -> (Box<MockMediaSession>, Arc<Mutex<Vec<LastN>>>) {
        let pushed = Arc::new(Mutex::new(Vec::new()));
        let pushed_for_mock = pushed.clone();
        let mut media_session = MockMediaSession::new();
        media_session.expect_set_last_n().returning(move |last_n| {
            pushed_for_mock.lock().push(last_n);
            Ok(())
        });
        (Box::new(media_session), pushed)
    }

    fn screen_share_stage(local_is_dominant_speaker: bool, speaker_count: usize) -> AdmissionInputs {
        AdmissionInputs {
            screen_share_active: true,
            tile_view_enabled: false,
            local_is_dominant_speaker,
            speaker_count,
            ..Default::default()
        }
    }

    #[test]
    fn dominant_local_with_no_speakers_gets_one_stream() {
        assert_eq!(
            LastN::Limited(1),
            compute_target_last_n(&screen_share_stage(true, 0))
        );
    }

    #[test]
    fn dominant_local_gets_one_stream_per_speaker() {
        assert_eq!(
            LastN::Limited(3),
            compute_target_last_n(&screen_share_stage(true, 3))
        );
    }

    #[test]
    fn non_dominant_local_gets_an_extra_stream() {
        assert_eq!(
            LastN::Limited(3),
            compute_target_last_n(&screen_share_stage(false, 2))
        );
        assert_eq!(
            LastN::Limited(1),
            compute_target_last_n(&screen_share_stage(false, 0))
        );
    }

    #[test]
    fn baseline_without_screen_share() {
        for tile_view_enabled in [false, true] {
            for local_is_dominant_speaker in [false, true] {
                for speaker_count in 0..=4 {
                    let inputs = AdmissionInputs {
                        baseline_last_n: LastN::Limited(7),
                        screen_share_active: false,
                        tile_view_enabled,
                        local_is_dominant_speaker,
                        speaker_count,
                        ..Default::default()
                    };
                    assert_eq!(LastN::Limited(7), compute_target_last_n(&inputs));
                }
            }
        }
    }

    #[test]
    fn baseline_in_tile_view_even_with_screen_share() {
        let inputs = AdmissionInputs {
            baseline_last_n: LastN::Unlimited,
            tile_view_enabled: true,
            ..screen_share_stage(false, 3)
        };
        assert_eq!(LastN::Unlimited, compute_target_last_n(&inputs));
    }

    #[test]
    fn override_wins() {
        let inputs = AdmissionInputs {
            override_last_n: Some(LastN::Limited(0)),
            ..screen_share_stage(false, 3)
        };
        assert_eq!(LastN::Limited(0), compute_target_last_n(&inputs));
    }

    #[test]
    fn quality_level_scaling() {
        let channel = LastN::Limited(8);
        assert_eq!(
            LastN::Limited(8),
            last_n_for_quality_level(VideoQualityLevel::Ultra, channel)
        );
        assert_eq!(
            LastN::Limited(8),
            last_n_for_quality_level(VideoQualityLevel::High, channel)
        );
        assert_eq!(
            LastN::Limited(4),
            last_n_for_quality_level(VideoQualityLevel::Standard, channel)
        );
        assert_eq!(
            LastN::Limited(2),
            last_n_for_quality_level(VideoQualityLevel::Low, channel)
        );
        assert_eq!(
            LastN::Limited(1),
            last_n_for_quality_level(VideoQualityLevel::Off, channel)
        );
        assert_eq!(
            LastN::Limited(1),
            last_n_for_quality_level(VideoQualityLevel::Standard, LastN::Limited(3))
        );
        assert_eq!(
            LastN::Unlimited,
            last_n_for_quality_level(VideoQualityLevel::Low, LastN::Unlimited)
        );
    }

    #[test]
    fn quality_level_heights() {
        assert_eq!(
            Some(VideoQualityLevel::Standard),
            VideoQualityLevel::from_height(360)
        );
        assert_eq!(None, VideoQualityLevel::from_height(480));
        assert_eq!("standard", VideoQualityLevel::Standard.to_string());
    }

    #[test]
    fn every_input_change_pushes() {
        let (media_session, pushed) = recording_media_session();
        let mut controller = StreamAdmissionController::new(LastN::Limited(4), media_session);
        assert_eq!(None, controller.target_last_n());

        controller.recompute();
        controller.set_tile_view_enabled(false);
        controller.set_screen_share_participants([ParticipantId::from("alice")]);
        controller.handle_speaker_queue_changed(&SpeakerQueueUpdate {
            speakers: vec!["bob".into(), "carol".into()],
            count: 2,
        });
        // Same facts again still push.
        controller.handle_speaker_queue_changed(&SpeakerQueueUpdate {
            speakers: vec!["bob".into(), "carol".into()],
            count: 2,
        });
        controller.set_local_is_dominant_speaker(true);
        controller.set_screen_share_participants(Vec::<ParticipantId>::new());

        assert_eq!(
            vec![
                LastN::Limited(4),
                LastN::Limited(4),
                LastN::Limited(1),
                LastN::Limited(3),
                LastN::Limited(3),
                LastN::Limited(2),
                LastN::Limited(4),
            ],
            *pushed.lock()
        );
        assert_eq!(Some(LastN::Limited(4)), controller.target_last_n());
    }

    #[test]
    fn override_persists_until_cleared() {
        let (media_session, pushed) = recording_media_session();
        let mut controller = StreamAdmissionController::new(LastN::Limited(4), media_session);
        controller.set_screen_share_participants([ParticipantId::from("alice")]);

        assert_eq!(LastN::Unlimited, controller.set_override(true, LastN::Unlimited));
        for count in 0..=4 {
            assert_eq!(
                LastN::Unlimited,
                controller.handle_speaker_queue_changed(&SpeakerQueueUpdate {
                    speakers: vec![],
                    count,
                })
            );
        }
        assert_eq!(LastN::Unlimited, controller.set_tile_view_enabled(true));
        assert_eq!(LastN::Unlimited, controller.set_tile_view_enabled(false));

        // Back to adaptive: screen share on stage with 4 speakers.
        assert_eq!(LastN::Limited(5), controller.set_override(false, LastN::Unlimited));
        assert!(pushed.lock()[1..8].iter().all(|last_n| last_n.is_unlimited()));
    }

    #[test]
    fn toggle_unlimited_round_trip() {
        let (media_session, _pushed) = recording_media_session();
        let mut controller = StreamAdmissionController::new(LastN::Limited(4), media_session);

        assert_eq!(LastN::Unlimited, controller.toggle_unlimited());
        assert_eq!(Some(LastN::Unlimited), controller.override_last_n());
        assert_eq!(LastN::Limited(4), controller.toggle_unlimited());
        assert_eq!(None, controller.override_last_n());

        // A minimal override is replaced by unlimited, not cleared.
        controller.set_override(true, LastN::Limited(0));
        assert_eq!(LastN::Unlimited, controller.toggle_unlimited());
    }

    #[test]
    fn preferred_quality_scales_baseline() {
        let (media_session, _pushed) = recording_media_session();
        let mut controller = StreamAdmissionController::new(LastN::Limited(8), media_session);
        assert_eq!(
            LastN::Limited(2),
            controller.set_preferred_video_quality(VideoQualityLevel::Low)
        );
        assert_eq!(
            LastN::Limited(3),
            controller.set_channel_last_n(LastN::Limited(12))
        );
        assert_eq!(
            LastN::Limited(12),
            controller.set_preferred_video_quality(VideoQualityLevel::High)
        );
    }

    #[test]
    fn failed_push_is_not_retried() {
        let mut media_session = MockMediaSession::new();
        let mut sequence = mockall::Sequence::new();
        media_session
            .expect_set_last_n()
            .with(mockall::predicate::eq(LastN::Limited(4)))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Err(MediaSessionError::NotReady));
        media_session
            .expect_set_last_n()
            .with(mockall::predicate::eq(LastN::Limited(1)))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));

        let mut controller =
            StreamAdmissionController::new(LastN::Limited(4), Box::new(media_session));
        assert_eq!(LastN::Limited(4), controller.recompute());
        assert_eq!(Some(LastN::Limited(4)), controller.target_last_n());
        assert_eq!(
            LastN::Limited(1),
            controller.set_screen_share_participants([ParticipantId::from("alice")])
        );
    }
}
