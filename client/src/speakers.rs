//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Tracks who has spoken recently.
//!
//! The tracker keeps a small recency-ordered set of participants whose audio level crossed
//! the activity threshold, drops them once they have been quiet for the expiration time,
//! and reports every change as a [`SpeakerQueueUpdate`]. It does no scheduling of its own;
//! the owner feeds it the current time and runs [`SpeakerActivityTracker::expire`] every
//! sweep interval while [`SpeakerActivityTracker::needs_sweep`] is true.

use std::collections::HashMap;

use lastn_common::{Duration, Instant, ParticipantId, RecencyQueue, TrackId};
use log::*;
use serde::Serialize;

use crate::{audio::AudioLevel, config::SpeakerTrackerOptions};

pub const MAX_QUEUE_SIZE: usize = 4;
pub const EXPIRATION_TIME: Duration = Duration::from_millis(15000);
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(1000);
pub const AUDIO_LEVEL_THRESHOLD: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerSettings {
    pub max_speakers: usize,
    pub expiration: Duration,
    pub sweep_interval: Duration,
    pub audio_level_threshold: AudioLevel,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_speakers: MAX_QUEUE_SIZE,
            expiration: EXPIRATION_TIME,
            sweep_interval: SWEEP_INTERVAL,
            audio_level_threshold: AudioLevel::new(AUDIO_LEVEL_THRESHOLD)
                .unwrap_or(AudioLevel::SILENT),
        }
    }
}

impl From<&SpeakerTrackerOptions> for TrackerSettings {
    fn from(options: &SpeakerTrackerOptions) -> Self {
        let defaults = Self::default();
        let audio_level_threshold = AudioLevel::new(options.audio_level_threshold)
            .unwrap_or_else(|| {
                warn!(
                    "audio level threshold {} is not in [0.0, 1.0], using {}",
                    options.audio_level_threshold, defaults.audio_level_threshold
                );
                defaults.audio_level_threshold
            });
        let sweep_interval = if options.sweep_interval_ms == 0 {
            warn!(
                "speaker sweep interval must be positive, using {:?}",
                defaults.sweep_interval
            );
            defaults.sweep_interval
        } else {
            Duration::from_millis(options.sweep_interval_ms)
        };
        Self {
            max_speakers: options.max_speakers,
            expiration: Duration::from_millis(options.expiration_ms),
            sweep_interval,
            audio_level_threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SpeakerActivity {
    last_active_at: Instant,
    last_audio_level: AudioLevel,
}

/// One participant currently considered an active speaker.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeakerEntry {
    pub participant_id: ParticipantId,
    pub last_active_at: Instant,
    pub last_audio_level: AudioLevel,
}

/// The tracked speakers after a change, least recently active first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SpeakerQueueUpdate {
    pub speakers: Vec<ParticipantId>,
    pub count: usize,
}

pub struct SpeakerActivityTracker {
    settings: TrackerSettings,
    speakers: RecencyQueue<ParticipantId, SpeakerActivity>,
    /// Audio tracks we listen to, and whose audio they carry.
    participant_by_track: HashMap<TrackId, ParticipantId>,
}

impl Default for SpeakerActivityTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

impl SpeakerActivityTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            speakers: RecencyQueue::new(settings.max_speakers),
            participant_by_track: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Starts listening to an audio track. Returns false if the track was already
    /// subscribed, in which case nothing changes.
    pub fn subscribe(&mut self, track_id: TrackId, participant_id: ParticipantId) -> bool {
        if self.participant_by_track.contains_key(&track_id) {
            trace!("track {} already subscribed", track_id);
            return false;
        }
        debug!("subscribing to track {} of {}", track_id, participant_id);
        self.participant_by_track.insert(track_id, participant_id);
        true
    }

    /// Stops listening to an audio track. Entries already recorded for its participant stay
    /// until they expire. Returns false if the track wasn't subscribed.
    pub fn unsubscribe(&mut self, track_id: &TrackId) -> bool {
        match self.participant_by_track.remove(track_id) {
            Some(participant_id) => {
                debug!("unsubscribed from track {} of {}", track_id, participant_id);
                true
            }
            None => {
                trace!("track {} was not subscribed", track_id);
                false
            }
        }
    }

    pub fn is_subscribed(&self, track_id: &TrackId) -> bool {
        self.participant_by_track.contains_key(track_id)
    }

    pub fn subscription_count(&self) -> usize {
        self.participant_by_track.len()
    }

    /// A level reading from a track. Readings from tracks we don't listen to are dropped.
    pub fn handle_audio_level(
        &mut self,
        track_id: &TrackId,
        reading: Option<f64>,
        now: Instant,
    ) -> Option<SpeakerQueueUpdate> {
        let Some(participant_id) = self.participant_by_track.get(track_id) else {
            trace!("dropping level from unsubscribed track {}", track_id);
            return None;
        };
        let participant_id = participant_id.clone();
        self.ingest(&participant_id, reading, now)
    }

    /// Records speech activity for a participant if the reading is loud enough.
    ///
    /// A participant already tracked is refreshed and becomes the most recent speaker.
    /// A new participant is added, first evicting the least recently active speaker if the
    /// queue is full. `now` must not go backwards between calls.
    pub fn ingest(
        &mut self,
        participant_id: &ParticipantId,
        reading: Option<f64>,
        now: Instant,
    ) -> Option<SpeakerQueueUpdate> {
        let Some(level) = AudioLevel::from_reading(reading) else {
            trace!("ignoring malformed level {:?} for {}", reading, participant_id);
            return None;
        };
        if !level.is_at_least(self.settings.audio_level_threshold) {
            return None;
        }

        let activity = SpeakerActivity {
            last_active_at: now,
            last_audio_level: level,
        };
        if self.speakers.contains_key(participant_id) {
            trace!("refreshing speaker {} at level {}", participant_id, level);
        } else {
            debug!("adding speaker {} at level {}", participant_id, level);
        }
        if let Some((evicted, _)) = self.speakers.upsert(participant_id.clone(), activity) {
            debug!(
                "speaker queue full ({}), evicted {}",
                self.speakers.limit(),
                evicted
            );
        }
        if self.speakers.is_empty() {
            // Only possible with a queue limit of zero.
            return None;
        }
        Some(self.snapshot())
    }

    /// Drops every speaker that has been quiet for longer than the expiration time.
    /// Reports a change only if something was dropped.
    pub fn expire(&mut self, now: Instant) -> Option<SpeakerQueueUpdate> {
        let expiration = self.settings.expiration;
        let expired = self.speakers.retain(|participant_id, activity| {
            let keep = now.saturating_duration_since(activity.last_active_at) <= expiration;
            if !keep {
                debug!("speaker {} expired", participant_id);
            }
            keep
        });
        if expired > 0 {
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// True while there is anything left for the sweep to expire.
    pub fn needs_sweep(&self) -> bool {
        !self.speakers.is_empty()
    }

    /// Forgets all speakers and subscriptions. Reports a change if any speakers were tracked.
    pub fn clear(&mut self) -> Option<SpeakerQueueUpdate> {
        self.participant_by_track.clear();
        if self.speakers.is_empty() {
            return None;
        }
        self.speakers.clear();
        Some(self.snapshot())
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    /// Least recently active first.
    pub fn active_speaker_ids(&self) -> Vec<ParticipantId> {
        self.speakers.keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<SpeakerEntry> {
        self.speakers
            .iter()
            .map(|(participant_id, activity)| SpeakerEntry {
                participant_id: participant_id.clone(),
                last_active_at: activity.last_active_at,
                last_audio_level: activity.last_audio_level,
            })
            .collect()
    }

    pub fn snapshot(&self) -> SpeakerQueueUpdate {
        SpeakerQueueUpdate {
            speakers: self.active_speaker_ids(),
            count: self.speaker_count(),
        }
    }
}
