//
// Copyright 2023 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Scripted conference events, one JSON object per line, for driving a session without a
//! media engine.
//!
//! ```text
//! {"event": "track_added", "track_id": "a1", "participant_id": "alice", "kind": "audio"}
//! {"event": "screen_share", "participants": ["alice"]}
//! {"event": "audio_level", "track_id": "a1", "level": 0.4}
//! {"event": "wait_ms", "ms": 16000}
//! ```

use std::collections::HashMap;

use lastn_common::{Duration, ParticipantId, TrackId};
use log::*;
use serde::Deserialize;

use crate::{
    admission::VideoQualityLevel,
    media::{LastN, TrackHandle, TrackKind},
    session::{ConferenceSession, SessionError},
};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConferenceEvent {
    TrackAdded {
        track_id: TrackId,
        participant_id: ParticipantId,
        kind: TrackKind,
        #[serde(default)]
        is_local: bool,
    },
    TrackRemoved {
        track_id: TrackId,
    },
    AudioLevel {
        track_id: TrackId,
        #[serde(default)]
        level: Option<f64>,
    },
    ScreenShare {
        participants: Vec<ParticipantId>,
    },
    TileView {
        enabled: bool,
    },
    DominantSpeaker {
        #[serde(default)]
        participant_id: Option<ParticipantId>,
    },
    Override {
        enabled: bool,
        value: LastN,
    },
    ToggleUnlimited,
    ChannelLastN {
        value: LastN,
    },
    VideoQuality {
        height: u16,
    },
    WaitMs {
        ms: u64,
    },
}

/// Parses one script line. Blank lines and lines starting with `#` yield None.
pub fn parse_line(line: &str) -> Result<Option<ConferenceEvent>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Applies events to a session, standing in for the media engine's tracks.
pub struct Replayer<'a> {
    session: &'a ConferenceSession,
    track_by_id: HashMap<TrackId, TrackHandle>,
}

impl<'a> Replayer<'a> {
    pub fn new(session: &'a ConferenceSession) -> Self {
        Self {
            session,
            track_by_id: HashMap::new(),
        }
    }

    pub async fn apply(&mut self, event: ConferenceEvent) -> Result<(), SessionError> {
        trace!("replaying {:?}", event);
        match event {
            ConferenceEvent::TrackAdded {
                track_id,
                participant_id,
                kind,
                is_local,
            } => {
                // A re-announced track keeps its handle so the existing listener still hears it.
                let track = self
                    .track_by_id
                    .entry(track_id.clone())
                    .or_insert_with(|| TrackHandle::new(track_id, participant_id, kind, is_local));
                self.session.handle_track_added(track)?;
            }
            ConferenceEvent::TrackRemoved { track_id } => {
                self.session.handle_track_removed(&track_id)?;
                self.track_by_id.remove(&track_id);
            }
            ConferenceEvent::AudioLevel { track_id, level } => match self.track_by_id.get(&track_id)
            {
                Some(track) => {
                    track.emit_audio_level(level);
                    // Give the listener a chance to see it before the next event.
                    tokio::task::yield_now().await;
                }
                None => self.session.handle_audio_level(&track_id, level)?,
            },
            ConferenceEvent::ScreenShare { participants } => {
                self.session.set_screen_share_participants(participants)?;
            }
            ConferenceEvent::TileView { enabled } => {
                self.session.set_tile_view_enabled(enabled)?;
            }
            ConferenceEvent::DominantSpeaker { participant_id } => {
                self.session
                    .handle_dominant_speaker_changed(participant_id.as_ref())?;
            }
            ConferenceEvent::Override { enabled, value } => {
                self.session.set_override(enabled, value)?;
            }
            ConferenceEvent::ToggleUnlimited => {
                self.session.toggle_unlimited()?;
            }
            ConferenceEvent::ChannelLastN { value } => {
                self.session.set_channel_last_n(value)?;
            }
            ConferenceEvent::VideoQuality { height } => {
                let quality = VideoQualityLevel::from_height(height).unwrap_or_else(|| {
                    warn!("unknown video quality height {}, not scaling last-N", height);
                    VideoQualityLevel::High
                });
                self.session.set_preferred_video_quality(quality)?;
            }
            ConferenceEvent::WaitMs { ms } => {
                tokio::time::sleep(Duration::from_millis(ms).into()).await;
            }
        }
        Ok(())
    }

    pub fn track_count(&self) -> usize {
        self.track_by_id.len()
    }
}
