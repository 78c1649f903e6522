//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The boundary with the media engine: the last-N value we push to it, and the tracks it
//! tells us about.

use std::{cmp::min, fmt};

use lastn_common::{ParticipantId, TrackId};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::sync::broadcast;

/// How many level readings a slow listener may fall behind before it starts skipping.
const LEVEL_CHANNEL_CAPACITY: usize = 64;

/// The number of remote video streams requested from the media server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum LastN {
    Unlimited,
    Limited(u32),
}

impl LastN {
    /// How "unlimited" is spelled on the wire and in configuration.
    pub const UNLIMITED_WIRE_VALUE: i64 = -1;

    /// Any negative value means unlimited.
    pub fn from_wire(value: i64) -> Self {
        if value < 0 {
            Self::Unlimited
        } else {
            Self::Limited(min(value, u32::MAX as i64) as u32)
        }
    }

    pub fn as_wire(self) -> i64 {
        match self {
            Self::Unlimited => Self::UNLIMITED_WIRE_VALUE,
            Self::Limited(n) => n as i64,
        }
    }

    pub fn is_unlimited(self) -> bool {
        self == Self::Unlimited
    }
}

impl From<i64> for LastN {
    fn from(value: i64) -> Self {
        Self::from_wire(value)
    }
}

impl From<LastN> for i64 {
    fn from(value: LastN) -> Self {
        value.as_wire()
    }
}

impl fmt::Display for LastN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

#[derive(Error, Debug)]
pub enum MediaSessionError {
    #[error("media session is not ready")]
    NotReady,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The media engine's conference session, as far as stream admission is concerned.
///
/// Redundant values are expected; coalescing them is up to the implementation.
#[cfg_attr(test, automock)]
pub trait MediaSession: Send {
    fn set_last_n(&mut self, last_n: LastN) -> Result<(), MediaSessionError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// A media track as announced by the media engine.
///
/// Level readings are raw: the meter may report NaN or nothing at all, and it is up to the
/// listener to decide what counts as activity.
#[derive(Clone)]
pub struct TrackHandle {
    pub track_id: TrackId,
    pub participant_id: ParticipantId,
    pub kind: TrackKind,
    pub is_local: bool,
    levels: broadcast::Sender<Option<f64>>,
}

impl TrackHandle {
    pub fn new(
        track_id: TrackId,
        participant_id: ParticipantId,
        kind: TrackKind,
        is_local: bool,
    ) -> Self {
        let (levels, _) = broadcast::channel(LEVEL_CHANNEL_CAPACITY);
        Self {
            track_id,
            participant_id,
            kind,
            is_local,
            levels,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind == TrackKind::Audio
    }

    /// Delivers a level reading to every listener. Returns how many listeners got it.
    pub fn emit_audio_level(&self, level: Option<f64>) -> usize {
        self.levels.send(level).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.levels.receiver_count()
    }

    pub(crate) fn listen(&self) -> broadcast::Receiver<Option<f64>> {
        self.levels.subscribe()
    }
}

impl fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackHandle")
            .field("track_id", &self.track_id)
            .field("participant_id", &self.participant_id)
            .field("kind", &self.kind)
            .field("is_local", &self.is_local)
            .finish()
    }
}
