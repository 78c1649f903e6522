//
// Copyright 2023 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::fmt;

use serde::{Deserialize, Serialize};

/// A wrapper around String to identify a conference participant.
///
/// It comes from the conference signaling layer and is opaque to us; it is stable for the
/// lifetime of a conference session.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for ParticipantId {
    fn from(participant_id: String) -> Self {
        Self(participant_id)
    }
}

impl From<&str> for ParticipantId {
    fn from(participant_id: &str) -> Self {
        Self(participant_id.to_owned())
    }
}

impl From<ParticipantId> for String {
    fn from(value: ParticipantId) -> Self {
        value.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one media track. A participant may publish several tracks over the lifetime of
/// a session (reconnects, device switches), each with its own id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for TrackId {
    fn from(track_id: String) -> Self {
        Self(track_id)
    }
}

impl From<&str> for TrackId {
    fn from(track_id: &str) -> Self {
        Self(track_id.to_owned())
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
