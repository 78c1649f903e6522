//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::fmt;

use serde::Serialize;

/// A normalized audio level as reported by a track's level meter. Higher is louder.
///
/// Only finite values in `[0.0, 1.0]` can be constructed; anything else the media engine
/// reports is treated as no level at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct AudioLevel(f64);

impl AudioLevel {
    pub const SILENT: AudioLevel = AudioLevel(0.0);
    pub const MAX: AudioLevel = AudioLevel(1.0);

    pub fn new(level: f64) -> Option<Self> {
        if level.is_finite() && (0.0..=1.0).contains(&level) {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Like [`AudioLevel::new`], for readings that may be absent altogether.
    pub fn from_reading(level: Option<f64>) -> Option<Self> {
        level.and_then(Self::new)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }

    pub fn is_at_least(self, threshold: AudioLevel) -> bool {
        self.0 >= threshold.0
    }
}

impl fmt::Display for AudioLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_normalized_levels() {
        assert_eq!(Some(0.0), AudioLevel::new(0.0).map(AudioLevel::as_f64));
        assert_eq!(Some(0.25), AudioLevel::new(0.25).map(AudioLevel::as_f64));
        assert_eq!(Some(1.0), AudioLevel::new(1.0).map(AudioLevel::as_f64));
    }

    #[test]
    fn rejects_malformed_levels() {
        assert_eq!(None, AudioLevel::new(-0.01));
        assert_eq!(None, AudioLevel::new(1.5));
        assert_eq!(None, AudioLevel::new(f64::NAN));
        assert_eq!(None, AudioLevel::new(f64::INFINITY));
        assert_eq!(None, AudioLevel::from_reading(None));
        assert_eq!(AudioLevel::new(0.5), AudioLevel::from_reading(Some(0.5)));
    }

    #[test]
    fn threshold_is_inclusive() {
        let threshold = AudioLevel::new(0.1).unwrap();
        assert!(AudioLevel::new(0.1).unwrap().is_at_least(threshold));
        assert!(AudioLevel::MAX.is_at_least(threshold));
        assert!(!AudioLevel::new(0.099).unwrap().is_at_least(threshold));
    }
}
