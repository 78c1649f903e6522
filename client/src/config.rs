//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Configuration options for the last-N client.

use std::path::PathBuf;

use clap;

/// General configuration options, set by command line arguments or
/// falls back to default values.
#[derive(Default, clap::Parser, Debug, Clone)]
#[clap(name = "lastn_client")]
pub struct Config {
    /// The configured channel last-N: how many remote video streams to request
    /// when nothing more specific applies. -1 means unlimited.
    #[clap(long, default_value = "4", allow_hyphen_values = true)]
    pub channel_last_n: i64,

    /// The id the local participant is known by in the conference. Audio from
    /// this participant never counts as a remote speaker.
    #[clap(long, default_value = "local")]
    pub local_participant_id: String,

    /// File of JSON-lines conference events to replay. Reads stdin if not set.
    #[clap(long)]
    pub events_file: Option<PathBuf>,

    #[clap(flatten)]
    pub speakers: SpeakerTrackerOptions,
}

#[derive(clap::Parser, Clone, Debug, Default)]
pub struct SpeakerTrackerOptions {
    /// Maximum number of recent speakers tracked at once.
    #[clap(long = "max-speakers", default_value = "4")]
    pub max_speakers: usize,

    /// Normalized audio level (0.0 to 1.0) at or above which a reading counts
    /// as speaking.
    #[clap(long = "audio-level-threshold", default_value = "0.1")]
    pub audio_level_threshold: f64,

    /// How long a speaker stays tracked after their last qualifying reading (ms).
    #[clap(long = "speaker-expiration-ms", default_value = "15000")]
    pub expiration_ms: u64,

    /// Period of the sweep that drops expired speakers (ms).
    #[clap(long = "speaker-sweep-interval-ms", default_value = "1000")]
    pub sweep_interval_ms: u64,
}

#[cfg(test)]
pub(crate) fn default_test_config() -> Config {
    Config {
        channel_last_n: 4,
        local_participant_id: "local".to_string(),
        events_file: None,
        speakers: SpeakerTrackerOptions {
            max_speakers: 4,
            audio_level_threshold: 0.1,
            expiration_ms: 15000,
            sweep_interval_ms: 1000,
        },
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn command_line_defaults() {
        let config = Config::parse_from(["lastn_client"]);
        assert_eq!(4, config.channel_last_n);
        assert_eq!("local", config.local_participant_id);
        assert_eq!(None, config.events_file);
        assert_eq!(4, config.speakers.max_speakers);
        assert_eq!(0.1, config.speakers.audio_level_threshold);
        assert_eq!(15000, config.speakers.expiration_ms);
        assert_eq!(1000, config.speakers.sweep_interval_ms);
    }

    #[test]
    fn unlimited_channel_last_n() {
        let config = Config::parse_from(["lastn_client", "--channel-last-n", "-1"]);
        assert_eq!(-1, config.channel_last_n);
    }
}
