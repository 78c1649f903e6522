//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#[macro_use]
extern crate log;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use lastn_client::{
    config,
    media::{LastN, MediaSession, MediaSessionError},
    replay::{self, Replayer},
    session::ConferenceSession,
};
use once_cell::sync::Lazy;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    runtime,
    signal::unix::{signal, SignalKind},
};

// Load the config and treat it as a read-only static value.
static CONFIG: Lazy<config::Config> = Lazy::new(config::Config::parse);

#[rustfmt::skip]
fn print_config(config: &'static config::Config) {
    info!("config:");
    info!("  {:38}{}", "channel_last_n:", LastN::from_wire(config.channel_last_n));
    info!("  {:38}{}", "local_participant_id:", config.local_participant_id);
    info!("  {:38}{}", "events_file:",
          match &config.events_file {
              Some(path) => path.display().to_string(),
              None => "stdin".to_string(),
          });
    info!("  {:38}{}", "max_speakers:", config.speakers.max_speakers);
    info!("  {:38}{}", "audio_level_threshold:", config.speakers.audio_level_threshold);
    info!("  {:38}{}", "speaker_expiration_ms:", config.speakers.expiration_ms);
    info!("  {:38}{}", "speaker_sweep_interval_ms:", config.speakers.sweep_interval_ms);
}

/// Stands in for the media engine: every requested last-N is logged.
struct LoggingMediaSession;

impl MediaSession for LoggingMediaSession {
    fn set_last_n(&mut self, last_n: LastN) -> Result<(), MediaSessionError> {
        info!("media session: set_last_n({})", last_n);
        Ok(())
    }
}

/// Waits for a SIGINT or SIGTERM signal and returns.
async fn wait_for_signal() {
    tokio::select!(
        _ = async {
            if let Ok(mut stream) = signal(SignalKind::interrupt()) {
                stream.recv().await;
            }
        } => {
            info!("terminating by signal: SIGINT");
        },
        _ = async {
            if let Ok(mut stream) = signal(SignalKind::terminate()) {
                stream.recv().await;
            }
        } => {
            info!("terminating by signal: SIGTERM");
        },
    )
}

async fn open_events(config: &'static config::Config) -> Result<Box<dyn AsyncBufRead + Unpin>> {
    Ok(match &config.events_file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open events file {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

async fn run(config: &'static config::Config) -> Result<()> {
    let session = ConferenceSession::join(config, Box::new(LoggingMediaSession))?;

    let mut speaker_queue_updates = session.speaker_queue_updates();
    tokio::spawn(async move {
        while speaker_queue_updates.changed().await.is_ok() {
            let update = speaker_queue_updates.borrow_and_update().clone();
            info!("speakers ({}): {:?}", update.count, update.speakers);
        }
    });

    let signal = wait_for_signal();
    tokio::pin!(signal);

    let mut replayer = Replayer::new(&session);
    let mut lines = open_events(config).await?.lines();
    let mut line_number = 0;
    let mut interrupted = false;
    loop {
        let line = tokio::select!(
            _ = &mut signal => {
                interrupted = true;
                break;
            },
            line = lines.next_line() => line?,
        );
        let Some(line) = line else {
            break;
        };
        line_number += 1;
        match replay::parse_line(&line) {
            Ok(Some(event)) => replayer.apply(event).await?,
            Ok(None) => {}
            Err(err) => warn!("skipping line {}: {}", line_number, err),
        }
    }

    if !interrupted {
        info!("events done, waiting for the speaker queue to drain");
        let mut updates = session.speaker_queue_updates();
        while updates.borrow_and_update().count > 0 {
            tokio::select!(
                _ = &mut signal => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            );
        }
    }

    let final_last_n = session.current_last_n();
    session.leave();
    info!(
        "final last-N: {}",
        final_last_n.map_or_else(|| "unset".to_string(), |last_n| last_n.to_string())
    );
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging.
    env_logger::Builder::from_env(
        Env::default()
            .default_filter_or("lastn_client=info")
            .default_write_style_or("never"),
    )
    .format(lastn_common::format_log_line)
    .init();

    info!(
        "lastn_client: v{}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );

    // Parse the command line arguments.
    let config = &CONFIG;
    print_config(config);

    let threaded_rt = runtime::Runtime::new()?;
    threaded_rt.block_on(run(config))?;

    info!("lastn_client shutdown");
    Ok(())
}
