//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The per-conference owner of the speaker tracker and the admission controller.
//!
//! A [`ConferenceSession`] is created when the local client joins a conference and torn down
//! with [`ConferenceSession::leave`] (or by dropping it). All of its state sits behind one
//! lock, and every event (a track listener delivering a level, a sweep tick, a call from the
//! embedding application) is applied under that lock, one at a time.
//!
//! Two kinds of background tasks exist while a session is open:
//! - one listener per subscribed audio track, forwarding level readings to the tracker;
//! - at most one sweep timer, running only while the tracker has speakers to expire.

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use lastn_common::{Duration, Instant, ParticipantId, TrackId};
use log::*;
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinHandle,
};

use crate::{
    admission::{StreamAdmissionController, VideoQualityLevel},
    config,
    media::{LastN, MediaSession, TrackHandle},
    speakers::{SpeakerActivityTracker, SpeakerQueueUpdate, TrackerSettings},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("conference session has been left")]
    Closed,
    #[error("conference session needs a tokio runtime")]
    NoRuntime,
}

struct TrackListener {
    id: u64,
    task: JoinHandle<()>,
}

struct SessionState {
    tracker: SpeakerActivityTracker,
    controller: StreamAdmissionController,
    runtime: Handle,
    /// Set while the tracker has speakers to expire.
    sweep_task: Option<JoinHandle<()>>,
    listener_by_track: HashMap<TrackId, TrackListener>,
    next_listener_id: u64,
    speaker_queue_tx: watch::Sender<SpeakerQueueUpdate>,
    last_n_tx: watch::Sender<Option<LastN>>,
    closed: bool,
}

impl SessionState {
    fn publish_last_n(&self, last_n: LastN) {
        self.last_n_tx.send_replace(Some(last_n));
    }

    /// Publishes the new queue, then recomputes last-N. Watchers are updated even if the
    /// media session panics during the push.
    fn apply_speaker_update(&mut self, update: SpeakerQueueUpdate) {
        self.speaker_queue_tx.send_replace(update.clone());
        let controller = &mut self.controller;
        let _ = isolate("last-N push", || {
            controller.handle_speaker_queue_changed(&update)
        });
        // The target is recorded before it is pushed.
        if let Some(last_n) = self.controller.target_last_n() {
            self.publish_last_n(last_n);
        }
    }

    /// Forgets a listener whose track went away, unless it was already replaced.
    fn forget_track_listener(&mut self, track_id: &TrackId, listener_id: u64) {
        if self
            .listener_by_track
            .get(track_id)
            .is_some_and(|listener| listener.id == listener_id)
        {
            self.listener_by_track.remove(track_id);
            self.tracker.unsubscribe(track_id);
        }
    }

    /// Runs one sweep tick. Returns whether the sweep should keep running.
    fn sweep(&mut self, now: Instant) -> bool {
        if let Some(update) = self.tracker.expire(now) {
            self.apply_speaker_update(update);
        }
        self.tracker.needs_sweep()
    }

    fn ensure_sweep_running(&mut self, shared: &Arc<Mutex<SessionState>>) {
        if self
            .sweep_task
            .as_ref()
            .is_some_and(|sweep_task| !sweep_task.is_finished())
        {
            return;
        }
        let sweep_interval = self.tracker.settings().sweep_interval;
        debug!("starting speaker sweep every {:?}", sweep_interval);
        self.sweep_task = Some(
            self.runtime
                .spawn(run_speaker_sweep(Arc::downgrade(shared), sweep_interval)),
        );
    }
}

/// Runs `f`, logging instead of unwinding if it panics. Returns None if it panicked.
fn isolate<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!("{} panicked; continuing", what);
            None
        }
    }
}

fn ingest_track_level(shared: &Arc<Mutex<SessionState>>, track_id: &TrackId, reading: Option<f64>) {
    let mut state = shared.lock();
    if state.closed {
        return;
    }
    if let Some(update) = state
        .tracker
        .handle_audio_level(track_id, reading, Instant::now())
    {
        state.ensure_sweep_running(shared);
        state.apply_speaker_update(update);
    }
}

async fn run_speaker_sweep(state: Weak<Mutex<SessionState>>, sweep_interval: Duration) {
    loop {
        // Use sleep() instead of interval() so that we never wait *less* than one interval
        // between ticks.
        tokio::time::sleep(sweep_interval.into()).await;

        let Some(shared) = state.upgrade() else {
            return;
        };
        let mut state = shared.lock();
        if state.closed {
            return;
        }
        // A tick that panics is treated as having more to do; the next tick retries.
        let keep_running = isolate("speaker sweep tick", || state.sweep(Instant::now()))
            .unwrap_or(true);
        if !keep_running {
            debug!("speaker queue empty, stopping sweep");
            state.sweep_task = None;
            return;
        }
    }
}

async fn run_track_listener(
    state: Weak<Mutex<SessionState>>,
    track_id: TrackId,
    listener_id: u64,
    mut levels: broadcast::Receiver<Option<f64>>,
) {
    loop {
        match levels.recv().await {
            Ok(reading) => {
                let Some(shared) = state.upgrade() else {
                    return;
                };
                let _ = isolate("audio level ingestion", || {
                    ingest_track_level(&shared, &track_id, reading)
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!("listener for track {} skipped {} levels", track_id, skipped);
            }
            Err(RecvError::Closed) => {
                debug!("track {} stopped sending levels", track_id);
                if let Some(shared) = state.upgrade() {
                    shared.lock().forget_track_listener(&track_id, listener_id);
                }
                return;
            }
        }
    }
}

/// Stream admission for one conference, from join to leave.
pub struct ConferenceSession {
    local_participant_id: ParticipantId,
    state: Arc<Mutex<SessionState>>,
}

impl ConferenceSession {
    /// Joins with the configured channel last-N and pushes it as the initial target.
    /// Must be called from within a tokio runtime, which will run the session's tasks.
    pub fn join(
        config: &'static config::Config,
        media_session: Box<dyn MediaSession>,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let local_participant_id = ParticipantId::from(config.local_participant_id.as_str());
        let tracker = SpeakerActivityTracker::new(TrackerSettings::from(&config.speakers));
        let mut controller =
            StreamAdmissionController::new(LastN::from_wire(config.channel_last_n), media_session);
        let initial_last_n = controller.recompute();

        info!(
            "joined conference as {} with last-N {}",
            local_participant_id, initial_last_n
        );

        let (speaker_queue_tx, _) = watch::channel(SpeakerQueueUpdate::default());
        let (last_n_tx, _) = watch::channel(Some(initial_last_n));
        Ok(Self {
            local_participant_id,
            state: Arc::new(Mutex::new(SessionState {
                tracker,
                controller,
                runtime,
                sweep_task: None,
                listener_by_track: HashMap::new(),
                next_listener_id: 0,
                speaker_queue_tx,
                last_n_tx,
                closed: false,
            })),
        })
    }

    pub fn local_participant_id(&self) -> &ParticipantId {
        &self.local_participant_id
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        let state = self.state.lock();
        if state.closed {
            Err(SessionError::Closed)
        } else {
            Ok(state)
        }
    }

    fn update_controller(
        &self,
        update: impl FnOnce(&mut StreamAdmissionController) -> LastN,
    ) -> Result<LastN, SessionError> {
        let mut state = self.lock_open()?;
        let last_n = update(&mut state.controller);
        state.publish_last_n(last_n);
        Ok(last_n)
    }

    /// Starts listening to a remote audio track. Video tracks and the local participant's
    /// tracks are ignored. Returns whether a new listener was started; adding a track that
    /// is already being listened to does nothing.
    pub fn handle_track_added(&self, track: &TrackHandle) -> Result<bool, SessionError> {
        if !track.is_audio() {
            trace!("ignoring {} track {}", track.kind, track.track_id);
            return Ok(false);
        }
        if track.is_local || track.participant_id == self.local_participant_id {
            trace!("ignoring local audio track {}", track.track_id);
            return Ok(false);
        }

        let mut state = self.lock_open()?;
        if !state
            .tracker
            .subscribe(track.track_id.clone(), track.participant_id.clone())
        {
            return Ok(false);
        }
        let listener_id = state.next_listener_id;
        state.next_listener_id += 1;
        let task = state.runtime.spawn(run_track_listener(
            Arc::downgrade(&self.state),
            track.track_id.clone(),
            listener_id,
            track.listen(),
        ));
        state.listener_by_track.insert(
            track.track_id.clone(),
            TrackListener {
                id: listener_id,
                task,
            },
        );
        Ok(true)
    }

    /// Stops listening to a track. Speakers it already produced stay until they expire.
    /// Returns whether the track was being listened to.
    pub fn handle_track_removed(&self, track_id: &TrackId) -> Result<bool, SessionError> {
        let mut state = self.lock_open()?;
        if let Some(listener) = state.listener_by_track.remove(track_id) {
            listener.task.abort();
        }
        Ok(state.tracker.unsubscribe(track_id))
    }

    /// Delivers a level reading for a subscribed track directly, for media engines that
    /// report levels through a callback rather than the track handle.
    pub fn handle_audio_level(
        &self,
        track_id: &TrackId,
        reading: Option<f64>,
    ) -> Result<(), SessionError> {
        if self.lock_open().is_err() {
            return Err(SessionError::Closed);
        }
        ingest_track_level(&self.state, track_id, reading);
        Ok(())
    }

    pub fn set_screen_share_participants(
        &self,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> Result<LastN, SessionError> {
        self.update_controller(|controller| controller.set_screen_share_participants(participants))
    }

    pub fn set_tile_view_enabled(&self, enabled: bool) -> Result<LastN, SessionError> {
        self.update_controller(|controller| controller.set_tile_view_enabled(enabled))
    }

    pub fn set_local_is_dominant_speaker(&self, dominant: bool) -> Result<LastN, SessionError> {
        self.update_controller(|controller| controller.set_local_is_dominant_speaker(dominant))
    }

    /// The media engine named a new dominant speaker, or nobody.
    pub fn handle_dominant_speaker_changed(
        &self,
        speaker: Option<&ParticipantId>,
    ) -> Result<LastN, SessionError> {
        let dominant = speaker == Some(&self.local_participant_id);
        self.set_local_is_dominant_speaker(dominant)
    }

    pub fn set_channel_last_n(&self, channel_last_n: LastN) -> Result<LastN, SessionError> {
        self.update_controller(|controller| controller.set_channel_last_n(channel_last_n))
    }

    pub fn set_preferred_video_quality(
        &self,
        quality: VideoQualityLevel,
    ) -> Result<LastN, SessionError> {
        self.update_controller(|controller| controller.set_preferred_video_quality(quality))
    }

    pub fn set_override(&self, enabled: bool, value: LastN) -> Result<LastN, SessionError> {
        self.update_controller(|controller| controller.set_override(enabled, value))
    }

    pub fn toggle_unlimited(&self) -> Result<LastN, SessionError> {
        self.update_controller(|controller| controller.toggle_unlimited())
    }

    pub fn speaker_count(&self) -> usize {
        self.state.lock().tracker.speaker_count()
    }

    pub fn active_speaker_ids(&self) -> Vec<ParticipantId> {
        self.state.lock().tracker.active_speaker_ids()
    }

    pub fn current_last_n(&self) -> Option<LastN> {
        self.state.lock().controller.target_last_n()
    }

    pub fn is_sweep_running(&self) -> bool {
        self.state
            .lock()
            .sweep_task
            .as_ref()
            .is_some_and(|sweep_task| !sweep_task.is_finished())
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listener_by_track.len()
    }

    /// For status indicators. Only the latest queue is kept.
    pub fn speaker_queue_updates(&self) -> watch::Receiver<SpeakerQueueUpdate> {
        self.state.lock().speaker_queue_tx.subscribe()
    }

    /// For status indicators. Only the latest value is kept.
    pub fn last_n_updates(&self) -> watch::Receiver<Option<LastN>> {
        self.state.lock().last_n_tx.subscribe()
    }

    /// Stops the sweep timer and every track listener and forgets all speakers.
    /// Calling it again does nothing.
    pub fn leave(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(sweep_task) = state.sweep_task.take() {
            sweep_task.abort();
        }
        let listener_count = state.listener_by_track.len();
        for (_, listener) in state.listener_by_track.drain() {
            listener.task.abort();
        }
        if let Some(update) = state.tracker.clear() {
            state.speaker_queue_tx.send_replace(update);
        }
        info!(
            "left conference as {}, stopped {} track listeners",
            self.local_participant_id, listener_count
        );
    }
}

impl Drop for ConferenceSession {
    fn drop(&mut self) {
        self.leave();
    }
}
