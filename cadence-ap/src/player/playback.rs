//! Playback loop
//!
//! Selecting, Resolving, Playing, Finalizing, then back to Selecting. The loop goes Idle
//! when the queue is empty with autoplay off, when discovery has nothing, or when the
//! transport is gone. Transient failures are counted and never end the loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use cadence_common::models::{LibrarySource, NewSong};
use cadence_common::store::NewHistoryEntry;
use cadence_common::time;
use cadence_common::{QueueItem, StreamSource};

use super::{ChannelPlayer, ChannelSettings, CurrentSong, PlayerPhase};
use crate::transport::{Completion, PlaybackOutcome, VoiceTransport};

/// Result of one loop iteration
enum Cycle {
    Continue,
    Idle(IdleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleReason {
    QueueDrained,
    NothingDiscovered,
    Disconnected,
}

impl IdleReason {
    fn as_str(&self) -> &'static str {
        match self {
            IdleReason::QueueDrained => "queue empty and autoplay disabled",
            IdleReason::NothingDiscovered => "discovery found nothing to play",
            IdleReason::Disconnected => "transport disconnected",
        }
    }
}

/// Result of asking discovery for a song
pub(crate) enum Discovery {
    Found(QueueItem),
    Exhausted,
    TimedOut,
    /// Every pick exceeded the channel's length limit
    TooLong,
}

impl Discovery {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Discovery::Found(_) => "found",
            Discovery::Exhausted => "exhausted",
            Discovery::TimedOut => "timed_out",
            Discovery::TooLong => "too_long",
        }
    }
}

impl ChannelPlayer {
    pub(crate) async fn run_loop(self: Arc<Self>) {
        info!(channel_id = %self.channel, "Playback loop started");
        self.begin_session().await;

        loop {
            let reason = match self.cycle().await {
                Cycle::Continue => continue,
                Cycle::Idle(reason) => reason,
            };

            // An enqueue can land between the empty check and here
            if reason == IdleReason::QueueDrained && !self.queue.is_empty() {
                continue;
            }

            info!(channel_id = %self.channel, reason = reason.as_str(), "Playback loop going idle");
            break;
        }

        let mut state = self.state.write().await;
        state.playing = false;
        state.phase = PlayerPhase::Idle;
        state.current = None;
        state.last_activity = time::now();
    }

    async fn begin_session(&self) {
        {
            let mut state = self.state.write().await;
            state.playing = true;
            state.phase = PlayerPhase::Selecting;
            state.consecutive_failures = 0;
            state.last_health_check = time::now();
            state.last_activity = time::now();
            if state.session.is_some() {
                return;
            }
        }

        let store = &self.deps.store;
        if let Err(e) = store.ensure_channel(self.channel).await {
            error!(channel_id = %self.channel, error = %e, "Failed to register channel");
        }
        match store.create_session(self.channel).await {
            Ok(session) => {
                self.state.write().await.session = Some(session);
                info!(channel_id = %self.channel, session_id = %session, "Session started");
            }
            Err(e) => {
                error!(channel_id = %self.channel, error = %e, "Failed to create session; plays will not reference one")
            }
        }
    }

    async fn cycle(self: &Arc<Self>) -> Cycle {
        self.touch_health().await;

        let Some(transport) = self.connected_transport().await else {
            return Cycle::Idle(IdleReason::Disconnected);
        };

        self.set_phase(PlayerPhase::Selecting).await;

        let item = match self.queue.get_nowait() {
            Ok(item) => item,
            Err(_) => {
                let autoplay = self.state.read().await.autoplay;
                if !autoplay {
                    return Cycle::Idle(IdleReason::QueueDrained);
                }

                let prefetched = self.state.write().await.prefetched.take();
                match prefetched {
                    Some(item) => {
                        debug!(channel_id = %self.channel, content_id = %item.content_id, "Using prefetched discovery");
                        item
                    }
                    None => {
                        let settings = self.settings().await;
                        self.touch_health().await;
                        match self.discover(&settings, &transport).await {
                            Discovery::Found(item) => item,
                            Discovery::Exhausted => return Cycle::Idle(IdleReason::NothingDiscovered),
                            Discovery::TimedOut | Discovery::TooLong => {
                                self.record_failure().await;
                                return Cycle::Continue;
                            }
                        }
                    }
                }
            }
        };

        self.play_item(item, &transport).await
    }

    pub(crate) async fn settings(&self) -> ChannelSettings {
        ChannelSettings::load(
            self.deps.store.as_ref(),
            self.channel,
            &self.deps.player,
            &self.deps.discovery_config,
        )
        .await
    }

    /// Ask discovery for the next song, re-rolling picks over the length limit
    pub(crate) async fn discover(
        &self,
        settings: &ChannelSettings,
        transport: &Arc<dyn VoiceTransport>,
    ) -> Discovery {
        let limit = self.deps.player.discovery_timeout();

        let participants = match timeout(limit, transport.listeners()).await {
            Ok(Ok(listeners)) => listeners,
            Ok(Err(e)) => {
                warn!(channel_id = %self.channel, error = %e, "Failed to list participants");
                Vec::new()
            }
            Err(_) => {
                warn!(channel_id = %self.channel, "Listing participants timed out");
                Vec::new()
            }
        };

        let mut exclude: HashSet<String> = self.queue.content_ids().into_iter().collect();
        {
            let state = self.state.read().await;
            if let Some(current) = &state.current {
                exclude.insert(current.item.content_id.clone());
            }
            if let Some(prefetched) = &state.prefetched {
                exclude.insert(prefetched.content_id.clone());
            }
        }

        for attempt in 0..=self.deps.player.max_duration_rerolls {
            let request = settings
                .discovery_request(self.channel, participants.clone())
                .excluding(exclude.iter().cloned());

            let start = Instant::now();
            let song = match timeout(limit, self.deps.discovery.next_song(request)).await {
                Ok(Some(song)) => song,
                Ok(None) => {
                    info!(channel_id = %self.channel, "Discovery returned no selection");
                    return Discovery::Exhausted;
                }
                Err(_) => {
                    warn!(
                        channel_id = %self.channel,
                        timeout_ms = limit.as_millis() as u64,
                        "Discovery timed out"
                    );
                    return Discovery::TimedOut;
                }
            };

            if settings.allows_duration(song.duration_seconds) {
                debug!(
                    channel_id = %self.channel,
                    content_id = %song.content_id,
                    source = %song.source,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Discovery selected a song"
                );
                return Discovery::Found(song.into_queue_item());
            }

            debug!(
                channel_id = %self.channel,
                content_id = %song.content_id,
                duration_seconds = ?song.duration_seconds,
                attempt,
                "Discovery pick exceeds the channel length limit, re-rolling"
            );
            exclude.insert(song.content_id);
        }

        warn!(channel_id = %self.channel, "Every discovery pick exceeded the channel length limit");
        Discovery::TooLong
    }

    /// Resolve a stream under the fetch timeout; failures are logged and yield `None`
    pub(crate) async fn resolve_stream(&self, content_id: &str) -> Option<StreamSource> {
        let limit = self.deps.player.stream_fetch_timeout();
        let start = Instant::now();

        match timeout(limit, self.deps.resolver.resolve(content_id)).await {
            Ok(Ok(Some(stream))) => {
                debug!(
                    channel_id = %self.channel,
                    content_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Stream resolved"
                );
                Some(stream)
            }
            Ok(Ok(None)) => {
                warn!(channel_id = %self.channel, content_id, "No playable stream");
                None
            }
            Ok(Err(e)) => {
                warn!(channel_id = %self.channel, content_id, error = %e, "Stream resolution failed");
                None
            }
            Err(_) => {
                warn!(
                    channel_id = %self.channel,
                    content_id,
                    timeout_ms = limit.as_millis() as u64,
                    "Stream resolution timed out"
                );
                None
            }
        }
    }

    /// Count a transient failure; back off once the threshold is reached
    async fn record_failure(&self) {
        let failures = {
            let mut state = self.state.write().await;
            state.consecutive_failures += 1;
            state.consecutive_failures
        };

        if failures < self.deps.player.max_consecutive_failures.max(1) {
            debug!(channel_id = %self.channel, failures, "Transient playback failure");
            return;
        }

        let backoff = self.deps.player.failure_backoff();
        warn!(
            channel_id = %self.channel,
            failures,
            backoff_ms = backoff.as_millis() as u64,
            "Too many consecutive failures, backing off"
        );
        tokio::time::sleep(backoff).await;

        let mut state = self.state.write().await;
        state.consecutive_failures = 0;
        state.last_health_check = time::now();
    }

    async fn play_item(self: &Arc<Self>, mut item: QueueItem, transport: &Arc<dyn VoiceTransport>) -> Cycle {
        self.set_phase(PlayerPhase::Resolving).await;
        self.touch_health().await;

        let stream = match item.stream.clone() {
            Some(stream) => stream,
            None => match self.resolve_stream(&item.content_id).await {
                Some(stream) => stream,
                None => {
                    self.record_failure().await;
                    return Cycle::Continue;
                }
            },
        };
        item.stream = Some(stream.clone());

        self.record_start(&mut item).await;

        self.set_phase(PlayerPhase::Playing).await;
        let completion = match transport.play(&stream).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(channel_id = %self.channel, content_id = %item.content_id, error = %e, "Transport refused to play");
                self.finalize(&item, &PlaybackOutcome::Failed(e.to_string())).await;
                self.record_failure().await;
                return Cycle::Continue;
            }
        };

        let started = Instant::now();
        {
            let mut state = self.state.write().await;
            state.current = Some(CurrentSong::new(item.clone()));
            state.consecutive_failures = 0;
            state.last_activity = time::now();
        }
        info!(
            channel_id = %self.channel,
            content_id = %item.content_id,
            title = %item.title,
            artist = %item.artist,
            source = %item.source,
            "Now playing"
        );

        self.schedule_prefetch();
        self.schedule_enrichment(item.clone());
        self.render_now_playing().await;

        let wait = self.deps.player.playback_wait(item.duration_seconds);
        let outcome = self.await_completion(completion, transport, wait).await;

        self.set_phase(PlayerPhase::Finalizing).await;
        debug!(
            channel_id = %self.channel,
            content_id = %item.content_id,
            outcome = ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Playback ended"
        );
        self.finalize(&item, &outcome).await;
        Cycle::Continue
    }

    /// Persist the song, its history row and the requester's library entry
    ///
    /// Failures are logged; playback continues without them.
    async fn record_start(&self, item: &mut QueueItem) {
        let store = &self.deps.store;

        if let Some(user) = item.target_participant() {
            if let Err(e) = store.ensure_user(user).await {
                error!(channel_id = %self.channel, user_id = %user, error = %e, "Failed to register participant");
            }
        }

        let song = match store.upsert_song(&NewSong::from_item(item)).await {
            Ok(song) => song,
            Err(e) => {
                error!(channel_id = %self.channel, content_id = %item.content_id, error = %e, "Failed to persist song");
                return;
            }
        };

        item.song_id = Some(song.id);
        if item.duration_seconds.is_none() {
            item.duration_seconds = song.duration_seconds;
        }
        if item.year.is_none() {
            item.year = song.year;
        }
        if item.genre.is_none() {
            item.genre = song.genres.first().cloned();
        }

        let session_id = self.state.read().await.session;
        let entry = NewHistoryEntry {
            channel_id: self.channel,
            session_id,
            song_id: song.id,
            source: item.source,
            reason: item.reason.clone(),
            for_user: item.target_participant(),
        };
        match store.log_track(&entry).await {
            Ok(history_id) => item.history_id = Some(history_id),
            Err(e) => {
                error!(channel_id = %self.channel, content_id = %item.content_id, error = %e, "Failed to log play")
            }
        }

        if item.is_user_request() {
            if let Some(requester) = item.requester {
                if let Err(e) = store.add_to_library(requester, song.id, LibrarySource::Request).await {
                    error!(channel_id = %self.channel, user_id = %requester, error = %e, "Failed to add request to library");
                }
            }
        }
    }

    /// Wait for the completion signal, force-stopping the transport on timeout
    ///
    /// Time spent paused does not count against the wait.
    async fn await_completion(
        &self,
        mut completion: Completion,
        transport: &Arc<dyn VoiceTransport>,
        wait: Duration,
    ) -> PlaybackOutcome {
        let mut deadline = Instant::now() + wait;
        let mut credited = Duration::ZERO;
        let period = self.deps.heartbeat;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = timeout_at(deadline, &mut completion) => match result {
                    Ok(Ok(outcome)) => return outcome,
                    Ok(Err(_)) => {
                        debug!(channel_id = %self.channel, "Completion signal dropped");
                        return PlaybackOutcome::Stopped;
                    }
                    Err(_) => {}
                },
                _ = heartbeat.tick() => {
                    // A long song is not a stuck loop
                    self.touch_health().await;
                    continue;
                }
            }

            let (paused, paused_total) = match self.state.read().await.current.as_ref() {
                Some(current) => (current.is_paused(), current.paused_total),
                None => (false, Duration::ZERO),
            };

            if paused {
                self.touch_health().await;
                deadline = Instant::now() + wait;
                continue;
            }
            if paused_total > credited {
                deadline += paused_total - credited;
                credited = paused_total;
                continue;
            }

            warn!(
                channel_id = %self.channel,
                wait_ms = wait.as_millis() as u64,
                "Playback completion timed out, forcing stop"
            );
            if let Err(e) = transport.stop().await {
                warn!(channel_id = %self.channel, error = %e, "Forced stop failed");
            }
            return PlaybackOutcome::TimedOut;
        }
    }

    async fn finalize(&self, item: &QueueItem, outcome: &PlaybackOutcome) {
        if let Some(history_id) = item.history_id {
            if let Err(e) = self
                .deps
                .store
                .mark_completed(history_id, outcome.is_completed())
                .await
            {
                error!(channel_id = %self.channel, history_id, error = %e, "Failed to mark play completion");
            }
        }

        let mut state = self.state.write().await;
        state.current = None;
        state.last_activity = time::now();
    }
}
