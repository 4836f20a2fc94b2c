//! Detached per-channel tasks
//!
//! Prefetch, enrichment and queue maintenance never block the playback loop. Each task
//! handles its own errors and only touches `current` after checking it is still the
//! item it was working on.

use std::sync::Arc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use cadence_common::QueueItem;

use super::playback::Discovery;
use super::{is_running, ChannelPlayer};
use crate::transport::Enrichment;

impl ChannelPlayer {
    /// Resolve the next item ahead of time, unless a prefetch is already running
    pub(crate) fn schedule_prefetch(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        if is_running(&tasks.prefetch) {
            return;
        }
        let player = Arc::clone(self);
        tasks.prefetch = Some(self.spawn_background("prefetch", player.prefetch()));
    }

    async fn prefetch(self: Arc<Self>) {
        let (autoplay, pre_buffer, has_prefetched) = {
            let state = self.state.read().await;
            (state.autoplay, state.pre_buffer, state.prefetched.is_some())
        };

        if !self.queue.is_empty() {
            if pre_buffer {
                self.pre_buffer_head().await;
            }
            return;
        }

        if !autoplay || has_prefetched {
            return;
        }
        let Some(transport) = self.connected_transport().await else {
            return;
        };

        let settings = self.settings().await;
        let mut item = match self.discover(&settings, &transport).await {
            Discovery::Found(item) => item,
            other => {
                debug!(channel_id = %self.channel, outcome = other.as_str(), "Prefetch found nothing");
                return;
            }
        };

        // Unresolved picks are still useful; the loop resolves them itself
        item.stream = self.resolve_stream(&item.content_id).await;

        let mut state = self.state.write().await;
        if state.autoplay && state.prefetched.is_none() {
            info!(
                channel_id = %self.channel,
                content_id = %item.content_id,
                resolved = item.stream.is_some(),
                "Prefetched next discovery"
            );
            state.prefetched = Some(item);
        }
    }

    /// Resolve the stream of the item at the head of the queue
    async fn pre_buffer_head(&self) {
        let Some(next) = self.queue.peek_many(1).into_iter().next() else {
            return;
        };
        if next.stream.is_some() {
            return;
        }

        let Some(stream) = self.resolve_stream(&next.content_id).await else {
            return;
        };

        let stored = self.queue.update(&next.content_id, |item| {
            if item.stream.is_none() {
                item.stream = Some(stream);
            }
        });
        if stored {
            debug!(channel_id = %self.channel, content_id = %next.content_id, "Pre-buffered next item");
        } else {
            debug!(channel_id = %self.channel, content_id = %next.content_id, "Pre-buffered item left the queue");
        }
    }

    /// Fetch richer metadata for the song that just started
    pub(crate) fn schedule_enrichment(self: &Arc<Self>, item: QueueItem) {
        if self.deps.enricher.is_none() {
            return;
        }
        let mut tasks = self.lock_tasks();
        if let Some(previous) = tasks.enrichment.take() {
            previous.abort();
        }
        let player = Arc::clone(self);
        tasks.enrichment = Some(self.spawn_background("enrichment", player.enrich(item)));
    }

    async fn enrich(self: Arc<Self>, item: QueueItem) {
        let Some(enricher) = self.deps.enricher.clone() else {
            return;
        };

        let limit = self.deps.player.enrichment_timeout();
        let enrichment = match timeout(limit, enricher.enrich(&item)).await {
            Ok(Ok(Some(enrichment))) => enrichment,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                warn!(channel_id = %self.channel, content_id = %item.content_id, error = %e, "Enrichment failed");
                return;
            }
            Err(_) => {
                debug!(channel_id = %self.channel, content_id = %item.content_id, "Enrichment timed out");
                return;
            }
        };

        self.persist_enrichment(&item, &enrichment).await;

        if !self.apply_if_current(&item, &enrichment).await {
            debug!(channel_id = %self.channel, content_id = %item.content_id, "Discarding enrichment for a song no longer playing");
            return;
        }

        tokio::time::sleep(self.deps.player.enrichment_refresh_delay()).await;
        if self.is_current(&item).await {
            self.render_now_playing().await;
        }
    }

    async fn persist_enrichment(&self, item: &QueueItem, enrichment: &Enrichment) {
        let Some(song_id) = item.song_id else {
            return;
        };
        let store = &self.deps.store;

        if let Err(e) = store
            .backfill_song(song_id, enrichment.year, enrichment.duration_seconds)
            .await
        {
            error!(channel_id = %self.channel, song_id, error = %e, "Failed to back-fill song metadata");
        }

        if item.genre.is_none() {
            if let Some(genre) = &enrichment.genre {
                if let Err(e) = store.replace_genres(song_id, std::slice::from_ref(genre)).await {
                    error!(channel_id = %self.channel, song_id, error = %e, "Failed to store enriched genre");
                }
            }
        }
    }

    async fn apply_if_current(&self, item: &QueueItem, enrichment: &Enrichment) -> bool {
        let mut state = self.state.write().await;
        match state.current.as_mut() {
            Some(current) if current.is(item) => {
                enrichment.apply_to(&mut current.item);
                true
            }
            _ => false,
        }
    }

    async fn is_current(&self, item: &QueueItem) -> bool {
        self.state
            .read()
            .await
            .current
            .as_ref()
            .is_some_and(|current| current.is(item))
    }

    /// Periodically top the queue up to the target depth and keep the loop running
    pub(crate) async fn maintain_queue(self: Arc<Self>) {
        let period = self.deps.player.maintenance_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            channel_id = %self.channel,
            interval_ms = period.as_millis() as u64,
            target = self.deps.player.target_queue_depth,
            "Queue maintenance started"
        );

        loop {
            ticker.tick().await;
            let added = self.top_up_queue().await;
            if added > 0 {
                debug!(channel_id = %self.channel, added, queued = self.queue.len(), "Queue topped up");
            }

            // The loop may have gone idle before the top-up found anything
            if !self.queue.is_empty() && self.is_connected().await && self.ensure_playing() {
                info!(channel_id = %self.channel, queued = self.queue.len(), "Restarted playback for queued items");
            }
        }
    }

    /// Add discovery picks until the queue reaches the target depth
    ///
    /// Only runs while autoplay is on and the transport is connected.
    pub async fn top_up_queue(&self) -> usize {
        let target = self.deps.player.target_queue_depth;
        if self.queue.len() >= target || !self.autoplay().await {
            return 0;
        }
        let Some(transport) = self.connected_transport().await else {
            return 0;
        };

        let settings = self.settings().await;
        let mut added = 0;
        while self.queue.len() < target && self.autoplay().await {
            match self.discover(&settings, &transport).await {
                Discovery::Found(item) => {
                    self.queue.put(item);
                    added += 1;
                }
                other => {
                    debug!(channel_id = %self.channel, outcome = other.as_str(), "Queue top-up stopped");
                    break;
                }
            }
        }
        added
    }
}
