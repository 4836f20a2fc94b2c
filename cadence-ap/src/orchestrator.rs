//! Channel registry and player commands
//!
//! The orchestrator owns one [`ChannelPlayer`] per channel. Front-ends hold a reference to
//! it and issue commands; the idle monitor reads the same registry.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cadence_common::config::MonitorConfig;
use cadence_common::{ChannelId, QueueItem};

use crate::error::{Error, Result};
use crate::monitor::{IdleMonitor, SweepReport};
use crate::player::{ChannelPlayer, ChannelSettings, PlayerDeps};
use crate::transport::{NowPlaying, VoiceTransport};

/// Players keyed by channel
pub type Registry = Arc<RwLock<HashMap<ChannelId, Arc<ChannelPlayer>>>>;

pub struct Orchestrator {
    deps: PlayerDeps,
    monitor: IdleMonitor,
    players: Registry,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(deps: PlayerDeps, monitor: MonitorConfig) -> Self {
        let deps = deps.with_monitor(&monitor);
        let monitor = IdleMonitor::new(monitor, &deps.player);
        Self {
            deps,
            monitor,
            players: Arc::new(RwLock::new(HashMap::new())),
            monitor_task: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn lock_monitor_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.monitor_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start the periodic idle/stuck sweep; returns false if it is already running
    pub fn start_monitor(&self) -> bool {
        let mut task = self.lock_monitor_task();
        if task.as_ref().is_some_and(|h| !h.is_finished()) || self.cancel.is_cancelled() {
            return false;
        }
        *task = Some(
            self.monitor
                .clone()
                .spawn(Arc::clone(&self.players), self.cancel.child_token()),
        );
        true
    }

    /// Run one sweep now
    pub async fn sweep(&self) -> SweepReport {
        let players: Vec<Arc<ChannelPlayer>> = self.players.read().await.values().cloned().collect();
        self.monitor.sweep(&players).await
    }

    /// Get or create the channel's player
    pub async fn player(&self, channel: ChannelId) -> Arc<ChannelPlayer> {
        if let Some(player) = self.get(channel).await {
            return player;
        }

        let settings = ChannelSettings::load(
            self.deps.store.as_ref(),
            channel,
            &self.deps.player,
            &self.deps.discovery_config,
        )
        .await;

        let mut players = self.players.write().await;
        let player = players.entry(channel).or_insert_with(|| {
            info!(channel_id = %channel, autoplay = settings.autoplay, "Channel player created");
            ChannelPlayer::new(channel, self.deps.clone(), &settings, self.cancel.child_token())
        });
        Arc::clone(player)
    }

    pub async fn get(&self, channel: ChannelId) -> Option<Arc<ChannelPlayer>> {
        self.players.read().await.get(&channel).cloned()
    }

    async fn existing(&self, channel: ChannelId) -> Result<Arc<ChannelPlayer>> {
        self.get(channel)
            .await
            .ok_or_else(|| Error::NotFound(format!("no player for channel {channel}")))
    }

    pub async fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.players.read().await.keys().copied().collect();
        channels.sort();
        channels
    }

    pub async fn attach_transport(
        &self,
        channel: ChannelId,
        transport: Arc<dyn VoiceTransport>,
    ) -> Arc<ChannelPlayer> {
        let player = self.player(channel).await;
        player.attach_transport(transport).await;
        player
    }

    /// Start playback (autoplay or queued items) if the channel is connected
    pub async fn start(&self, channel: ChannelId) -> Result<bool> {
        let player = self.existing(channel).await?;
        if !player.is_connected().await {
            return Err(Error::InvalidState("transport not connected".to_string()));
        }
        Ok(player.ensure_playing())
    }

    /// Append an item; returns the queue length
    pub async fn enqueue(&self, channel: ChannelId, item: QueueItem) -> usize {
        let player = self.player(channel).await;
        info!(channel_id = %channel, content_id = %item.content_id, source = %item.source, "Enqueued");
        player.queue().put(item);
        self.kick(&player).await;
        player.queue().len()
    }

    /// Insert an item ahead of everything queued
    pub async fn enqueue_front(&self, channel: ChannelId, item: QueueItem) -> usize {
        let player = self.player(channel).await;
        info!(channel_id = %channel, content_id = %item.content_id, "Enqueued at front");
        player.queue().put_at_front(item);
        self.kick(&player).await;
        player.queue().len()
    }

    async fn kick(&self, player: &Arc<ChannelPlayer>) {
        player.touch_activity().await;
        if player.is_connected().await {
            player.ensure_playing();
        }
    }

    pub async fn skip(&self, channel: ChannelId) -> Result<()> {
        self.existing(channel).await?.skip().await
    }

    pub async fn pause(&self, channel: ChannelId) -> Result<()> {
        self.existing(channel).await?.pause().await
    }

    pub async fn resume(&self, channel: ChannelId) -> Result<()> {
        self.existing(channel).await?.resume().await
    }

    pub async fn set_autoplay(&self, channel: ChannelId, enabled: bool) {
        self.player(channel).await.set_autoplay(enabled).await;
    }

    pub async fn set_pre_buffer(&self, channel: ChannelId, enabled: bool) {
        self.player(channel).await.set_pre_buffer(enabled).await;
    }

    pub async fn now_playing(&self, channel: ChannelId) -> Option<NowPlaying> {
        self.get(channel).await?.now_playing().await
    }

    pub async fn upcoming(&self, channel: ChannelId, n: usize) -> Vec<QueueItem> {
        match self.get(channel).await {
            Some(player) => player.upcoming(n),
            None => Vec::new(),
        }
    }

    pub async fn clear_queue(&self, channel: ChannelId) -> Result<usize> {
        Ok(self.existing(channel).await?.clear_queue().await)
    }

    /// Tear down one channel's player
    pub async fn remove(&self, channel: ChannelId) -> bool {
        let removed = self.players.write().await.remove(&channel);
        match removed {
            Some(player) => {
                player.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Cancel every task, disconnect every transport and end every session
    pub async fn shutdown(&self) {
        info!("Shutting down playback orchestrator");
        self.cancel.cancel();

        let monitor = self.lock_monitor_task().take();
        if let Some(handle) = monitor {
            handle.abort();
        }

        let players: Vec<Arc<ChannelPlayer>> =
            self.players.write().await.drain().map(|(_, player)| player).collect();
        join_all(players.iter().map(|player| player.shutdown())).await;
    }
}
