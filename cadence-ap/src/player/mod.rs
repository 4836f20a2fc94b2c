//! Channel player
//!
//! One player per channel. It owns the channel's queue, its playback state, the voice
//! transport handle and the handles of every task it spawned. Channels share nothing.

mod background;
mod playback;
pub mod settings;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadence_common::config::{DiscoveryConfig, MonitorConfig, PlayerConfig};
use cadence_common::models::SessionId;
use cadence_common::store::Store;
use cadence_common::time;
use cadence_common::{ChannelId, QueueItem};

use crate::discovery::NextSongSource;
use crate::error::{Error, Result};
use crate::queue::PlayQueue;
use crate::transport::{MetadataEnricher, NowPlaying, PresentationSink, StreamResolver, VoiceTransport};

pub use settings::ChannelSettings;

/// Collaborators handed to every channel player
#[derive(Clone)]
pub struct PlayerDeps {
    pub store: Arc<dyn Store>,
    pub discovery: Arc<dyn NextSongSource>,
    pub resolver: Arc<dyn StreamResolver>,
    pub sink: Option<Arc<dyn PresentationSink>>,
    pub enricher: Option<Arc<dyn MetadataEnricher>>,
    pub player: PlayerConfig,
    pub discovery_config: DiscoveryConfig,
    /// Health refresh period while waiting on playback; kept under the stuck threshold
    pub heartbeat: Duration,
}

impl PlayerDeps {
    pub fn new(
        store: Arc<dyn Store>,
        discovery: Arc<dyn NextSongSource>,
        resolver: Arc<dyn StreamResolver>,
        player: PlayerConfig,
        discovery_config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            discovery,
            resolver,
            sink: None,
            enricher: None,
            player,
            discovery_config,
            heartbeat: MonitorConfig::default().heartbeat_interval(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Match the health refresh to the monitor judging these players
    pub fn with_monitor(mut self, monitor: &MonitorConfig) -> Self {
        self.heartbeat = monitor.heartbeat_interval();
        self
    }
}

/// Where the playback loop is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    /// No active loop
    Idle,
    /// Draining the queue or awaiting discovery
    Selecting,
    /// Fetching a streamable reference
    Resolving,
    Playing,
    /// Persisting completion and deciding what is next
    Finalizing,
}

/// The song in the "current" slot
#[derive(Debug, Clone)]
pub struct CurrentSong {
    pub item: QueueItem,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    /// Time spent paused before `paused_at`
    pub paused_total: Duration,
}

impl CurrentSong {
    fn new(item: QueueItem) -> Self {
        Self {
            item,
            started_at: time::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Same play of the same song (a replay gets a new history id)
    pub fn is(&self, item: &QueueItem) -> bool {
        self.item.content_id == item.content_id && self.item.history_id == item.history_id
    }
}

/// Mutable player state, grouped by lifecycle
#[derive(Debug, Clone)]
pub struct PlayerState {
    // Per song
    pub current: Option<CurrentSong>,

    // Per loop run
    pub phase: PlayerPhase,
    /// True while a playback loop owns the channel
    pub playing: bool,
    pub consecutive_failures: u32,
    /// Liveness signal the stuck detector reads
    pub last_health_check: DateTime<Utc>,

    // Per session
    pub session: Option<SessionId>,
    /// Discovery pick resolved ahead of time
    pub prefetched: Option<QueueItem>,
    pub last_activity: DateTime<Utc>,

    // Persisted per channel
    pub autoplay: bool,
    pub pre_buffer: bool,
}

impl PlayerState {
    fn new(settings: &ChannelSettings) -> Self {
        let now = time::now();
        Self {
            current: None,
            phase: PlayerPhase::Idle,
            playing: false,
            consecutive_failures: 0,
            last_health_check: now,
            session: None,
            prefetched: None,
            last_activity: now,
            autoplay: settings.autoplay,
            pre_buffer: settings.pre_buffer,
        }
    }
}

/// What the monitor needs to judge a channel
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub playing: bool,
    pub loop_running: bool,
    pub connected: bool,
    pub autoplay: bool,
    pub last_health_check: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Default)]
struct PlayerTasks {
    main_loop: Option<JoinHandle<()>>,
    maintenance: Option<JoinHandle<()>>,
    prefetch: Option<JoinHandle<()>>,
    enrichment: Option<JoinHandle<()>>,
}

impl PlayerTasks {
    fn drain(&mut self) -> Vec<JoinHandle<()>> {
        [
            self.main_loop.take(),
            self.maintenance.take(),
            self.prefetch.take(),
            self.enrichment.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn is_running(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().is_some_and(|h| !h.is_finished())
}

pub struct ChannelPlayer {
    channel: ChannelId,
    queue: PlayQueue,
    state: RwLock<PlayerState>,
    transport: RwLock<Option<Arc<dyn VoiceTransport>>>,
    deps: PlayerDeps,
    tasks: Mutex<PlayerTasks>,
    cancel: CancellationToken,
}

impl ChannelPlayer {
    pub fn new(
        channel: ChannelId,
        deps: PlayerDeps,
        settings: &ChannelSettings,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            queue: PlayQueue::new(),
            state: RwLock::new(PlayerState::new(settings)),
            transport: RwLock::new(None),
            deps,
            tasks: Mutex::new(PlayerTasks::default()),
            cancel,
        })
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn queue(&self) -> &PlayQueue {
        &self.queue
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> PlayerState {
        self.state.read().await.clone()
    }

    pub async fn phase(&self) -> PlayerPhase {
        self.state.read().await.phase
    }

    pub async fn is_playing(&self) -> bool {
        self.state.read().await.playing
    }

    pub async fn autoplay(&self) -> bool {
        self.state.read().await.autoplay
    }

    fn lock_tasks(&self) -> MutexGuard<'_, PlayerTasks> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether the playback loop task is alive
    pub fn loop_running(&self) -> bool {
        is_running(&self.lock_tasks().main_loop)
    }

    pub async fn attach_transport(&self, transport: Arc<dyn VoiceTransport>) {
        *self.transport.write().await = Some(transport);
        self.touch_activity().await;
        info!(channel_id = %self.channel, "Transport attached");
    }

    pub async fn transport(&self) -> Option<Arc<dyn VoiceTransport>> {
        self.transport.read().await.clone()
    }

    pub(crate) async fn connected_transport(&self) -> Option<Arc<dyn VoiceTransport>> {
        self.transport().await.filter(|t| t.is_connected())
    }

    pub async fn is_connected(&self) -> bool {
        self.connected_transport().await.is_some()
    }

    pub async fn touch_activity(&self) {
        self.state.write().await.last_activity = time::now();
    }

    pub(crate) async fn touch_health(&self) {
        self.state.write().await.last_health_check = time::now();
    }

    pub(crate) async fn set_phase(&self, phase: PlayerPhase) {
        self.state.write().await.phase = phase;
    }

    /// Run `task` until it finishes or the player is torn down
    fn spawn_background<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.child_token();
        let channel = self.channel;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(channel_id = %channel, task = name, "Background task cancelled");
                }
                _ = task => {}
            }
        })
    }

    /// Start the playback loop (and queue maintenance) unless already running
    ///
    /// Returns true when a new loop was spawned.
    pub fn ensure_playing(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut tasks = self.lock_tasks();
        if is_running(&tasks.main_loop) {
            return false;
        }

        let player = Arc::clone(self);
        tasks.main_loop = Some(self.spawn_background("playback", player.run_loop()));

        if !is_running(&tasks.maintenance) {
            let player = Arc::clone(self);
            tasks.maintenance = Some(self.spawn_background("maintenance", player.maintain_queue()));
        }

        debug!(channel_id = %self.channel, "Playback loop scheduled");
        true
    }

    pub async fn set_autoplay(self: &Arc<Self>, enabled: bool) {
        self.state.write().await.autoplay = enabled;
        self.persist_flag(settings::AUTOPLAY, enabled).await;
        info!(channel_id = %self.channel, enabled, "Autoplay changed");

        if enabled && self.is_connected().await {
            self.ensure_playing();
        }
    }

    pub async fn set_pre_buffer(&self, enabled: bool) {
        self.state.write().await.pre_buffer = enabled;
        self.persist_flag(settings::PREBUFFER, enabled).await;
        info!(channel_id = %self.channel, enabled, "Pre-buffering changed");
    }

    async fn persist_flag(&self, key: &str, value: bool) {
        if let Err(e) = self
            .deps
            .store
            .set_setting(self.channel, key, settings::format_bool(value))
            .await
        {
            error!(channel_id = %self.channel, key, error = %e, "Failed to persist channel setting");
        }
    }

    /// Stop the current source; the loop records it as not completed
    pub async fn skip(&self) -> Result<()> {
        let current = self
            .state
            .read()
            .await
            .current
            .as_ref()
            .map(|c| c.item.content_id.clone());
        let Some(content_id) = current else {
            return Err(Error::InvalidState("nothing is playing".to_string()));
        };
        let transport = self.require_transport().await?;

        info!(channel_id = %self.channel, content_id = %content_id, "Skipping current song");
        transport.stop().await.map_err(Error::transport)?;
        self.touch_activity().await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        let transport = self.require_transport().await?;
        match self.state.read().await.current.as_ref() {
            None => return Err(Error::InvalidState("nothing is playing".to_string())),
            Some(current) if current.is_paused() => {
                return Err(Error::InvalidState("already paused".to_string()))
            }
            Some(_) => {}
        }

        transport.pause().await.map_err(Error::transport)?;

        let mut state = self.state.write().await;
        if let Some(current) = state.current.as_mut() {
            current.paused_at = Some(time::now());
        }
        state.last_activity = time::now();
        info!(channel_id = %self.channel, "Paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let transport = self.require_transport().await?;
        match self.state.read().await.current.as_ref() {
            Some(current) if current.is_paused() => {}
            _ => return Err(Error::InvalidState("not paused".to_string())),
        }

        transport.resume().await.map_err(Error::transport)?;

        let mut state = self.state.write().await;
        if let Some(current) = state.current.as_mut() {
            if let Some(paused_at) = current.paused_at.take() {
                current.paused_total += time::elapsed_since(paused_at);
            }
        }
        state.last_activity = time::now();
        info!(channel_id = %self.channel, "Resumed");
        Ok(())
    }

    async fn require_transport(&self) -> Result<Arc<dyn VoiceTransport>> {
        self.connected_transport()
            .await
            .ok_or_else(|| Error::InvalidState("transport not connected".to_string()))
    }

    pub async fn now_playing(&self) -> Option<NowPlaying> {
        let state = self.state.read().await;
        let current = state.current.as_ref()?;
        Some(NowPlaying {
            channel: self.channel,
            item: current.item.clone(),
            started_at: current.started_at,
            paused: current.is_paused(),
            autoplay: state.autoplay,
            queued: self.queue.len(),
        })
    }

    pub fn upcoming(&self, n: usize) -> Vec<QueueItem> {
        self.queue.peek_many(n)
    }

    /// Empty the queue and drop any prefetched pick
    pub async fn clear_queue(&self) -> usize {
        let removed = self.queue.clear();
        self.state.write().await.prefetched = None;
        info!(channel_id = %self.channel, removed, "Queue cleared");
        removed
    }

    pub async fn health(&self) -> HealthSnapshot {
        let connected = self.is_connected().await;
        let loop_running = self.loop_running();
        let state = self.state.read().await;
        HealthSnapshot {
            playing: state.playing,
            loop_running,
            connected,
            autoplay: state.autoplay,
            last_health_check: state.last_health_check,
            last_activity: state.last_activity,
        }
    }

    /// Render "now playing" through the sink, ignoring sink failures
    pub(crate) async fn render_now_playing(&self) {
        let Some(sink) = self.deps.sink.clone() else {
            return;
        };
        let Some(now_playing) = self.now_playing().await else {
            return;
        };

        let timeout = self.deps.player.enrichment_timeout();
        match tokio::time::timeout(timeout, sink.render(&now_playing)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(channel_id = %self.channel, error = %e, "Now playing render failed"),
            Err(_) => warn!(channel_id = %self.channel, "Now playing render timed out"),
        }
    }

    /// Abort a wedged loop and reset to a state the next tick can restart from
    pub async fn force_stop(&self) {
        let handles = {
            let mut tasks = self.lock_tasks();
            [tasks.main_loop.take(), tasks.prefetch.take(), tasks.enrichment.take()]
        };
        for handle in handles.into_iter().flatten() {
            handle.abort();
        }

        if let Some(transport) = self.transport().await {
            if let Err(e) = transport.stop().await {
                warn!(channel_id = %self.channel, error = %e, "Transport stop failed during forced stop");
            }
        }

        let mut state = self.state.write().await;
        state.playing = false;
        state.phase = PlayerPhase::Idle;
        state.current = None;
        state.consecutive_failures = 0;
        state.last_activity = time::now();
        warn!(channel_id = %self.channel, "Playback force-stopped");
    }

    /// Disconnect an abandoned channel and close its session
    pub async fn disconnect_idle(&self) -> Result<()> {
        let handles = {
            let mut tasks = self.lock_tasks();
            [tasks.maintenance.take(), tasks.prefetch.take(), tasks.enrichment.take()]
        };
        for handle in handles.into_iter().flatten() {
            handle.abort();
        }

        let transport = self.transport.write().await.take();
        self.end_session().await;
        {
            let mut state = self.state.write().await;
            state.prefetched = None;
            state.last_activity = time::now();
        }

        info!(channel_id = %self.channel, "Disconnecting idle channel");
        match transport {
            Some(transport) => transport.disconnect().await.map_err(Error::transport),
            None => Ok(()),
        }
    }

    pub(crate) async fn end_session(&self) {
        let session = self.state.write().await.session.take();
        if let Some(session) = session {
            match self.deps.store.end_session(session).await {
                Ok(()) => info!(channel_id = %self.channel, session_id = %session, "Session ended"),
                Err(e) => {
                    error!(channel_id = %self.channel, session_id = %session, error = %e, "Failed to end session")
                }
            }
        }
    }

    /// Cancel every task, release the transport and close the session
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = self.lock_tasks().drain();
        for handle in handles {
            handle.abort();
        }

        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            if transport.is_playing() {
                if let Err(e) = transport.stop().await {
                    warn!(channel_id = %self.channel, error = %e, "Transport stop failed during shutdown");
                }
            }
            if let Err(e) = transport.disconnect().await {
                warn!(channel_id = %self.channel, error = %e, "Transport disconnect failed during shutdown");
            }
        }

        self.end_session().await;

        let mut state = self.state.write().await;
        state.playing = false;
        state.phase = PlayerPhase::Idle;
        state.current = None;
        state.prefetched = None;
        info!(channel_id = %self.channel, "Channel player shut down");
    }
}
