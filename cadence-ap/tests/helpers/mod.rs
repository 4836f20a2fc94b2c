//! Fakes for player tests: scripted transport, resolver, discovery, sink and enricher

#![allow(dead_code)]

use async_trait::async_trait;
use cadence_ap::player::ChannelPlayer;
use cadence_ap::{
    Enrichment, MetadataEnricher, NextSongSource, NowPlaying, Orchestrator, PlaybackOutcome,
    PlayerDeps, PresentationSink, StreamResolver, VoiceTransport,
};
use cadence_common::config::{DiscoveryConfig, MonitorConfig, PlayerConfig};
use cadence_common::db::SqliteStore;
use cadence_common::store::Store;
use cadence_common::{ChannelId, DiscoverySource, ParticipantId, QueueItem, StreamSource};
use cadence_pd::{DiscoveredSong, DiscoveryRequest};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

pub const CHANNEL: ChannelId = ChannelId(42);
pub const LISTENER: ParticipantId = ParticipantId(7);

pub fn stream_url(content_id: &str) -> String {
    format!("https://streams.test/{content_id}")
}

/// A user request with a known duration
pub fn item(id: &str) -> QueueItem {
    QueueItem::requested(id, format!("Title {id}"), "Artist", ParticipantId(1)).with_duration(180)
}

/// A user request with no duration, so the playback wait falls back to the ceiling
pub fn untimed_item(id: &str) -> QueueItem {
    QueueItem::requested(id, format!("Title {id}"), "Artist", ParticipantId(1))
}

pub fn discovered(id: &str, duration_seconds: Option<u32>) -> DiscoveredSong {
    DiscoveredSong {
        content_id: id.to_string(),
        title: format!("Found {id}"),
        artist: "Somebody".to_string(),
        source: DiscoverySource::Similar,
        reason: "Similar to Title seed".to_string(),
        for_user: LISTENER,
        duration_seconds,
        genre: Some("pop".to_string()),
        year: Some(2012),
        score: 0.8,
    }
}

/// Short timings; autoplay and pre-buffering off unless a test turns them on
pub fn fast_player_config() -> PlayerConfig {
    PlayerConfig {
        idle_timeout_ms: 60_000,
        stream_fetch_timeout_ms: 200,
        playback_ceiling_ms: 5_000,
        playback_buffer_ms: 1_000,
        discovery_timeout_ms: 500,
        max_consecutive_failures: 3,
        failure_backoff_ms: 100,
        enrichment_timeout_ms: 500,
        enrichment_refresh_delay_ms: 10,
        maintenance_interval_ms: 60_000,
        target_queue_depth: 4,
        autoplay: false,
        pre_buffer: false,
        max_duration_rerolls: 3,
    }
}

/// Transport whose completions fire on demand, or after a fixed delay
pub struct ScriptedTransport {
    connected: AtomicBool,
    listeners: Vec<ParticipantId>,
    auto_finish: Option<Duration>,
    /// The first `hang_plays` calls to `play` never return
    hang_plays: usize,
    generation: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<oneshot::Sender<PlaybackOutcome>>>>,
    played: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl ScriptedTransport {
    fn build(auto_finish: Option<Duration>, hang_plays: usize) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            listeners: vec![LISTENER],
            auto_finish,
            hang_plays,
            generation: Arc::new(AtomicUsize::new(0)),
            current: Arc::new(Mutex::new(None)),
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    /// Songs play until the test calls [`finish`](Self::finish)
    pub fn manual() -> Arc<Self> {
        Self::build(None, 0)
    }

    /// Manual transport whose first `n` plays hang inside `play`
    pub fn wedged(n: usize) -> Arc<Self> {
        Self::build(None, n)
    }

    /// Songs finish by themselves after `after`
    pub fn auto(after: Duration) -> Arc<Self> {
        Self::build(Some(after), 0)
    }

    fn complete(&self, outcome: PlaybackOutcome) -> bool {
        let sender = self.current.lock().unwrap().take();
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Finish the current song normally
    pub fn finish(&self) -> bool {
        self.complete(PlaybackOutcome::Finished)
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn play_count(&self) -> usize {
        self.played.lock().unwrap().len()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for ScriptedTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn listeners(&self) -> anyhow::Result<Vec<ParticipantId>> {
        Ok(self.listeners.clone())
    }

    async fn play(&self, stream: &StreamSource) -> anyhow::Result<oneshot::Receiver<PlaybackOutcome>> {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current.lock().unwrap() = Some(tx);
        self.played.lock().unwrap().push(stream.url.clone());

        if generation <= self.hang_plays {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if let Some(after) = self.auto_finish {
            let current = Arc::clone(&self.current);
            let latest = Arc::clone(&self.generation);
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if latest.load(Ordering::SeqCst) == generation {
                    let sender = current.lock().unwrap().take();
                    if let Some(tx) = sender {
                        let _ = tx.send(PlaybackOutcome::Finished);
                    }
                }
            });
        }
        Ok(rx)
    }

    fn is_playing(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.complete(PlaybackOutcome::Stopped);
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> anyhow::Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolver that hangs on its first `hang_first` calls
#[derive(Default)]
pub struct ScriptedResolver {
    hang_first: usize,
    missing: HashSet<String>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hanging_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            hang_first: n,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamResolver for ScriptedResolver {
    async fn resolve(&self, content_id: &str) -> anyhow::Result<Option<StreamSource>> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len() - 1
        };
        if index < self.hang_first {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.missing.contains(content_id) {
            return Ok(None);
        }
        Ok(Some(StreamSource::new(stream_url(content_id))))
    }
}

/// Discovery that hands out a fixed list of songs, then nothing
#[derive(Default)]
pub struct CountingDiscovery {
    songs: Mutex<VecDeque<DiscoveredSong>>,
    /// Calls answered with nothing before the songs are handed out
    misses: usize,
    calls: AtomicUsize,
}

impl CountingDiscovery {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_songs(songs: Vec<DiscoveredSong>) -> Arc<Self> {
        Self::after_misses(0, songs)
    }

    /// Finds nothing for the first `misses` calls, then hands out `songs`
    pub fn after_misses(misses: usize, songs: Vec<DiscoveredSong>) -> Arc<Self> {
        Arc::new(Self {
            songs: Mutex::new(songs.into()),
            misses,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NextSongSource for CountingDiscovery {
    async fn next_song(&self, _request: DiscoveryRequest) -> Option<DiscoveredSong> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.misses {
            return None;
        }
        self.songs.lock().unwrap().pop_front()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    renders: Mutex<Vec<NowPlaying>>,
}

impl RecordingSink {
    pub fn renders(&self) -> Vec<NowPlaying> {
        self.renders.lock().unwrap().clone()
    }
}

#[async_trait]
impl PresentationSink for RecordingSink {
    async fn render(&self, now_playing: &NowPlaying) -> anyhow::Result<()> {
        self.renders.lock().unwrap().push(now_playing.clone());
        Ok(())
    }
}

pub struct StaticEnricher {
    pub delay: Duration,
    pub enrichment: Enrichment,
}

#[async_trait]
impl MetadataEnricher for StaticEnricher {
    async fn enrich(&self, _item: &QueueItem) -> anyhow::Result<Option<Enrichment>> {
        tokio::time::sleep(self.delay).await;
        Ok(Some(self.enrichment.clone()))
    }
}

/// Orchestrator wired to fakes, with the transport attached to [`CHANNEL`]
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub discovery: Arc<CountingDiscovery>,
    pub resolver: Arc<ScriptedResolver>,
    pub transport: Arc<ScriptedTransport>,
    pub orchestrator: Orchestrator,
    pub player: Arc<ChannelPlayer>,
}

pub struct HarnessBuilder {
    pub config: PlayerConfig,
    pub monitor: MonitorConfig,
    pub discovery: Arc<CountingDiscovery>,
    pub resolver: Arc<ScriptedResolver>,
    pub transport: Arc<ScriptedTransport>,
    pub sink: Option<Arc<RecordingSink>>,
    pub enricher: Option<Arc<StaticEnricher>>,
    pub store: Option<Arc<dyn Store>>,
}

impl HarnessBuilder {
    pub fn new(config: PlayerConfig, transport: Arc<ScriptedTransport>) -> Self {
        Self {
            config,
            monitor: MonitorConfig::default(),
            discovery: CountingDiscovery::empty(),
            resolver: ScriptedResolver::new(),
            transport,
            sink: None,
            enricher: None,
            store: None,
        }
    }

    pub async fn build(self) -> Harness {
        let store: Arc<dyn Store> = match self.store {
            Some(store) => store,
            None => memory_store().await,
        };
        let mut deps = PlayerDeps::new(
            Arc::clone(&store),
            self.discovery.clone(),
            self.resolver.clone(),
            self.config,
            DiscoveryConfig::default(),
        );
        if let Some(sink) = self.sink {
            deps = deps.with_sink(sink);
        }
        if let Some(enricher) = self.enricher {
            deps = deps.with_enricher(enricher);
        }

        let orchestrator = Orchestrator::new(deps, self.monitor);
        let player = orchestrator
            .attach_transport(CHANNEL, self.transport.clone())
            .await;

        Harness {
            store,
            discovery: self.discovery,
            resolver: self.resolver,
            transport: self.transport,
            orchestrator,
            player,
        }
    }
}

pub async fn memory_store() -> Arc<dyn Store> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

/// Poll a synchronous condition until it holds or `limit` passes
pub async fn eventually<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Wait until the playback loop has exited
pub async fn wait_idle(player: &Arc<ChannelPlayer>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !player.loop_running() && !player.is_playing().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Wait until a song occupies the "current" slot
pub async fn wait_playing(player: &Arc<ChannelPlayer>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if player.now_playing().await.is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cadence_ap=debug")
        .with_test_writer()
        .try_init();
}
