//! Collaborators the channel player drives
//!
//! Wire formats belong to the implementations. Every call site bounds these with a
//! timeout and treats failures as recoverable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use cadence_common::{ChannelId, ParticipantId, QueueItem, StreamSource};

/// How a single playback ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The source played to the end
    Finished,
    /// Stopped early (skip, forced stop)
    Stopped,
    /// The transport reported an error mid-stream
    Failed(String),
    /// No completion signal arrived within the playback wait
    TimedOut,
}

impl PlaybackOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PlaybackOutcome::Finished)
    }
}

/// Single-shot completion signal for one `play` call
pub type Completion = oneshot::Receiver<PlaybackOutcome>;

/// Audio connection for one channel
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Participants currently present, excluding the player itself
    async fn listeners(&self) -> anyhow::Result<Vec<ParticipantId>>;

    /// Start playing a stream; the receiver fires once when playback ends
    async fn play(&self, stream: &StreamSource) -> anyhow::Result<Completion>;

    fn is_playing(&self) -> bool;

    /// Stop the current source; its completion reports `Stopped`
    async fn stop(&self) -> anyhow::Result<()>;

    async fn pause(&self) -> anyhow::Result<()>;

    async fn resume(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;
}

/// Content id to a directly playable stream reference
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, content_id: &str) -> anyhow::Result<Option<StreamSource>>;
}

/// Richer metadata from a secondary provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub duration_seconds: Option<u32>,
}

impl Enrichment {
    /// Fill fields the item does not know yet
    pub fn apply_to(&self, item: &mut QueueItem) {
        if item.genre.is_none() {
            item.genre = self.genre.clone();
        }
        if item.year.is_none() {
            item.year = self.year;
        }
        if item.duration_seconds.is_none() {
            item.duration_seconds = self.duration_seconds;
        }
    }
}

#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, item: &QueueItem) -> anyhow::Result<Option<Enrichment>>;
}

/// Externally visible "now playing" state
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub channel: ChannelId,
    pub item: QueueItem,
    pub started_at: DateTime<Utc>,
    pub paused: bool,
    pub autoplay: bool,
    pub queued: usize,
}

/// Renders "now playing"; failures are cosmetic
#[async_trait]
pub trait PresentationSink: Send + Sync {
    async fn render(&self, now_playing: &NowPlaying) -> anyhow::Result<()>;
}
