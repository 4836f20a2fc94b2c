//! Persistence collaborator traits
//!
//! The core treats persistence as an async service. No call assumes multi-statement
//! atomicity with any other call; callers log failures and carry on.

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{
    ChannelId, DiscoverySource, HistoryEntry, HistoryId, LibrarySource, NewSong, ParticipantId,
    PreferenceCategory, PreferenceScore, Reaction, SessionId, SongId, SongRecord,
};
use crate::Result;

/// A play about to be appended to history
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub channel_id: ChannelId,
    pub session_id: Option<SessionId>,
    pub song_id: SongId,
    pub source: DiscoverySource,
    pub reason: Option<String>,
    pub for_user: Option<ParticipantId>,
}

/// Settings, songs, sessions, history, reactions and library
#[async_trait]
pub trait PlaybackStore: Send + Sync {
    /// Per-channel setting, `None` when unset
    async fn get_setting(&self, channel: ChannelId, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, channel: ChannelId, key: &str, value: &str) -> Result<()>;

    /// Get-or-create the channel row
    async fn ensure_channel(&self, channel: ChannelId) -> Result<()>;

    /// Get-or-create the participant row
    async fn ensure_user(&self, user: ParticipantId) -> Result<()>;

    async fn is_opted_out(&self, user: ParticipantId) -> Result<bool>;

    async fn set_opt_out(&self, user: ParticipantId, opted_out: bool) -> Result<()>;

    /// Get-or-create keyed by content id
    ///
    /// An existing row keeps its values; only missing year/duration and an empty
    /// genre list are back-filled from `song`.
    async fn upsert_song(&self, song: &NewSong) -> Result<SongRecord>;

    /// Promote an ephemeral discovery song once someone asks for it
    async fn make_permanent(&self, song_id: SongId) -> Result<()>;

    async fn song_by_id(&self, song_id: SongId) -> Result<Option<SongRecord>>;

    async fn song_by_content_id(&self, content_id: &str) -> Result<Option<SongRecord>>;

    async fn replace_genres(&self, song_id: SongId, genres: &[String]) -> Result<()>;

    /// Back-fill year/duration on an existing song, never overwriting known values
    async fn backfill_song(
        &self,
        song_id: SongId,
        year: Option<i32>,
        duration_seconds: Option<u32>,
    ) -> Result<()>;

    async fn create_session(&self, channel: ChannelId) -> Result<SessionId>;

    async fn end_session(&self, session: SessionId) -> Result<()>;

    /// Append a play; the session (if any) must exist already
    async fn log_track(&self, entry: &NewHistoryEntry) -> Result<HistoryId>;

    async fn mark_completed(&self, history_id: HistoryId, completed: bool) -> Result<()>;

    /// Content ids played in the channel within `window`
    async fn recent_history_window(&self, channel: ChannelId, window: Duration) -> Result<Vec<String>>;

    /// The last `limit` plays in the channel, newest first
    async fn recent_history(&self, channel: ChannelId, limit: u32) -> Result<Vec<HistoryEntry>>;

    async fn add_reaction(&self, user: ParticipantId, song_id: SongId, reaction: Reaction) -> Result<()>;

    /// Songs the participant liked or loved, newest first
    async fn liked_songs(&self, user: ParticipantId, limit: u32) -> Result<Vec<SongRecord>>;

    async fn add_to_library(
        &self,
        user: ParticipantId,
        song_id: SongId,
        source: LibrarySource,
    ) -> Result<()>;
}

/// Affinity scores keyed by (participant, category, key)
///
/// The writer clamps to the category's range; readers trust stored values.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preference(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        key: &str,
    ) -> Result<Option<f64>>;

    /// Store `score` clamped to the category range and return the stored value
    async fn update_preference(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        key: &str,
        score: f64,
    ) -> Result<f64>;

    async fn all_preferences(&self, user: ParticipantId) -> Result<Vec<PreferenceScore>>;

    /// Highest scores first
    async fn top_preferences(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        limit: u32,
    ) -> Result<Vec<PreferenceScore>>;

    /// Remove every score for the participant, returning how many were removed
    async fn clear_preferences(&self, user: ParticipantId) -> Result<u64>;
}

/// Both stores behind one handle
pub trait Store: PlaybackStore + PreferenceStore {}

impl<T: PlaybackStore + PreferenceStore> Store for T {}
