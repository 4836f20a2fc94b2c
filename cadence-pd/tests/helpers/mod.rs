//! Scripted collaborators for discovery tests

#![allow(dead_code)]

use async_trait::async_trait;
use cadence_common::config::DiscoveryConfig;
use cadence_common::db::SqliteStore;
use cadence_common::models::{
    ChannelId, DiscoverySource, NewSong, ParticipantId, Reaction, SessionId, SongRecord,
};
use cadence_common::store::{NewHistoryEntry, PlaybackStore};
use cadence_pd::pools::{CandidatePool, PoolContext};
use cadence_pd::providers::{
    ArtistCatalog, ArtistInfo, MetadataProvider, PlaylistRef, ResolvedTrack, SearchKind, TrackInfo,
    TrackNormalizer,
};
use cadence_pd::SongCandidate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn track(id: &str, artist: &str) -> TrackInfo {
    TrackInfo {
        id: id.to_string(),
        title: format!("Title {id}"),
        artist: artist.to_string(),
        duration_seconds: Some(200),
        year: Some(2015),
        genres: vec!["pop".to_string()],
        popularity: Some(0.7),
    }
}

pub fn fast_config() -> DiscoveryConfig {
    DiscoveryConfig {
        pool_timeout_ms: 200,
        ..DiscoveryConfig::default()
    }
}

/// Metadata provider answering from fixed tables
#[derive(Default)]
pub struct ScriptedMetadata {
    pub fail: bool,
    pub related: Vec<TrackInfo>,
    pub playlists: Vec<PlaylistRef>,
    pub playlist_tracks: Vec<TrackInfo>,
    pub search_results: Vec<TrackInfo>,
    pub details: HashMap<String, TrackInfo>,
    /// Lookups of `details` that fail before the table answers
    pub details_failures: usize,
    /// Latency of each `details` lookup
    pub details_delay: Duration,
    pub details_calls: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedMetadata {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("metadata provider unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataProvider for ScriptedMetadata {
    async fn search(&self, _query: &str, _kind: SearchKind, limit: usize) -> anyhow::Result<Vec<TrackInfo>> {
        self.check()?;
        Ok(self.search_results.iter().take(limit).cloned().collect())
    }

    async fn search_playlists(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<PlaylistRef>> {
        self.check()?;
        Ok(self.playlists.iter().take(limit).cloned().collect())
    }

    async fn related_tracks(&self, _seed_id: &str, limit: usize) -> anyhow::Result<Vec<TrackInfo>> {
        self.check()?;
        Ok(self.related.iter().take(limit).cloned().collect())
    }

    async fn playlist_tracks(&self, _playlist_id: &str, limit: usize) -> anyhow::Result<Vec<TrackInfo>> {
        self.check()?;
        Ok(self.playlist_tracks.iter().take(limit).cloned().collect())
    }

    async fn track_details(&self, id: &str) -> anyhow::Result<Option<TrackInfo>> {
        self.check()?;
        let call = self.details_calls.fetch_add(1, Ordering::SeqCst);
        if !self.details_delay.is_zero() {
            tokio::time::sleep(self.details_delay).await;
        }
        if call < self.details_failures {
            anyhow::bail!("track lookup timed out upstream");
        }
        Ok(self.details.get(id).cloned())
    }
}

/// Artist catalog with one known artist
#[derive(Default)]
pub struct ScriptedCatalog {
    pub fail: bool,
    pub artist: Option<ArtistInfo>,
    pub tracks: Vec<TrackInfo>,
}

#[async_trait]
impl ArtistCatalog for ScriptedCatalog {
    async fn find_artist(&self, _name: &str) -> anyhow::Result<Option<ArtistInfo>> {
        if self.fail {
            anyhow::bail!("catalog unavailable");
        }
        Ok(self.artist.clone())
    }

    async fn top_tracks(&self, _artist_id: &str, limit: usize) -> anyhow::Result<Vec<TrackInfo>> {
        if self.fail {
            anyhow::bail!("catalog unavailable");
        }
        Ok(self.tracks.iter().take(limit).cloned().collect())
    }
}

/// Resolves titles found in its table, drops the rest
#[derive(Default)]
pub struct ScriptedNormalizer {
    pub resolutions: HashMap<String, String>,
}

#[async_trait]
impl TrackNormalizer for ScriptedNormalizer {
    async fn resolve(&self, title: &str, artist: &str) -> anyhow::Result<Option<ResolvedTrack>> {
        Ok(self.resolutions.get(title).map(|content_id| ResolvedTrack {
            content_id: content_id.clone(),
            title: title.to_string(),
            artist: artist.to_string(),
        }))
    }
}

/// Pool that always errors
pub struct FailingPool(pub DiscoverySource);

#[async_trait]
impl CandidatePool for FailingPool {
    fn source(&self) -> DiscoverySource {
        self.0
    }

    async fn gather(&self, _ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>> {
        anyhow::bail!("{} pool exploded", self.0)
    }
}

/// Pool that never answers
pub struct HangingPool(pub DiscoverySource);

#[async_trait]
impl CandidatePool for HangingPool {
    fn source(&self) -> DiscoverySource {
        self.0
    }

    async fn gather(&self, _ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Store a song and a like from `user`
pub async fn like_song(store: &SqliteStore, user: ParticipantId, content_id: &str, artist: &str) -> SongRecord {
    let song = store
        .upsert_song(&NewSong {
            content_id: content_id.to_string(),
            title: format!("Title {content_id}"),
            artist: artist.to_string(),
            duration_seconds: Some(180),
            year: Some(2004),
            genres: vec!["indie".to_string()],
            ephemeral: false,
        })
        .await
        .unwrap();
    store.add_reaction(user, song.id, Reaction::Like).await.unwrap();
    song
}

/// Append a play of `song` to the channel's history
pub async fn log_play(store: &SqliteStore, channel: ChannelId, session: SessionId, song: &SongRecord) {
    store
        .log_track(&NewHistoryEntry {
            channel_id: channel,
            session_id: Some(session),
            song_id: song.id,
            source: DiscoverySource::Library,
            reason: None,
            for_user: None,
        })
        .await
        .unwrap();
}
