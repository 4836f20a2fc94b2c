//! External metadata collaborators
//!
//! All of these are slow, rate limited and occasionally failing. Call sites bound
//! them with a timeout and treat any failure as "no candidates from this source".

use async_trait::async_trait;

/// Track as reported by a metadata provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackInfo {
    /// Provider-native id; for the playback provider this is the content id
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<u32>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    /// Popularity in [0, 1] when the provider knows it
    pub popularity: Option<f32>,
}

/// A playlist found by search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
    pub id: String,
    pub title: String,
}

/// Artist as reported by the artist catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtistInfo {
    pub id: String,
    pub name: String,
    pub genres: Vec<String>,
    pub popularity: Option<f32>,
}

/// A catalog track mapped onto the playback-native identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub content_id: String,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Songs,
    Videos,
}

/// Search and related-track lookup on the playback provider
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn search(&self, query: &str, kind: SearchKind, limit: usize) -> anyhow::Result<Vec<TrackInfo>>;

    async fn search_playlists(&self, query: &str, limit: usize) -> anyhow::Result<Vec<PlaylistRef>>;

    async fn related_tracks(&self, seed_id: &str, limit: usize) -> anyhow::Result<Vec<TrackInfo>>;

    async fn playlist_tracks(&self, playlist_id: &str, limit: usize) -> anyhow::Result<Vec<TrackInfo>>;

    async fn track_details(&self, id: &str) -> anyhow::Result<Option<TrackInfo>>;
}

/// Secondary catalog with artist top tracks
#[async_trait]
pub trait ArtistCatalog: Send + Sync {
    async fn find_artist(&self, name: &str) -> anyhow::Result<Option<ArtistInfo>>;

    async fn top_tracks(&self, artist_id: &str, limit: usize) -> anyhow::Result<Vec<TrackInfo>>;
}

/// Maps a (title, artist) pair to something playable
#[async_trait]
pub trait TrackNormalizer: Send + Sync {
    async fn resolve(&self, title: &str, artist: &str) -> anyhow::Result<Option<ResolvedTrack>>;
}
