//! Artist pool: top tracks of the participant's preferred artists
//!
//! Catalog tracks are not directly playable; each must resolve to a content id
//! first. Tracks that do not resolve are dropped.

use async_trait::async_trait;
use cadence_common::models::{DiscoverySource, PreferenceCategory};
use cadence_common::store::Store;
use cadence_common::RetryPolicy;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{sample, CandidatePool, PoolContext};
use crate::candidate::SongCandidate;
use crate::providers::{ArtistCatalog, ArtistInfo, TrackInfo, TrackNormalizer};

const ARTIST_SAMPLE: usize = 3;
const TOP_ARTIST_LIMIT: u32 = 10;
const TRACKS_PER_ARTIST: usize = 10;

pub struct ArtistPool {
    store: Arc<dyn Store>,
    catalog: Arc<dyn ArtistCatalog>,
    normalizer: Arc<dyn TrackNormalizer>,
    retry: RetryPolicy,
}

impl ArtistPool {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn ArtistCatalog>,
        normalizer: Arc<dyn TrackNormalizer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            normalizer,
            retry,
        }
    }

    async fn lookup_artist(&self, name: &str) -> Option<(ArtistInfo, Vec<TrackInfo>)> {
        let catalog = Arc::clone(&self.catalog);
        let query = name.to_string();
        let artist = match self
            .retry
            .run("find_artist", move || {
                let catalog = Arc::clone(&catalog);
                let query = query.clone();
                async move { catalog.find_artist(&query).await }
            })
            .await
        {
            Ok(Some(artist)) => artist,
            Ok(None) => {
                debug!(artist = name, "Artist not found in catalog");
                return None;
            }
            Err(e) => {
                warn!(artist = name, error = %e, "Artist lookup failed");
                return None;
            }
        };

        let catalog = Arc::clone(&self.catalog);
        let artist_id = artist.id.clone();
        match self
            .retry
            .run("top_tracks", move || {
                let catalog = Arc::clone(&catalog);
                let artist_id = artist_id.clone();
                async move { catalog.top_tracks(&artist_id, TRACKS_PER_ARTIST).await }
            })
            .await
        {
            Ok(tracks) => Some((artist, tracks)),
            Err(e) => {
                warn!(artist = name, error = %e, "Top-track lookup failed");
                None
            }
        }
    }

    async fn resolve(&self, artist: &ArtistInfo, track: TrackInfo, ctx: &PoolContext) -> Option<SongCandidate> {
        let resolved = match self.normalizer.resolve(&track.title, &track.artist).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return None,
            Err(e) => {
                debug!(title = %track.title, error = %e, "Track normalization failed");
                return None;
            }
        };
        if ctx.is_excluded(&resolved.content_id) {
            return None;
        }

        let genres = if track.genres.is_empty() {
            artist.genres.clone()
        } else {
            track.genres
        };
        let popularity = track.popularity.or(artist.popularity).unwrap_or(0.5);
        Some(
            SongCandidate::new(
                resolved.content_id,
                resolved.title,
                resolved.artist,
                DiscoverySource::Artist,
                "artist",
                genres,
                track.year,
                popularity,
            )
            .with_duration(track.duration_seconds)
            .with_reason(format!("From an artist you enjoy: {}", artist.name)),
        )
    }
}

#[async_trait]
impl CandidatePool for ArtistPool {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Artist
    }

    async fn gather(&self, ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>> {
        let top = self
            .store
            .top_preferences(ctx.user, PreferenceCategory::Artist, TOP_ARTIST_LIMIT)
            .await?;
        let liked: Vec<String> = top
            .into_iter()
            .filter(|p| p.score > 0.0)
            .map(|p| p.key)
            .collect();
        if liked.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for name in sample(&liked, ARTIST_SAMPLE) {
            let Some((artist, tracks)) = self.lookup_artist(&name).await else {
                continue;
            };
            let resolved = join_all(tracks.into_iter().map(|t| self.resolve(&artist, t, ctx))).await;
            candidates.extend(resolved.into_iter().flatten());
            if candidates.len() >= ctx.limit {
                break;
            }
        }
        Ok(candidates)
    }
}
