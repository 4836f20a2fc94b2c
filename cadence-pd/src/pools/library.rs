//! Library pool: songs the participant already liked

use async_trait::async_trait;
use cadence_common::models::{DiscoverySource, SongRecord};
use cadence_common::store::Store;
use cadence_common::RetryPolicy;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{sample, CandidatePool, PoolContext};
use crate::candidate::SongCandidate;
use crate::providers::MetadataProvider;

const LIKED_FETCH_LIMIT: u32 = 50;
const LIBRARY_POPULARITY: f32 = 0.5;

pub struct LibraryPool {
    store: Arc<dyn Store>,
    metadata: Arc<dyn MetadataProvider>,
    retry: RetryPolicy,
}

impl LibraryPool {
    pub fn new(store: Arc<dyn Store>, metadata: Arc<dyn MetadataProvider>, retry: RetryPolicy) -> Self {
        Self { store, metadata, retry }
    }

    async fn candidate(&self, song: &SongRecord) -> SongCandidate {
        let genres = if song.genres.is_empty() {
            self.backfill_genres(song).await
        } else {
            song.genres.clone()
        };
        SongCandidate::new(
            song.content_id.clone(),
            song.title.clone(),
            song.artist.clone(),
            DiscoverySource::Library,
            "library",
            genres,
            song.year,
            LIBRARY_POPULARITY,
        )
        .with_duration(song.duration_seconds)
        .with_reason("From your library")
    }

    /// Fill in genres for a liked song that was stored without any
    async fn backfill_genres(&self, song: &SongRecord) -> Vec<String> {
        let metadata = Arc::clone(&self.metadata);
        let content_id = song.content_id.clone();
        let details = self
            .retry
            .run("track_details", move || {
                let metadata = Arc::clone(&metadata);
                let content_id = content_id.clone();
                async move { metadata.track_details(&content_id).await }
            })
            .await;

        let genres = match details {
            Ok(Some(track)) => track.genres,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!(content_id = %song.content_id, error = %e, "Genre backfill lookup failed");
                return Vec::new();
            }
        };

        if !genres.is_empty() {
            if let Err(e) = self.store.replace_genres(song.id, &genres).await {
                warn!(song_id = song.id, error = %e, "Failed to persist back-filled genres");
            }
        }
        genres
    }
}

#[async_trait]
impl CandidatePool for LibraryPool {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Library
    }

    async fn gather(&self, ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>> {
        let liked = self.store.liked_songs(ctx.user, LIKED_FETCH_LIMIT).await?;
        let eligible: Vec<SongRecord> = liked
            .into_iter()
            .filter(|s| !ctx.is_excluded(&s.content_id))
            .collect();

        // Backfills are independent lookups; run them side by side inside the pool timeout
        let picks = sample(&eligible, ctx.limit);
        let candidates = join_all(picks.iter().map(|song| self.candidate(song))).await;
        Ok(candidates)
    }
}
