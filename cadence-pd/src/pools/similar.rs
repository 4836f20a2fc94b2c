//! Similar pool: related tracks seeded from liked songs

use async_trait::async_trait;
use cadence_common::models::{DiscoverySource, SongRecord};
use cadence_common::store::Store;
use cadence_common::RetryPolicy;
use std::sync::Arc;
use tracing::warn;

use super::{sample, CandidatePool, PoolContext};
use crate::candidate::SongCandidate;
use crate::providers::MetadataProvider;

const SEED_COUNT: usize = 2;
const LIKED_FETCH_LIMIT: u32 = 20;

pub struct SimilarPool {
    store: Arc<dyn Store>,
    metadata: Arc<dyn MetadataProvider>,
    retry: RetryPolicy,
}

impl SimilarPool {
    pub fn new(store: Arc<dyn Store>, metadata: Arc<dyn MetadataProvider>, retry: RetryPolicy) -> Self {
        Self { store, metadata, retry }
    }

    fn candidates_from_seed(
        seed: &SongRecord,
        related: Vec<crate::providers::TrackInfo>,
        ctx: &PoolContext,
    ) -> Vec<SongCandidate> {
        let seed_artist = seed.artist.trim().to_lowercase();
        related
            .into_iter()
            .filter(|t| t.id != seed.content_id && !ctx.is_excluded(&t.id))
            // Same-artist tracks are left to the artist pool
            .filter(|t| t.artist.trim().to_lowercase() != seed_artist)
            .map(|t| {
                let genres = if t.genres.is_empty() { seed.genres.clone() } else { t.genres };
                SongCandidate::new(
                    t.id,
                    t.title,
                    t.artist,
                    DiscoverySource::Similar,
                    "similar",
                    genres,
                    t.year,
                    t.popularity.unwrap_or(0.5),
                )
                .with_duration(t.duration_seconds)
                .with_reason(format!("Similar to {}", seed.title))
            })
            .collect()
    }
}

#[async_trait]
impl CandidatePool for SimilarPool {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Similar
    }

    async fn gather(&self, ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>> {
        let liked = self.store.liked_songs(ctx.user, LIKED_FETCH_LIMIT).await?;
        if liked.is_empty() {
            return Ok(Vec::new());
        }

        let seeds = sample(&liked, SEED_COUNT);
        let mut candidates = Vec::new();
        let mut last_error = None;
        let mut any_succeeded = false;

        for seed in &seeds {
            let metadata = Arc::clone(&self.metadata);
            let seed_id = seed.content_id.clone();
            let limit = ctx.limit;
            let related = self
                .retry
                .run("related_tracks", move || {
                    let metadata = Arc::clone(&metadata);
                    let seed_id = seed_id.clone();
                    async move { metadata.related_tracks(&seed_id, limit).await }
                })
                .await;

            match related {
                Ok(tracks) => {
                    any_succeeded = true;
                    candidates.extend(Self::candidates_from_seed(seed, tracks, ctx));
                }
                Err(e) => {
                    warn!(seed = %seed.content_id, error = %e, "Related-track lookup failed");
                    last_error = Some(e);
                }
            }
        }

        match (any_succeeded, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(candidates),
        }
    }
}
