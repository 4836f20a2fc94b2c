//! Wildcard pool: regional charts, falling back to a popularity search

use async_trait::async_trait;
use cadence_common::models::DiscoverySource;
use cadence_common::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{pick, sample, CandidatePool, PoolContext};
use crate::candidate::SongCandidate;
use crate::providers::{MetadataProvider, SearchKind, TrackInfo};

const REGIONS: [&str; 2] = ["US", "UK"];
const PLAYLIST_SEARCH_LIMIT: usize = 3;
const CHART_TRACK_LIMIT: usize = 50;
const FALLBACK_QUERY: &str = "top hits";

pub struct WildcardPool {
    metadata: Arc<dyn MetadataProvider>,
    retry: RetryPolicy,
}

impl WildcardPool {
    pub fn new(metadata: Arc<dyn MetadataProvider>, retry: RetryPolicy) -> Self {
        Self { metadata, retry }
    }

    async fn chart_tracks(&self, region: &str) -> Vec<TrackInfo> {
        let metadata = Arc::clone(&self.metadata);
        let query = format!("Top 100 Songs {region}");
        let playlists = self
            .retry
            .run("search_playlists", move || {
                let metadata = Arc::clone(&metadata);
                let query = query.clone();
                async move { metadata.search_playlists(&query, PLAYLIST_SEARCH_LIMIT).await }
            })
            .await
            .unwrap_or_else(|e| {
                warn!(region, error = %e, "Chart playlist search failed");
                Vec::new()
            });

        let Some(playlist) = pick(&playlists) else {
            debug!(region, "No chart playlist found");
            return Vec::new();
        };

        let metadata = Arc::clone(&self.metadata);
        let playlist_id = playlist.id.clone();
        self.retry
            .run("playlist_tracks", move || {
                let metadata = Arc::clone(&metadata);
                let playlist_id = playlist_id.clone();
                async move { metadata.playlist_tracks(&playlist_id, CHART_TRACK_LIMIT).await }
            })
            .await
            .unwrap_or_else(|e| {
                warn!(playlist = %playlist.id, error = %e, "Chart playlist fetch failed");
                Vec::new()
            })
    }
}

#[async_trait]
impl CandidatePool for WildcardPool {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Wildcard
    }

    async fn gather(&self, ctx: &PoolContext) -> anyhow::Result<Vec<SongCandidate>> {
        let region = pick(&REGIONS).unwrap_or("US");
        let charts = self.chart_tracks(region).await;

        let (tracks, tag, reason) = if charts.is_empty() {
            let metadata = Arc::clone(&self.metadata);
            let limit = ctx.limit;
            let found = self
                .retry
                .run("search", move || {
                    let metadata = Arc::clone(&metadata);
                    async move { metadata.search(FALLBACK_QUERY, SearchKind::Songs, limit).await }
                })
                .await?;
            (found, "wildcard", "Popular right now".to_string())
        } else {
            (charts, "chart", format!("Popular in {region} charts"))
        };

        let eligible: Vec<TrackInfo> = tracks
            .into_iter()
            .filter(|t| !t.id.is_empty() && !ctx.is_excluded(&t.id))
            .collect();

        Ok(sample(&eligible, ctx.limit)
            .into_iter()
            .map(|t| {
                SongCandidate::new(
                    t.id,
                    t.title,
                    t.artist,
                    DiscoverySource::Wildcard,
                    tag,
                    t.genres,
                    t.year,
                    t.popularity.unwrap_or(0.5),
                )
                .with_duration(t.duration_seconds)
                .with_reason(reason.clone())
            })
            .collect())
    }
}
