//! Discovery engine
//!
//! One cycle:
//! 1. Sync the channel's turn rotation with the participants present
//! 2. Take whose turn it is (nobody present means no selection) and advance the
//!    cursor right away, so a failed cycle never stalls the rotation
//! 3. Build that participant's profile vector from stored preferences and liked songs
//! 4. Build the cooldown set: plays inside the time window plus the last N plays
//! 5. Gather candidates from every enabled pool in parallel
//! 6. Dedupe by content id, drop cooldown hits, score, softmax-select
//! 7. Back-fill a missing duration before returning
//!
//! Pool and persistence failures are absorbed; the result is either a pick or
//! "no selection".

use cadence_common::config::DiscoveryConfig;
use cadence_common::models::{ChannelId, DiscoverySource, ParticipantId, PreferenceCategory};
use cadence_common::store::Store;
use cadence_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::candidate::{DiscoveredSong, SongCandidate};
use crate::pools::{
    ArtistPool, CandidatePool, LibraryPool, PoolContext, PoolGatherer, SimilarPool, WildcardPool,
};
use crate::providers::{ArtistCatalog, MetadataProvider, TrackNormalizer};
use crate::scoring::{score_candidates, softmax_select};
use crate::turns::TurnTracker;
use crate::vector::{build_user_profile, describe, encode_song, SongVector};
use crate::{Error, Result};

/// Relative weight per pool; zero disables the pool for the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWeights {
    #[serde(default)]
    pub library: u32,
    #[serde(default)]
    pub similar: u32,
    #[serde(default)]
    pub artist: u32,
    #[serde(default)]
    pub wildcard: u32,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            library: 20,
            similar: 60,
            artist: 10,
            wildcard: 30,
        }
    }
}

impl SourceWeights {
    pub fn weight(&self, source: DiscoverySource) -> u32 {
        match source {
            DiscoverySource::Library => self.library,
            DiscoverySource::Similar => self.similar,
            DiscoverySource::Artist => self.artist,
            DiscoverySource::Wildcard => self.wildcard,
            DiscoverySource::UserRequest => 0,
        }
    }

    pub fn is_enabled(&self, source: DiscoverySource) -> bool {
        self.weight(source) > 0
    }

    pub fn any_enabled(&self) -> bool {
        DiscoverySource::DISCOVERY_POOLS.iter().any(|s| self.is_enabled(*s))
    }

    /// Parse a stored JSON map such as `{"similar": 60, "wildcard": 30}`
    ///
    /// Pools missing from the map are disabled.
    pub fn from_json(raw: &str) -> Result<Self> {
        let weights: SourceWeights = serde_json::from_str(raw)?;
        if !weights.any_enabled() {
            return Err(Error::InvalidWeights(format!("every pool disabled: {raw}")));
        }
        Ok(weights)
    }

    /// Serialize for storage as a channel setting
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One discovery cycle's inputs
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub channel: ChannelId,
    pub participants: Vec<ParticipantId>,
    pub weights: Option<SourceWeights>,
    pub cooldown: Duration,
    /// Extra content ids to avoid, e.g. items already queued
    pub exclude: HashSet<String>,
}

impl DiscoveryRequest {
    pub fn new(channel: ChannelId, participants: Vec<ParticipantId>, cooldown: Duration) -> Self {
        Self {
            channel,
            participants,
            weights: None,
            cooldown,
            exclude: HashSet::new(),
        }
    }

    pub fn with_weights(mut self, weights: SourceWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn excluding<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.exclude.extend(ids);
        self
    }
}

/// Collaborators the default pools are built from
#[derive(Clone)]
pub struct DiscoveryProviders {
    pub metadata: Arc<dyn MetadataProvider>,
    pub catalog: Arc<dyn ArtistCatalog>,
    pub normalizer: Arc<dyn TrackNormalizer>,
}

pub struct DiscoveryEngine {
    store: Arc<dyn Store>,
    metadata: Arc<dyn MetadataProvider>,
    gatherer: PoolGatherer,
    turns: Mutex<TurnTracker>,
    config: DiscoveryConfig,
    retry: RetryPolicy,
}

impl DiscoveryEngine {
    /// Engine with the four standard pools
    pub fn new(
        store: Arc<dyn Store>,
        providers: DiscoveryProviders,
        config: DiscoveryConfig,
        retry: RetryPolicy,
    ) -> Self {
        let pools: Vec<Arc<dyn CandidatePool>> = vec![
            Arc::new(LibraryPool::new(store.clone(), providers.metadata.clone(), retry)),
            Arc::new(SimilarPool::new(store.clone(), providers.metadata.clone(), retry)),
            Arc::new(ArtistPool::new(
                store.clone(),
                providers.catalog.clone(),
                providers.normalizer.clone(),
                retry,
            )),
            Arc::new(WildcardPool::new(providers.metadata.clone(), retry)),
        ];
        let mut engine = Self::with_pools(store, providers.metadata, pools, config);
        engine.retry = retry;
        engine
    }

    /// Engine with caller-supplied pools
    pub fn with_pools(
        store: Arc<dyn Store>,
        metadata: Arc<dyn MetadataProvider>,
        pools: Vec<Arc<dyn CandidatePool>>,
        config: DiscoveryConfig,
    ) -> Self {
        let gatherer = PoolGatherer::new(pools, config.pool_timeout());
        Self {
            store,
            metadata,
            gatherer,
            turns: Mutex::new(TurnTracker::new()),
            config,
            retry: RetryPolicy::none(),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Convenience form of [`select`](Self::select)
    pub async fn get_next_song(
        &self,
        channel: ChannelId,
        participants: &[ParticipantId],
        weights: Option<SourceWeights>,
        cooldown_seconds: u64,
    ) -> Option<DiscoveredSong> {
        let mut request = DiscoveryRequest::new(
            channel,
            participants.to_vec(),
            Duration::from_secs(cooldown_seconds),
        );
        request.weights = weights;
        self.select(request).await
    }

    /// Run one discovery cycle
    pub async fn select(&self, request: DiscoveryRequest) -> Option<DiscoveredSong> {
        let start = Instant::now();
        let channel = request.channel;

        let user = self.take_turn(channel, &request.participants)?;
        let weights = request.weights.unwrap_or_default();

        let profile = self.build_profile(user).await;
        debug!(channel_id = %channel, user_id = %user, profile = %describe(&profile), "Built profile");

        let mut exclude = self.cooldown_set(channel, request.cooldown).await;
        exclude.extend(request.exclude);
        let exclude = Arc::new(exclude);

        let ctx = PoolContext {
            channel,
            user,
            exclude: Arc::clone(&exclude),
            limit: self.config.pool_limit,
        };
        let outputs = self.gatherer.gather_all(&ctx, &weights).await;

        let mut seen = HashSet::new();
        let candidates: Vec<SongCandidate> = outputs
            .into_iter()
            .flat_map(|o| o.candidates)
            .filter(|c| !exclude.contains(&c.content_id))
            .filter(|c| seen.insert(c.content_id.clone()))
            .collect();

        if candidates.is_empty() {
            info!(
                channel_id = %channel,
                user_id = %user,
                cooldown_songs = exclude.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Discovery found no candidates"
            );
            return None;
        }

        let pool_size = candidates.len();
        let scored = score_candidates(&profile, candidates, self.config.score_temperature);
        let (winner, score) =
            softmax_select(scored, self.config.top_k, self.config.softmax_temperature)?;
        debug!(content_id = %winner.content_id, winner = %describe(&winner.vector), score, "Selected candidate");

        let mut song = DiscoveredSong::from_candidate(winner, user, score);
        self.backfill_duration(&mut song).await;

        info!(
            channel_id = %channel,
            user_id = %user,
            content_id = %song.content_id,
            source = %song.source,
            score,
            candidates = pool_size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Discovery selected song"
        );
        Some(song)
    }

    /// Whose turn it is now, advancing the cursor for the next cycle
    fn take_turn(&self, channel: ChannelId, participants: &[ParticipantId]) -> Option<ParticipantId> {
        let mut turns = match self.turns.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        turns.update_members(channel, participants);
        let user = turns.current(channel);
        turns.advance(channel);
        user
    }

    /// Current turn holder without advancing
    pub fn current_turn(&self, channel: ChannelId) -> Option<ParticipantId> {
        match self.turns.lock() {
            Ok(turns) => turns.current(channel),
            Err(poisoned) => poisoned.into_inner().current(channel),
        }
    }

    /// Cursor position in the channel's rotation
    pub fn turn_position(&self, channel: ChannelId) -> Option<usize> {
        match self.turns.lock() {
            Ok(turns) => turns.position(channel),
            Err(poisoned) => poisoned.into_inner().position(channel),
        }
    }

    /// Profile vector for a participant; persistence errors degrade to a sparser profile
    pub async fn build_profile(&self, user: ParticipantId) -> SongVector {
        let mut genres = HashMap::new();
        let mut artists = HashMap::new();
        let mut decades = HashMap::new();

        match self.store.all_preferences(user).await {
            Ok(prefs) => {
                for pref in prefs {
                    let target = match pref.category {
                        PreferenceCategory::Genre => &mut genres,
                        PreferenceCategory::Artist => &mut artists,
                        PreferenceCategory::Decade => &mut decades,
                    };
                    target.insert(pref.key, pref.score);
                }
            }
            Err(e) => warn!(user_id = %user, error = %e, "Failed to load preferences"),
        }

        let liked: Vec<SongVector> = match self.store.liked_songs(user, self.config.liked_sample as u32).await {
            Ok(songs) => songs
                .iter()
                .map(|s| encode_song(&s.genres, Some(s.artist.as_str()), s.year, 0.5, "library"))
                .collect(),
            Err(e) => {
                warn!(user_id = %user, error = %e, "Failed to load liked songs");
                Vec::new()
            }
        };

        build_user_profile(&genres, &artists, &decades, &liked)
    }

    /// Recently played content ids: time window plus the last N regardless of time
    pub async fn cooldown_set(&self, channel: ChannelId, window: Duration) -> HashSet<String> {
        let mut ids = HashSet::new();

        match self.store.recent_history_window(channel, window).await {
            Ok(recent) => ids.extend(recent),
            Err(e) => warn!(channel_id = %channel, error = %e, "Failed to load cooldown window"),
        }

        match self
            .store
            .recent_history(channel, self.config.history_cooldown_count)
            .await
        {
            Ok(entries) => ids.extend(entries.into_iter().map(|e| e.content_id)),
            Err(e) => warn!(channel_id = %channel, error = %e, "Failed to load recent history"),
        }

        ids
    }

    async fn backfill_duration(&self, song: &mut DiscoveredSong) {
        if song.duration_seconds.is_some() {
            return;
        }
        let metadata = Arc::clone(&self.metadata);
        let content_id = song.content_id.clone();
        let details = self
            .retry
            .run_with_timeout("track_details", self.config.pool_timeout(), move || {
                let metadata = Arc::clone(&metadata);
                let content_id = content_id.clone();
                async move { metadata.track_details(&content_id).await }
            })
            .await;

        match details {
            Ok(Some(details)) => {
                song.duration_seconds = details.duration_seconds;
                if song.year.is_none() {
                    song.year = details.year;
                }
                if song.genre.is_none() {
                    song.genre = details.genres.into_iter().next();
                }
            }
            Ok(None) => {}
            Err(e) => debug!(content_id = %song.content_id, error = %e, "Duration backfill failed"),
        }
    }
}
