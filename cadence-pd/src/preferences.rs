//! Preference learning from explicit feedback and imported playlists
//!
//! Opted-out participants are never learned from. Skips are not dislikes; only an
//! explicit dislike lowers scores.

use cadence_common::models::{decade_label, ParticipantId, PreferenceCategory, PreferenceScore, SongRecord};
use cadence_common::store::Store;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::providers::TrackInfo;
use crate::Result;

const LIKE_GENRE_BOOST: f64 = 0.1;
const LIKE_ARTIST_BOOST: f64 = 0.2;
const LIKE_DECADE_BOOST: f64 = 0.05;
const DISLIKE_GENRE_PENALTY: f64 = 0.05;
const DISLIKE_ARTIST_PENALTY: f64 = 0.3;

/// Share of a playlist a genre or decade must fill to score 1.0
const GENRE_SATURATION_SHARE: f64 = 0.1;
/// Share of a playlist an artist must fill to score 1.0
const ARTIST_SATURATION_SHARE: f64 = 0.05;

/// Distinct keys learned per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearnedCounts {
    pub genres: usize,
    pub artists: usize,
    pub decades: usize,
}

/// Top preferences for display
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceSummary {
    pub top_genres: Vec<PreferenceScore>,
    pub top_artists: Vec<PreferenceScore>,
    pub top_decades: Vec<PreferenceScore>,
    pub total_preferences: usize,
}

pub struct PreferenceLearner {
    store: Arc<dyn Store>,
}

impl PreferenceLearner {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn adjust(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        key: &str,
        delta: f64,
    ) -> Result<f64> {
        let current = self
            .store
            .get_preference(user, category, key)
            .await?
            .unwrap_or(0.0);
        Ok(self
            .store
            .update_preference(user, category, key, current + delta)
            .await?)
    }

    /// Positive feedback: nudge the song's genres, artist and decade up
    pub async fn record_like(&self, user: ParticipantId, song: &SongRecord) -> Result<()> {
        if self.store.is_opted_out(user).await? {
            return Ok(());
        }

        for genre in &song.genres {
            self.adjust(user, PreferenceCategory::Genre, &genre.to_lowercase(), LIKE_GENRE_BOOST)
                .await?;
        }
        self.adjust(user, PreferenceCategory::Artist, &song.artist.to_lowercase(), LIKE_ARTIST_BOOST)
            .await?;
        if let Some(decade) = song.decade() {
            self.adjust(user, PreferenceCategory::Decade, &decade, LIKE_DECADE_BOOST)
                .await?;
        }

        debug!(user_id = %user, content_id = %song.content_id, "Recorded like");
        Ok(())
    }

    /// Explicit negative feedback; genres floor at 0, artists may go negative
    pub async fn record_dislike(&self, user: ParticipantId, song: &SongRecord) -> Result<()> {
        if self.store.is_opted_out(user).await? {
            return Ok(());
        }

        for genre in &song.genres {
            self.adjust(user, PreferenceCategory::Genre, &genre.to_lowercase(), -DISLIKE_GENRE_PENALTY)
                .await?;
        }
        self.adjust(
            user,
            PreferenceCategory::Artist,
            &song.artist.to_lowercase(),
            -DISLIKE_ARTIST_PENALTY,
        )
        .await?;

        debug!(user_id = %user, content_id = %song.content_id, "Recorded dislike");
        Ok(())
    }

    pub async fn boost_artist(&self, user: ParticipantId, artist: &str, amount: f64) -> Result<()> {
        if self.store.is_opted_out(user).await? {
            return Ok(());
        }
        let score = self
            .adjust(user, PreferenceCategory::Artist, &artist.to_lowercase(), amount)
            .await?;
        info!(user_id = %user, artist, score, "Boosted artist");
        Ok(())
    }

    /// Derive affinities from a track list (e.g. an imported playlist)
    ///
    /// Scores are frequency based and averaged with any existing non-zero score.
    pub async fn learn_from_tracks(&self, user: ParticipantId, tracks: &[TrackInfo]) -> Result<LearnedCounts> {
        if self.store.is_opted_out(user).await? {
            info!(user_id = %user, "Participant opted out, skipping preference learning");
            return Ok(LearnedCounts::default());
        }

        let mut genres: BTreeMap<String, usize> = BTreeMap::new();
        let mut artists: BTreeMap<String, usize> = BTreeMap::new();
        let mut decades: BTreeMap<String, usize> = BTreeMap::new();

        for track in tracks {
            for genre in &track.genres {
                *genres.entry(genre.to_lowercase()).or_default() += 1;
            }
            if !track.artist.trim().is_empty() {
                *artists.entry(track.artist.to_lowercase()).or_default() += 1;
            }
            if let Some(year) = track.year {
                *decades.entry(decade_label(year)).or_default() += 1;
            }
        }

        let total = tracks.len().max(1) as f64;
        self.blend_counts(user, PreferenceCategory::Genre, &genres, total * GENRE_SATURATION_SHARE)
            .await?;
        self.blend_counts(user, PreferenceCategory::Artist, &artists, total * ARTIST_SATURATION_SHARE)
            .await?;
        self.blend_counts(user, PreferenceCategory::Decade, &decades, total * GENRE_SATURATION_SHARE)
            .await?;

        let counts = LearnedCounts {
            genres: genres.len(),
            artists: artists.len(),
            decades: decades.len(),
        };
        info!(
            user_id = %user,
            genres = counts.genres,
            artists = counts.artists,
            decades = counts.decades,
            "Learned preferences from tracks"
        );
        Ok(counts)
    }

    async fn blend_counts(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        counts: &BTreeMap<String, usize>,
        saturation: f64,
    ) -> Result<()> {
        for (key, &count) in counts {
            let score = (count as f64 / saturation).min(1.0);
            let blended = match self.store.get_preference(user, category, key).await? {
                Some(current) if current != 0.0 => (current + score) / 2.0,
                _ => score,
            };
            self.store.update_preference(user, category, key, blended).await?;
        }
        Ok(())
    }

    pub async fn summary(&self, user: ParticipantId) -> Result<PreferenceSummary> {
        Ok(PreferenceSummary {
            top_genres: self.store.top_preferences(user, PreferenceCategory::Genre, 5).await?,
            top_artists: self.store.top_preferences(user, PreferenceCategory::Artist, 5).await?,
            top_decades: self.store.top_preferences(user, PreferenceCategory::Decade, 3).await?,
            total_preferences: self.store.all_preferences(user).await?.len(),
        })
    }
}
