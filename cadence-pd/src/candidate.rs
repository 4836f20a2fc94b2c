//! Transient discovery candidates and the selected result

use cadence_common::models::{DiscoverySource, ParticipantId, QueueItem};

use crate::vector::{encode_song, SongVector};

/// A candidate proposed by one pool during a single discovery cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SongCandidate {
    pub content_id: String,
    pub title: String,
    pub artist: String,
    pub source: DiscoverySource,
    pub vector: SongVector,
    pub duration_seconds: Option<u32>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    /// Popularity in [0, 1]
    pub popularity: f32,
    pub reason: Option<String>,
}

impl SongCandidate {
    /// Build a candidate and encode its vector
    ///
    /// `source_tag` selects the source-affinity slot; pools may use a finer tag
    /// (e.g. "chart") than the coarse [`DiscoverySource`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        source: DiscoverySource,
        source_tag: &str,
        genres: Vec<String>,
        year: Option<i32>,
        popularity: f32,
    ) -> Self {
        let artist = artist.into();
        let vector = encode_song(&genres, Some(artist.as_str()), year, popularity, source_tag);
        Self {
            content_id: content_id.into(),
            title: title.into(),
            artist,
            source,
            vector,
            duration_seconds: None,
            year,
            genres,
            popularity,
            reason: None,
        }
    }

    pub fn with_duration(mut self, duration_seconds: Option<u32>) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// The winner of a discovery cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredSong {
    pub content_id: String,
    pub title: String,
    pub artist: String,
    pub source: DiscoverySource,
    pub reason: String,
    /// Participant whose turn produced this pick
    pub for_user: ParticipantId,
    pub duration_seconds: Option<u32>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub score: f32,
}

impl DiscoveredSong {
    pub fn from_candidate(candidate: SongCandidate, for_user: ParticipantId, score: f32) -> Self {
        let reason = candidate
            .reason
            .unwrap_or_else(|| "Discovered for you".to_string());
        Self {
            content_id: candidate.content_id,
            title: candidate.title,
            artist: candidate.artist,
            source: candidate.source,
            reason,
            for_user,
            duration_seconds: candidate.duration_seconds,
            genre: candidate.genres.into_iter().next(),
            year: candidate.year,
            score,
        }
    }

    pub fn into_queue_item(self) -> QueueItem {
        let mut item = QueueItem::new(self.content_id, self.title, self.artist, self.source);
        item.reason = Some(self.reason);
        item.for_user = Some(self.for_user);
        item.duration_seconds = self.duration_seconds;
        item.genre = self.genre;
        item.year = self.year;
        item
    }
}
