//! Domain models shared by the Cadence crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Identity of an isolated playback context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a persisted play session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row id of a persisted song
pub type SongId = i64;

/// Row id of a persisted history entry
pub type HistoryId = i64;

/// Where a queue item came from
///
/// Stored in history under the canonical snake_case names below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    UserRequest,
    Similar,
    Artist,
    Wildcard,
    Library,
}

impl DiscoverySource {
    pub const DISCOVERY_POOLS: [DiscoverySource; 4] = [
        DiscoverySource::Library,
        DiscoverySource::Similar,
        DiscoverySource::Artist,
        DiscoverySource::Wildcard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::UserRequest => "user_request",
            DiscoverySource::Similar => "similar",
            DiscoverySource::Artist => "artist",
            DiscoverySource::Wildcard => "wildcard",
            DiscoverySource::Library => "library",
        }
    }

    pub fn is_discovery(&self) -> bool {
        !matches!(self, DiscoverySource::UserRequest)
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoverySource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_request" => Ok(DiscoverySource::UserRequest),
            "similar" => Ok(DiscoverySource::Similar),
            "artist" => Ok(DiscoverySource::Artist),
            "wildcard" => Ok(DiscoverySource::Wildcard),
            "library" => Ok(DiscoverySource::Library),
            other => Err(Error::InvalidInput(format!("unknown discovery source: {other}"))),
        }
    }
}

/// A resolved, directly playable stream reference
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamSource {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl StreamSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }
}

/// One entry in a channel's queue (or its "current" slot)
///
/// Fields fill in as metadata resolves; the item is owned by exactly one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Canonical playback-native content identifier
    pub content_id: String,
    pub title: String,
    pub artist: String,
    /// Resolved stream, `None` until resolution
    pub stream: Option<StreamSource>,
    pub requester: Option<ParticipantId>,
    pub source: DiscoverySource,
    /// Human-readable reason for discovery picks
    pub reason: Option<String>,
    /// Participant whose turn selected this item
    pub for_user: Option<ParticipantId>,
    pub song_id: Option<SongId>,
    pub history_id: Option<HistoryId>,
    pub duration_seconds: Option<u32>,
    pub genre: Option<String>,
    pub year: Option<i32>,
}

impl QueueItem {
    pub fn new(
        content_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        source: DiscoverySource,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            title: title.into(),
            artist: artist.into(),
            stream: None,
            requester: None,
            source,
            reason: None,
            for_user: None,
            song_id: None,
            history_id: None,
            duration_seconds: None,
            genre: None,
            year: None,
        }
    }

    /// An explicit user request
    pub fn requested(
        content_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        requester: ParticipantId,
    ) -> Self {
        let mut item = Self::new(content_id, title, artist, DiscoverySource::UserRequest);
        item.requester = Some(requester);
        item
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Participant whose history and library this play is attributed to
    pub fn target_participant(&self) -> Option<ParticipantId> {
        self.requester.or(self.for_user)
    }

    pub fn is_user_request(&self) -> bool {
        self.source == DiscoverySource::UserRequest
    }
}

/// Affinity score category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceCategory {
    Genre,
    Artist,
    Decade,
}

impl PreferenceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceCategory::Genre => "genre",
            PreferenceCategory::Artist => "artist",
            PreferenceCategory::Decade => "decade",
        }
    }

    /// Valid score range for the category
    ///
    /// Artists may be actively disliked; genres and decades only fade to zero.
    pub fn range(&self) -> (f64, f64) {
        match self {
            PreferenceCategory::Artist => (-1.0, 1.0),
            PreferenceCategory::Genre | PreferenceCategory::Decade => (0.0, 1.0),
        }
    }

    pub fn clamp(&self, score: f64) -> f64 {
        let (lo, hi) = self.range();
        if score.is_nan() {
            return lo.max(0.0);
        }
        score.clamp(lo, hi)
    }
}

impl fmt::Display for PreferenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferenceCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "genre" => Ok(PreferenceCategory::Genre),
            "artist" => Ok(PreferenceCategory::Artist),
            "decade" => Ok(PreferenceCategory::Decade),
            other => Err(Error::InvalidInput(format!("unknown preference category: {other}"))),
        }
    }
}

/// One stored affinity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceScore {
    pub category: PreferenceCategory,
    pub key: String,
    pub score: f64,
}

/// Song metadata offered to the get-or-create upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSong {
    pub content_id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<u32>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    /// Discovery picks are stored ephemeral until someone requests them
    pub ephemeral: bool,
}

impl NewSong {
    pub fn from_item(item: &QueueItem) -> Self {
        Self {
            content_id: item.content_id.clone(),
            title: item.title.clone(),
            artist: item.artist.clone(),
            duration_seconds: item.duration_seconds,
            year: item.year,
            genres: item.genre.iter().cloned().collect(),
            ephemeral: !item.is_user_request(),
        }
    }
}

/// A persisted song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    pub id: SongId,
    pub content_id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<u32>,
    pub year: Option<i32>,
    pub is_ephemeral: bool,
    pub genres: Vec<String>,
}

impl SongRecord {
    /// Decade label such as "1980s"
    pub fn decade(&self) -> Option<String> {
        self.year.map(decade_label)
    }
}

/// One play in a channel's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub channel_id: ChannelId,
    pub session_id: Option<SessionId>,
    pub song_id: SongId,
    pub content_id: String,
    pub title: String,
    pub artist: String,
    pub played_at: DateTime<Utc>,
    pub source: DiscoverySource,
    pub for_user: Option<ParticipantId>,
    pub completed: Option<bool>,
}

/// Explicit feedback on a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    Like,
    Love,
    Dislike,
}

impl Reaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reaction::Like => "like",
            Reaction::Love => "love",
            Reaction::Dislike => "dislike",
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Reaction::Like | Reaction::Love)
    }
}

/// How a song entered a participant's library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibrarySource {
    Request,
    Like,
    Import,
}

impl LibrarySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibrarySource::Request => "request",
            LibrarySource::Like => "like",
            LibrarySource::Import => "import",
        }
    }
}

/// Decade label for a year, e.g. 1987 -> "1980s"
pub fn decade_label(year: i32) -> String {
    format!("{}s", year.div_euclid(10) * 10)
}
