//! `PlaybackStore` and `PreferenceStore` on an sqlx SQLite pool

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{
    ChannelId, DiscoverySource, HistoryEntry, HistoryId, LibrarySource, NewSong, ParticipantId,
    PreferenceCategory, PreferenceScore, Reaction, SessionId, SongId, SongRecord,
};
use crate::store::{NewHistoryEntry, PlaybackStore, PreferenceStore};
use crate::time::now_millis;
use crate::{Error, Result};

use super::init::{init_database, open_in_memory};

type SongRow = (i64, String, String, String, Option<i64>, Option<i64>, i64);

type HistoryRow = (
    i64,
    i64,
    Option<String>,
    i64,
    String,
    String,
    String,
    i64,
    String,
    Option<i64>,
    Option<i64>,
);

const SONG_COLUMNS: &str =
    "s.id, s.content_id, s.title, s.artist, s.duration_seconds, s.release_year, s.is_ephemeral";

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an already-initialized pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database file
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self::new(init_database(config).await?))
    }

    /// Fresh private in-memory database
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(open_in_memory().await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn genres_for(&self, song_id: SongId) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT genre FROM song_genres WHERE song_id = ? ORDER BY position, genre")
                .bind(song_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(g,)| g).collect())
    }

    async fn hydrate(&self, row: SongRow) -> Result<SongRecord> {
        let (id, content_id, title, artist, duration, year, ephemeral) = row;
        Ok(SongRecord {
            id,
            content_id,
            title,
            artist,
            duration_seconds: duration.and_then(|d| u32::try_from(d).ok()),
            year: year.and_then(|y| i32::try_from(y).ok()),
            is_ephemeral: ephemeral != 0,
            genres: self.genres_for(id).await?,
        })
    }

    async fn hydrate_all(&self, rows: Vec<SongRow>) -> Result<Vec<SongRecord>> {
        let mut songs = Vec::with_capacity(rows.len());
        for row in rows {
            songs.push(self.hydrate(row).await?);
        }
        Ok(songs)
    }
}

fn to_db_id(id: u64) -> i64 {
    id as i64
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn history_from_row(row: HistoryRow) -> Result<HistoryEntry> {
    let (id, channel, session, song_id, content_id, title, artist, played_at, source, for_user, completed) =
        row;
    let session_id = match session {
        Some(raw) => Some(SessionId(
            Uuid::parse_str(&raw).map_err(|e| Error::InvalidInput(format!("bad session id {raw}: {e}")))?,
        )),
        None => None,
    };
    Ok(HistoryEntry {
        id,
        channel_id: ChannelId(channel as u64),
        session_id,
        song_id,
        content_id,
        title,
        artist,
        played_at: from_millis(played_at),
        source: source.parse()?,
        for_user: for_user.map(|u| ParticipantId(u as u64)),
        completed: completed.map(|c| c != 0),
    })
}

#[async_trait]
impl PlaybackStore for SqliteStore {
    async fn get_setting(&self, channel: ChannelId, key: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT value FROM channel_settings WHERE channel_id = ? AND key = ?")
                .bind(to_db_id(channel.0))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(v,)| v))
    }

    async fn set_setting(&self, channel: ChannelId, key: &str, value: &str) -> Result<()> {
        self.ensure_channel(channel).await?;
        sqlx::query(
            r#"
            INSERT INTO channel_settings (channel_id, key, value, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(channel_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(to_db_id(channel.0))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_channel(&self, channel: ChannelId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO channels (id) VALUES (?)")
            .bind(to_db_id(channel.0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_user(&self, user: ParticipantId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users (id) VALUES (?)")
            .bind(to_db_id(user.0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_opted_out(&self, user: ParticipantId) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT opted_out FROM users WHERE id = ?")
            .bind(to_db_id(user.0))
            .fetch_optional(&self.pool)
            .await?;
        Ok(matches!(row, Some((flag,)) if flag != 0))
    }

    async fn set_opt_out(&self, user: ParticipantId, opted_out: bool) -> Result<()> {
        self.ensure_user(user).await?;
        sqlx::query("UPDATE users SET opted_out = ? WHERE id = ?")
            .bind(opted_out as i64)
            .bind(to_db_id(user.0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_song(&self, song: &NewSong) -> Result<SongRecord> {
        if song.content_id.trim().is_empty() {
            return Err(Error::InvalidInput("song content id must not be empty".to_string()));
        }

        // A request for an existing ephemeral song promotes it
        sqlx::query(
            r#"
            INSERT INTO songs (content_id, title, artist, duration_seconds, release_year, is_ephemeral)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                duration_seconds = COALESCE(songs.duration_seconds, excluded.duration_seconds),
                release_year = COALESCE(songs.release_year, excluded.release_year),
                is_ephemeral = MIN(songs.is_ephemeral, excluded.is_ephemeral)
            "#,
        )
        .bind(&song.content_id)
        .bind(&song.title)
        .bind(&song.artist)
        .bind(song.duration_seconds.map(i64::from))
        .bind(song.year.map(i64::from))
        .bind(song.ephemeral as i64)
        .execute(&self.pool)
        .await?;

        let record = self
            .song_by_content_id(&song.content_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("song {} vanished after upsert", song.content_id)))?;

        if record.genres.is_empty() && !song.genres.is_empty() {
            self.replace_genres(record.id, &song.genres).await?;
            return Ok(SongRecord {
                genres: song.genres.clone(),
                ..record
            });
        }

        Ok(record)
    }

    async fn make_permanent(&self, song_id: SongId) -> Result<()> {
        sqlx::query("UPDATE songs SET is_ephemeral = 0 WHERE id = ?")
            .bind(song_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn song_by_id(&self, song_id: SongId) -> Result<Option<SongRecord>> {
        let row: Option<SongRow> = sqlx::query_as(&format!("SELECT {SONG_COLUMNS} FROM songs s WHERE s.id = ?"))
            .bind(song_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn song_by_content_id(&self, content_id: &str) -> Result<Option<SongRecord>> {
        let row: Option<SongRow> =
            sqlx::query_as(&format!("SELECT {SONG_COLUMNS} FROM songs s WHERE s.content_id = ?"))
                .bind(content_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn replace_genres(&self, song_id: SongId, genres: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM song_genres WHERE song_id = ?")
            .bind(song_id)
            .execute(&mut *tx)
            .await?;
        for (position, genre) in genres.iter().enumerate() {
            let genre = genre.trim();
            if genre.is_empty() {
                continue;
            }
            sqlx::query("INSERT OR IGNORE INTO song_genres (song_id, genre, position) VALUES (?, ?, ?)")
                .bind(song_id)
                .bind(genre)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn backfill_song(
        &self,
        song_id: SongId,
        year: Option<i32>,
        duration_seconds: Option<u32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE songs SET
                release_year = COALESCE(release_year, ?),
                duration_seconds = COALESCE(duration_seconds, ?)
            WHERE id = ?
            "#,
        )
        .bind(year.map(i64::from))
        .bind(duration_seconds.map(i64::from))
        .bind(song_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_session(&self, channel: ChannelId) -> Result<SessionId> {
        self.ensure_channel(channel).await?;
        let session = SessionId::new();
        sqlx::query("INSERT INTO playback_sessions (id, channel_id, started_at_ms) VALUES (?, ?, ?)")
            .bind(session.0.to_string())
            .bind(to_db_id(channel.0))
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(session)
    }

    async fn end_session(&self, session: SessionId) -> Result<()> {
        sqlx::query("UPDATE playback_sessions SET ended_at_ms = ? WHERE id = ? AND ended_at_ms IS NULL")
            .bind(now_millis())
            .bind(session.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log_track(&self, entry: &NewHistoryEntry) -> Result<HistoryId> {
        self.ensure_channel(entry.channel_id).await?;
        let result = sqlx::query(
            r#"
            INSERT INTO playback_history
                (channel_id, session_id, song_id, played_at_ms, discovery_source, discovery_reason, for_user_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_db_id(entry.channel_id.0))
        .bind(entry.session_id.map(|s| s.0.to_string()))
        .bind(entry.song_id)
        .bind(now_millis())
        .bind(entry.source.as_str())
        .bind(entry.reason.as_deref())
        .bind(entry.for_user.map(|u| to_db_id(u.0)))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn mark_completed(&self, history_id: HistoryId, completed: bool) -> Result<()> {
        sqlx::query("UPDATE playback_history SET completed = ? WHERE id = ?")
            .bind(completed as i64)
            .bind(history_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_history_window(&self, channel: ChannelId, window: Duration) -> Result<Vec<String>> {
        let since = now_millis() - i64::try_from(window.as_millis()).unwrap_or(i64::MAX / 2);
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT s.content_id
            FROM playback_history h
            JOIN songs s ON s.id = h.song_id
            WHERE h.channel_id = ? AND h.played_at_ms >= ?
            "#,
        )
        .bind(to_db_id(channel.0))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn recent_history(&self, channel: ChannelId, limit: u32) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT h.id, h.channel_id, h.session_id, h.song_id, s.content_id, s.title, s.artist,
                   h.played_at_ms, h.discovery_source, h.for_user_id, h.completed
            FROM playback_history h
            JOIN songs s ON s.id = h.song_id
            WHERE h.channel_id = ?
            ORDER BY h.played_at_ms DESC, h.id DESC
            LIMIT ?
            "#,
        )
        .bind(to_db_id(channel.0))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(history_from_row).collect()
    }

    async fn add_reaction(&self, user: ParticipantId, song_id: SongId, reaction: Reaction) -> Result<()> {
        self.ensure_user(user).await?;
        sqlx::query(
            r#"
            INSERT INTO song_reactions (user_id, song_id, reaction, created_at_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, song_id) DO UPDATE SET
                reaction = excluded.reaction,
                created_at_ms = excluded.created_at_ms
            "#,
        )
        .bind(to_db_id(user.0))
        .bind(song_id)
        .bind(reaction.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn liked_songs(&self, user: ParticipantId, limit: u32) -> Result<Vec<SongRecord>> {
        let rows: Vec<SongRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SONG_COLUMNS}
            FROM song_reactions r
            JOIN songs s ON s.id = r.song_id
            WHERE r.user_id = ? AND r.reaction IN ('like', 'love')
            ORDER BY r.created_at_ms DESC, s.id DESC
            LIMIT ?
            "#
        ))
        .bind(to_db_id(user.0))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_all(rows).await
    }

    async fn add_to_library(
        &self,
        user: ParticipantId,
        song_id: SongId,
        source: LibrarySource,
    ) -> Result<()> {
        self.ensure_user(user).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO user_library (user_id, song_id, source, added_at_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(to_db_id(user.0))
        .bind(song_id)
        .bind(source.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for SqliteStore {
    async fn get_preference(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        key: &str,
    ) -> Result<Option<f64>> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT score FROM user_preferences WHERE user_id = ? AND category = ? AND pref_key = ?",
        )
        .bind(to_db_id(user.0))
        .bind(category.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(score,)| score))
    }

    async fn update_preference(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        key: &str,
        score: f64,
    ) -> Result<f64> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("preference key must not be empty".to_string()));
        }
        let clamped = category.clamp(score);
        self.ensure_user(user).await?;
        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, category, pref_key, score, updated_at_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, category, pref_key) DO UPDATE SET
                score = excluded.score,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(to_db_id(user.0))
        .bind(category.as_str())
        .bind(key)
        .bind(clamped)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(clamped)
    }

    async fn all_preferences(&self, user: ParticipantId) -> Result<Vec<PreferenceScore>> {
        let rows: Vec<(String, String, f64)> = sqlx::query_as(
            "SELECT category, pref_key, score FROM user_preferences WHERE user_id = ? ORDER BY category, score DESC",
        )
        .bind(to_db_id(user.0))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(category, key, score)| {
                Ok(PreferenceScore {
                    category: category.parse()?,
                    key,
                    score,
                })
            })
            .collect()
    }

    async fn top_preferences(
        &self,
        user: ParticipantId,
        category: PreferenceCategory,
        limit: u32,
    ) -> Result<Vec<PreferenceScore>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT pref_key, score FROM user_preferences
            WHERE user_id = ? AND category = ?
            ORDER BY score DESC, pref_key
            LIMIT ?
            "#,
        )
        .bind(to_db_id(user.0))
        .bind(category.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(key, score)| PreferenceScore { category, key, score })
            .collect())
    }

    async fn clear_preferences(&self, user: ParticipantId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE user_id = ?")
            .bind(to_db_id(user.0))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
