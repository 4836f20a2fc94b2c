//! Per-channel settings persisted in the store
//!
//! Missing or unparsable values fall back to configuration defaults.

use std::time::Duration;
use tracing::warn;

use cadence_common::config::{DiscoveryConfig, PlayerConfig};
use cadence_common::store::Store;
use cadence_common::{ChannelId, ParticipantId};
use cadence_pd::{DiscoveryRequest, SourceWeights};

pub const REPLAY_COOLDOWN: &str = "replay_cooldown";
pub const MAX_SONG_DURATION: &str = "max_song_duration";
pub const DISCOVERY_WEIGHTS: &str = "discovery_weights";
pub const AUTOPLAY: &str = "autoplay";
pub const PREBUFFER: &str = "prebuffer";

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub replay_cooldown: Duration,
    /// Discovery picks longer than this are re-rolled
    pub max_song_duration: Option<Duration>,
    pub discovery_weights: Option<SourceWeights>,
    pub autoplay: bool,
    pub pre_buffer: bool,
}

impl ChannelSettings {
    pub fn defaults(player: &PlayerConfig, discovery: &DiscoveryConfig) -> Self {
        Self {
            replay_cooldown: Duration::from_secs(discovery.replay_cooldown_secs),
            max_song_duration: None,
            discovery_weights: None,
            autoplay: player.autoplay,
            pre_buffer: player.pre_buffer,
        }
    }

    pub async fn load(
        store: &dyn Store,
        channel: ChannelId,
        player: &PlayerConfig,
        discovery: &DiscoveryConfig,
    ) -> Self {
        let mut settings = Self::defaults(player, discovery);

        if let Some(secs) = read(store, channel, REPLAY_COOLDOWN)
            .await
            .and_then(|raw| parse_u64(channel, REPLAY_COOLDOWN, &raw))
        {
            settings.replay_cooldown = Duration::from_secs(secs);
        }

        if let Some(minutes) = read(store, channel, MAX_SONG_DURATION)
            .await
            .and_then(|raw| parse_u64(channel, MAX_SONG_DURATION, &raw))
        {
            settings.max_song_duration = match minutes.checked_mul(60) {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => {
                    warn!(channel_id = %channel, minutes, "Song length limit out of range, ignoring it");
                    None
                }
            };
        }

        if let Some(raw) = read(store, channel, DISCOVERY_WEIGHTS).await {
            match SourceWeights::from_json(&raw) {
                Ok(weights) => settings.discovery_weights = Some(weights),
                Err(e) => warn!(channel_id = %channel, error = %e, "Ignoring invalid discovery weights"),
            }
        }

        if let Some(flag) = read(store, channel, AUTOPLAY).await.and_then(|raw| parse_bool(&raw)) {
            settings.autoplay = flag;
        }

        if let Some(flag) = read(store, channel, PREBUFFER).await.and_then(|raw| parse_bool(&raw)) {
            settings.pre_buffer = flag;
        }

        settings
    }

    /// Whether a discovery pick of this length may play
    ///
    /// Unknown durations are allowed.
    pub fn allows_duration(&self, duration_seconds: Option<u32>) -> bool {
        match (self.max_song_duration, duration_seconds) {
            (Some(limit), Some(secs)) => Duration::from_secs(u64::from(secs)) <= limit,
            _ => true,
        }
    }

    pub fn discovery_request(
        &self,
        channel: ChannelId,
        participants: Vec<ParticipantId>,
    ) -> DiscoveryRequest {
        let request = DiscoveryRequest::new(channel, participants, self.replay_cooldown);
        match self.discovery_weights {
            Some(weights) => request.with_weights(weights),
            None => request,
        }
    }
}

async fn read(store: &dyn Store, channel: ChannelId, key: &str) -> Option<String> {
    match store.get_setting(channel, key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(channel_id = %channel, key, error = %e, "Failed to read channel setting");
            None
        }
    }
}

fn parse_u64(channel: ChannelId, key: &str, raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(channel_id = %channel, key, value = raw, "Ignoring non-numeric channel setting");
            None
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

pub(crate) fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
