//! Seam between the player and the discovery engine

use async_trait::async_trait;

use cadence_pd::{DiscoveredSong, DiscoveryEngine, DiscoveryRequest};

/// Picks the next song for a channel when nobody has asked for anything
///
/// `None` means nothing could be selected this cycle.
#[async_trait]
pub trait NextSongSource: Send + Sync {
    async fn next_song(&self, request: DiscoveryRequest) -> Option<DiscoveredSong>;
}

#[async_trait]
impl NextSongSource for DiscoveryEngine {
    async fn next_song(&self, request: DiscoveryRequest) -> Option<DiscoveredSong> {
        self.select(request).await
    }
}
