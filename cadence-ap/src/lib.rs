//! # Cadence Audio Player
//!
//! Per-channel playback scheduling:
//! - Channel queue with priority inserts
//! - Playback loop (select, resolve, play, finalize) with failure backoff
//! - Background prefetch, metadata enrichment and queue maintenance
//! - Idle/stuck monitor sweep
//! - Orchestrator owning the channel registry and exposing player commands

pub mod discovery;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod player;
pub mod queue;
pub mod transport;

pub use discovery::NextSongSource;
pub use error::{Error, Result};
pub use monitor::{IdleMonitor, SweepAction, SweepReport};
pub use orchestrator::Orchestrator;
pub use player::{ChannelPlayer, PlayerDeps, PlayerPhase};
pub use queue::PlayQueue;
pub use transport::{
    Enrichment, MetadataEnricher, NowPlaying, PlaybackOutcome, PresentationSink, StreamResolver,
    VoiceTransport,
};
