//! # Cadence Common Library
//!
//! Shared code for the Cadence playback scheduler crates including:
//! - Domain models (channels, participants, queue items, discovery sources)
//! - Error type and `Result` alias
//! - Configuration loading (TOML bootstrap with built-in defaults)
//! - Logging bootstrap
//! - Retry policy for unreliable external collaborators
//! - Persistence traits and the SQLite-backed store

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod retry;
pub mod store;
pub mod time;

pub use error::{Error, Result};
pub use models::{ChannelId, DiscoverySource, ParticipantId, QueueItem, StreamSource};
pub use retry::RetryPolicy;
