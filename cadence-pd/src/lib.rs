//! # Cadence Program Director
//!
//! Chooses what plays next when nobody has asked for anything:
//! - 128-dimensional song/profile vectors and cosine scoring
//! - Softmax top-K selection
//! - Democratic turn rotation across present participants
//! - Four candidate pools gathered in parallel (library, similar, artist, wildcard)
//! - Preference learning from explicit feedback

pub mod candidate;
pub mod engine;
pub mod error;
pub mod pools;
pub mod preferences;
pub mod providers;
pub mod scoring;
pub mod turns;
pub mod vector;

pub use candidate::{DiscoveredSong, SongCandidate};
pub use engine::{DiscoveryEngine, DiscoveryRequest, SourceWeights};
pub use error::{Error, Result};
pub use preferences::PreferenceLearner;
pub use turns::TurnTracker;
