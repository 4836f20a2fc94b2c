//! Democratic turn rotation per channel
//!
//! Each channel keeps an ordered member list and a cursor. Existing members keep
//! their relative order across updates, newcomers join at the end, and departures
//! are removed without reshuffling. A cursor left past the end of a shrunk list
//! wraps to the front, continuing the rotation.

use cadence_common::models::{ChannelId, ParticipantId};
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
struct Rotation {
    members: Vec<ParticipantId>,
    index: usize,
}

/// Whose taste drives the next discovery pick, per channel
#[derive(Debug, Default)]
pub struct TurnTracker {
    channels: HashMap<ChannelId, Rotation>,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync membership with the participants currently present
    pub fn update_members(&mut self, channel: ChannelId, present: &[ParticipantId]) {
        let rotation = self.channels.entry(channel).or_default();

        let mut members: Vec<ParticipantId> = rotation
            .members
            .iter()
            .copied()
            .filter(|m| present.contains(m))
            .collect();
        for p in present {
            if !members.contains(p) {
                members.push(*p);
            }
        }

        rotation.members = members;
        if rotation.index >= rotation.members.len() {
            rotation.index = 0;
        }
    }

    /// Participant whose turn it is, `None` when nobody is present
    pub fn current(&self, channel: ChannelId) -> Option<ParticipantId> {
        let rotation = self.channels.get(&channel)?;
        rotation.members.get(rotation.index).copied()
    }

    /// Move the cursor to the next member
    pub fn advance(&mut self, channel: ChannelId) {
        if let Some(rotation) = self.channels.get_mut(&channel) {
            if !rotation.members.is_empty() {
                rotation.index = (rotation.index + 1) % rotation.members.len();
            }
        }
    }

    pub fn members(&self, channel: ChannelId) -> Vec<ParticipantId> {
        self.channels
            .get(&channel)
            .map(|r| r.members.clone())
            .unwrap_or_default()
    }

    /// Cursor position, `None` when the channel has no members
    pub fn position(&self, channel: ChannelId) -> Option<usize> {
        self.channels
            .get(&channel)
            .filter(|r| !r.members.is_empty())
            .map(|r| r.index)
    }

    pub fn forget(&mut self, channel: ChannelId) {
        self.channels.remove(&channel);
    }
}
