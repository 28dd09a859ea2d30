//! Double-buffered content store for one region.
//!
//! Channels live in two slots: the *live* slot the playback cursor iterates,
//! and the *staging* slot that receives every upsert and removal. The slots
//! trade places only at a rotation boundary (`swap`), so a content push can
//! never disturb the slide currently showing. Channel order within a slot is
//! insertion order ("key order"), giving a deterministic round-robin.

use std::collections::HashMap;

use log::{debug, info};

use super::model::Channel;

/// An insertion-ordered channel map: a key vector for deterministic cursor
/// iteration plus a hash map for O(1) membership and lookup.
#[derive(Clone, Debug, Default)]
pub struct ChannelSlot {
    keys: Vec<String>,
    channels: HashMap<String, Channel>,
}

impl ChannelSlot {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.channels.contains_key(key)
    }

    /// Inserts or replaces a channel. A replacement keeps the channel's
    /// original position in key order, so re-pushing content does not move a
    /// channel to the back of the rotation.
    pub fn upsert(&mut self, channel: Channel) {
        let key = channel.key();
        if self.channels.insert(key.clone(), channel).is_none() {
            self.keys.push(key);
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if self.channels.remove(key).is_some() {
            self.keys.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// The channel at `index` in key order.
    pub fn by_index(&self, index: usize) -> Option<&Channel> {
        let key = self.keys.get(index)?;
        self.channels.get(key)
    }

    pub fn get(&self, key: &str) -> Option<&Channel> {
        self.channels.get(key)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.keys.iter().filter_map(|key| self.channels.get(key))
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        // Iteration order is irrelevant here; all channels are visited.
        self.channels.values_mut()
    }
}

/// The two-slot buffer plus the swap bookkeeping for one region.
#[derive(Debug, Default)]
pub struct ContentBuffer {
    slots: [ChannelSlot; 2],
    display_index: usize,
    slides_updated: bool,
}

impl ContentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot the playback cursor is currently iterating.
    pub fn live(&self) -> &ChannelSlot {
        &self.slots[self.display_index]
    }

    /// Mutable access to the live slot, used only by the schedule evaluator
    /// to write derived eligibility fields.
    pub fn live_mut(&mut self) -> &mut ChannelSlot {
        &mut self.slots[self.display_index]
    }

    fn staging_index(&self) -> usize {
        (self.display_index + 1) % 2
    }

    /// Whether staged changes are waiting for the next rotation boundary.
    pub fn slides_updated(&self) -> bool {
        self.slides_updated
    }

    /// Applies a channel upsert.
    ///
    /// While the region is running, only the staging slot is written and the
    /// update flag is raised. On the very first content a region receives
    /// (cold start, nothing on screen to protect), both slots are filled so
    /// the rotation can begin immediately.
    pub fn upsert_channel(&mut self, channel: Channel, running: bool) {
        if running {
            debug!("Staging update for channel {}", channel.id);
            self.slots[self.staging_index()].upsert(channel);
            self.slides_updated = true;
        } else {
            debug!("Cold-start insert of channel {} into both slots", channel.id);
            self.slots[0].upsert(channel.clone());
            self.slots[1].upsert(channel);
        }
    }

    /// Removes a channel from the staging slot only; the live slot keeps it
    /// until the next swap.
    pub fn remove_channel(&mut self, key: &str) {
        let staging = self.staging_index();
        if self.slots[staging].remove(key) {
            info!("Removed channel {} from staging slot", key);
            self.slides_updated = true;
        }
    }

    /// Promotes the staging slot to live. Only the playback state machine
    /// calls this, and only at a rotation boundary.
    ///
    /// After the flip, the new staging slot is rebaselined to the new live
    /// content so later edits accumulate on the latest state.
    pub fn swap(&mut self) {
        let staging = self.staging_index();
        info!(
            "Swapping buffers: {} channel(s) become live, key order {:?}",
            self.slots[staging].len(),
            self.slots[staging].keys()
        );
        self.display_index = staging;
        let snapshot = self.slots[staging].clone();
        self.slots[(staging + 1) % 2] = snapshot;
        self.slides_updated = false;
    }

    /// Drops all content from both slots (backend-initiated reload).
    pub fn clear(&mut self) {
        self.slots = [ChannelSlot::default(), ChannelSlot::default()];
        self.display_index = 0;
        self.slides_updated = false;
    }
}
