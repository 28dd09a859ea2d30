//! Event shapes exchanged with the backend transport and between tasks.
//!
//! The transport collaborator delivers newline-delimited JSON objects tagged
//! by `event`, mirroring what the middleware pushes over its socket:
//!
//! ```json
//! {"event": "ready", "screen": {"title": "Lobby"}}
//! {"event": "channelPush", "regions": [1], "data": {"id": 5, "slides": []}}
//! {"event": "channelRemoved", "id": 5}
//! {"event": "reload"}
//! ```
//!
//! Internally each region is driven by [`RegionCommand`]s and reports its
//! scheduled-slide count through [`RegionInfo`], which the main task
//! aggregates to decide whether the fallback image should be shown.

use serde::Deserialize;

use super::model::{Channel, Screen};

/// An event received from the backend transport.
#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "event")]
pub enum BackendEvent {
    /// The screen was accepted; carries the screen/template descriptor.
    /// Scheduling begins after the template settle delay.
    #[serde(rename = "ready")]
    Ready {
        #[serde(default)]
        screen: Screen,
        #[serde(default, rename = "statusCode")]
        status_code: Option<u16>,
    },
    /// Connected and authenticated, but no content has been pushed yet.
    #[serde(rename = "awaitingContent")]
    AwaitingContent,
    /// The screen has no stored activation; an activation prompt should be
    /// shown by the (out-of-scope) UI.
    #[serde(rename = "activationNotComplete")]
    ActivationNotComplete,
    /// A channel definition push. Regions not listed in `regions` treat an
    /// already-held channel as removed.
    #[serde(rename = "channelPush")]
    ChannelPush { regions: Vec<i64>, data: Channel },
    /// A channel was deleted on the backend.
    #[serde(rename = "channelRemoved")]
    ChannelRemoved { id: i64 },
    /// Drop all local content state; the backend will re-push everything.
    #[serde(rename = "reload")]
    Reload,
}

/// A command delivered to one region controller task.
#[derive(Clone, Debug)]
pub enum RegionCommand {
    /// Upsert (or, when this region is not in `regions`, remove) a channel.
    AddChannel { regions: Vec<i64>, channel: Channel },
    /// Remove a channel from the staging slot.
    RemoveChannel { id: i64 },
    /// Clear all buffered content and return to the awaiting-content state.
    Reload,
}

/// Emitted by a region after every progress-box reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionInfo {
    pub id: i64,
    pub scheduled_slides: usize,
}
