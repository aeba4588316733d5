/// Push-channel payloads
/// Delivered at-least-once and unordered by the transport collaborator;
/// consumers must be idempotent and drop their own echoes
use serde::{Deserialize, Serialize};

use rundown::{ItemId, Rundown, ShowcallerState};

use crate::TabId;

/// A document-change event received from the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RundownEvent {
    /// Tab that caused the change; events from this client's own tab are
    /// dropped on receipt
    pub origin: TabId,

    /// Document version after the change
    pub version: u64,

    pub scope: EventScope,
}

impl RundownEvent {
    pub fn new(origin: TabId, version: u64, scope: EventScope) -> Self {
        Self {
            origin,
            version,
            scope,
        }
    }
}

/// Changed scope carried by an event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventScope {
    /// A single field changed
    #[serde(rename = "field")]
    Field {
        item_id: ItemId,
        field: String,
        value: String,
    },

    /// Full document snapshot, sent after structural or delta writes
    #[serde(rename = "snapshot")]
    Snapshot { rundown: Rundown },

    /// Showcaller cursor moved
    #[serde(rename = "showcaller")]
    Showcaller { state: ShowcallerState },
}
