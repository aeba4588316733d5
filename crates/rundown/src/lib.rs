/// Shared rundown document model
/// An ordered list of typed items edited collaboratively by multiple clients
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod model;
pub use model::*;

mod showcaller;
pub use showcaller::*;

#[derive(Debug, Error)]
pub enum RundownError {
    #[error("item already exists: {0}")]
    ItemExists(ItemId),

    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("invalid reorder: {0}")]
    InvalidReorder(String),
}

pub type Result<T> = std::result::Result<T, RundownError>;

/// Rundown document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RundownId(pub uuid::Uuid);

impl RundownId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RundownId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RundownId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Item identifier, stable across reorders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub uuid::Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
