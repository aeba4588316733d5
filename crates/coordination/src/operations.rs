/// Operations raised by user and system actions
/// Transient: created on action, consumed by the coordinator, discarded
/// after application or explicit cancellation
use serde::{Deserialize, Serialize};

use rundown::{Item, ItemId, Rundown, ShowcallerState};

use crate::{Result, TabId};

/// Unique operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

/// One edit or control action against the shared rundown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,

    /// Tab that raised the operation, for echo filtering
    pub origin: TabId,

    /// Client-side creation time
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub kind: OperationKind,
}

impl Operation {
    pub fn new(origin: TabId, kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            origin,
            timestamp: chrono::Utc::now(),
            kind,
        }
    }

    pub fn class(&self) -> OpClass {
        self.kind.class()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationKind {
    /// Single-field edit; idempotent last-value-wins
    #[serde(rename = "cell_edit")]
    CellEdit {
        item_id: ItemId,
        field: String,
        value: String,
    },

    /// Edit changing item identity, count, or order
    #[serde(rename = "structural")]
    Structural(StructuralKind),

    /// Showcaller control action
    #[serde(rename = "playback")]
    Playback(PlaybackKind),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StructuralKind {
    #[serde(rename = "insert")]
    Insert { index: usize, item: Item },

    #[serde(rename = "delete")]
    Delete { item_ids: Vec<ItemId> },

    #[serde(rename = "reorder")]
    Reorder { order: Vec<ItemId> },

    #[serde(rename = "bulk_paste")]
    BulkPaste { index: usize, items: Vec<Item> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PlaybackKind {
    #[serde(rename = "play")]
    Play { item_id: Option<ItemId> },

    #[serde(rename = "pause")]
    Pause,

    #[serde(rename = "advance")]
    Advance,

    #[serde(rename = "reset")]
    Reset,
}

/// Lock class an operation holds while in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpClass {
    Cell,
    Structural,
    Playback,
}

impl OperationKind {
    pub fn class(&self) -> OpClass {
        match self {
            OperationKind::CellEdit { .. } => OpClass::Cell,
            OperationKind::Structural(_) => OpClass::Structural,
            OperationKind::Playback(_) => OpClass::Playback,
        }
    }

    /// Apply this operation to the cached document and playback state
    pub fn apply(&self, rundown: &mut Rundown, showcaller: &mut ShowcallerState) -> Result<()> {
        match self {
            OperationKind::CellEdit {
                item_id,
                field,
                value,
            } => {
                rundown.upsert_field(*item_id, field, value)?;
                Ok(())
            }

            OperationKind::Structural(kind) => {
                match kind {
                    StructuralKind::Insert { index, item } => {
                        rundown.insert_item(*index, item.clone())?;
                    }
                    StructuralKind::Delete { item_ids } => {
                        rundown.remove_items(item_ids);
                    }
                    StructuralKind::Reorder { order } => {
                        rundown.reorder(order)?;
                    }
                    StructuralKind::BulkPaste { index, items } => {
                        for (offset, item) in items.iter().enumerate() {
                            rundown.insert_item(index + offset, item.clone())?;
                        }
                    }
                }
                rundown.bump_version();
                Ok(())
            }

            OperationKind::Playback(kind) => {
                match kind {
                    PlaybackKind::Play { item_id } => showcaller.play(*item_id, rundown),
                    PlaybackKind::Pause => showcaller.pause(),
                    PlaybackKind::Advance => showcaller.advance(rundown),
                    PlaybackKind::Reset => showcaller.reset(),
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoordinationError;
    use rundown::ItemKind;

    fn doc() -> Rundown {
        let mut doc = Rundown::new("Test");
        doc.items
            .push(Item::new(ItemKind::Regular).with_field("slug", "a"));
        doc.items
            .push(Item::new(ItemKind::Regular).with_field("slug", "b"));
        doc
    }

    #[test]
    fn test_cell_edit_applies_idempotently() {
        let mut doc = doc();
        let mut showcaller = ShowcallerState::new();
        let id = doc.items[0].id;

        let kind = OperationKind::CellEdit {
            item_id: id,
            field: "slug".to_string(),
            value: "cold open".to_string(),
        };

        kind.apply(&mut doc, &mut showcaller).unwrap();
        let version = doc.version;
        kind.apply(&mut doc, &mut showcaller).unwrap();

        assert_eq!(doc.item(id).unwrap().field("slug"), Some("cold open"));
        // Cell edits do not touch the document version stamp.
        assert_eq!(doc.version, version);
    }

    #[test]
    fn test_structural_bumps_version() {
        let mut doc = doc();
        let mut showcaller = ShowcallerState::new();

        let kind = OperationKind::Structural(StructuralKind::Insert {
            index: 1,
            item: Item::new(ItemKind::Regular),
        });
        kind.apply(&mut doc, &mut showcaller).unwrap();

        assert_eq!(doc.items.len(), 3);
        assert_eq!(doc.version, 1);
    }

    #[test]
    fn test_bulk_paste_preserves_order() {
        let mut doc = doc();
        let mut showcaller = ShowcallerState::new();

        let pasted = vec![
            Item::new(ItemKind::Regular).with_field("slug", "p1"),
            Item::new(ItemKind::Regular).with_field("slug", "p2"),
        ];
        let kind = OperationKind::Structural(StructuralKind::BulkPaste {
            index: 1,
            items: pasted,
        });
        kind.apply(&mut doc, &mut showcaller).unwrap();

        let slugs: Vec<_> = doc.items.iter().map(|i| i.field("slug").unwrap()).collect();
        assert_eq!(slugs, vec!["a", "p1", "p2", "b"]);
    }

    #[test]
    fn test_cell_edit_on_deleted_item_fails_cleanly() {
        let mut doc = doc();
        let mut showcaller = ShowcallerState::new();

        let kind = OperationKind::CellEdit {
            item_id: ItemId::new(),
            field: "slug".to_string(),
            value: "gone".to_string(),
        };

        let result = kind.apply(&mut doc, &mut showcaller);
        assert!(matches!(result, Err(CoordinationError::Document(_))));
    }

    #[test]
    fn test_playback_advance() {
        let doc = doc();
        let mut showcaller = ShowcallerState::new();
        let mut cached = doc.clone();

        OperationKind::Playback(PlaybackKind::Play { item_id: None })
            .apply(&mut cached, &mut showcaller)
            .unwrap();
        assert_eq!(showcaller.current_item, Some(doc.items[0].id));

        OperationKind::Playback(PlaybackKind::Advance)
            .apply(&mut cached, &mut showcaller)
            .unwrap();
        assert_eq!(showcaller.current_item, Some(doc.items[1].id));
    }
}
