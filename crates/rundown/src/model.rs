/// Rundown document structure: ordered items, column definitions,
/// scheduling metadata, and the version stamp guarding delta saves
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{ItemId, Result, RundownError, RundownId};

/// Kind of rundown row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemKind {
    #[serde(rename = "regular")]
    Regular,

    #[serde(rename = "header")]
    Header,
}

/// A single rundown row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,

    /// Field values keyed by column key, including custom columns
    pub fields: HashMap<String, String>,

    /// Floated rows are kept in the document but excluded from playback
    pub floated: bool,
}

impl Item {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            id: ItemId::new(),
            kind,
            fields: HashMap::new(),
            floated: false,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Column definition for the rundown grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub name: String,
    pub is_custom: bool,
}

impl Column {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            is_custom: false,
        }
    }

    pub fn custom(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            is_custom: true,
        }
    }
}

/// The shared rundown document
///
/// The persistence layer is the source of truth; each client holds a cached
/// copy of this structure plus unsaved local deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rundown {
    pub id: RundownId,
    pub title: String,
    pub items: Vec<Item>,
    pub columns: Vec<Column>,

    // Scheduling metadata. Empty values mean "not yet populated" and are
    // never treated as conflicting with a populated value on the other side.
    pub start_time: Option<String>,
    pub timezone: Option<String>,
    pub notes: Option<String>,

    /// Monotonically increasing version stamp for delta-mode saves
    pub version: u64,

    /// When set, field edits save as unconditional keyed upserts instead of
    /// version-guarded document deltas
    pub per_cell_save_enabled: bool,
}

impl Rundown {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: RundownId::new(),
            title: title.into(),
            items: Vec::new(),
            columns: Vec::new(),
            start_time: None,
            timezone: None,
            notes: None,
            version: 0,
            per_cell_save_enabled: false,
        }
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn item_index(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    /// Insert an item at the given index (clamped to the item count)
    pub fn insert_item(&mut self, index: usize, item: Item) -> Result<()> {
        if self.item(item.id).is_some() {
            return Err(RundownError::ItemExists(item.id));
        }
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        Ok(())
    }

    /// Remove all listed items; ids not present are ignored
    pub fn remove_items(&mut self, ids: &[ItemId]) {
        self.items.retain(|item| !ids.contains(&item.id));
    }

    /// Reorder items to match the given id sequence
    ///
    /// The sequence must be a permutation of the current item ids.
    pub fn reorder(&mut self, order: &[ItemId]) -> Result<()> {
        if order.len() != self.items.len() {
            return Err(RundownError::InvalidReorder(format!(
                "expected {} ids, got {}",
                self.items.len(),
                order.len()
            )));
        }

        let mut reordered = Vec::with_capacity(self.items.len());
        for id in order {
            let index = self
                .item_index(*id)
                .ok_or(RundownError::ItemNotFound(*id))?;
            if reordered
                .iter()
                .any(|item: &Item| item.id == *id)
            {
                return Err(RundownError::InvalidReorder(format!(
                    "duplicate id in order: {id}"
                )));
            }
            reordered.push(self.items[index].clone());
        }
        self.items = reordered;
        Ok(())
    }

    /// Idempotent last-value-wins field write
    ///
    /// Applying the same upsert twice leaves the document unchanged, which is
    /// what makes save-timeout retries safe.
    pub fn upsert_field(
        &mut self,
        item_id: ItemId,
        field: &str,
        value: &str,
    ) -> Result<()> {
        let item = self
            .item_mut(item_id)
            .ok_or(RundownError::ItemNotFound(item_id))?;
        item.fields.insert(field.to_string(), value.to_string());
        Ok(())
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_item_rundown() -> Rundown {
        let mut doc = Rundown::new("Morning Show");
        for n in 1..=3 {
            doc.items
                .push(Item::new(ItemKind::Regular).with_field("slug", format!("segment {n}")));
        }
        doc
    }

    #[test]
    fn test_insert_clamps_index() {
        let mut doc = three_item_rundown();
        let item = Item::new(ItemKind::Header);
        let id = item.id;

        doc.insert_item(99, item).unwrap();

        assert_eq!(doc.items.len(), 4);
        assert_eq!(doc.items[3].id, id);
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut doc = three_item_rundown();
        let dup = doc.items[0].clone();

        let result = doc.insert_item(0, dup);
        assert!(matches!(result, Err(RundownError::ItemExists(_))));
        assert_eq!(doc.items.len(), 3);
    }

    #[test]
    fn test_reorder_permutation() {
        let mut doc = three_item_rundown();
        let order: Vec<ItemId> = doc.items.iter().rev().map(|item| item.id).collect();

        doc.reorder(&order).unwrap();

        assert_eq!(doc.items[0].field("slug"), Some("segment 3"));
        assert_eq!(doc.items[2].field("slug"), Some("segment 1"));
    }

    #[test]
    fn test_reorder_rejects_wrong_length() {
        let mut doc = three_item_rundown();
        let order = vec![doc.items[0].id];

        assert!(matches!(
            doc.reorder(&order),
            Err(RundownError::InvalidReorder(_))
        ));
    }

    #[test]
    fn test_upsert_field_is_idempotent() {
        let mut doc = three_item_rundown();
        let id = doc.items[0].id;

        doc.upsert_field(id, "talent", "Alice").unwrap();
        let after_first = doc.clone();
        doc.upsert_field(id, "talent", "Alice").unwrap();

        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            serde_json::to_value(&after_first).unwrap()
        );
    }

    #[test]
    fn test_upsert_field_missing_item() {
        let mut doc = three_item_rundown();
        let result = doc.upsert_field(ItemId::new(), "slug", "x");
        assert!(matches!(result, Err(RundownError::ItemNotFound(_))));
    }
}
