/// Showcaller playback cursor over the rundown
/// Advances independently of content edits
use serde::{Deserialize, Serialize};

use crate::{ItemId, ItemKind, Rundown};

/// Shared playback cursor state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShowcallerState {
    pub current_item: Option<ItemId>,
    pub playing: bool,
    pub playback_started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ShowcallerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playback from the given item, or from the first playable item
    pub fn play(&mut self, from: Option<ItemId>, rundown: &Rundown) {
        self.current_item = from.or_else(|| {
            rundown
                .items
                .iter()
                .find(|item| is_playable(item))
                .map(|item| item.id)
        });
        self.playing = self.current_item.is_some();
        if self.playing {
            self.playback_started_at = Some(chrono::Utc::now());
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Move the cursor to the next playable item, skipping headers and
    /// floated rows; stops playback at the end of the rundown
    pub fn advance(&mut self, rundown: &Rundown) {
        let start = match self.current_item.and_then(|id| rundown.item_index(id)) {
            Some(index) => index + 1,
            None => 0,
        };

        let next = rundown.items[start.min(rundown.items.len())..]
            .iter()
            .find(|item| is_playable(item));

        match next {
            Some(item) => {
                self.current_item = Some(item.id);
                self.playback_started_at = Some(chrono::Utc::now());
            }
            None => {
                self.current_item = None;
                self.playing = false;
            }
        }
    }

    pub fn reset(&mut self) {
        self.current_item = None;
        self.playing = false;
        self.playback_started_at = None;
    }
}

fn is_playable(item: &crate::Item) -> bool {
    item.kind == ItemKind::Regular && !item.floated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Item;

    fn rundown_with_header() -> Rundown {
        let mut doc = Rundown::new("Evening News");
        doc.items.push(Item::new(ItemKind::Header));
        doc.items
            .push(Item::new(ItemKind::Regular).with_field("slug", "open"));
        let mut floated = Item::new(ItemKind::Regular).with_field("slug", "standby");
        floated.floated = true;
        doc.items.push(floated);
        doc.items
            .push(Item::new(ItemKind::Regular).with_field("slug", "weather"));
        doc
    }

    #[test]
    fn test_play_skips_header() {
        let doc = rundown_with_header();
        let mut state = ShowcallerState::new();

        state.play(None, &doc);

        assert!(state.playing);
        assert_eq!(state.current_item, Some(doc.items[1].id));
    }

    #[test]
    fn test_advance_skips_floated() {
        let doc = rundown_with_header();
        let mut state = ShowcallerState::new();
        state.play(None, &doc);

        state.advance(&doc);

        // Skips the floated "standby" row straight to "weather".
        assert_eq!(state.current_item, Some(doc.items[3].id));
    }

    #[test]
    fn test_advance_past_end_stops() {
        let doc = rundown_with_header();
        let mut state = ShowcallerState::new();
        state.play(Some(doc.items[3].id), &doc);

        state.advance(&doc);

        assert_eq!(state.current_item, None);
        assert!(!state.playing);
    }
}
