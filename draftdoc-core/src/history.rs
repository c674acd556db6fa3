//! Plain data carried by undo/redo entries. The bookkeeping that produces
//! them lives in the engine; the snapshot codec persists them as-is.

use serde::{Deserialize, Serialize};

use crate::document::{EntityId, EntityState, LayerRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff<T> {
    pub before: T,
    pub after: T,
}

impl<T: PartialEq> Diff<T> {
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

/// State of one entity around a transaction. `None` means absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    pub id: EntityId,
    pub before: Option<EntityState>,
    pub after: Option<EntityState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Sorted by id.
    pub entities: Vec<EntityChange>,
    pub layers: Option<Diff<Vec<LayerRecord>>>,
    pub draw_order: Option<Diff<Vec<EntityId>>>,
    pub selection: Option<Diff<Vec<EntityId>>>,
    pub next_id: Diff<u32>,
}

impl HistoryEntry {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.layers.is_none()
            && self.draw_order.is_none()
            && self.selection.is_none()
    }

    pub fn touched_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|change| change.id)
    }
}

/// Linear undo stack: entries before `cursor` can be undone, the rest redone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryLog {
    pub entries: Vec<HistoryEntry>,
    pub cursor: usize,
}
