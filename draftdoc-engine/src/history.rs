//! Transaction bookkeeping for undo/redo.
//!
//! Mutations mark what they are about to touch while a transaction is open;
//! the first mark of each item captures its before state. Commit compares
//! those captures against the live document and keeps only real changes.

use std::collections::BTreeMap;

use draftdoc_core::document::{Document, EntityId, EntityState, LayerRecord};
use draftdoc_core::history::{Diff, EntityChange, HistoryEntry, HistoryLog};

#[derive(Debug)]
struct OpenEntry {
    entities: BTreeMap<EntityId, Option<EntityState>>,
    layers: Option<Vec<LayerRecord>>,
    draw_order: Option<Vec<EntityId>>,
    selection: Option<Vec<EntityId>>,
    next_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitOutcome {
    /// No transaction was open.
    NotOpen,
    /// An outer transaction is still open and will carry the changes.
    Nested,
    /// Nothing differed from the captured state.
    Empty,
    Pushed,
}

#[derive(Debug, Default)]
pub(crate) struct HistoryManager {
    depth: u32,
    open: Option<OpenEntry>,
    log: HistoryLog,
}

impl HistoryManager {
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn log(&self) -> &HistoryLog {
        &self.log
    }

    pub fn begin(&mut self, document: &Document) {
        self.depth += 1;
        if self.open.is_none() {
            self.open = Some(OpenEntry {
                entities: BTreeMap::new(),
                layers: None,
                draw_order: None,
                selection: None,
                next_id: document.next_id(),
            });
        }
    }

    pub fn mark_entity(&mut self, document: &Document, id: EntityId) {
        if let Some(open) = self.open.as_mut() {
            open.entities
                .entry(id)
                .or_insert_with(|| document.capture(id));
        }
    }

    pub fn mark_layers(&mut self, document: &Document) {
        if let Some(open) = self.open.as_mut() {
            open.layers.get_or_insert_with(|| document.layer_list());
        }
    }

    pub fn mark_draw_order(&mut self, document: &Document) {
        if let Some(open) = self.open.as_mut() {
            open.draw_order
                .get_or_insert_with(|| document.draw_order().to_vec());
        }
    }

    pub fn mark_selection(&mut self, selection: &[EntityId]) {
        if let Some(open) = self.open.as_mut() {
            open.selection.get_or_insert_with(|| selection.to_vec());
        }
    }

    /// Closes one level. Only the outermost level materializes an entry.
    pub fn commit(&mut self, document: &Document, selection: &[EntityId]) -> CommitOutcome {
        if self.depth == 0 {
            return CommitOutcome::NotOpen;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return CommitOutcome::Nested;
        }
        let Some(open) = self.open.take() else {
            return CommitOutcome::Empty;
        };

        let entities = open
            .entities
            .into_iter()
            .filter_map(|(id, before)| {
                let after = document.capture(id);
                (before != after).then_some(EntityChange { id, before, after })
            })
            .collect();
        let entry = HistoryEntry {
            entities,
            layers: open
                .layers
                .map(|before| Diff {
                    before,
                    after: document.layer_list(),
                })
                .filter(|diff| !diff.is_noop()),
            draw_order: open
                .draw_order
                .map(|before| Diff {
                    before,
                    after: document.draw_order().to_vec(),
                })
                .filter(|diff| !diff.is_noop()),
            selection: open
                .selection
                .map(|before| Diff {
                    before,
                    after: selection.to_vec(),
                })
                .filter(|diff| !diff.is_noop()),
            next_id: Diff {
                before: open.next_id,
                after: document.next_id(),
            },
        };
        if entry.is_empty() {
            return CommitOutcome::Empty;
        }
        self.log.entries.truncate(self.log.cursor);
        self.log.entries.push(entry);
        self.log.cursor = self.log.entries.len();
        CommitOutcome::Pushed
    }

    /// Closes one level without recording. Changes already applied stay in
    /// place; at the outermost level the open entry is dropped.
    pub fn discard(&mut self) -> bool {
        if self.depth == 0 {
            return false;
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.open = None;
        }
        true
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        self.log.cursor > 0
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        self.log.cursor < self.log.entries.len()
    }

    /// Steps the cursor back and returns the entry to revert.
    pub fn step_back(&mut self) -> Option<HistoryEntry> {
        if !self.can_undo() {
            return None;
        }
        self.log.cursor -= 1;
        self.log.entries.get(self.log.cursor).cloned()
    }

    /// Steps the cursor forward and returns the entry to reapply.
    pub fn step_forward(&mut self) -> Option<HistoryEntry> {
        if !self.can_redo() {
            return None;
        }
        let entry = self.log.entries.get(self.log.cursor).cloned();
        self.log.cursor += 1;
        entry
    }

    pub fn clear(&mut self) {
        self.log = HistoryLog::default();
    }

    /// Installs a decoded log. Any open transaction is abandoned.
    pub fn replace(&mut self, log: HistoryLog) {
        self.depth = 0;
        self.open = None;
        self.log = log;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftdoc_core::geometry::Point2;
    use draftdoc_core::shape::{LineRecord, RectRecord, Shape};

    fn document_with_rect() -> Document {
        let mut doc = Document::new();
        doc.upsert(
            EntityId::new(1),
            Shape::Rect(RectRecord::new(0.0, 0.0, 10.0, 10.0)),
            None,
        )
        .unwrap();
        doc
    }

    #[test]
    fn nested_levels_produce_one_entry() {
        let mut doc = document_with_rect();
        let mut history = HistoryManager::default();

        history.begin(&doc);
        history.mark_entity(&doc, EntityId::new(1));
        doc.replace_shape(
            EntityId::new(1),
            &Shape::Rect(RectRecord::new(5.0, 0.0, 10.0, 10.0)),
        );

        history.begin(&doc);
        history.mark_entity(&doc, EntityId::new(2));
        history.mark_draw_order(&doc);
        doc.upsert(
            EntityId::new(2),
            Shape::Line(LineRecord::new(Point2::ORIGIN, Point2::new(1.0, 1.0))),
            None,
        )
        .unwrap();
        assert_eq!(history.commit(&doc, &[]), CommitOutcome::Nested);
        assert!(history.log().entries.is_empty());

        assert_eq!(history.commit(&doc, &[]), CommitOutcome::Pushed);
        let entry = &history.log().entries[0];
        assert_eq!(entry.entities.len(), 2);
        assert!(entry.entities[1].before.is_none());
        assert_eq!(
            entry.draw_order.as_ref().map(|d| d.after.len()),
            Some(2)
        );
        assert_eq!(entry.next_id, Diff { before: 2, after: 3 });
    }

    #[test]
    fn untouched_marks_are_dropped() {
        let doc = document_with_rect();
        let mut history = HistoryManager::default();
        history.begin(&doc);
        history.mark_entity(&doc, EntityId::new(1));
        history.mark_layers(&doc);
        history.mark_selection(&[]);
        assert_eq!(history.commit(&doc, &[]), CommitOutcome::Empty);
        assert!(!history.can_undo());
        assert_eq!(history.commit(&doc, &[]), CommitOutcome::NotOpen);
    }

    #[test]
    fn new_entries_truncate_the_redo_tail() {
        let mut doc = document_with_rect();
        let mut history = HistoryManager::default();
        for x in [1.0, 2.0] {
            history.begin(&doc);
            history.mark_entity(&doc, EntityId::new(1));
            doc.replace_shape(
                EntityId::new(1),
                &Shape::Rect(RectRecord::new(x, 0.0, 10.0, 10.0)),
            );
            history.commit(&doc, &[]);
        }
        assert!(history.step_back().is_some());
        assert!(history.can_redo());

        history.begin(&doc);
        history.mark_selection(&[]);
        history.commit(&doc, &[EntityId::new(1)]);
        assert!(!history.can_redo());
        assert_eq!(history.log().entries.len(), 2);
        assert_eq!(history.log().cursor, 2);
    }

    #[test]
    fn discard_at_the_outer_level_drops_the_entry() {
        let mut doc = document_with_rect();
        let mut history = HistoryManager::default();
        history.begin(&doc);
        history.begin(&doc);
        history.mark_entity(&doc, EntityId::new(1));
        doc.remove(EntityId::new(1));
        assert!(history.discard());
        assert_eq!(history.depth(), 1);
        assert!(history.discard());
        assert_eq!(history.depth(), 0);
        assert!(!history.discard());
        assert_eq!(history.commit(&doc, &[]), CommitOutcome::NotOpen);
    }
}
