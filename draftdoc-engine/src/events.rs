//! Change notifications. Mutations record into pending accumulators; a poll
//! flushes them into a fixed ring in category order and drains it.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use draftdoc_core::document::{EntityId, LayerId};
use draftdoc_core::shape::EntityKind;
use tracing::warn;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeMask: u32 {
        const GEOMETRY = 1 << 0;
        const STYLE = 1 << 1;
        const FLAGS = 1 << 2;
        const LAYER = 1 << 3;
        const ORDER = 1 << 4;
        const TEXT = 1 << 5;
        const BOUNDS = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    DocChanged { mask: ChangeMask },
    LayerChanged { layer: LayerId, mask: ChangeMask },
    EntityCreated { id: EntityId, kind: EntityKind },
    EntityChanged { id: EntityId, mask: ChangeMask },
    EntityDeleted { id: EntityId },
    SelectionChanged { selection_generation: u64, count: u32 },
    OrderChanged { generation: u64, count: u32 },
    HistoryChanged { generation: u64 },
    /// Deltas were dropped. Resync from the document, then acknowledge.
    Overflow { generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub generation: u64,
    pub events: Vec<EngineEvent>,
}

/// Values stamped onto the events of one flush.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushStamp {
    pub generation: u64,
    pub selection_generation: u64,
    pub selection_count: u32,
    pub order_count: u32,
}

#[derive(Debug, Default)]
struct Pending {
    doc_mask: ChangeMask,
    layers: BTreeMap<LayerId, ChangeMask>,
    created: BTreeMap<EntityId, EntityKind>,
    changed: BTreeMap<EntityId, ChangeMask>,
    deleted: BTreeSet<EntityId>,
    selection: bool,
    order: bool,
    history: bool,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.doc_mask.is_empty()
            && self.layers.is_empty()
            && self.created.is_empty()
            && self.changed.is_empty()
            && self.deleted.is_empty()
            && !self.selection
            && !self.order
            && !self.history
    }
}

#[derive(Debug)]
pub(crate) struct EventQueue {
    ring: Vec<Option<EngineEvent>>,
    head: usize,
    len: usize,
    pending: Pending,
    overflow: Option<u64>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: vec![None; capacity.max(1)],
            head: 0,
            len: 0,
            pending: Pending::default(),
            overflow: None,
        }
    }

    #[inline]
    pub fn overflow_generation(&self) -> Option<u64> {
        self.overflow
    }

    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
        self.pending = Pending::default();
        self.overflow = None;
    }

    pub fn record_doc(&mut self, mask: ChangeMask) {
        if self.overflow.is_none() {
            self.pending.doc_mask |= mask;
        }
    }

    pub fn record_layer(&mut self, layer: LayerId, mask: ChangeMask) {
        if self.overflow.is_some() {
            return;
        }
        *self.pending.layers.entry(layer).or_default() |= mask;
        self.pending.doc_mask |= ChangeMask::LAYER;
    }

    pub fn record_created(&mut self, id: EntityId, kind: EntityKind) {
        if self.overflow.is_some() {
            return;
        }
        let pending = &mut self.pending;
        pending.deleted.remove(&id);
        pending.changed.remove(&id);
        pending.created.insert(id, kind);
        pending.doc_mask |= ChangeMask::GEOMETRY | ChangeMask::BOUNDS;
    }

    pub fn record_changed(&mut self, id: EntityId, mask: ChangeMask) {
        if self.overflow.is_some() || self.pending.deleted.contains(&id) {
            return;
        }
        self.pending.doc_mask |= mask;
        // A pending create already tells the consumer to read the whole entity.
        if self.pending.created.contains_key(&id) {
            return;
        }
        *self.pending.changed.entry(id).or_default() |= mask;
    }

    pub fn record_deleted(&mut self, id: EntityId) {
        if self.overflow.is_some() {
            return;
        }
        let pending = &mut self.pending;
        pending.created.remove(&id);
        pending.changed.remove(&id);
        pending.deleted.insert(id);
        pending.doc_mask |= ChangeMask::GEOMETRY | ChangeMask::BOUNDS;
    }

    pub fn record_selection(&mut self) {
        if self.overflow.is_none() {
            self.pending.selection = true;
        }
    }

    pub fn record_order(&mut self) {
        if self.overflow.is_none() {
            self.pending.order = true;
            self.pending.doc_mask |= ChangeMask::ORDER;
        }
    }

    pub fn record_history(&mut self) {
        if self.overflow.is_none() {
            self.pending.history = true;
        }
    }

    /// Flushes pending state and drains at most `max_events`, oldest first.
    pub fn poll(&mut self, max_events: usize, stamp: FlushStamp) -> Vec<EngineEvent> {
        if max_events == 0 {
            return Vec::new();
        }
        if let Some(generation) = self.overflow {
            return vec![EngineEvent::Overflow { generation }];
        }
        if !self.flush(stamp) {
            return vec![EngineEvent::Overflow {
                generation: stamp.generation,
            }];
        }
        let take = max_events.min(self.len);
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(event) = self.ring[self.head].take() {
                out.push(event);
            }
            self.head = (self.head + 1) % self.ring.len();
            self.len -= 1;
        }
        out
    }

    /// Clears an overflow raised at or before `generation`.
    pub fn ack_resync(&mut self, generation: u64) -> bool {
        match self.overflow {
            Some(raised) if generation >= raised => {
                self.overflow = None;
                true
            }
            _ => false,
        }
    }

    /// Moves pending state into the ring. Returns false when it overflowed.
    fn flush(&mut self, stamp: FlushStamp) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let pending = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        if !pending.doc_mask.is_empty() {
            events.push(EngineEvent::DocChanged {
                mask: pending.doc_mask,
            });
        }
        events.extend(
            pending
                .layers
                .into_iter()
                .map(|(layer, mask)| EngineEvent::LayerChanged { layer, mask }),
        );
        events.extend(
            pending
                .created
                .into_iter()
                .map(|(id, kind)| EngineEvent::EntityCreated { id, kind }),
        );
        events.extend(
            pending
                .changed
                .into_iter()
                .map(|(id, mask)| EngineEvent::EntityChanged { id, mask }),
        );
        events.extend(
            pending
                .deleted
                .into_iter()
                .map(|id| EngineEvent::EntityDeleted { id }),
        );
        if pending.selection {
            events.push(EngineEvent::SelectionChanged {
                selection_generation: stamp.selection_generation,
                count: stamp.selection_count,
            });
        }
        if pending.order {
            events.push(EngineEvent::OrderChanged {
                generation: stamp.generation,
                count: stamp.order_count,
            });
        }
        if pending.history {
            events.push(EngineEvent::HistoryChanged {
                generation: stamp.generation,
            });
        }

        for event in events {
            if self.len == self.ring.len() {
                self.raise_overflow(stamp.generation);
                return false;
            }
            let tail = (self.head + self.len) % self.ring.len();
            self.ring[tail] = Some(event);
            self.len += 1;
        }
        true
    }

    fn raise_overflow(&mut self, generation: u64) {
        warn!(
            generation,
            capacity = self.ring.len(),
            "event queue overflowed, consumer must resync"
        );
        self.ring.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
        self.pending = Pending::default();
        self.overflow = Some(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(generation: u64) -> FlushStamp {
        FlushStamp {
            generation,
            selection_generation: 0,
            selection_count: 0,
            order_count: 0,
        }
    }

    #[test]
    fn flush_follows_category_order_and_sorts_ids() {
        let mut queue = EventQueue::new(64);
        queue.record_history();
        queue.record_changed(EntityId::new(9), ChangeMask::STYLE);
        queue.record_created(EntityId::new(4), EntityKind::Line);
        queue.record_created(EntityId::new(2), EntityKind::Rect);
        queue.record_order();
        queue.record_layer(LayerId::new(3), ChangeMask::FLAGS);
        queue.record_changed(EntityId::new(1), ChangeMask::GEOMETRY);

        let events = queue.poll(100, stamp(7));
        assert_eq!(
            events,
            vec![
                EngineEvent::DocChanged {
                    mask: ChangeMask::GEOMETRY
                        | ChangeMask::BOUNDS
                        | ChangeMask::STYLE
                        | ChangeMask::ORDER
                        | ChangeMask::LAYER
                },
                EngineEvent::LayerChanged {
                    layer: LayerId::new(3),
                    mask: ChangeMask::FLAGS
                },
                EngineEvent::EntityCreated {
                    id: EntityId::new(2),
                    kind: EntityKind::Rect
                },
                EngineEvent::EntityCreated {
                    id: EntityId::new(4),
                    kind: EntityKind::Line
                },
                EngineEvent::EntityChanged {
                    id: EntityId::new(1),
                    mask: ChangeMask::GEOMETRY
                },
                EngineEvent::EntityChanged {
                    id: EntityId::new(9),
                    mask: ChangeMask::STYLE
                },
                EngineEvent::OrderChanged {
                    generation: 7,
                    count: 0
                },
                EngineEvent::HistoryChanged { generation: 7 },
            ]
        );
        assert!(queue.poll(100, stamp(7)).is_empty());
    }

    #[test]
    fn delete_wins_over_create_in_one_window() {
        let mut queue = EventQueue::new(16);
        queue.record_created(EntityId::new(5), EntityKind::Circle);
        queue.record_changed(EntityId::new(5), ChangeMask::GEOMETRY);
        queue.record_deleted(EntityId::new(5));
        queue.record_changed(EntityId::new(5), ChangeMask::STYLE);

        let events = queue.poll(16, stamp(1));
        assert_eq!(
            &events[1..],
            &[EngineEvent::EntityDeleted {
                id: EntityId::new(5)
            }]
        );
    }

    #[test]
    fn poll_drains_at_most_the_requested_count() {
        let mut queue = EventQueue::new(16);
        for raw in 1..=4 {
            queue.record_changed(EntityId::new(raw), ChangeMask::GEOMETRY);
        }
        assert_eq!(queue.poll(2, stamp(1)).len(), 2);
        assert_eq!(queue.poll(2, stamp(1)).len(), 2);
        assert_eq!(queue.poll(2, stamp(1)).len(), 1);
        assert!(queue.poll(2, stamp(1)).is_empty());
        assert!(queue.poll(0, stamp(1)).is_empty());
    }

    #[test]
    fn overflow_sticks_until_a_current_ack() {
        let mut queue = EventQueue::new(4);
        for raw in 1..=8 {
            queue.record_changed(EntityId::new(raw), ChangeMask::GEOMETRY);
        }
        let overflow = vec![EngineEvent::Overflow { generation: 12 }];
        assert_eq!(queue.poll(10, stamp(12)), overflow);
        queue.record_changed(EntityId::new(1), ChangeMask::GEOMETRY);
        assert_eq!(queue.poll(10, stamp(13)), overflow);

        assert!(!queue.ack_resync(11));
        assert_eq!(queue.poll(10, stamp(13)), overflow);
        assert!(queue.ack_resync(12));
        assert!(queue.poll(10, stamp(13)).is_empty());
    }
}
