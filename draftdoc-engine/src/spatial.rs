use std::collections::{BTreeSet, HashMap};

use draftdoc_core::document::EntityId;
use draftdoc_core::geometry::{Bounds2D, Point2};

/// Entries spanning more cells than this live in a side list checked on
/// every query.
const MAX_CELLS_PER_ENTRY: i64 = 1024;

type CellKey = (i32, i32);

#[derive(Debug, Clone, Copy)]
struct CellRange {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl CellRange {
    fn count(&self) -> i64 {
        let columns = i64::from(self.x1) - i64::from(self.x0) + 1;
        let rows = i64::from(self.y1) - i64::from(self.y0) + 1;
        columns * rows
    }

    fn keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        (self.x0..=self.x1).flat_map(move |x| (self.y0..=self.y1).map(move |y| (x, y)))
    }
}

/// Uniform hash grid over entity bounds. Broad phase only.
#[derive(Debug)]
pub(crate) struct SpatialIndex {
    cell_size: f32,
    bounds: HashMap<EntityId, Bounds2D>,
    cells: HashMap<CellKey, Vec<EntityId>>,
    oversized: BTreeSet<EntityId>,
}

impl SpatialIndex {
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            64.0
        };
        Self {
            cell_size,
            bounds: HashMap::new(),
            cells: HashMap::new(),
            oversized: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn clear(&mut self) {
        self.bounds.clear();
        self.cells.clear();
        self.oversized.clear();
    }

    /// Inserts or moves `id`. Empty bounds leave it out of the index.
    pub fn update(&mut self, id: EntityId, bounds: Bounds2D) {
        self.remove(id);
        if bounds.is_empty() || !bounds.min().is_finite() || !bounds.max().is_finite() {
            return;
        }
        let range = self.cell_range(&bounds);
        if range.count() > MAX_CELLS_PER_ENTRY {
            self.oversized.insert(id);
        } else {
            for key in range.keys() {
                self.cells.entry(key).or_default().push(id);
            }
        }
        self.bounds.insert(id, bounds);
    }

    pub fn remove(&mut self, id: EntityId) {
        let Some(old) = self.bounds.remove(&id) else {
            return;
        };
        if self.oversized.remove(&id) {
            return;
        }
        let range = self.cell_range(&old);
        for key in range.keys() {
            if let Some(ids) = self.cells.get_mut(&key) {
                ids.retain(|candidate| *candidate != id);
                if ids.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
    }

    /// Ids whose stored bounds intersect `area`, ascending and unique.
    pub fn query_area(&self, area: &Bounds2D) -> Vec<EntityId> {
        if area.is_empty() {
            return Vec::new();
        }
        let range = self.cell_range(area);
        let mut hits: Vec<EntityId> = if range.count() > self.cells.len() as i64 {
            // Cheaper to walk the occupied cells than the requested span.
            self.bounds.keys().copied().collect()
        } else {
            range
                .keys()
                .filter_map(|key| self.cells.get(&key))
                .flatten()
                .copied()
                .chain(self.oversized.iter().copied())
                .collect()
        };
        hits.retain(|id| self.bounds.get(id).is_some_and(|b| b.intersects(area)));
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    pub fn query_point(&self, point: Point2, tolerance: f32) -> Vec<EntityId> {
        self.query_area(&Bounds2D::from_corners(point, point).inflate(tolerance.max(0.0)))
    }

    fn cell_range(&self, bounds: &Bounds2D) -> CellRange {
        let cell = |v: f32| (v / self.cell_size).floor() as i32;
        CellRange {
            x0: cell(bounds.min().x()),
            y0: cell(bounds.min().y()),
            x1: cell(bounds.max().x()),
            y1: cell(bounds.max().y()),
        }
    }
}
