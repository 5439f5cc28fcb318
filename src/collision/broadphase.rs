//! Broad-phase contract and two reference implementations.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::{
    collision::aabb::Aabb,
    utils::{
        allocator::{Pool, ProxyId, ShapeHandle},
        math::{Real, Vec3},
    },
};

/// Two proxies whose bounds overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyPair {
    pub proxy1: ProxyId,
    pub proxy2: ProxyId,
}

impl ProxyPair {
    /// Pair with the lower proxy index first.
    pub fn ordered(a: ProxyId, b: ProxyId) -> Self {
        if a.index() <= b.index() {
            Self { proxy1: a, proxy2: b }
        } else {
            Self { proxy1: b, proxy2: a }
        }
    }
}

/// Spatial index handing candidate pairs to the contact manager.
///
/// An incremental broad-phase only reports pairs involving proxies that moved
/// since the last `collect_pairs`; the contact manager then keeps contacts
/// alive while `is_overlapping` holds.
pub trait BroadPhase: fmt::Debug + Send {
    fn create_proxy(&mut self, shape: ShapeHandle, aabb: &Aabb) -> ProxyId;
    fn destroy_proxy(&mut self, proxy: ProxyId);
    /// Updates bounds after the shape moved by `displacement`.
    fn move_proxy(&mut self, proxy: ProxyId, aabb: &Aabb, displacement: Vec3);
    /// Refreshes the buffer returned by `pairs`.
    fn collect_pairs(&mut self);
    fn pairs(&self) -> &[ProxyPair];
    fn is_overlapping(&self, proxy1: ProxyId, proxy2: ProxyId) -> bool;
    fn is_incremental(&self) -> bool;
    fn proxy_shape(&self, proxy: ProxyId) -> Option<ShapeHandle>;
    fn proxy_aabb(&self, proxy: ProxyId) -> Option<Aabb>;
}

#[derive(Debug, Clone, Copy)]
struct BruteForceProxy {
    shape: ShapeHandle,
    aabb: Aabb,
}

/// Tests every proxy against every other one, every step.
#[derive(Debug, Default)]
pub struct BruteForceBroadPhase {
    proxies: Pool<BruteForceProxy>,
    pairs: Vec<ProxyPair>,
    handles: Vec<ProxyId>,
}

impl BruteForceBroadPhase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadPhase for BruteForceBroadPhase {
    fn create_proxy(&mut self, shape: ShapeHandle, aabb: &Aabb) -> ProxyId {
        self.proxies.insert(BruteForceProxy { shape, aabb: *aabb })
    }

    fn destroy_proxy(&mut self, proxy: ProxyId) {
        self.proxies.remove(proxy);
    }

    fn move_proxy(&mut self, proxy: ProxyId, aabb: &Aabb, _displacement: Vec3) {
        if let Some(p) = self.proxies.get_mut(proxy) {
            p.aabb = *aabb;
        }
    }

    fn collect_pairs(&mut self) {
        self.pairs.clear();
        self.proxies.collect_handles(&mut self.handles);
        for (i, &a) in self.handles.iter().enumerate() {
            for &b in &self.handles[i + 1..] {
                if self.is_overlapping(a, b) {
                    self.pairs.push(ProxyPair::ordered(a, b));
                }
            }
        }
    }

    fn pairs(&self) -> &[ProxyPair] {
        &self.pairs
    }

    fn is_overlapping(&self, proxy1: ProxyId, proxy2: ProxyId) -> bool {
        match (self.proxies.get(proxy1), self.proxies.get(proxy2)) {
            (Some(a), Some(b)) => a.aabb.overlaps(&b.aabb),
            _ => false,
        }
    }

    fn is_incremental(&self) -> bool {
        false
    }

    fn proxy_shape(&self, proxy: ProxyId) -> Option<ShapeHandle> {
        self.proxies.get(proxy).map(|p| p.shape)
    }

    fn proxy_aabb(&self, proxy: ProxyId) -> Option<Aabb> {
        self.proxies.get(proxy).map(|p| p.aabb)
    }
}

type Cell = (i32, i32, i32);

#[derive(Debug, Clone, Copy)]
struct GridProxy {
    shape: ShapeHandle,
    /// Fattened bounds; only refreshed when the shape leaves them.
    aabb: Aabb,
    min_cell: Cell,
    max_cell: Cell,
    moved: bool,
}

/// Uniform hash grid over fattened proxy bounds. Incremental.
#[derive(Debug)]
pub struct GridBroadPhase {
    cell_size: Real,
    padding: Real,
    proxies: Pool<GridProxy>,
    cells: HashMap<Cell, Vec<ProxyId>>,
    /// Proxies too large to bucket; always tested.
    oversized: Vec<ProxyId>,
    moved: Vec<ProxyId>,
    pairs: Vec<ProxyPair>,
    seen: HashSet<ProxyPair>,
}

impl GridBroadPhase {
    pub fn new(cell_size: Real, padding: Real) -> Self {
        Self {
            cell_size: cell_size.max(1e-3),
            padding,
            proxies: Pool::new(),
            cells: HashMap::new(),
            oversized: Vec::new(),
            moved: Vec::new(),
            pairs: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn world_to_grid(&self, pos: Vec3) -> Cell {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
            (pos.z / self.cell_size).floor() as i32,
        )
    }

    fn cells_of(min: Cell, max: Cell) -> impl Iterator<Item = Cell> {
        (min.0..=max.0).flat_map(move |x| (min.1..=max.1).flat_map(move |y| (min.2..=max.2).map(move |z| (x, y, z))))
    }

    fn is_oversized(min: Cell, max: Cell) -> bool {
        let span = |lo: i32, hi: i32| (i64::from(hi) - i64::from(lo) + 1).max(0) as u64;
        span(min.0, max.0)
            .saturating_mul(span(min.1, max.1))
            .saturating_mul(span(min.2, max.2))
            > crate::config::MAX_CELLS_PER_PROXY
    }

    fn insert_into_cells(&mut self, id: ProxyId, min: Cell, max: Cell) {
        if Self::is_oversized(min, max) {
            self.oversized.push(id);
            return;
        }
        for cell in Self::cells_of(min, max) {
            self.cells.entry(cell).or_default().push(id);
        }
    }

    fn remove_from_cells(&mut self, id: ProxyId, min: Cell, max: Cell) {
        if Self::is_oversized(min, max) {
            self.oversized.retain(|&p| p != id);
            return;
        }
        for cell in Self::cells_of(min, max) {
            if let Some(list) = self.cells.get_mut(&cell) {
                list.retain(|&p| p != id);
                if list.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }

    fn report(
        pairs: &mut Vec<ProxyPair>,
        seen: &mut HashSet<ProxyPair>,
        id: ProxyId,
        p: &GridProxy,
        other: ProxyId,
        o: &GridProxy,
    ) {
        if other == id {
            return;
        }
        let pair = ProxyPair::ordered(id, other);
        if !seen.contains(&pair) && o.aabb.overlaps(&p.aabb) {
            seen.insert(pair);
            pairs.push(pair);
        }
    }

    fn mark_moved(&mut self, id: ProxyId) {
        if let Some(p) = self.proxies.get_mut(id) {
            if !p.moved {
                p.moved = true;
                self.moved.push(id);
            }
        }
    }
}

impl Default for GridBroadPhase {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_BROADPHASE_CELL_SIZE,
            crate::config::DEFAULT_PROXY_PADDING,
        )
    }
}

impl BroadPhase for GridBroadPhase {
    fn create_proxy(&mut self, shape: ShapeHandle, aabb: &Aabb) -> ProxyId {
        let fat = aabb.loosened(self.padding);
        let min_cell = self.world_to_grid(fat.min);
        let max_cell = self.world_to_grid(fat.max);
        let id = self.proxies.insert(GridProxy {
            shape,
            aabb: fat,
            min_cell,
            max_cell,
            moved: false,
        });
        self.insert_into_cells(id, min_cell, max_cell);
        self.mark_moved(id);
        id
    }

    fn destroy_proxy(&mut self, proxy: ProxyId) {
        if let Some(p) = self.proxies.remove(proxy) {
            self.remove_from_cells(proxy, p.min_cell, p.max_cell);
            self.moved.retain(|&m| m != proxy);
        }
    }

    fn move_proxy(&mut self, proxy: ProxyId, aabb: &Aabb, displacement: Vec3) {
        let Some(p) = self.proxies.get(proxy).copied() else {
            return;
        };
        if p.aabb.contains(aabb) {
            return;
        }
        let fat = aabb.loosened(self.padding).swept(displacement);
        let min_cell = self.world_to_grid(fat.min);
        let max_cell = self.world_to_grid(fat.max);
        if (min_cell, max_cell) != (p.min_cell, p.max_cell) {
            self.remove_from_cells(proxy, p.min_cell, p.max_cell);
            self.insert_into_cells(proxy, min_cell, max_cell);
        }
        if let Some(p) = self.proxies.get_mut(proxy) {
            p.aabb = fat;
            p.min_cell = min_cell;
            p.max_cell = max_cell;
        }
        self.mark_moved(proxy);
    }

    fn collect_pairs(&mut self) {
        self.pairs.clear();
        self.seen.clear();
        for &id in &self.moved {
            let Some(p) = self.proxies.get(id) else {
                continue;
            };
            if Self::is_oversized(p.min_cell, p.max_cell) {
                for (other, o) in self.proxies.iter() {
                    Self::report(&mut self.pairs, &mut self.seen, id, p, other, o);
                }
                continue;
            }
            for &other in &self.oversized {
                if let Some(o) = self.proxies.get(other) {
                    Self::report(&mut self.pairs, &mut self.seen, id, p, other, o);
                }
            }
            for cell in Self::cells_of(p.min_cell, p.max_cell) {
                let Some(list) = self.cells.get(&cell) else {
                    continue;
                };
                for &other in list {
                    if let Some(o) = self.proxies.get(other) {
                        Self::report(&mut self.pairs, &mut self.seen, id, p, other, o);
                    }
                }
            }
        }
        for id in self.moved.drain(..) {
            if let Some(p) = self.proxies.get_mut(id) {
                p.moved = false;
            }
        }
    }

    fn pairs(&self) -> &[ProxyPair] {
        &self.pairs
    }

    fn is_overlapping(&self, proxy1: ProxyId, proxy2: ProxyId) -> bool {
        match (self.proxies.get(proxy1), self.proxies.get(proxy2)) {
            (Some(a), Some(b)) => a.aabb.overlaps(&b.aabb),
            _ => false,
        }
    }

    fn is_incremental(&self) -> bool {
        true
    }

    fn proxy_shape(&self, proxy: ProxyId) -> Option<ShapeHandle> {
        self.proxies.get(proxy).map(|p| p.shape)
    }

    fn proxy_aabb(&self, proxy: ProxyId) -> Option<Aabb> {
        self.proxies.get(proxy).map(|p| p.aabb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::allocator::Handle;

    fn unit_box(center: Vec3) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3::splat(0.5))
    }

    #[test]
    fn brute_force_reports_only_overlaps() {
        let mut bp = BruteForceBroadPhase::new();
        let a = bp.create_proxy(Handle::new(0, 0), &unit_box(Vec3::ZERO));
        let b = bp.create_proxy(Handle::new(1, 0), &unit_box(Vec3::new(0.8, 0.0, 0.0)));
        let _far = bp.create_proxy(Handle::new(2, 0), &unit_box(Vec3::new(10.0, 0.0, 0.0)));
        bp.collect_pairs();
        assert_eq!(bp.pairs(), &[ProxyPair::ordered(a, b)]);
        assert!(!bp.is_incremental());
        assert_eq!(bp.proxy_shape(b), Some(Handle::new(1, 0)));
    }

    #[test]
    fn grid_reports_moved_proxies_once() {
        let mut grid = GridBroadPhase::new(1.0, 0.1);
        let a = grid.create_proxy(Handle::new(0, 0), &unit_box(Vec3::ZERO));
        let b = grid.create_proxy(Handle::new(1, 0), &unit_box(Vec3::new(0.9, 0.0, 0.0)));
        grid.collect_pairs();
        assert_eq!(grid.pairs(), &[ProxyPair::ordered(a, b)]);

        // nothing moved: nothing reported, but the pair still overlaps
        grid.collect_pairs();
        assert!(grid.pairs().is_empty());
        assert!(grid.is_overlapping(a, b));

        // small motion stays inside the fattened bounds
        grid.move_proxy(b, &unit_box(Vec3::new(0.95, 0.0, 0.0)), Vec3::new(0.05, 0.0, 0.0));
        grid.collect_pairs();
        assert!(grid.pairs().is_empty());

        grid.move_proxy(b, &unit_box(Vec3::new(5.0, 0.0, 0.0)), Vec3::new(4.0, 0.0, 0.0));
        grid.collect_pairs();
        assert!(grid.pairs().is_empty());
        assert!(!grid.is_overlapping(a, b));
    }

    #[test]
    fn destroyed_proxy_leaves_the_grid() {
        let mut grid = GridBroadPhase::new(1.0, 0.0);
        let a = grid.create_proxy(Handle::new(0, 0), &unit_box(Vec3::ZERO));
        grid.destroy_proxy(a);
        assert!(grid.cells.is_empty());
        assert!(grid.proxy_shape(a).is_none());
    }

    #[test]
    fn huge_proxy_stays_out_of_the_grid_but_still_pairs() {
        let mut grid = GridBroadPhase::new(1.0, 0.0);
        let huge = Aabb::from_center_half_extents(Vec3::ZERO, Vec3::new(1e6, 0.5, 1e6));
        let ground = grid.create_proxy(Handle::new(0, 0), &huge);
        assert!(grid.cells.is_empty());
        assert_eq!(grid.oversized, vec![ground]);

        let ball = grid.create_proxy(Handle::new(1, 0), &unit_box(Vec3::new(5e5, 0.4, -3e5)));
        let _far = grid.create_proxy(Handle::new(2, 0), &unit_box(Vec3::new(0.0, 10.0, 0.0)));
        grid.collect_pairs();
        assert_eq!(grid.pairs(), &[ProxyPair::ordered(ground, ball)]);
        assert!(grid.cells.len() <= 16);

        // a resting small proxy is still found once the huge one moves
        grid.move_proxy(ground, &Aabb::new(huge.min + Vec3::X, huge.max + Vec3::X), Vec3::X);
        grid.collect_pairs();
        assert_eq!(grid.pairs(), &[ProxyPair::ordered(ground, ball)]);

        grid.destroy_proxy(ground);
        assert!(grid.oversized.is_empty());
    }
}
