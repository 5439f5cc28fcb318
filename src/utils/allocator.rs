use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Slot index plus generation; stale handles fail every lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Handle {
    pub index: u32,
    pub generation: u32,
}

impl Handle {
    pub const INVALID: Handle = Handle {
        index: u32::MAX,
        generation: 0,
    };

    pub fn new(index: usize, generation: u32) -> Self {
        Self {
            index: index as u32,
            generation,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_invalid(&self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

pub type BodyHandle = Handle;
pub type ShapeHandle = Handle;
pub type ContactHandle = Handle;
pub type JointHandle = Handle;
pub type ProxyId = Handle;

/// Slot pool with a free list of indices.
///
/// Removing an element returns its slot to the free list and bumps the slot's
/// generation, so the next insertion reuses the storage without reallocating.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    items: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: VecDeque<usize>,
    len: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            generations: Vec::new(),
            free_list: VecDeque::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            generations: Vec::with_capacity(capacity),
            free_list: VecDeque::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, item: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_list.pop_front() {
            let generation = self.generations[index];
            self.items[index] = Some(item);
            return Handle::new(index, generation);
        }

        let index = self.items.len();
        self.items.push(Some(item));
        self.generations.push(0);
        Handle::new(index, 0)
    }

    /// Inserts a value built from the handle it will be stored under.
    pub fn insert_with(&mut self, build: impl FnOnce(Handle) -> T) -> Handle {
        let handle = self.next_handle();
        let inserted = self.insert(build(handle));
        debug_assert_eq!(handle, inserted);
        inserted
    }

    fn next_handle(&self) -> Handle {
        match self.free_list.front() {
            Some(&index) => Handle::new(index, self.generations[index]),
            None => Handle::new(self.items.len(), 0),
        }
    }

    pub fn get(&self, id: Handle) -> Option<&T> {
        if self.is_valid(id) {
            self.items.get(id.index()).and_then(|slot| slot.as_ref())
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: Handle) -> Option<&mut T> {
        if self.is_valid(id) {
            self.items.get_mut(id.index()).and_then(|slot| slot.as_mut())
        } else {
            None
        }
    }

    pub fn get2_mut(&mut self, id_a: Handle, id_b: Handle) -> Option<(&mut T, &mut T)> {
        if id_a.index() == id_b.index() {
            return None;
        }

        if !self.is_valid(id_a) || !self.is_valid(id_b) {
            return None;
        }

        let (first, second, flipped) = if id_a.index() < id_b.index() {
            (id_a, id_b, false)
        } else {
            (id_b, id_a, true)
        };

        let (left, right) = self.items.split_at_mut(second.index());
        let first_slot = left.get_mut(first.index()).and_then(|slot| slot.as_mut())?;
        let second_slot = right.get_mut(0).and_then(|slot| slot.as_mut())?;

        if flipped {
            Some((second_slot, first_slot))
        } else {
            Some((first_slot, second_slot))
        }
    }

    pub fn remove(&mut self, id: Handle) -> Option<T> {
        if !self.is_valid(id) {
            return None;
        }
        let slot = self.items.get_mut(id.index())?;
        let item = slot.take()?;
        self.generations[id.index()] = self.generations[id.index()].wrapping_add(1);
        self.free_list.push_back(id.index());
        self.len -= 1;
        Some(item)
    }

    pub fn contains(&self, id: Handle) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.items.iter().enumerate().filter_map(move |(index, slot)| {
            slot.as_ref()
                .map(|item| (Handle::new(index, self.generations[index]), item))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> + '_ {
        let generations = &self.generations;
        self.items
            .iter_mut()
            .enumerate()
            .filter_map(move |(index, slot)| {
                slot.as_mut()
                    .map(|item| (Handle::new(index, generations[index]), item))
            })
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.iter().map(|(handle, _)| handle)
    }

    /// Collects live handles into a reusable buffer.
    pub fn collect_handles(&self, out: &mut Vec<Handle>) {
        out.clear();
        out.extend(self.handles());
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn is_valid(&self, id: Handle) -> bool {
        self.generations
            .get(id.index())
            .map(|generation| *generation == id.generation())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_slots_are_reused_with_new_generation() {
        let mut pool = Pool::new();
        let a = pool.insert(1);
        let b = pool.insert(2);
        assert_eq!(pool.remove(a), Some(1));
        assert!(pool.get(a).is_none());

        let c = pool.insert(3);
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(pool.get(c), Some(&3));
        assert_eq!(pool.get(b), Some(&2));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn get2_mut_respects_argument_order() {
        let mut pool = Pool::new();
        let a = pool.insert(10);
        let b = pool.insert(20);
        let (y, x) = pool.get2_mut(b, a).expect("distinct live handles");
        assert_eq!((*y, *x), (20, 10));
        assert!(pool.get2_mut(a, a).is_none());
    }

    #[test]
    fn insert_with_sees_its_own_handle() {
        let mut pool = Pool::new();
        let first = pool.insert(Handle::INVALID);
        pool.remove(first);
        let handle = pool.insert_with(|h| h);
        assert_eq!(pool.get(handle), Some(&handle));
    }
}
