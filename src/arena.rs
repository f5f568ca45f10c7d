use ::core::mem::size_of;
use debug_unsafe::slice::SliceGetter;

/// Handle to an arena slot. Only valid for the generation it was allocated in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Bump allocator with bulk reset.
///
/// Items are addressed by dense indices, `reset` drops everything at once
/// and bumps the generation, so ids issued before it stop resolving.
/// Allocated bytes include extra heap memory owned by the items, reported by the caller.
#[derive(Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    allocated_bytes: usize,
    generation: u32,
}

impl<T> Default for Arena<T> {
    #[inline]
    fn default() -> Self {
        Self {
            items: Vec::new(),
            allocated_bytes: 0,
            generation: 0,
        }
    }
}

impl<T> Arena<T> {
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    #[inline]
    pub fn allocate(&mut self, item: T) -> ArenaId {
        let index = self.items.len() as u32;
        self.items.push(item);
        self.allocated_bytes += size_of::<T>();
        ArenaId {
            index,
            generation: self.generation,
        }
    }

    /// Accounts heap memory owned by an already allocated item
    #[inline]
    pub fn charge(&mut self, bytes: usize) {
        self.allocated_bytes += bytes;
    }

    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Frees all items, invalidating every id issued so far
    pub fn reset(&mut self) {
        self.items.clear();
        self.allocated_bytes = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    #[inline]
    pub fn get(&self, id: ArenaId) -> Option<&T> {
        if id.generation != self.generation {
            return None;
        }
        self.items.get(id.index as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ArenaId) -> Option<&mut T> {
        if id.generation != self.generation {
            return None;
        }
        self.items.get_mut(id.index as usize)
    }

    /// `index` must come from this generation
    #[inline]
    pub(crate) fn at(&self, index: u32) -> &T {
        self.items.get_safe_unchecked(index as usize)
    }

    #[inline]
    pub(crate) fn id_of(&self, index: u32) -> ArenaId {
        ArenaId {
            index,
            generation: self.generation,
        }
    }
}
