use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Generational index into a [`Pool`].
///
/// Generation zero is never handed out, so a defaulted handle is always
/// invalid.
pub struct Handle<T> {
    pub slot: u16,
    pub generation: u16,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const fn new(slot: u16, generation: u16) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    pub fn valid(&self) -> bool {
        self.generation != 0
    }

    /// Packs the handle into a single word so it can travel inside a
    /// plain-old-data opcode payload.
    pub fn to_raw(self) -> u32 {
        ((self.generation as u32) << 16) | self.slot as u32
    }

    pub fn from_raw(raw: u32) -> Self {
        Self::new((raw & 0xffff) as u16, (raw >> 16) as u16)
    }

    /// Same slot and generation, reinterpreted for another pool's item type.
    pub(crate) fn cast<U>(self) -> Handle<U> {
        Handle::new(self.slot, self.generation)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Slot allocator handing out generational [`Handle`]s.
///
/// Releasing a slot bumps its generation, so stale handles stop resolving
/// instead of aliasing whatever reuses the slot.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u16>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            empty: Vec::with_capacity(initial_size),
            generation: vec![1; initial_size],
        };

        p.empty = (0..initial_size).rev().collect();
        p.items.resize_with(initial_size, || None);
        p
    }

    /// Stores `item`, growing the pool when every slot is taken. Returns
    /// `None` once the slot space of a `u16` is exhausted.
    pub fn insert(&mut self, item: T) -> Option<Handle<T>> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.items.len();
                if slot > u16::MAX as usize {
                    return None;
                }
                self.items.push(None);
                self.generation.push(1);
                slot
            }
        };

        self.items[slot] = Some(item);
        Some(Handle::new(slot as u16, self.generation[slot]))
    }

    /// Removes the item behind `handle` and retires the handle.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = handle.slot as usize;
        if !self.is_live(handle) {
            return None;
        }

        let item = self.items[slot].take();
        // Skip zero on wrap so the default handle never becomes live.
        self.generation[slot] = match self.generation[slot].wrapping_add(1) {
            0 => 1,
            g => g,
        };
        self.empty.push(slot);
        item
    }

    /// Moves the item out without retiring the handle, so it can be edited
    /// while the rest of the pool is borrowed. The slot stays reserved until
    /// [`Pool::checkin`].
    pub(crate) fn checkout(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_live(handle) {
            return None;
        }
        self.items[handle.slot as usize].take()
    }

    pub(crate) fn checkin(&mut self, handle: Handle<T>, item: T) {
        let slot = handle.slot as usize;
        if slot < self.items.len() && self.generation[slot] == handle.generation {
            self.items[slot] = Some(item);
        }
    }

    pub fn is_live(&self, handle: Handle<T>) -> bool {
        let slot = handle.slot as usize;
        handle.valid()
            && slot < self.items.len()
            && self.generation[slot] == handle.generation
            && self.items[slot].is_some()
    }

    pub fn get_ref(&self, handle: Handle<T>) -> Option<&T> {
        if !self.is_live(handle) {
            return None;
        }
        self.items[handle.slot as usize].as_ref()
    }

    pub fn get_mut_ref(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if !self.is_live(handle) {
            return None;
        }
        self.items[handle.slot as usize].as_mut()
    }

    pub fn len(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_each_occupied<F: FnMut(&T)>(&self, mut func: F) {
        for item in self.items.iter().flatten() {
            func(item);
        }
    }

    pub fn for_each_occupied_mut<F: FnMut(&mut T)>(&mut self, mut func: F) {
        for item in self.items.iter_mut().flatten() {
            func(item);
        }
    }

    /// Empties the pool, retiring every outstanding handle.
    pub fn clear(&mut self) {
        for slot in 0..self.items.len() {
            if self.items[slot].take().is_some() {
                self.generation[slot] = match self.generation[slot].wrapping_add(1) {
                    0 => 1,
                    g => g,
                };
                self.empty.push(slot);
            }
        }
    }
}
