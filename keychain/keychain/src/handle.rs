// Copyright (c) Microsoft. All rights reserved.

use crate::{Error, KeyHandle};

/// Source of owner IDs. Every handle table gets its own, so that handles cannot be resolved by a table that did not issue them.
static NEXT_OWNER: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

fn next_owner() -> u16 {
    owner_from_counter(NEXT_OWNER.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
}

/// Owner IDs are 1..=u16::MAX and repeat after 65535 tables. See [`KeyHandle`].
fn owner_from_counter(counter: u32) -> u16 {
    let owner = counter % u32::from(u16::MAX) + 1;
    u16::try_from(owner).unwrap_or(u16::MAX)
}

/// Where a handle is in its lifecycle, as far as a particular table can tell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandleState {
    /// Issued by this table and not yet freed.
    Active,

    /// Issued by this table and freed since.
    Freed,

    /// Null, issued by another table, or never issued.
    Invalid,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A table of values addressed by [`KeyHandle`]s.
///
/// Freeing a handle bumps the generation of its slot, so the stale handle stays distinguishable from both live and made-up handles.
/// A slot whose generation is exhausted is retired rather than reused.
pub struct HandleTable<T> {
    owner: u16,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        HandleTable {
            owner: next_owner(),
            slots: vec![],
            free: vec![],
            len: 0,
        }
    }

    /// The owner ID stamped on every handle this table issues.
    pub fn owner(&self) -> u16 {
        self.owner
    }

    /// The number of live handles.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` and returns a new handle for it.
    pub fn insert(&mut self, value: T) -> Result<KeyHandle, Error> {
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            let index = u32::try_from(self.slots.len())
                .ok()
                .filter(|&index| index <= KeyHandle::MAX_INDEX)
                .ok_or_else(|| Error::platform("too many open key handles"))?;
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
            index
        };

        let slot = &mut self.slots[index as usize];
        let handle = KeyHandle::new(self.owner, index, slot.generation)
            .ok_or_else(|| Error::platform("key handle out of range"))?;
        slot.value = Some(value);
        self.len += 1;

        Ok(handle)
    }

    /// Looks up the value of a live handle.
    pub fn get(&self, handle: KeyHandle) -> Result<&T, Error> {
        let index = self.check(handle)?;
        self.slots[index]
            .value
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("handle", "handle has been freed"))
    }

    /// Frees a live handle and returns its value.
    pub fn remove(&mut self, handle: KeyHandle) -> Result<T, Error> {
        let index = self.check(handle)?;
        let slot = &mut self.slots[index];
        let value = slot
            .value
            .take()
            .ok_or_else(|| Error::invalid_argument("handle", "handle has been freed"))?;

        slot.generation += 1;
        if slot.generation <= KeyHandle::MAX_GENERATION {
            self.free.push(handle.index());
        }
        self.len -= 1;

        Ok(value)
    }

    pub fn state(&self, handle: KeyHandle) -> HandleState {
        match self.check(handle) {
            Ok(_) => HandleState::Active,
            Err(_) if self.is_stale(handle) => HandleState::Freed,
            Err(_) => HandleState::Invalid,
        }
    }

    /// Removes every live value, for example to release them when the owning keychain is dropped.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                values.push(value);
                slot.generation += 1;
                if slot.generation <= KeyHandle::MAX_GENERATION {
                    if let Ok(index) = u32::try_from(index) {
                        self.free.push(index);
                    }
                }
            }
        }
        self.len = 0;
        values
    }

    fn check(&self, handle: KeyHandle) -> Result<usize, Error> {
        if handle.is_null() {
            return Err(Error::invalid_argument("handle", "null handle"));
        }

        if handle.owner() != self.owner {
            return Err(Error::invalid_argument(
                "handle",
                "handle was issued by a different keychain",
            ));
        }

        let index = handle.index() as usize;
        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| Error::invalid_argument("handle", "unrecognized handle"))?;

        if slot.generation == handle.generation() && slot.value.is_some() {
            Ok(index)
        } else if handle.generation() < slot.generation {
            Err(Error::invalid_argument("handle", "handle has been freed"))
        } else {
            Err(Error::invalid_argument("handle", "unrecognized handle"))
        }
    }

    fn is_stale(&self, handle: KeyHandle) -> bool {
        !handle.is_null()
            && handle.owner() == self.owner
            && self
                .slots
                .get(handle.index() as usize)
                .map_or(false, |slot| handle.generation() < slot.generation)
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        HandleTable::new()
    }
}

impl<T> std::fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("owner", &self.owner)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
