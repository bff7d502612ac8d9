//! Generation-checked storage for located elements.

use std::collections::HashMap;

use kbwatch_core::{BrowserFault, ElementHandle};

/// Maps opaque [`ElementHandle`]s to live elements.
///
/// [`HandleArena::invalidate`] starts a new generation and drops every stored
/// element; handles from earlier generations are then rejected as stale.
#[derive(Debug)]
pub struct HandleArena<T> {
    generation: u64,
    next_id: u64,
    items: HashMap<u64, T>,
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self {
            generation: 1,
            next_id: 1,
            items: HashMap::new(),
        }
    }
}

impl<T> HandleArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn insert(&mut self, item: T) -> ElementHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.items.insert(id, item);
        ElementHandle::new(id, self.generation)
    }

    pub fn get(&self, handle: ElementHandle) -> Result<&T, BrowserFault> {
        if handle.generation() != self.generation {
            return Err(BrowserFault::StaleHandle(handle.id()));
        }
        self.items
            .get(&handle.id())
            .ok_or(BrowserFault::StaleHandle(handle.id()))
    }

    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.items.clear();
    }
}
