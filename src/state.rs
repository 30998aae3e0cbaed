// FILE: src/state.rs
//! Per-collection lifecycle state and the process-wide table of open collections.

use crate::manager::CollectionHandle;
use crate::model::CollectionId;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// `Closed -> Open -> (Indexing <-> Open) -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum CollectionState {
    Closed = 0,
    Open = 1,
    Indexing = 2,
}

impl CollectionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => CollectionState::Open,
            2 => CollectionState::Indexing,
            _ => CollectionState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionState::Closed => "closed",
            CollectionState::Open => "open",
            CollectionState::Indexing => "indexing",
        }
    }
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for a `CollectionState`.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: CollectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> CollectionState {
        CollectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: CollectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Set `state`, returning the one it replaced.
    pub fn swap(&self, state: CollectionState) -> CollectionState {
        CollectionState::from_u8(self.0.swap(state.as_u8(), Ordering::AcqRel))
    }

    /// Move `from -> to` atomically. On failure returns the state actually found.
    pub fn transition(&self, from: CollectionState, to: CollectionState) -> Result<(), CollectionState> {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(CollectionState::from_u8)
    }
}

/// Collections currently open in this process. `register` on open, `unregister_handle` on close.
#[derive(Default)]
pub struct OpenCollections {
    handles: DashMap<CollectionId, CollectionHandle>,
}

impl OpenCollections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: CollectionHandle) {
        self.handles.insert(handle.id().clone(), handle);
    }

    /// Remove `handle` only if it is still the one registered under its id.
    pub fn unregister_handle(&self, handle: &CollectionHandle) -> bool {
        self.handles.remove_if(handle.id(), |_, current| current.same(handle)).is_some()
    }

    pub fn get(&self, id: &CollectionId) -> Option<CollectionHandle> {
        self.handles.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &CollectionId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn ids(&self) -> Vec<CollectionId> {
        self.handles.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_is_compare_and_swap() {
        let cell = StateCell::new(CollectionState::Open);
        assert_eq!(cell.transition(CollectionState::Open, CollectionState::Indexing), Ok(()));
        assert_eq!(
            cell.transition(CollectionState::Open, CollectionState::Indexing),
            Err(CollectionState::Indexing)
        );
        assert_eq!(cell.load(), CollectionState::Indexing);
        cell.store(CollectionState::Closed);
        assert_eq!(cell.load(), CollectionState::Closed);
        assert_eq!(cell.swap(CollectionState::Open), CollectionState::Closed);
        assert_eq!(cell.load(), CollectionState::Open);
    }

    #[test]
    fn test_u8_round_trip() {
        for s in [CollectionState::Closed, CollectionState::Open, CollectionState::Indexing] {
            assert_eq!(CollectionState::from_u8(s.as_u8()), s);
        }
    }
}
