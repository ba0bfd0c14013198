//! Stable handles and the arena that owns every metadata element.
//!
//! Removing an element leaves its slot empty, so a stale handle resolves to
//! `None` instead of to a newer element. Slots past the end of a model
//! restored after a rollback are handed out again.

use serde::Serialize;

/// Conversion between a handle and its arena slot.
pub trait ArenaId: Copy + Eq + Ord + std::fmt::Debug {
    /// Build a handle from a slot index.
    fn from_index(index: usize) -> Self;
    /// Slot index of this handle.
    fn index(self) -> usize;
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub struct $name(u32);

        impl ArenaId for $name {
            fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle to an entity type.
    EntityTypeId
);
arena_id!(
    /// Handle to a property.
    PropertyId
);
arena_id!(
    /// Handle to a key.
    KeyId
);
arena_id!(
    /// Handle to a foreign key.
    ForeignKeyId
);
arena_id!(
    /// Handle to an index.
    IndexId
);

/// Append-only slot storage.
#[derive(Debug, Clone)]
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    _id: std::marker::PhantomData<I>,
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            _id: std::marker::PhantomData,
        }
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    /// Store a value and return its handle.
    pub fn insert(&mut self, value: T) -> I {
        self.slots.push(Some(value));
        I::from_index(self.slots.len() - 1)
    }

    /// Remove a value, leaving its slot empty.
    pub fn remove(&mut self, id: I) -> Option<T> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    /// Look up a live value.
    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Look up a live value mutably.
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Iterate live values with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (I::from_index(i), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_slots_stay_empty() {
        let mut arena: Arena<PropertyId, &str> = Arena::default();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.remove(a), Some("a"));
        let c = arena.insert("c");

        assert_ne!(a, c);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.iter().count(), 2);
        assert_eq!(
            arena.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }
}
