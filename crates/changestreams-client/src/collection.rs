use std::fmt::Debug;
use std::hash::Hash;
use std::str::FromStr;

use changestreams_core::EntityName;

/// An item with a stable identity inside a collection.
pub trait Keyed {
    /// Native key type; change events carry it as a string.
    type Key: FromStr + Eq + Hash + Clone + Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

/// A DTO bound to exactly one tracked entity.
pub trait TrackedEntity: Keyed + Send + 'static {
    const ENTITY: EntityName;
}

/// What a mutation did, reported to observers (list bindings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChange {
    Added { index: usize },
    Replaced { index: usize },
    Removed { index: usize },
    Reset { len: usize },
}

type Observer = Box<dyn FnMut(&CollectionChange) + Send>;

/// Ordered list with at most one item per key.
pub struct BoundCollection<T: Keyed> {
    items: Vec<T>,
    observers: Vec<Observer>,
}

impl<T: Keyed> BoundCollection<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Build from a loaded page. Later duplicates of a key are dropped.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let mut collection = Self::new();
        for item in items {
            collection.push_unique(item);
        }
        collection
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position(&self, key: &T::Key) -> Option<usize> {
        self.items.iter().position(|item| item.key() == *key)
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.position(key).map(|index| &self.items[index])
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.position(key).is_some()
    }

    /// Append unless the key is already present. Returns the new index.
    pub fn insert_unique(&mut self, item: T) -> Option<usize> {
        let index = self.push_unique(item)?;
        self.notify(CollectionChange::Added { index });
        Some(index)
    }

    /// Swap in `item` at the index of the item with the same key.
    pub fn replace(&mut self, item: T) -> Option<usize> {
        let index = self.position(&item.key())?;
        self.items[index] = item;
        self.notify(CollectionChange::Replaced { index });
        Some(index)
    }

    /// Remove the item with `key`, returning where it was.
    pub fn remove(&mut self, key: &T::Key) -> Option<usize> {
        let index = self.position(key)?;
        self.items.remove(index);
        self.notify(CollectionChange::Removed { index });
        Some(index)
    }

    /// Replace the whole contents, e.g. after a full refresh.
    pub fn reset(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.clear();
        for item in items {
            self.push_unique(item);
        }
        let len = self.items.len();
        self.notify(CollectionChange::Reset { len });
    }

    pub fn observe(&mut self, observer: impl FnMut(&CollectionChange) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn push_unique(&mut self, item: T) -> Option<usize> {
        if self.contains(&item.key()) {
            return None;
        }
        self.items.push(item);
        Some(self.items.len() - 1)
    }

    fn notify(&mut self, change: CollectionChange) {
        for observer in &mut self.observers {
            observer(&change);
        }
    }
}

impl<T: Keyed> Default for BoundCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}
