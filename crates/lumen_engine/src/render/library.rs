//! Named registries for shared GPU resources.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared resources by name. Items are reference counted so nodes keep
/// using a resource after it was unregistered; the GPU object is released
/// by [`Library::clean_up`].
#[derive(Debug)]
pub struct Library<T> {
    kind: &'static str,
    items: BTreeMap<String, Arc<T>>,
}

impl<T> Library<T> {
    /// Empty library of `kind` (used in log output)
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: BTreeMap::new(),
        }
    }

    /// Store `item` under `name`, returning the shared handle.
    ///
    /// If the name is taken the existing item wins and `item` is handed back
    /// in the `Err` so the caller can release it.
    pub fn register(&mut self, name: impl Into<String>, item: T) -> Result<Arc<T>, (Arc<T>, T)> {
        let name = name.into();
        if let Some(existing) = self.items.get(&name) {
            return Err((existing.clone(), item));
        }
        let item = Arc::new(item);
        log::debug!("Registered {} '{}'", self.kind, name);
        self.items.insert(name, item.clone());
        Ok(item)
    }

    /// Item registered as `name`
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.items.get(name).cloned()
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Forget `name` without releasing it
    pub fn unregister(&mut self, name: &str) -> Option<Arc<T>> {
        self.items.remove(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.keys().map(String::as_str)
    }

    /// Number of registered items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Release every item with `release` and empty the library
    pub fn clean_up(&mut self, mut release: impl FnMut(&str, &T)) {
        for (name, item) in std::mem::take(&mut self.items) {
            release(&name, &item);
        }
        log::debug!("{} library cleaned up", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registration_wins() {
        let mut library = Library::new("thing");
        let first = library.register("a", 1).unwrap();
        let (existing, rejected) = library.register("a", 2).unwrap_err();
        assert_eq!(*first, 1);
        assert_eq!(*existing, 1);
        assert_eq!(rejected, 2);
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn clean_up_releases_everything() {
        let mut library = Library::new("thing");
        library.register("b", 2).ok();
        library.register("a", 1).ok();
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["a", "b"]);

        let mut released = Vec::new();
        library.clean_up(|name, value| released.push((name.to_string(), *value)));
        assert_eq!(released, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        assert!(library.is_empty());
    }

    #[test]
    fn unregister_keeps_outstanding_handles_alive() {
        let mut library = Library::new("thing");
        let handle = library.register("a", 7).unwrap();
        assert!(library.unregister("a").is_some());
        assert!(library.get("a").is_none());
        assert_eq!(*handle, 7);
    }
}
