//! Set of keys whose objects are still believed alive

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Keys inserted from any caller thread at watch time and removed on the
/// background thread when a queue drain observes the probe collected.
#[derive(Debug, Default)]
pub struct RetainedKeySet {
    keys: RwLock<HashSet<String>>,
}

impl RetainedKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: String) -> bool {
        self.write().insert(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the current keys
    pub fn keys(&self) -> Vec<String> {
        self.read().iter().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashSet<String>> {
        match self.keys.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        match self.keys.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_remove() {
        let set = RetainedKeySet::new();
        assert!(set.is_empty());

        assert!(set.insert("a".to_string()));
        assert!(!set.insert("a".to_string()));
        assert!(set.contains("a"));
        assert_eq!(set.len(), 1);

        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert!(!set.contains("a"));
    }

    #[test]
    fn test_concurrent_inserts() {
        let set = Arc::new(RetainedKeySet::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let set = set.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        set.insert(format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(set.len(), 800);
        assert_eq!(set.keys().len(), 800);
    }
}
