//! Shared runners keyed by target.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ExecError;
use crate::runner::Runner;
use crate::Result;

/// Thread-safe map from target identity to its [`Runner`].
///
/// Handing out the same `Arc<Runner>` for a key is what serializes commands
/// aimed at one target.
#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: RwLock<HashMap<String, Arc<Runner>>>,
}

impl RunnerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the runner for `key`, creating it with `create` on first use.
    pub fn get_or_insert_with<F>(&self, key: &str, create: F) -> Result<Arc<Runner>>
    where
        F: FnOnce() -> Runner,
    {
        if let Some(runner) = self.get(key)? {
            return Ok(runner);
        }

        let mut runners = self
            .runners
            .write()
            .map_err(|_| ExecError::LockPoisoned)?;
        // Another caller may have won the race between the two locks.
        let runner = runners.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, "registering runner");
            Arc::new(create())
        });
        Ok(Arc::clone(runner))
    }

    /// Get the runner registered under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Arc<Runner>>> {
        let runners = self.runners.read().map_err(|_| ExecError::LockPoisoned)?;
        Ok(runners.get(key).cloned())
    }

    /// Check if a runner is registered under `key`.
    pub fn contains(&self, key: &str) -> Result<bool> {
        let runners = self.runners.read().map_err(|_| ExecError::LockPoisoned)?;
        Ok(runners.contains_key(key))
    }

    /// Remove the runner registered under `key`.
    ///
    /// Callers still holding the `Arc` keep a working runner.
    pub fn remove(&self, key: &str) -> Result<Option<Arc<Runner>>> {
        let mut runners = self
            .runners
            .write()
            .map_err(|_| ExecError::LockPoisoned)?;
        Ok(runners.remove(key))
    }

    /// Drop every registered runner.
    ///
    /// Returns the number of runners removed.
    pub fn clear(&self) -> Result<usize> {
        let mut runners = self
            .runners
            .write()
            .map_err(|_| ExecError::LockPoisoned)?;
        let removed = runners.len();
        runners.clear();
        Ok(removed)
    }

    /// Get the number of registered runners.
    pub fn count(&self) -> usize {
        self.runners.read().map(|r| r.len()).unwrap_or(0)
    }

    /// List all registered keys.
    pub fn keys(&self) -> Result<Vec<String>> {
        let runners = self.runners.read().map_err(|_| ExecError::LockPoisoned)?;
        Ok(runners.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::spawner::fake::{FakeScript, FakeSpawner};
    use std::thread;

    fn runner() -> Runner {
        Runner::with_spawner(FakeSpawner::new(FakeScript::default()))
    }

    #[test]
    fn test_get_or_insert_creates_once() {
        let registry = RunnerRegistry::new();
        let mut created = 0;

        let first = registry
            .get_or_insert_with("host-a", || {
                created += 1;
                runner()
            })
            .unwrap();
        let second = registry
            .get_or_insert_with("host-a", || {
                created += 1;
                runner()
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created, 1);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_distinct_keys() {
        let registry = RunnerRegistry::new();
        let a = registry.get_or_insert_with("a", runner).unwrap();
        let b = registry.get_or_insert_with("b", runner).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        let mut keys = registry.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_get_nonexistent() {
        let registry = RunnerRegistry::new();
        assert!(registry.get("missing").unwrap().is_none());
        assert!(!registry.contains("missing").unwrap());
    }

    #[test]
    fn test_remove() {
        let registry = RunnerRegistry::new();
        let held = registry.get_or_insert_with("a", runner).unwrap();

        let removed = registry.remove("a").unwrap().unwrap();
        assert!(Arc::ptr_eq(&held, &removed));
        assert!(!registry.contains("a").unwrap());
        assert!(registry.remove("a").unwrap().is_none());

        // A fresh runner replaces the removed one.
        let fresh = registry.get_or_insert_with("a", runner).unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
    }

    #[test]
    fn test_clear() {
        let registry = RunnerRegistry::new();
        registry.get_or_insert_with("a", runner).unwrap();
        registry.get_or_insert_with("b", runner).unwrap();

        assert_eq!(registry.clear().unwrap(), 2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_concurrent_get_or_insert() {
        let registry = Arc::new(RunnerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_insert_with("shared", runner).unwrap())
            })
            .collect();

        let runners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(runners.iter().all(|r| Arc::ptr_eq(r, &runners[0])));
        assert_eq!(registry.count(), 1);
    }
}
