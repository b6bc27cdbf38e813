//! Keyed mutual-exclusion registry used by exclusive command execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A registry of named locks, one per key.
///
/// `RealSystem` owns exactly one registry and keys it by executable name, so
/// two exclusive invocations of the same tool never overlap while different
/// tools proceed independently. The lock is held only for the lifetime of one
/// external process.
#[derive(Debug, Default)]
pub struct CommandLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CommandLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `key`, creating it on first use.
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Runs `f` while holding the lock for `key`.
    ///
    /// A poisoned lock is recovered: the guarded data is `()`, so a panic in a
    /// previous holder leaves nothing inconsistent behind.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::trace!(key, "acquired exclusive lock");
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_key_never_overlaps() {
        let locks = Arc::new(CommandLocks::new());
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let busy = Arc::clone(&busy);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    locks.with_lock("snap", || {
                        if busy.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(20));
                        busy.store(false, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn different_keys_are_independent() {
        let locks = CommandLocks::new();
        // Holding "snap" must not block "apt-get" on the same thread.
        let value = locks.with_lock("snap", || locks.with_lock("apt-get", || 42));
        assert_eq!(value, 42);
    }

    #[test]
    fn returns_closure_value() {
        let locks = CommandLocks::new();
        assert_eq!(locks.with_lock("k8s", || "done"), "done");
    }
}
