use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::errors::RegistryError;

/// Thread-safe set of tracked pids with stable, ordered iteration.
///
/// Callers snapshot before doing anything that could block (liveness checks,
/// injection) rather than holding the lock across an OS call.
#[derive(Default)]
pub struct ProcessRegistry {
    pids: Mutex<BTreeSet<u32>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: adding an already-tracked pid is a no-op.
    pub fn add(&self, pid: u32) {
        self.pids.lock().unwrap().insert(pid);
    }

    pub fn add_many(&self, pids: impl IntoIterator<Item = u32>) {
        let mut guard = self.pids.lock().unwrap();
        guard.extend(pids);
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.lock().unwrap().contains(&pid)
    }

    /// Errors with `NotTracked` on a missing pid, to surface double-removal
    /// bugs rather than silently no-op.
    pub fn remove(&self, pid: u32) -> Result<(), RegistryError> {
        if self.pids.lock().unwrap().remove(&pid) {
            Ok(())
        } else {
            Err(RegistryError::NotTracked(pid))
        }
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.pids.lock().unwrap().iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_contains_until_removed() {
        let reg = ProcessRegistry::new();
        assert!(!reg.contains(42));
        reg.add(42);
        assert!(reg.contains(42));
        reg.add(42); // idempotent
        assert!(reg.contains(42));
        reg.remove(42).unwrap();
        assert!(!reg.contains(42));
    }

    #[test]
    fn double_remove_errors() {
        let reg = ProcessRegistry::new();
        reg.add(1);
        reg.remove(1).unwrap();
        assert!(matches!(reg.remove(1), Err(RegistryError::NotTracked(1))));
    }

    #[test]
    fn snapshot_is_ordered_and_independent() {
        let reg = ProcessRegistry::new();
        reg.add_many([5, 1, 3]);
        assert_eq!(reg.snapshot(), vec![1, 3, 5]);
        reg.add(9);
        // the earlier snapshot is unaffected by subsequent mutation
        let snap = reg.snapshot();
        assert_eq!(snap, vec![1, 3, 5, 9]);
    }

    #[test]
    fn empty_after_removing_everything() {
        let reg = ProcessRegistry::new();
        reg.add_many([1, 2]);
        assert!(!reg.is_empty());
        reg.remove(1).unwrap();
        reg.remove(2).unwrap();
        assert!(reg.is_empty());
    }
}
