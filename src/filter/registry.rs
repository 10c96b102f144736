//! Dynamic registry of [`FilterGroup`]s, walked once per packet batch by the
//! TS reader's dispatch loop. `parking_lot::RwLock` gives many concurrent
//! dispatch readers and infrequent operator-thread writers, per spec.md §5.

use super::group::FilterGroup;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque handle identifying a registered group, returned by
/// [`FilterGroupRegistry::create`]. Carries no borrow on the registry so it
/// can be held by an operator thread across an `await` or a lock release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupHandle(u64);

struct Entry {
    handle: GroupHandle,
    group: Arc<FilterGroup>,
}

/// The dynamic collection of filter groups the reader walks per packet
/// batch. Groups themselves own their PID subscriptions; the registry only
/// tracks which groups currently exist.
pub struct FilterGroupRegistry {
    entries: RwLock<Vec<Entry>>,
    next_handle: AtomicU64,
}

impl Default for FilterGroupRegistry {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_handle: AtomicU64::new(1),
        }
    }
}

impl FilterGroupRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `group`, returning a handle usable with [`Self::destroy`].
    /// Thread-safe; briefly takes the write lock.
    pub fn create(&self, group: Arc<FilterGroup>) -> GroupHandle {
        let handle = GroupHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry { handle, group });
        handle
    }

    /// Removes the group identified by `handle`. Because the reader only
    /// ever holds the registry's read lock for the duration of one batch,
    /// taking the write lock here and returning guarantees no in-flight
    /// callback for this group runs after this call returns, satisfying
    /// spec.md §4.1's `destroy_filter_group` contract.
    pub fn destroy(&self, handle: GroupHandle) -> Option<Arc<FilterGroup>> {
        let mut entries = self.entries.write();
        let pos = entries.iter().position(|e| e.handle == handle)?;
        Some(entries.remove(pos).group)
    }

    /// Looks up a group by its unique name.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<FilterGroup>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.group.name() == name)
            .map(|e| e.group.clone())
    }

    /// Snapshot of every currently registered group, for the reader's
    /// per-batch dispatch pass. Cloning the `Arc`s out of the lock keeps the
    /// read lock held only as long as copying the vector takes.
    pub fn snapshot(&self) -> Vec<Arc<FilterGroup>> {
        self.entries.read().iter().map(|e| e.group.clone()).collect()
    }

    /// Number of groups currently registered.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_destroy_removes_group() {
        let registry = FilterGroupRegistry::new();
        let group = Arc::new(FilterGroup::new("pat", "processor"));
        let handle = registry.create(group);
        assert_eq!(registry.len(), 1);
        assert!(registry.destroy(handle).is_some());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn find_by_name_locates_registered_group() {
        let registry = FilterGroupRegistry::new();
        registry.create(Arc::new(FilterGroup::new("sdt", "processor")));
        assert!(registry.find_by_name("sdt").is_some());
        assert!(registry.find_by_name("missing").is_none());
    }
}
