use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

/// An exclusive lock on a single resource.
#[derive(Debug, Clone)]
pub struct Lock {
    pub id: u64,
    pub resource: String,
    pub owner: String,
    pub acquired_at: Instant,
    pub priority: Option<i32>,
}

/// Authoritative record of who holds what: a lock per resource, mirrored by
/// an owner index used for cleanup and wait-for graph traversal. Both maps
/// must agree on the same set of (resource, owner) pairs after every mutation.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<String, Lock>,
    owners: HashMap<String, HashSet<String>>,
}

impl LockTable {
    pub fn new() -> Self {
        LockTable {
            locks: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Insert a lock into both indices. The resource must currently be unlocked.
    pub fn grant(
        &mut self,
        resource: &str,
        owner: &str,
        lock_id: u64,
        priority: Option<i32>,
        acquired_at: Instant,
    ) {
        self.locks.insert(
            resource.to_string(),
            Lock {
                id: lock_id,
                resource: resource.to_string(),
                owner: owner.to_string(),
                acquired_at,
                priority,
            },
        );
        self.owners
            .entry(owner.to_string())
            .or_default()
            .insert(resource.to_string());
    }

    /// Remove a lock from both indices. Returns `false` when `owner` does not
    /// hold `resource`; neither index is touched in that case.
    pub fn release(&mut self, resource: &str, owner: &str) -> bool {
        match self.locks.get(resource) {
            Some(lock) if lock.owner == owner => {}
            _ => return false,
        }
        self.locks.remove(resource);
        if let Some(owned) = self.owners.get_mut(owner) {
            owned.remove(resource);
            if owned.is_empty() {
                self.owners.remove(owner);
            }
        }
        true
    }

    pub fn holder(&self, resource: &str) -> Option<&Lock> {
        self.locks.get(resource)
    }

    pub fn owned_resources(&self, owner: &str) -> Vec<String> {
        self.owners
            .get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn clear(&mut self) {
        self.locks.clear();
        self.owners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(table: &mut LockTable, resource: &str, owner: &str, id: u64) {
        table.grant(resource, owner, id, None, Instant::now());
    }

    // Every (resource, owner) pair must appear in both indices or neither.
    fn assert_indices_agree(table: &LockTable) {
        for (resource, lock) in &table.locks {
            assert!(table.owners[&lock.owner].contains(resource));
        }
        for (owner, resources) in &table.owners {
            assert!(!resources.is_empty());
            for resource in resources {
                assert_eq!(table.locks[resource].owner, *owner);
            }
        }
    }

    #[test]
    fn grant_and_release_keep_indices_consistent() {
        let mut table = LockTable::new();
        grant(&mut table, "r1", "a", 1);
        grant(&mut table, "r2", "a", 2);
        grant(&mut table, "r3", "b", 3);
        assert_indices_agree(&table);
        assert_eq!(table.active_locks(), 3);
        assert_eq!(table.owner_count(), 2);

        assert!(table.release("r1", "a"));
        assert_indices_agree(&table);
        assert_eq!(table.owned_resources("a"), vec!["r2".to_string()]);

        assert!(table.release("r2", "a"));
        assert_indices_agree(&table);
        assert_eq!(table.owner_count(), 1);
        assert!(table.owned_resources("a").is_empty());
    }

    #[test]
    fn release_by_non_holder_is_a_no_op() {
        let mut table = LockTable::new();
        grant(&mut table, "r1", "a", 1);

        assert!(!table.release("r1", "b"));
        assert!(!table.release("r2", "a"));
        assert_eq!(table.holder("r1").unwrap().owner, "a");
        assert_indices_agree(&table);
    }

    #[test]
    fn double_release_is_a_no_op() {
        let mut table = LockTable::new();
        grant(&mut table, "r1", "a", 1);

        assert!(table.release("r1", "a"));
        assert!(!table.release("r1", "a"));
        assert!(table.holder("r1").is_none());
        assert_eq!(table.active_locks(), 0);
        assert_eq!(table.owner_count(), 0);
    }

    #[test]
    fn holder_reports_current_lock() {
        let mut table = LockTable::new();
        grant(&mut table, "r1", "a", 7);

        let lock = table.holder("r1").unwrap();
        assert_eq!(lock.id, 7);
        assert_eq!(lock.owner, "a");
        assert!(table.holder("r2").is_none());
    }
}
