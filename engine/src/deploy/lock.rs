//! Per-instance single-writer locks

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Set of instances currently owned by a deployment or rollback
#[derive(Debug, Default)]
pub struct InstanceLocks {
    held: Mutex<HashSet<String>>,
}

impl InstanceLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the lock for `instance_id`, or `None` if someone holds it
    pub fn try_acquire(self: &Arc<Self>, instance_id: &str) -> Option<InstanceLockGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(instance_id.to_string()) {
            return None;
        }
        debug!("Acquired instance lock: {}", instance_id);
        Some(InstanceLockGuard {
            locks: self.clone(),
            instance_id: instance_id.to_string(),
        })
    }

    pub fn is_held(&self, instance_id: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(instance_id)
    }

    fn release(&self, instance_id: &str) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(instance_id);
        debug!("Released instance lock: {}", instance_id);
    }
}

/// Releases the instance lock when dropped, including on task panic
#[derive(Debug)]
pub struct InstanceLockGuard {
    locks: Arc<InstanceLocks>,
    instance_id: String,
}

impl InstanceLockGuard {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for InstanceLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.instance_id);
    }
}
