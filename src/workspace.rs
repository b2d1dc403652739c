//! Exclusive, identity-bound workspaces.
//!
//! Acquiring a workspace takes two locks: one shared by every thread of this
//! process, and an advisory file lock which extends the exclusion to other
//! processes using the same workspace root. Both block on contention.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Condvar, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::WorkspaceError;
use crate::identity::WorkIdentity;

#[derive(Debug, Default)]
struct Slot {
    busy: Mutex<bool>,
    released: Condvar,
}

/// Hands out one [`Workspace`] per identity at a time.
#[derive(Debug)]
pub struct WorkspaceCoordinator {
    root: Utf8PathBuf,
    slots: Slots,
}

type Slots = Arc<Mutex<HashMap<WorkIdentity, Arc<Slot>>>>;

impl WorkspaceCoordinator {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            slots: Slots::default(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// The workspace location of `identity`, stable across builds.
    pub fn path_for(&self, identity: &WorkIdentity) -> Utf8PathBuf {
        let hex = identity.fingerprint().to_hex();
        self.root.join(&hex[..2]).join(&hex)
    }

    /// Blocks until no other attempt holds the workspace of `identity`.
    pub fn acquire(&self, identity: &WorkIdentity) -> Result<Workspace, WorkspaceError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(identity.clone()).or_default().clone()
        };

        {
            let mut busy = slot.busy.lock().unwrap_or_else(|e| e.into_inner());
            while *busy {
                busy = slot.released.wait(busy).unwrap_or_else(|e| e.into_inner());
            }
            *busy = true;
        }
        // From here on the slot is ours; the guard gives it back on every path.
        let local = LocalGuard {
            identity: identity.clone(),
            slot,
            slots: self.slots.clone(),
        };

        let path = self.path_for(identity);
        fs::create_dir_all(&path).map_err(|e| WorkspaceError::Io(path.clone(), e))?;

        let lock_path = path.with_extension("lock");
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| WorkspaceError::Io(lock_path.clone(), e))?;
        lock.lock().map_err(|e| WorkspaceError::Io(lock_path, e))?;

        tracing::debug!("acquired workspace {} for {}", path, identity);

        Ok(Workspace {
            identity: identity.clone(),
            path,
            lock,
            _local: local,
        })
    }
}

struct LocalGuard {
    identity: WorkIdentity,
    slot: Arc<Slot>,
    slots: Slots,
}

impl Drop for LocalGuard {
    fn drop(&mut self) {
        // Waiters clone the slot under this lock, so the count can't grow
        // while it's held.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        let mut busy = self.slot.busy.lock().unwrap_or_else(|e| e.into_inner());
        *busy = false;
        self.slot.released.notify_one();
        drop(busy);

        // One reference in the map, one here.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.identity);
        }
    }
}

/// A workspace held exclusively until dropped.
pub struct Workspace {
    identity: WorkIdentity,
    path: Utf8PathBuf,
    lock: fs::File,
    // Dropped after the file lock is released.
    _local: LocalGuard,
}

impl Workspace {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn identity(&self) -> &WorkIdentity {
        &self.identity
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            tracing::warn!("couldn't unlock workspace {}: {}", self.path, e);
        }
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("identity", &self.identity)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
