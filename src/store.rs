//! # Snapshot Store
//!
//! Per-iteration bounded history of window snapshots for pull-based
//! consumers such as dashboards.
//!
//! Each iteration keeps an append-only ring of its most recent snapshots
//! (oldest evicted past capacity) plus a separate pointer to the latest one,
//! so reading the latest snapshot never scans the history. Snapshots are held
//! behind `Arc` and handed out by reference count, never deep-copied.

use crate::error::WindowError;
use crate::snapshot::{IterationId, WindowedIterationSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

#[derive(Default)]
struct IterationHistory {
    snapshots: Mutex<VecDeque<Arc<WindowedIterationSnapshot>>>,
    latest: RwLock<Option<Arc<WindowedIterationSnapshot>>>,
}

impl IterationHistory {
    fn append(&self, snapshot: &Arc<WindowedIterationSnapshot>, capacity: usize) {
        let mut snapshots = self.snapshots.lock();
        snapshots.push_back(Arc::clone(snapshot));
        while snapshots.len() > capacity {
            snapshots.pop_front();
        }
        *self.latest.write() = Some(Arc::clone(snapshot));
    }
}

/// Bounded snapshot history keyed by iteration
pub struct SnapshotStore {
    capacity: usize,
    iterations: RwLock<HashMap<IterationId, Arc<IterationHistory>>>,
}

impl SnapshotStore {
    /// Create a store keeping at most `capacity` snapshots per iteration
    pub fn new(capacity: usize) -> Result<Self, WindowError> {
        if capacity == 0 {
            return Err(WindowError::InvalidConfig(
                "snapshot history capacity must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            capacity,
            iterations: RwLock::new(HashMap::new()),
        })
    }

    /// Snapshots kept per iteration
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a snapshot to its iteration's history and make it the latest
    ///
    /// The append happens under the map guard, so a concurrent `remove` of
    /// the same iteration either sees the snapshot or runs before it, in
    /// which case the snapshot starts a fresh history.
    ///
    /// ## Returns
    ///
    /// The stored snapshot, shared with the store.
    pub fn push(&self, snapshot: WindowedIterationSnapshot) -> Arc<WindowedIterationSnapshot> {
        let snapshot = Arc::new(snapshot);
        let id = snapshot.iteration_id;

        let appended = match self.iterations.read().get(&id) {
            Some(history) => {
                history.append(&snapshot, self.capacity);
                true
            }
            None => false,
        };
        if !appended {
            self.iterations
                .write()
                .entry(id)
                .or_default()
                .append(&snapshot, self.capacity);
        }

        trace!(
            "Stored window {} for iteration {}",
            snapshot.window_sequence,
            snapshot.iteration_id
        );
        snapshot
    }

    /// Most recent snapshot of an iteration without scanning its history
    ///
    /// ## Returns
    ///
    /// `None` when nothing has been stored for `id`.
    pub fn latest(&self, id: IterationId) -> Option<Arc<WindowedIterationSnapshot>> {
        let history = self.iterations.read().get(&id).cloned()?;
        let latest = history.latest.read().clone();
        latest
    }

    /// Copy of the retained history, oldest first
    pub fn history(&self, id: IterationId) -> Vec<Arc<WindowedIterationSnapshot>> {
        match self.iterations.read().get(&id).cloned() {
            Some(history) => history.snapshots.lock().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Number of retained snapshots for an iteration
    pub fn count(&self, id: IterationId) -> usize {
        self.iterations
            .read()
            .get(&id)
            .map_or(0, |history| history.snapshots.lock().len())
    }

    /// Forget an iteration. Returns false if it was unknown.
    pub fn remove(&self, id: IterationId) -> bool {
        self.iterations.write().remove(&id).is_some()
    }

    /// Forget every iteration
    pub fn clear(&self) {
        self.iterations.write().clear();
    }

    /// Ids of all iterations with stored snapshots, sorted
    pub fn iteration_ids(&self) -> Vec<IterationId> {
        let mut ids: Vec<IterationId> = self.iterations.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of iterations with at least one stored snapshot
    pub fn len(&self) -> usize {
        self.iterations.read().len()
    }

    /// True when no iteration has stored snapshots
    pub fn is_empty(&self) -> bool {
        self.iterations.read().is_empty()
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("capacity", &self.capacity)
            .field("iterations", &self.len())
            .finish()
    }
}
