//! Frozen equation fragments per document
//!
//! Every time the editor displays an equation, its subtree is serialized
//! and stored under the node's handle. The image request that follows
//! resolves the handle to this text, never to the live node, so later
//! edits cannot race with rendering.
//!
//! Entries are not removed when a node is deleted. Instead the map is
//! compacted once it grows past twice the size it had after the previous
//! compaction, keeping only handles whose node is still alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SnapshotConfig;
use crate::error::SerializationError;
use crate::identity::{FragmentHandle, IdentityIndex};
use crate::traits::DocumentController;

/// Snapshot cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Stored fragments
    pub entries: usize,
    /// Entry count after the last compaction (floored)
    pub watermark: usize,
    /// Node associations held by the identity index
    pub tracked_nodes: usize,
    /// Compaction passes run so far
    pub compactions: u64,
}

struct SnapshotState<N> {
    index: IdentityIndex<N>,
    fragments: HashMap<FragmentHandle, String>,
    watermark: usize,
    compactions: u64,
}

impl<N> SnapshotState<N> {
    /// Keep only fragments whose node is alive, then move the watermark.
    /// Runs under the document lock together with the insert that triggered it.
    fn compact(&mut self, min_watermark: usize) {
        let before = self.fragments.len();

        let index = &self.index;
        self.fragments.retain(|handle, _| index.is_live(*handle));
        let pruned = self.index.prune();

        self.watermark = self.fragments.len().max(min_watermark);
        self.compactions += 1;

        tracing::debug!(
            before = before,
            after = self.fragments.len(),
            pruned_nodes = pruned,
            watermark = self.watermark,
            "Compacted fragment cache"
        );
    }
}

/// Per-document cache of frozen MathML fragments
pub struct FragmentSnapshotCache<C: DocumentController> {
    controller: Arc<C>,
    state: Mutex<SnapshotState<C::Node>>,
    min_watermark: usize,
}

impl<C: DocumentController> FragmentSnapshotCache<C> {
    pub fn new(controller: Arc<C>, config: &SnapshotConfig) -> Self {
        let min_watermark = config.min_watermark;
        Self {
            controller,
            state: Mutex::new(SnapshotState {
                index: IdentityIndex::new(),
                fragments: HashMap::new(),
                watermark: min_watermark,
                compactions: 0,
            }),
            min_watermark,
        }
    }

    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    /// Freeze the current XML of `node` and return its handle
    ///
    /// On serialization failure nothing is stored and any earlier snapshot
    /// of the node stays valid. The controller is called with the document
    /// lock held and must not call back into this cache.
    pub fn freeze(&self, node: &Arc<C::Node>) -> Result<FragmentHandle, SerializationError> {
        // Held across serialization so the last freeze of a node is the one stored.
        let mut state = self.state.lock();
        let handle = state.index.id_of(node);

        let xml = self.controller.serialize_subtree(node).map_err(|e| {
            tracing::warn!(handle = handle, error = %e, "Failed to freeze MathML fragment");
            e
        })?;

        state.fragments.insert(handle, xml);
        if state.fragments.len() > 2 * state.watermark {
            state.compact(self.min_watermark);
        }

        Ok(handle)
    }

    /// Most recent snapshot stored under `handle`
    pub fn lookup(&self, handle: FragmentHandle) -> Option<String> {
        self.state.lock().fragments.get(&handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().fragments.is_empty()
    }

    pub fn watermark(&self) -> usize {
        self.state.lock().watermark
    }

    pub fn stats(&self) -> SnapshotStats {
        let state = self.state.lock();
        SnapshotStats {
            entries: state.fragments.len(),
            watermark: state.watermark,
            tracked_nodes: state.index.len(),
            compactions: state.compactions,
        }
    }
}
