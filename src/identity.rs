//! Stable handles for live document nodes
//!
//! The host hands nodes out as `Arc<N>`. The index only keeps `Weak<N>`
//! so a deleted equation is freed as soon as the host drops it; the handle
//! it had is never given to another node.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Handle of a frozen fragment, unique within one document
pub type FragmentHandle = u64;

/// Side-table from node identity to fragment handle
///
/// Not synchronized on its own: it lives behind the snapshot cache's
/// per-document lock so handle allocation and storage happen together.
pub struct IdentityIndex<N> {
    /// Node address -> handle
    by_address: HashMap<usize, FragmentHandle>,
    /// Handle -> node, used for liveness checks
    by_handle: HashMap<FragmentHandle, Weak<N>>,
    next: FragmentHandle,
}

impl<N> Default for IdentityIndex<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> IdentityIndex<N> {
    pub fn new() -> Self {
        Self {
            by_address: HashMap::new(),
            by_handle: HashMap::new(),
            next: 0,
        }
    }

    /// Handle of `node`, allocating the next one on first sight
    pub fn id_of(&mut self, node: &Arc<N>) -> FragmentHandle {
        let address = address_of(node);

        if let Some(&handle) = self.by_address.get(&address) {
            let same_node = self
                .by_handle
                .get(&handle)
                .and_then(Weak::upgrade)
                .is_some_and(|live| Arc::ptr_eq(&live, node));
            if same_node {
                return handle;
            }
        }

        let handle = self.next;
        self.next += 1;
        self.by_address.insert(address, handle);
        self.by_handle.insert(handle, Arc::downgrade(node));
        handle
    }

    /// Node currently mapped to `handle`, if it is still alive
    pub fn resolve(&self, handle: FragmentHandle) -> Option<Arc<N>> {
        self.by_handle.get(&handle).and_then(Weak::upgrade)
    }

    pub fn is_live(&self, handle: FragmentHandle) -> bool {
        self.by_handle
            .get(&handle)
            .is_some_and(|node| node.strong_count() > 0)
    }

    /// Drop associations whose node is gone. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.by_handle.len();
        self.by_handle.retain(|_, node| node.strong_count() > 0);

        let by_handle = &self.by_handle;
        self.by_address.retain(|_, handle| by_handle.contains_key(handle));

        before - self.by_handle.len()
    }

    /// Number of node associations currently held (live or not yet pruned)
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

fn address_of<N>(node: &Arc<N>) -> usize {
    Arc::as_ptr(node) as usize
}
