//! The reference registry: for each locally-owned computation, the work
//! item plus the set of peers currently holding a handle to it (§3, §4.3).

use crate::id::{ProcessId, Rid};
use crate::value::Value;
use crate::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::oneshot;

/// `sync` waits for completion and returns the handle itself; `fetch` waits
/// for completion and returns the computed value (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Sync,
    Fetch,
}

/// One party awaiting a work item's completion: a suspended local task, or
/// a peer that asked over the wire.
pub enum NotifyTarget {
    Local(oneshot::Sender<Value>),
    Remote(ProcessId),
}

/// The owner-side record of one remote computation (§3, "Work item").
pub struct WorkItem {
    pub rid: Rid,
    pub done: bool,
    pub result: Option<Value>,
    /// True once this item's result has been replaced by the weak-boxed
    /// global object wrapper (§4.7); guards invariant 3's one mutation.
    pub is_global_object: bool,
    pub notify: Vec<(Verb, NotifyTarget)>,
    pub clients: HashSet<ProcessId>,
}

impl WorkItem {
    pub fn new(rid: Rid, first_client: ProcessId) -> Self {
        let mut clients = HashSet::new();
        clients.insert(first_client);
        Self {
            rid,
            done: false,
            result: None,
            is_global_object: false,
            notify: Vec::new(),
            clients,
        }
    }
}

/// Map from remote-reference identifier to its work item, for computations
/// owned by this process.
#[derive(Default)]
pub struct Registry {
    items: HashMap<(ProcessId, u64), WorkItem>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            items: HashMap::default(),
        }
    }

    pub fn insert(&mut self, item: WorkItem) {
        self.items.insert(item.rid.key(), item);
    }

    pub fn get(&self, rid: Rid) -> Option<&WorkItem> {
        self.items.get(&rid.key())
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut WorkItem> {
        self.items.get_mut(&rid.key())
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.items.contains_key(&rid.key())
    }

    /// Adds `peer` to `rid`'s client set (§4.4's `add_client`). A no-op if
    /// the work item is gone (it cannot be: the caller always holds a
    /// reference that kept it registered) or `peer` is already a member.
    pub fn add_client(&mut self, rid: Rid, peer: ProcessId) {
        if let Some(item) = self.items.get_mut(&rid.key()) {
            item.clients.insert(peer);
        }
    }

    /// Removes `peer` from `rid`'s client set. Does *not* remove the work
    /// item even if the set becomes empty: ordinary items are removed
    /// immediately by the caller (invariant 7), but the global object needs
    /// to run its finalizer first (§4.7) and may get revived before the
    /// caller decides. Returns whether the set is now empty, or `None` if
    /// there is no such work item.
    pub fn del_client(&mut self, rid: Rid, peer: ProcessId) -> Option<bool> {
        let item = self.items.get_mut(&rid.key())?;
        item.clients.remove(&peer);
        Some(item.clients.is_empty())
    }

    /// Unconditionally drops `rid`'s work item from the registry.
    pub fn remove(&mut self, rid: Rid) {
        self.items.remove(&rid.key());
    }

    pub fn is_empty_of_clients(&self, rid: Rid) -> bool {
        self.items
            .get(&rid.key())
            .map(|item| item.clients.is_empty())
            .unwrap_or(true)
    }

    /// Finds this process's own global-object work item, if it has
    /// constructed one (§4.7). There is ever at most one.
    pub fn find_global_object(&self) -> Option<Rid> {
        self.items
            .values()
            .find(|item| item.is_global_object)
            .map(|item| item.rid)
    }
}
