//! Remote-reference handles and the weak-keyed uniquing table that backs
//! distributed reference counting (§4.4).

use crate::id::{ProcessId, Rid};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

struct Inner {
    rid: Rid,
    rt: Runtime,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The last local strong holder is gone: tell the owner (or apply
        // locally if we are the owner). This runs synchronously on the
        // event-loop thread because `Rc`/`RefCell` are `!Send`, which is
        // exactly the marshalling §5 asks for -- there is no other thread
        // this could run on.
        self.rt.on_handle_drop(self.rid);
    }
}

/// A strong remote-reference handle. Strong handles participate in
/// distributed reference counting: dropping the last clone sends
/// `del_client` to the owner.
#[derive(Clone)]
pub struct Handle(Rc<Inner>);

impl Handle {
    pub fn rid(&self) -> Rid {
        self.0.rid
    }

    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle(Rc::downgrade(&self.0))
    }

    /// Waits for the underlying computation to finish and returns `self`
    /// back (§4.5's `sync`): useful when all that matters is that the
    /// computation ran, or when the caller already has the handle and just
    /// wants the "done" barrier.
    pub async fn sync(&self) -> Handle {
        self.0.rt.sync(self.rid()).await
    }

    /// Waits for the underlying computation to finish and returns its
    /// result (§4.5's `fetch`).
    pub async fn fetch(&self) -> Value {
        self.0.rt.fetch(self.rid()).await
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0.rid)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.rid() == other.rid()
    }
}
impl Eq for Handle {}

/// A weak handle: denotes the same remote-reference identifier but never
/// sends deletion messages and never keeps the strong handle alive. Used for
/// the global object's peer table (§4.7), the only cycle this runtime
/// tolerates.
#[derive(Clone)]
pub struct WeakHandle(Weak<Inner>);

impl WeakHandle {
    pub fn upgrade(&self) -> Option<Handle> {
        self.0.upgrade().map(Handle)
    }

    pub fn rid(&self) -> Option<Rid> {
        self.0.upgrade().map(|inner| inner.rid)
    }
}

impl fmt::Debug for WeakHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakHandle({:?})", self.rid())
    }
}

/// Weak-keyed table uniquing handles by `(whence, id)`: reconstructing a
/// handle for an identifier that is already live returns the existing
/// handle, so the strong count -- and therefore the eventual `del_client`
/// count -- stays exactly one per process (§4.4, §9 "Weak-keyed uniquing").
#[derive(Default)]
pub struct HandleTable {
    live: HashMap<(ProcessId, u64), WeakHandle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            live: HashMap::default(),
        }
    }

    /// Returns the unique strong handle for `rid`, constructing one (and
    /// registering it) if none is currently live.
    pub fn unique(&mut self, rid: Rid, rt: &Runtime) -> Handle {
        let key = rid.key();
        if let Some(weak) = self.live.get(&key) {
            if let Some(handle) = weak.upgrade() {
                return handle;
            }
        }
        let handle = Handle(Rc::new(Inner {
            rid,
            rt: rt.clone(),
        }));
        self.live.insert(key, handle.downgrade());
        handle
    }
}
