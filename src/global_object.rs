//! The global object: a peer-replicated value whose handles form the one
//! cycle this runtime tolerates (§3, §4.7, §9 "Cyclic handle graph").
//!
//! Every process owns exactly one instance, reached through a fixed-length
//! table of every peer's identifier. The table stores plain `Rid`s, not
//! handles: identifiers are always recoverable (§3), and a bare value with
//! no `Drop` is what actually gives the "weak" discipline (never auto-send
//! `del_client`) -- a real `Weak<Inner>` is process-local and cannot stand
//! for a remote instance anyway. When this process's own instance stops
//! having clients, its finalizer takes on the job the table opted out of
//! and explicitly tells every peer to drop us.

use crate::id::{ProcessId, Rid};
use crate::registry::WorkItem;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::wire::DoOp;
use crate::HashMap;

/// Reserved function name for constructing an empty local instance. Goes
/// through the ordinary `CALL` path (not `:do`) because, unlike the other
/// control operations in §6's table, the caller needs the resulting handle
/// back (§4.7 step 1-2); see DESIGN.md for this reconciliation.
pub const EMPTY_GLOBAL_OBJECT_FN: &str = "__empty_global_object__";

pub struct GlobalState {
    pub rid: Rid,
    pub peer_table: HashMap<ProcessId, Rid>,
}

/// Handles a `CALL` to [`EMPTY_GLOBAL_OBJECT_FN`]: constructs this
/// process's own instance (empty peer table, to be filled in by
/// `init_global_object`) and returns it done immediately -- construction
/// never suspends.
pub fn construct_local(rt: &Runtime, rid: Rid) -> Value {
    let mut item = WorkItem::new(rid, rid.whence);
    item.done = true;
    item.is_global_object = true;
    item.result = Some(Value::Unit);
    rt.registry_mut().insert(item);
    Value::Handle(rt.unique_handle(rid))
}

/// Orchestrates creation across the whole cluster (§4.7): calls
/// `empty_global_object` on every process, collects the handles, then
/// broadcasts `init_global_object` with all of their identifiers. Only the
/// initiator (process 0) is expected to run this.
pub async fn create(rt: &Runtime, processes: &[ProcessId]) {
    let mut handles = Vec::with_capacity(processes.len());
    for &p in processes {
        let handle = rt.remote_call(p, EMPTY_GLOBAL_OBJECT_FN.to_string(), Vec::new());
        // constructing an instance never suspends, but `sync` still gives us
        // the uniformity of going through the normal completion path.
        handle.sync().await;
        handles.push(handle.rid());
    }
    for &p in processes {
        rt.remote_do(
            p,
            DoOp::InitGlobalObject {
                rids: handles.clone(),
            },
        );
    }
}

/// Handles `init_global_object(rids)` (§4.7): binds the local instance's
/// peer table from the provided identifiers.
pub fn handle_init(rt: &Runtime, rids: Vec<Rid>) {
    let own_rid = match rt.registry().find_global_object() {
        Some(rid) => rid,
        None => {
            tracing::warn!("init_global_object before this process constructed its own instance");
            return;
        }
    };
    let mut peer_table = HashMap::default();
    for rid in rids {
        if rid.owner == rt.me() {
            // that's our own instance; no need for a self-reference.
            continue;
        }
        peer_table.insert(rid.owner, rid);
    }
    rt.install_global_state(GlobalState {
        rid: own_rid,
        peer_table,
    });
}

/// Runs when this process's own global-object work item's client set
/// becomes empty (§4.7, "self-reviving finalizer"): broadcasts
/// `del_client` to every peer named in the peer table (since those entries
/// never do it themselves). Unlike an ordinary work item, the entry itself
/// is never removed from the registry even once its client set is empty --
/// it is this process's one persistent instance, and the "self-reviving"
/// part is exactly that a peer taking a fresh handle on it later needs
/// nothing more than the entry still being there (invariant 1 is
/// deliberately exempted for this one case, per §1).
pub fn finalize(rt: &Runtime, rid: Rid) {
    let _ = rid;
    let peer_rids: Vec<Rid> = rt
        .with_global_state(|g| g.peer_table.values().copied().collect())
        .unwrap_or_default();

    for peer_rid in peer_rids {
        rt.del_client(peer_rid, rt.me());
    }
}

/// Rewrites an outbound global-object identifier for `target`'s benefit
/// (§4.7's wire shortcut): if `rid` denotes some process's global-object
/// instance and `target` already holds its own copy, swap in `target`'s own
/// canonical `Rid` before it is encoded. The receiver then sees an
/// identifier it already owns, so the ordinary owner-shortcut in
/// `note_outbound_handle`/`rehydrate_handle` suppresses `add_client`
/// entirely -- no separate bookkeeping is needed here. Any other value
/// passes through unchanged.
pub(crate) fn translate_for_target(rt: &Runtime, rid: Rid, target: ProcessId) -> Rid {
    let is_own = rt.registry().find_global_object() == Some(rid);
    let is_peer = rt
        .with_global_state(|g| g.peer_table.values().any(|&peer_rid| peer_rid == rid))
        .unwrap_or(false);
    if !is_own && !is_peer {
        return rid;
    }
    if target == rt.me() {
        return rt.registry().find_global_object().unwrap_or(rid);
    }
    rt.with_global_state(|g| g.peer_table.get(&target).copied())
        .flatten()
        .unwrap_or(rid)
}
